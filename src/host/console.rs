//! Foreground host: runs the executor attached to a terminal.
//!
//! SIGINT / Ctrl-C become Shutdown, SIGTERM / Ctrl-Break become Stop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, tick, unbounded};
use log::info;

use crate::config::ServiceDescriptor;
use crate::status::{ControlRequest, ExitReason, StatusReport, StatusReporter};

/// Pending control code from the signal handler; 0 means none.
static RECEIVED_REQUEST: AtomicU32 = AtomicU32::new(0);

const SIGNAL_POLL: Duration = Duration::from_millis(200);

/// Status reports go to the process log.
pub struct LoggingReporter {
    name: String,
}

impl LoggingReporter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl StatusReporter for LoggingReporter {
    fn report(&mut self, status: StatusReport) {
        if status.exit_code == 0 {
            info!("{} → {}", self.name, status.state);
        } else {
            info!("{} → {} (exit code {})", self.name, status.state, status.exit_code);
        }
    }
}

/// Run the service in the foreground until a signal stops it.
pub fn run(descriptor: ServiceDescriptor) -> Result<ExitReason> {
    install_signal_handlers()?;

    let name = descriptor.name.clone();
    let (req_tx, req_rx) = unbounded::<ControlRequest>();
    let (done_tx, done_rx) = bounded::<()>(0);

    let forwarder = thread::Builder::new()
        .name("signal-forwarder".into())
        .spawn(move || {
            let poll = tick(SIGNAL_POLL);
            loop {
                select! {
                    recv(poll) -> _ => {
                        if let Some(request) = check_signals() {
                            info!("Received {request:?}, stopping");
                            if req_tx.send(request).is_err() {
                                break;
                            }
                        }
                    }
                    recv(done_rx) -> _ => break,
                }
            }
        })
        .context("Failed to start signal forwarder")?;

    info!("Running {name} in the foreground (pid {})", std::process::id());
    let mut reporter = LoggingReporter::new(name);
    let reason = super::supervisor_for(descriptor).execute(&req_rx, &mut reporter);

    drop(done_tx);
    let _ = forwarder.join();
    Ok(reason)
}

/// Non‑blocking check – returns Some(request) once per delivered signal.
fn check_signals() -> Option<ControlRequest> {
    match RECEIVED_REQUEST.swap(0, Ordering::AcqRel) {
        0 => None,
        code => Some(ControlRequest::from_code(code)),
    }
}

fn record(request: ControlRequest) {
    RECEIVED_REQUEST.store(request.code(), Ordering::SeqCst);
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn install_signal_handlers() -> Result<()> {
            use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

            extern "C" fn handler(sig: i32) {
                if sig == Signal::SIGTERM as i32 {
                    record(ControlRequest::Stop);
                } else {
                    record(ControlRequest::Shutdown);
                }
            }

            let action = SigAction::new(
                SigHandler::Handler(handler),
                SaFlags::empty(),
                SigSet::empty(),
            );
            for sig in [Signal::SIGINT, Signal::SIGTERM] {
                unsafe { signal::sigaction(sig, &action) }
                    .map_err(|e| anyhow::anyhow!("Failed to register {sig} handler: {e}"))?;
            }
            Ok(())
        }
    } else if #[cfg(target_os = "windows")] {
        fn install_signal_handlers() -> Result<()> {
            use windows::Win32::System::Console::{
                CTRL_BREAK_EVENT, CTRL_C_EVENT, SetConsoleCtrlHandler,
            };
            use windows::core::BOOL;

            unsafe extern "system" fn handler(ctrl_type: u32) -> BOOL {
                if ctrl_type == CTRL_BREAK_EVENT {
                    record(ControlRequest::Stop);
                } else if ctrl_type == CTRL_C_EVENT {
                    record(ControlRequest::Shutdown);
                } else {
                    // close / logoff / shutdown events: let the default handler run too
                    record(ControlRequest::Shutdown);
                    return BOOL(0);
                }
                BOOL(1)
            }

            unsafe { SetConsoleCtrlHandler(Some(handler), true) }
                .map_err(|e| anyhow::anyhow!("Failed to register console control handler: {e}"))
        }
    } else {
        fn install_signal_handlers() -> Result<()> {
            anyhow::bail!("Foreground mode is not supported on this platform")
        }
    }
}
