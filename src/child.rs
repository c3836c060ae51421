//! Supervised child process: spawn, output pumping, exit notification and
//! termination by PID.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};

use crate::error::ServiceError;
use crate::sink::SinkHandle;

/// Result published once per child generation by its waiter thread.
pub type ChildExit = io::Result<ExitStatus>;

const PUMP_BUF: usize = 8 * 1024;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Exit code used for `TerminateProcess` (STATUS_CONTROL_C_EXIT).
#[cfg(target_os = "windows")]
const TERMINATION_EXIT_CODE: u32 = 0xC000_013A;

/// Handle to one live child generation.
#[derive(Debug)]
pub struct ChildProcess {
    pid: u32,
    exited: Receiver<ChildExit>,
}

impl ChildProcess {
    /// Start `program` with stdout and stderr piped verbatim into `sink`.
    pub fn spawn(program: &Path, args: &[String], sink: &SinkHandle) -> Result<Self, ServiceError> {
        let spawn_failed = |source| ServiceError::ChildSpawnFailed {
            path: program.to_path_buf(),
            source,
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(spawn_failed)?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            pump(stdout, sink.clone(), pid, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            pump(stderr, sink.clone(), pid, "stderr");
        }

        let (tx, exited) = bounded::<ChildExit>(1);
        thread::Builder::new()
            .name(format!("child-wait-{pid}"))
            .spawn(move || {
                // Receiver may already be gone after a forced stop.
                let _ = tx.send(child.wait());
            })
            .map_err(spawn_failed)?;

        log::debug!("Spawned {} (pid {pid})", program.display());
        Ok(Self { pid, exited })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// One-shot exit notification for this generation.
    pub fn exit_notification(&self) -> Receiver<ChildExit> {
        self.exited.clone()
    }

    /// Ask the child to exit, then wait for its exit notification.
    ///
    /// A child still alive after `grace` is killed outright. An error carried
    /// by the exit notification wins over a failed termination signal.
    pub fn terminate(self, grace: Duration) -> Result<(), ServiceError> {
        let pid = self.pid;
        let signalled = request_termination(pid).map_err(|e| ServiceError::ChildTerminationFailed {
            pid,
            reason: e.to_string(),
        });

        let exit = match self.exited.recv_timeout(grace) {
            Ok(exit) => exit,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Process {pid} still running after {grace:?}, killing");
                force_kill(pid).map_err(|e| ServiceError::ChildTerminationFailed {
                    pid,
                    reason: e.to_string(),
                })?;
                self.exited.recv().unwrap_or_else(|_| Err(notification_lost()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(notification_lost()),
        };

        match exit {
            Ok(status) if is_requested_termination(&status) => signalled,
            other => match exit_error(&other) {
                Some(reason) => Err(ServiceError::ChildExited(reason)),
                None => signalled,
            },
        }
    }
}

/// Describe a failed exit; `None` for a clean one.
pub fn exit_error(exit: &ChildExit) -> Option<String> {
    match exit {
        Ok(status) if status.success() => None,
        Ok(status) => Some(status.to_string()),
        Err(e) => Some(e.to_string()),
    }
}

fn notification_lost() -> io::Error {
    io::Error::other("exit notification lost")
}

fn pump(mut stream: impl Read + Send + 'static, sink: SinkHandle, pid: u32, name: &'static str) {
    let spawned = thread::Builder::new()
        .name(format!("child-{name}-{pid}"))
        .spawn(move || {
            let mut buf = [0u8; PUMP_BUF];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => sink.append(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::debug!("{name} of process {pid} closed: {e}");
                        break;
                    }
                }
            }
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start {name} pump for process {pid}: {e}");
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        fn send_signal(pid: u32, sig: Signal) -> io::Result<()> {
            kill(Pid::from_raw(pid as i32), sig).map_err(io::Error::from)
        }

        fn request_termination(pid: u32) -> io::Result<()> {
            send_signal(pid, Signal::SIGTERM)
        }

        fn force_kill(pid: u32) -> io::Result<()> {
            send_signal(pid, Signal::SIGKILL)
        }

        fn is_requested_termination(status: &ExitStatus) -> bool {
            use std::os::unix::process::ExitStatusExt;
            matches!(status.signal(), Some(sig) if sig == Signal::SIGTERM as i32 || sig == Signal::SIGKILL as i32)
        }
    } else if #[cfg(target_os = "windows")] {
        fn request_termination(pid: u32) -> io::Result<()> {
            use windows::Win32::Foundation::CloseHandle;
            use windows::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

            unsafe {
                let handle = OpenProcess(PROCESS_TERMINATE, false, pid).map_err(io::Error::other)?;
                let result = TerminateProcess(handle, TERMINATION_EXIT_CODE);
                let _ = CloseHandle(handle);
                result.map_err(io::Error::other)
            }
        }

        fn force_kill(pid: u32) -> io::Result<()> {
            request_termination(pid)
        }

        fn is_requested_termination(status: &ExitStatus) -> bool {
            status.code() == Some(TERMINATION_EXIT_CODE as i32)
        }
    } else {
        fn request_termination(_pid: u32) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "process termination is not supported on this platform"))
        }

        fn force_kill(pid: u32) -> io::Result<()> {
            request_termination(pid)
        }

        fn is_requested_termination(_status: &ExitStatus) -> bool {
            false
        }
    }
}
