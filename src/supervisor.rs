//! Service executor: owns the child process for the lifetime of the hosted
//! service and answers the host's control requests.
//!
//! ```text
//! StartPending → Running ⇄ (respawn, status unchanged) → StopPending → Stopped
//! ```

use std::io;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, select};

use crate::child::{ChildExit, ChildProcess, exit_error};
use crate::config::ServiceDescriptor;
use crate::error::ServiceError;
use crate::sink::SinkHandle;
use crate::status::{ControlRequest, ExitReason, StatusReport, StatusReporter};

/// Restart budget and stop grace for the supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Window, measured from an unexpected exit, in which respawns are attempted.
    pub restart_timeout: Duration,
    /// Delay between respawn attempts.
    pub restart_delay: Duration,
    /// How long a stopping child may take before it is killed.
    pub stop_grace: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            restart_timeout: Duration::from_secs(10),
            restart_delay: Duration::from_secs(1),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Host-resident executor for one service.
pub struct Supervisor {
    descriptor: ServiceDescriptor,
    sink: SinkHandle,
    child: Option<ChildProcess>,
    policy: RestartPolicy,
}

impl Supervisor {
    pub fn new(descriptor: ServiceDescriptor, sink: SinkHandle) -> Self {
        Self {
            descriptor,
            sink,
            child: None,
            policy: RestartPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run until stopped; Stopped is reported on every exit path and the
    /// sink is closed before returning.
    pub fn execute(
        mut self,
        requests: &Receiver<ControlRequest>,
        status: &mut dyn StatusReporter,
    ) -> ExitReason {
        status.report(StatusReport::start_pending());
        let reason = {
            let _close = self.sink.close_guard();
            self.supervise(requests, status)
        };
        log::info!("Service {} exiting: {reason:?}", self.descriptor.name);
        status.report(StatusReport::stopped(reason));
        reason
    }

    fn supervise(
        &mut self,
        requests: &Receiver<ControlRequest>,
        status: &mut dyn StatusReporter,
    ) -> ExitReason {
        if let Err(e) = self.spawn_child() {
            self.note_error(&format!("Failed to start process: {e}"));
            return ExitReason::SpawnFailed;
        }
        self.note("Process started");
        status.report(StatusReport::running());

        loop {
            let Some(exited) = self.child.as_ref().map(ChildProcess::exit_notification) else {
                // Only reachable if a respawn left no child behind.
                return ExitReason::RestartBudgetExhausted;
            };

            select! {
                recv(requests) -> request => match request {
                    Ok(ControlRequest::Stop | ControlRequest::Shutdown) => {
                        status.report(StatusReport::stop_pending());
                        self.stop_child();
                        return ExitReason::Requested;
                    }
                    Ok(other) => {
                        self.note_error(&format!("Unexpected control request #{}", other.code()));
                    }
                    Err(_) => {
                        self.note_error("Service host disconnected");
                        status.report(StatusReport::stop_pending());
                        self.stop_child();
                        return ExitReason::HostDisconnected;
                    }
                },
                recv(exited) -> exit => {
                    self.child = None;
                    let exit = exit.unwrap_or_else(|_| Err(io::Error::other("exit notification lost")));
                    self.note_unexpected_exit(&exit);
                    if let Some(reason) = self.restart_child(requests, status) {
                        return reason;
                    }
                }
            }
        }
    }

    /// Respawn within the restart budget. `Some` ends the service.
    fn restart_child(
        &mut self,
        requests: &Receiver<ControlRequest>,
        status: &mut dyn StatusReporter,
    ) -> Option<ExitReason> {
        let deadline = Instant::now() + self.policy.restart_timeout;
        loop {
            if Instant::now() > deadline {
                self.note_error("Timeout waiting for process to restart exceeded");
                return Some(ExitReason::RestartBudgetExhausted);
            }

            match self.spawn_child() {
                Ok(()) => {
                    self.note("Process restarted");
                    return None;
                }
                Err(e) => self.note_error(&format!("Failed to start process: {e}, retrying")),
            }

            // The retry delay doubles as a wait on the control channel.
            match requests.recv_timeout(self.policy.restart_delay) {
                Ok(ControlRequest::Stop | ControlRequest::Shutdown) => {
                    status.report(StatusReport::stop_pending());
                    self.note("Process stopped");
                    return Some(ExitReason::Requested);
                }
                Ok(other) => {
                    self.note_error(&format!("Unexpected control request #{}", other.code()));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.note_error("Service host disconnected");
                    return Some(ExitReason::HostDisconnected);
                }
            }
        }
    }

    fn spawn_child(&mut self) -> Result<(), ServiceError> {
        debug_assert!(self.child.is_none(), "previous child still supervised");
        let child = ChildProcess::spawn(
            &self.descriptor.child_exec_path,
            &self.descriptor.child_exec_args,
            &self.sink,
        )?;
        self.child = Some(child);
        Ok(())
    }

    fn stop_child(&mut self) {
        if let Some(child) = self.child.take()
            && let Err(e) = child.terminate(self.policy.stop_grace)
        {
            self.note_error(&format!("Failed to stop process: {e}"));
        }
        self.note("Process stopped");
    }

    fn note_unexpected_exit(&self, exit: &ChildExit) {
        match exit_error(exit) {
            Some(reason) => {
                self.note_error(&format!("Process exited with error: {reason}, attempting restart"))
            }
            None => self.note_error("Process exited, attempting restart"),
        }
    }

    fn note(&self, msg: &str) {
        log::debug!("{}: {msg}", self.descriptor.name);
        self.sink.line(msg);
    }

    fn note_error(&self, msg: &str) {
        log::warn!("{}: {msg}", self.descriptor.name);
        self.sink.line(msg);
    }
}
