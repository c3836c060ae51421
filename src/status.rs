//! Service states, control requests and the status-report seam to the host.

use std::fmt;

/// Service state as observed by, or reported to, the OS service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    /// Any other manager state (paused, continue-pending, ...), raw code kept.
    Other(u32),
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Stopped => f.write_str("stopped"),
            ServiceState::StartPending => f.write_str("start pending"),
            ServiceState::StopPending => f.write_str("stop pending"),
            ServiceState::Running => f.write_str("running"),
            ServiceState::Other(code) => write!(f, "state #{code}"),
        }
    }
}

/// Control request delivered by the service host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Stop,
    Shutdown,
    Interrogate,
    Other(u32),
}

impl ControlRequest {
    /// Numeric control code as the Windows service manager numbers them.
    pub fn code(self) -> u32 {
        match self {
            ControlRequest::Stop => 1,
            ControlRequest::Interrogate => 4,
            ControlRequest::Shutdown => 5,
            ControlRequest::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ControlRequest::Stop,
            4 => ControlRequest::Interrogate,
            5 => ControlRequest::Shutdown,
            other => ControlRequest::Other(other),
        }
    }
}

/// Why the executor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Stop or Shutdown was requested.
    Requested,
    /// The very first spawn failed; never retried.
    SpawnFailed,
    /// Respawn attempts ran past the restart budget.
    RestartBudgetExhausted,
    /// The host dropped its end of the control channel.
    HostDisconnected,
}

impl ExitReason {
    /// Service-specific exit code; 0 is a clean stop.
    pub fn exit_code(self) -> u32 {
        match self {
            ExitReason::Requested => 0,
            ExitReason::SpawnFailed => 1,
            ExitReason::RestartBudgetExhausted => 2,
            ExitReason::HostDisconnected => 3,
        }
    }
}

/// One status report from the executor to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub state: ServiceState,
    /// Whether Stop/Shutdown are accepted in this state.
    pub accepts_stop: bool,
    pub exit_code: u32,
}

impl StatusReport {
    pub fn start_pending() -> Self {
        Self {
            state: ServiceState::StartPending,
            accepts_stop: false,
            exit_code: 0,
        }
    }

    pub fn running() -> Self {
        Self {
            state: ServiceState::Running,
            accepts_stop: true,
            exit_code: 0,
        }
    }

    pub fn stop_pending() -> Self {
        Self {
            state: ServiceState::StopPending,
            accepts_stop: false,
            exit_code: 0,
        }
    }

    pub fn stopped(reason: ExitReason) -> Self {
        Self {
            state: ServiceState::Stopped,
            accepts_stop: false,
            exit_code: reason.exit_code(),
        }
    }
}

/// Status sink provided by the service host.
pub trait StatusReporter {
    fn report(&mut self, status: StatusReport);
}
