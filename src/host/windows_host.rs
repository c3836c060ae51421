//! Windows service host: registers the executor with the service control
//! dispatcher and relays control codes and status reports.

use std::ffi::c_void;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Sender, unbounded};
use once_cell::sync::OnceCell;
use windows::Win32::Foundation::{
    ERROR_CALL_NOT_IMPLEMENTED, ERROR_FAILED_SERVICE_CONTROLLER_CONNECT,
    ERROR_SERVICE_SPECIFIC_ERROR, NO_ERROR,
};
use windows::Win32::System::Services::{
    RegisterServiceCtrlHandlerExW, SERVICE_ACCEPT_SHUTDOWN, SERVICE_ACCEPT_STOP, SERVICE_RUNNING,
    SERVICE_START_PENDING, SERVICE_STATUS, SERVICE_STATUS_CURRENT_STATE, SERVICE_STATUS_HANDLE,
    SERVICE_STOP_PENDING, SERVICE_STOPPED, SERVICE_TABLE_ENTRYW, SERVICE_WIN32_OWN_PROCESS,
    SetServiceStatus, StartServiceCtrlDispatcherW,
};
use windows::core::{PCWSTR, PWSTR};

use crate::config::ServiceDescriptor;
use crate::status::{ControlRequest, ServiceState, StatusReport, StatusReporter};

// The dispatcher calls back through plain function pointers, so the
// descriptor and request channel live in process-wide cells.
static DESCRIPTOR: OnceCell<ServiceDescriptor> = OnceCell::new();
static REQUESTS: OnceCell<Sender<ControlRequest>> = OnceCell::new();

/// Covers the stop grace plus the final log flush.
const PENDING_WAIT_HINT: Duration = Duration::from_secs(15);

/// Outcome of handing the process to the service dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The service ran and has stopped.
    Completed,
    /// The process was not started by the service control manager.
    NotAService,
}

/// Block in the service control dispatcher until the service stops.
pub fn run_service(descriptor: ServiceDescriptor) -> Result<Dispatch> {
    let mut name: Vec<u16> = descriptor.name.encode_utf16().chain(Some(0)).collect();
    DESCRIPTOR
        .set(descriptor)
        .map_err(|_| anyhow::anyhow!("Service dispatcher already started"))?;

    let table = [
        SERVICE_TABLE_ENTRYW {
            lpServiceName: PWSTR(name.as_mut_ptr()),
            lpServiceProc: Some(service_main),
        },
        SERVICE_TABLE_ENTRYW::default(),
    ];

    match unsafe { StartServiceCtrlDispatcherW(table.as_ptr()) } {
        Ok(()) => Ok(Dispatch::Completed),
        Err(e) if e.code() == ERROR_FAILED_SERVICE_CONTROLLER_CONNECT.to_hresult() => {
            Ok(Dispatch::NotAService)
        }
        Err(e) => Err(e).context("Failed to start service"),
    }
}

unsafe extern "system" fn service_main(_argc: u32, _argv: *mut PWSTR) {
    let Some(descriptor) = DESCRIPTOR.get().cloned() else {
        return;
    };

    let (tx, rx) = unbounded::<ControlRequest>();
    if REQUESTS.set(tx).is_err() {
        log::error!("Service {} started twice in one process", descriptor.name);
        return;
    }

    let name: Vec<u16> = descriptor.name.encode_utf16().chain(Some(0)).collect();
    let handle = match unsafe {
        RegisterServiceCtrlHandlerExW(PCWSTR(name.as_ptr()), Some(control_handler), None)
    } {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("Failed to register control handler for {}: {e}", descriptor.name);
            return;
        }
    };

    let mut reporter = ScmReporter {
        handle,
        checkpoint: 0,
    };
    super::supervisor_for(descriptor).execute(&rx, &mut reporter);
}

unsafe extern "system" fn control_handler(
    control: u32,
    _event_type: u32,
    _event_data: *mut c_void,
    _context: *mut c_void,
) -> u32 {
    match ControlRequest::from_code(control) {
        ControlRequest::Interrogate => NO_ERROR.0,
        request => match REQUESTS.get() {
            Some(tx) if tx.send(request).is_ok() => NO_ERROR.0,
            _ => ERROR_CALL_NOT_IMPLEMENTED.0,
        },
    }
}

fn raw_state(state: ServiceState) -> SERVICE_STATUS_CURRENT_STATE {
    match state {
        ServiceState::Stopped => SERVICE_STOPPED,
        ServiceState::StartPending => SERVICE_START_PENDING,
        ServiceState::StopPending => SERVICE_STOP_PENDING,
        ServiceState::Running => SERVICE_RUNNING,
        ServiceState::Other(code) => SERVICE_STATUS_CURRENT_STATE(code),
    }
}

/// Forwards executor status to `SetServiceStatus`.
struct ScmReporter {
    handle: SERVICE_STATUS_HANDLE,
    checkpoint: u32,
}

impl StatusReporter for ScmReporter {
    fn report(&mut self, status: StatusReport) {
        let pending = matches!(
            status.state,
            ServiceState::StartPending | ServiceState::StopPending
        );
        self.checkpoint = if pending { self.checkpoint + 1 } else { 0 };

        let raw = SERVICE_STATUS {
            dwServiceType: SERVICE_WIN32_OWN_PROCESS,
            dwCurrentState: raw_state(status.state),
            dwControlsAccepted: if status.accepts_stop {
                SERVICE_ACCEPT_STOP | SERVICE_ACCEPT_SHUTDOWN
            } else {
                0
            },
            dwWin32ExitCode: if status.exit_code == 0 {
                NO_ERROR.0
            } else {
                ERROR_SERVICE_SPECIFIC_ERROR.0
            },
            dwServiceSpecificExitCode: status.exit_code,
            dwCheckPoint: self.checkpoint,
            dwWaitHint: if pending {
                PENDING_WAIT_HINT.as_millis() as u32
            } else {
                0
            },
        };

        if let Err(e) = unsafe { SetServiceStatus(self.handle, &raw) } {
            log::error!("Failed to report {} to service manager: {e}", status.state);
        }
    }
}
