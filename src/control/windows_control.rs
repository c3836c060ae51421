//! Windows service control using Service Control Manager (SCM) API

use std::ffi::c_void;
use std::mem;

use windows::Win32::System::Services::{
    ChangeServiceConfig2W, CloseServiceHandle, ControlService, CreateServiceW, DeleteService,
    OpenSCManagerW, OpenServiceW, QueryServiceStatus, SC_HANDLE, SC_MANAGER_ALL_ACCESS,
    SERVICE_ALL_ACCESS, SERVICE_CONFIG_DESCRIPTION, SERVICE_CONTROL_STOP,
    SERVICE_DEMAND_START, SERVICE_DESCRIPTIONW, SERVICE_ERROR_NORMAL, SERVICE_RUNNING,
    SERVICE_START_PENDING, SERVICE_STATUS, SERVICE_STATUS_CURRENT_STATE, SERVICE_STOP_PENDING,
    SERVICE_STOPPED, SERVICE_WIN32_OWN_PROCESS, StartServiceW,
};
use windows::core::{PCWSTR, PWSTR};

use super::{ManagedService, ManagerConnection, ServiceControl, ServiceRegistration};
use crate::error::ScmError;
use crate::status::ServiceState;

/// NUL-terminated UTF-16 copy of `s`.
pub(crate) fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

fn state_from(raw: SERVICE_STATUS_CURRENT_STATE) -> ServiceState {
    match raw {
        SERVICE_STOPPED => ServiceState::Stopped,
        SERVICE_START_PENDING => ServiceState::StartPending,
        SERVICE_STOP_PENDING => ServiceState::StopPending,
        SERVICE_RUNNING => ServiceState::Running,
        other => ServiceState::Other(other.0),
    }
}

/// Service Control Manager on the local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsScm;

impl ServiceControl for WindowsScm {
    type Connection = ScManagerHandle;

    fn connect(&self) -> Result<ScManagerHandle, ScmError> {
        let handle =
            unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_ALL_ACCESS) }?;
        Ok(ScManagerHandle(handle))
    }
}

/// RAII wrapper for SC_HANDLE (Service Control Manager handle)
pub struct ScManagerHandle(SC_HANDLE);

impl Drop for ScManagerHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseServiceHandle(self.0);
            }
        }
    }
}

impl ManagerConnection for ScManagerHandle {
    type Service = ServiceHandle;

    fn open_service(&self, name: &str) -> Result<ServiceHandle, ScmError> {
        let service_name = to_wide(name);
        let handle = unsafe {
            OpenServiceW(self.0, PCWSTR(service_name.as_ptr()), SERVICE_ALL_ACCESS)
        }?;
        Ok(ServiceHandle(handle))
    }

    fn create_service(&self, registration: &ServiceRegistration) -> Result<ServiceHandle, ScmError> {
        let service_name = to_wide(&registration.name);
        let display_name = to_wide(&registration.display_name);
        let binary_path = to_wide(&registration.binary_path);

        let handle = unsafe {
            CreateServiceW(
                self.0,
                PCWSTR(service_name.as_ptr()),
                PCWSTR(display_name.as_ptr()),
                SERVICE_ALL_ACCESS,
                SERVICE_WIN32_OWN_PROCESS,
                SERVICE_DEMAND_START,
                SERVICE_ERROR_NORMAL,
                PCWSTR(binary_path.as_ptr()),
                PCWSTR::null(),
                None,
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
            )
        }?;
        let service = ServiceHandle(handle);

        if !registration.description.is_empty() {
            let mut description = to_wide(&registration.description);
            let info = SERVICE_DESCRIPTIONW {
                lpDescription: PWSTR(description.as_mut_ptr()),
            };
            let described = unsafe {
                ChangeServiceConfig2W(
                    service.0,
                    SERVICE_CONFIG_DESCRIPTION,
                    Some(&info as *const _ as *const c_void),
                )
            };
            if let Err(e) = described {
                // roll back so a retry does not hit "already exists"
                unsafe {
                    let _ = DeleteService(service.0);
                }
                return Err(e.into());
            }
        }

        Ok(service)
    }
}

/// RAII wrapper for SC_HANDLE (Service handle)
pub struct ServiceHandle(SC_HANDLE);

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseServiceHandle(self.0);
            }
        }
    }
}

impl ManagedService for ServiceHandle {
    fn query_status(&self) -> Result<ServiceState, ScmError> {
        let mut status: SERVICE_STATUS = unsafe { mem::zeroed() };
        unsafe { QueryServiceStatus(self.0, &mut status) }?;
        Ok(state_from(status.dwCurrentState))
    }

    fn start(&self) -> Result<(), ScmError> {
        unsafe { StartServiceW(self.0, None) }?;
        Ok(())
    }

    fn send_stop(&self) -> Result<ServiceState, ScmError> {
        let mut status: SERVICE_STATUS = unsafe { mem::zeroed() };
        unsafe { ControlService(self.0, SERVICE_CONTROL_STOP, &mut status) }?;
        Ok(state_from(status.dwCurrentState))
    }

    fn delete(&self) -> Result<(), ScmError> {
        unsafe { DeleteService(self.0) }?;
        Ok(())
    }
}
