//! Service Control collaborator: the OS service manager as seen by the
//! management client.
//!
//! Connections and service handles are released on drop, so every
//! operation that opens one closes it on all exit paths.
//!
//! - Windows: Service Control Manager (Windows API)
//! - Elsewhere: no service manager backend; connecting always fails

use crate::error::ScmError;
use crate::status::ServiceState;

/// Parameters for registering a new service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// Command line the service manager launches (already quoted).
    pub binary_path: String,
}

/// Entry point to the OS service manager.
pub trait ServiceControl {
    type Connection: ManagerConnection;

    fn connect(&self) -> Result<Self::Connection, ScmError>;
}

/// Open connection to the service manager; disconnects on drop.
pub trait ManagerConnection {
    type Service: ManagedService;

    fn open_service(&self, name: &str) -> Result<Self::Service, ScmError>;

    fn create_service(&self, registration: &ServiceRegistration) -> Result<Self::Service, ScmError>;
}

/// Open handle to one registered service; closes on drop.
pub trait ManagedService {
    fn query_status(&self) -> Result<ServiceState, ScmError>;

    fn start(&self) -> Result<(), ScmError>;

    /// Send the stop control and return the state reported back with it.
    fn send_stop(&self) -> Result<ServiceState, ScmError>;

    /// Mark the service for deletion.
    fn delete(&self) -> Result<(), ScmError>;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "windows")] {
        mod windows_control;
        pub use windows_control::WindowsScm as PlatformControl;
    } else {
        pub use unsupported::UnsupportedControl as PlatformControl;
    }
}

/// Service manager of the running platform.
pub fn platform() -> PlatformControl {
    PlatformControl::default()
}

#[cfg(not(target_os = "windows"))]
mod unsupported {
    use super::*;

    /// Placeholder backend; every connection attempt fails.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct UnsupportedControl;

    pub enum Never {}

    impl ServiceControl for UnsupportedControl {
        type Connection = Never;

        fn connect(&self) -> Result<Never, ScmError> {
            Err(ScmError::new(
                0,
                "no service manager backend for this platform",
            ))
        }
    }

    impl ManagerConnection for Never {
        type Service = Never;

        fn open_service(&self, _name: &str) -> Result<Never, ScmError> {
            match *self {}
        }

        fn create_service(&self, _registration: &ServiceRegistration) -> Result<Never, ScmError> {
            match *self {}
        }
    }

    impl ManagedService for Never {
        fn query_status(&self) -> Result<ServiceState, ScmError> {
            match *self {}
        }

        fn start(&self) -> Result<(), ScmError> {
            match *self {}
        }

        fn send_stop(&self) -> Result<ServiceState, ScmError> {
            match *self {}
        }

        fn delete(&self) -> Result<(), ScmError> {
            match *self {}
        }
    }
}
