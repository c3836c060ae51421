//! Management client: install, start, stop and delete the service through
//! the OS service manager.

use std::thread;
use std::time::{Duration, Instant};

use log::{error, info};

use crate::config::ServiceDescriptor;
use crate::control::{ManagedService, ManagerConnection, ServiceControl, ServiceRegistration};
use crate::error::{Operation, ServiceError};
use crate::status::ServiceState;

/// Bounds for the stop-and-poll sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub timeout: Duration,
    pub poll_delay: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_delay: Duration::from_secs(1),
        }
    }
}

/// One-shot control operations for a single named service.
pub struct ServiceClient<C: ServiceControl> {
    control: C,
    descriptor: ServiceDescriptor,
    policy: StopPolicy,
}

impl<C: ServiceControl> ServiceClient<C> {
    pub fn new(control: C, descriptor: ServiceDescriptor) -> Self {
        Self {
            control,
            descriptor,
            policy: StopPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StopPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn connect(&self) -> Result<C::Connection, ServiceError> {
        self.control.connect().map_err(|e| {
            error!("Failed to connect to service manager: {e}");
            ServiceError::ConnectionFailed(e)
        })
    }

    fn open(
        &self,
        scm: &C::Connection,
    ) -> Result<<C::Connection as ManagerConnection>::Service, ServiceError> {
        scm.open_service(self.name()).map_err(|e| {
            error!("Service {} is not installed: {e}", self.name());
            ServiceError::NotFound(self.name().to_string())
        })
    }

    /// Register the service; fails if one with the same name exists.
    pub fn install(&self) -> Result<(), ServiceError> {
        let scm = self.connect()?;

        if let Ok(existing) = scm.open_service(self.name()) {
            drop(existing);
            error!("Service {} already installed", self.name());
            return Err(ServiceError::AlreadyExists(self.name().to_string()));
        }

        let registration = ServiceRegistration {
            name: self.descriptor.name.clone(),
            display_name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            binary_path: quote_path(&self.descriptor.parent_exec_path.to_string_lossy()),
        };

        let _service = scm.create_service(&registration).map_err(|e| {
            error!("Failed to create service {}: {e}", self.name());
            ServiceError::operation(Operation::Create, self.name(), e)
        })?;

        info!("Service {} installed", self.name());
        Ok(())
    }

    /// Ask the service manager to start the service. Does not wait for Running.
    pub fn start(&self) -> Result<(), ServiceError> {
        let scm = self.connect()?;
        let service = self.open(&scm)?;

        service.start().map_err(|e| {
            error!("Failed to start service {}: {e}", self.name());
            ServiceError::operation(Operation::Start, self.name(), e)
        })?;

        info!("Service {} started", self.name());
        Ok(())
    }

    /// Send stop and poll until the service reports Stopped or the timeout passes.
    pub fn stop(&self) -> Result<(), ServiceError> {
        let scm = self.connect()?;
        let service = self.open(&scm)?;
        self.stop_and_wait(&service)
    }

    /// Unregister the service, stopping it first when it is running.
    pub fn delete(&self) -> Result<(), ServiceError> {
        let scm = self.connect()?;
        let service = self.open(&scm)?;

        if self.query(&service)? == ServiceState::Running {
            info!("Service {} is running, stopping", self.name());
            self.stop_and_wait(&service)?;
        }

        service.delete().map_err(|e| {
            error!("Failed to delete service {}: {e}", self.name());
            ServiceError::operation(Operation::Delete, self.name(), e)
        })?;

        info!("Service {} uninstalled", self.name());
        Ok(())
    }

    /// Current state as reported by the service manager.
    pub fn status(&self) -> Result<ServiceState, ServiceError> {
        let scm = self.connect()?;
        let service = self.open(&scm)?;
        self.query(&service)
    }

    fn query(
        &self,
        service: &<C::Connection as ManagerConnection>::Service,
    ) -> Result<ServiceState, ServiceError> {
        service.query_status().map_err(|e| {
            error!("Could not retrieve status of service {}: {e}", self.name());
            ServiceError::operation(Operation::Query, self.name(), e)
        })
    }

    fn stop_and_wait(
        &self,
        service: &<C::Connection as ManagerConnection>::Service,
    ) -> Result<(), ServiceError> {
        let deadline = Instant::now() + self.policy.timeout;

        let mut state = service.send_stop().map_err(|e| {
            error!("Failed to send stop command to service {}: {e}", self.name());
            ServiceError::operation(Operation::SendStop, self.name(), e)
        })?;

        while state != ServiceState::Stopped {
            if Instant::now() > deadline {
                error!("Timeout waiting for service {} to stop exceeded", self.name());
                return Err(ServiceError::TimeoutExceeded {
                    service: self.name().to_string(),
                    timeout: self.policy.timeout,
                });
            }
            thread::sleep(self.policy.poll_delay);
            state = self.query(service)?;
        }

        info!("Service {} stopped", self.name());
        Ok(())
    }
}

/// Quote a binary path so the service manager does not split it on spaces.
fn quote_path(path: &str) -> String {
    if path.starts_with('"') {
        path.to_string()
    } else {
        format!("\"{path}\"")
    }
}
