//! Turn a service-unaware executable into a supervised OS service.
//!
//! [`client::ServiceClient`] registers and controls the service through the
//! OS service manager. [`supervisor::Supervisor`] runs inside the service
//! host, keeps the child process alive and forwards stop requests to it.

pub mod child;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod host;
pub mod sink;
pub mod status;
pub mod supervisor;

pub use client::{ServiceClient, StopPolicy};
pub use config::{ServiceConfig, ServiceDescriptor};
pub use error::{Operation, ScmError, ServiceError};
pub use status::{ControlRequest, ExitReason, ServiceState, StatusReport, StatusReporter};
pub use supervisor::{RestartPolicy, Supervisor};
