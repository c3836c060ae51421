//! Service Host collaborators: the runtimes that feed control requests to a
//! [`Supervisor`] and carry its status reports back out.
//!
//! - `console`: foreground run, OS signals become Stop/Shutdown requests
//! - `windows_host`: Windows service dispatcher (Service Control Manager)

use crate::config::ServiceDescriptor;
use crate::sink::{RotatingFile, SinkHandle};
use crate::supervisor::Supervisor;

pub mod console;

#[cfg(target_os = "windows")]
pub mod windows_host;

/// Build the executor with its rotating log sink.
pub fn supervisor_for(descriptor: ServiceDescriptor) -> Supervisor {
    let sink = SinkHandle::new(RotatingFile::new(descriptor.log.clone()));
    Supervisor::new(descriptor, sink)
}
