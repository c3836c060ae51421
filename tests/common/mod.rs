//! Shared test doubles: an in-memory service manager, a recording log sink
//! and a recording status reporter.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use svcwrap::control::{ManagedService, ManagerConnection, ServiceControl, ServiceRegistration};
use svcwrap::sink::LogSink;
use svcwrap::{ScmError, ServiceConfig, ServiceDescriptor, ServiceState, StatusReport, StatusReporter};

const ERROR_SERVICE_ALREADY_RUNNING: u32 = 1056;
const ERROR_SERVICE_DOES_NOT_EXIST: u32 = 1060;
const ERROR_SERVICE_NOT_ACTIVE: u32 = 1062;

pub fn descriptor(name: &str) -> ServiceDescriptor {
    ServiceDescriptor::from_config(ServiceConfig {
        name: name.to_string(),
        description: format!("{name} description"),
        parent_exec_path: "/opt/svc/svcwrap".to_string(),
        child_exec_path: "/bin/sh".to_string(),
        ..Default::default()
    })
    .expect("valid descriptor")
}

/// Poll `cond` for up to five seconds.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[derive(Debug, Clone)]
pub struct FakeService {
    pub registration: ServiceRegistration,
    pub state: ServiceState,
    polls_until_stopped: u32,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub services: HashMap<String, FakeService>,
    pub open_connections: usize,
    pub open_handles: usize,
    pub calls: Vec<String>,
    pub refuse_connect: bool,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_query: bool,
    /// Service stays in StopPending forever after a stop.
    pub stuck_on_stop: bool,
    /// Status queries answered with StopPending before reporting Stopped.
    pub stop_polls: u32,
}

/// In-memory service manager that tracks open connections and handles.
#[derive(Clone, Default)]
pub struct FakeScm {
    state: Arc<Mutex<FakeState>>,
}

impl FakeScm {
    pub fn new() -> Self {
        let scm = Self::default();
        scm.state().stop_polls = 2;
        scm
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.state().services.get(name).map(|s| s.state)
    }

    pub fn assert_released(&self) {
        let state = self.state();
        assert_eq!(state.open_connections, 0, "service manager connection leaked");
        assert_eq!(state.open_handles, 0, "service handle leaked");
    }
}

impl ServiceControl for FakeScm {
    type Connection = FakeConnection;

    fn connect(&self) -> Result<FakeConnection, ScmError> {
        let mut state = self.state();
        state.calls.push("connect".into());
        if state.refuse_connect {
            return Err(ScmError::new(5, "Access is denied."));
        }
        state.open_connections += 1;
        Ok(FakeConnection {
            state: self.state.clone(),
        })
    }
}

pub struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.state.lock().unwrap().open_connections -= 1;
    }
}

impl FakeConnection {
    fn handle(&self, name: &str) -> FakeHandle {
        self.state.lock().unwrap().open_handles += 1;
        FakeHandle {
            state: self.state.clone(),
            name: name.to_string(),
        }
    }
}

impl ManagerConnection for FakeConnection {
    type Service = FakeHandle;

    fn open_service(&self, name: &str) -> Result<FakeHandle, ScmError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("open {name}"));
            if !state.services.contains_key(name) {
                return Err(ScmError::new(
                    ERROR_SERVICE_DOES_NOT_EXIST,
                    "The specified service does not exist as an installed service.",
                ));
            }
        }
        Ok(self.handle(name))
    }

    fn create_service(&self, registration: &ServiceRegistration) -> Result<FakeHandle, ScmError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("create {}", registration.name));
            if state.fail_create {
                return Err(ScmError::new(1073, "The specified service already exists."));
            }
            state.services.insert(
                registration.name.clone(),
                FakeService {
                    registration: registration.clone(),
                    state: ServiceState::Stopped,
                    polls_until_stopped: 0,
                },
            );
        }
        Ok(self.handle(&registration.name))
    }
}

pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
    name: String,
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.state.lock().unwrap().open_handles -= 1;
    }
}

impl FakeHandle {
    fn with_service<T>(
        &self,
        call: &str,
        f: impl FnOnce(&mut FakeService, bool) -> Result<T, ScmError>,
    ) -> Result<T, ScmError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        let stuck = state.stuck_on_stop;
        match state.services.get_mut(&self.name) {
            Some(service) => f(service, stuck),
            None => Err(ScmError::new(1072, "The specified service has been marked for deletion.")),
        }
    }
}

impl ManagedService for FakeHandle {
    fn query_status(&self) -> Result<ServiceState, ScmError> {
        if self.state.lock().unwrap().fail_query {
            return Err(ScmError::new(6, "The handle is invalid."));
        }
        self.with_service("query", |service, stuck| {
            if service.state == ServiceState::StopPending && !stuck {
                if service.polls_until_stopped == 0 {
                    service.state = ServiceState::Stopped;
                } else {
                    service.polls_until_stopped -= 1;
                }
            }
            Ok(service.state)
        })
    }

    fn start(&self) -> Result<(), ScmError> {
        if self.state.lock().unwrap().fail_start {
            return Err(ScmError::new(1053, "The service did not respond in a timely fashion."));
        }
        self.with_service("start", |service, _| {
            if service.state != ServiceState::Stopped {
                return Err(ScmError::new(
                    ERROR_SERVICE_ALREADY_RUNNING,
                    "An instance of the service is already running.",
                ));
            }
            service.state = ServiceState::Running;
            Ok(())
        })
    }

    fn send_stop(&self) -> Result<ServiceState, ScmError> {
        let polls = self.state.lock().unwrap().stop_polls;
        self.with_service("send_stop", |service, _| {
            if service.state != ServiceState::Running {
                return Err(ScmError::new(
                    ERROR_SERVICE_NOT_ACTIVE,
                    "The service has not been started.",
                ));
            }
            service.state = ServiceState::StopPending;
            service.polls_until_stopped = polls;
            Ok(service.state)
        })
    }

    fn delete(&self) -> Result<(), ScmError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("delete".into());
        match state.services.remove(&self.name) {
            Some(_) => Ok(()),
            None => Err(ScmError::new(1072, "The specified service has been marked for deletion.")),
        }
    }
}

/// Log sink that keeps everything in memory and counts closes.
#[derive(Clone, Default)]
pub struct MemorySink {
    bytes: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text().contains(needle)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl LogSink for MemorySink {
    fn append(&mut self, bytes: &[u8]) {
        self.bytes.lock().unwrap().extend_from_slice(bytes);
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Status reporter that records every report.
#[derive(Clone, Default)]
pub struct Recorder {
    reports: Arc<Mutex<Vec<StatusReport>>>,
}

impl Recorder {
    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<ServiceState> {
        self.reports().iter().map(|r| r.state).collect()
    }
}

impl StatusReporter for Recorder {
    fn report(&mut self, status: StatusReport) {
        self.reports.lock().unwrap().push(status);
    }
}
