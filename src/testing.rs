//! Test doubles for the session controller.
//!
//! Provides:
//! - [`StubDriver`]: a scripted [`ContainerDriver`] that records every call
//! - [`RecorderHook`]: captures the lifecycle event sequence
//! - [`ready_after`]: scripted readiness checks with invocation counters
//!
//! These are shipped in the library (not behind `cfg(test)`) so downstream
//! crates can exercise session-dependent code without Docker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::driver::{ContainerDriver, ContainerHandle, ContainerSpec, LogStream};
use crate::error::{Error, Result};
use crate::hooks::{SessionEvent, SessionHook};
use crate::probe::{NotReady, ServiceCheck};
use crate::session::Session;

/// Driver interaction recorded by [`StubDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    /// `pull` with the image reference.
    Pull(String),
    /// `run` with the container name.
    Run(String),
    /// `stop` with the container id.
    Stop(String),
    /// `host_port` with the queried container port.
    HostPort(u16),
}

/// Scripted [`ContainerDriver`] recording every interaction.
///
/// By default every operation succeeds and the edge port maps to a fixed
/// host port.
pub struct StubDriver {
    calls: Mutex<Vec<DriverCall>>,
    host_port: Option<u16>,
    fail_pull: bool,
    fail_stop: bool,
    next_id: AtomicUsize,
}

impl Default for StubDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl StubDriver {
    /// Driver where everything succeeds; port 4566 maps to 45678.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            host_port: Some(45678),
            fail_pull: false,
            fail_stop: false,
            next_id: AtomicUsize::new(0),
        }
    }

    /// Use this host-port mapping (`None` simulates an unpublished port).
    pub fn with_host_port(mut self, port: Option<u16>) -> Self {
        self.host_port = port;
        self
    }

    /// Make `pull` fail with a driver error.
    pub fn failing_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    /// Make `stop` fail with a driver error.
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Everything recorded so far, in call order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().expect("stub driver poisoned").clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().expect("stub driver poisoned").push(call);
    }
}

#[async_trait]
impl ContainerDriver for StubDriver {
    async fn pull(&self, image: &str) -> Result<()> {
        self.record(DriverCall::Pull(image.to_string()));
        if self.fail_pull {
            return Err(Error::Driver(anyhow::anyhow!("scripted pull failure")));
        }
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.record(DriverCall::Run(spec.name.clone()));
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(ContainerHandle {
            id: format!("stub-container-{n}"),
            name: spec.name.clone(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle, _grace: Duration) -> Result<()> {
        self.record(DriverCall::Stop(handle.id.clone()));
        if self.fail_stop {
            return Err(Error::Driver(anyhow::anyhow!("scripted stop failure")));
        }
        Ok(())
    }

    async fn host_port(
        &self,
        _handle: &ContainerHandle,
        container_port: u16,
    ) -> Result<Option<u16>> {
        self.record(DriverCall::HostPort(container_port));
        Ok(self.host_port)
    }

    async fn logs(
        &self,
        _handle: &ContainerHandle,
        _stream: LogStream,
    ) -> BoxStream<'static, String> {
        Box::pin(futures::stream::empty())
    }
}

/// Hook recording the order lifecycle events fire in.
#[derive(Default)]
pub struct RecorderHook {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecorderHook {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events observed so far, in dispatch order.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().expect("recorder poisoned").clone()
    }

    fn record(&self, event: SessionEvent) {
        self.events.lock().expect("recorder poisoned").push(event);
    }
}

#[async_trait]
impl SessionHook for RecorderHook {
    async fn on_starting(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.record(SessionEvent::Starting);
        Ok(())
    }

    async fn on_started(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.record(SessionEvent::Started);
        Ok(())
    }

    async fn on_stopping(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.record(SessionEvent::Stopping);
        Ok(())
    }

    async fn on_stopped(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.record(SessionEvent::Stopped);
        Ok(())
    }
}

/// Scripted readiness check: not-ready for the first `passes` invocations,
/// ready afterwards.
pub struct ScriptedCheck {
    service: String,
    ready_after: usize,
    invocations: AtomicUsize,
}

impl ScriptedCheck {
    /// How many times the check has been invoked.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceCheck for ScriptedCheck {
    async fn check(&self, _session: &Session) -> std::result::Result<(), NotReady> {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst);
        if n >= self.ready_after {
            Ok(())
        } else {
            Err(NotReady::new(&self.service, "scripted not-ready"))
        }
    }
}

/// Check that reports not-ready for the first `passes` invocations. Use
/// `0` for always-ready and `usize::MAX` for never-ready.
pub fn ready_after(service: &str, passes: usize) -> Arc<ScriptedCheck> {
    Arc::new(ScriptedCheck {
        service: service.to_string(),
        ready_after: passes,
        invocations: AtomicUsize::new(0),
    })
}
