//! Lifecycle tests for the session controller against a scripted driver.
//!
//! No Docker required: `StubDriver` stands in for the container runtime and
//! scripted checks stand in for the emulated services.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use localstack_harness::testing::{DriverCall, RecorderHook, StubDriver, ready_after};
use localstack_harness::{
    Error, HookBus, Session, SessionConfig, SessionEvent, SessionHook, ServiceDescriptor,
    ServiceRegistry,
};

fn two_service_registry() -> Arc<ServiceRegistry> {
    Arc::new(ServiceRegistry::new([
        ServiceDescriptor::new("s3", ready_after("s3", 0)),
        ServiceDescriptor::new("sqs", ready_after("sqs", 0)),
    ]))
}

fn config_for(services: &[&str]) -> SessionConfig {
    SessionConfig {
        services: Some(services.iter().map(|s| s.to_string()).collect()),
        pull_image: false,
        ..Default::default()
    }
}

// ── Lifecycle ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn scoped_session_fires_hooks_in_order() {
    let driver = Arc::new(StubDriver::new());
    let recorder = Arc::new(RecorderHook::new());
    let mut bus = HookBus::new();
    bus.register(recorder.clone());

    let mut session = Session::builder(driver.clone())
        .registry(two_service_registry())
        .config(config_for(&["s3", "sqs"]))
        .hooks(Arc::new(bus))
        .build()
        .unwrap();

    let value = session
        .scoped(async |session| {
            assert!(session.is_running());
            Ok(42)
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert!(!session.is_running());
    assert_eq!(
        recorder.events(),
        vec![
            SessionEvent::Starting,
            SessionEvent::Started,
            SessionEvent::Stopping,
            SessionEvent::Stopped,
        ]
    );
}

#[tokio::test]
async fn stop_is_idempotent() {
    let driver = Arc::new(StubDriver::new());
    let recorder = Arc::new(RecorderHook::new());
    let mut bus = HookBus::new();
    bus.register(recorder.clone());

    let mut session = Session::builder(driver.clone())
        .registry(two_service_registry())
        .config(config_for(&["s3"]))
        .hooks(Arc::new(bus))
        .build()
        .unwrap();

    session.start(Duration::from_secs(60)).await.unwrap();
    session.stop(Duration::from_secs(10)).await.unwrap();
    session.stop(Duration::from_secs(10)).await.unwrap();

    // One driver stop, one stopping/stopped hook pair.
    assert_eq!(driver.count(|c| matches!(c, DriverCall::Stop(_))), 1);
    assert_eq!(
        recorder.events(),
        vec![
            SessionEvent::Starting,
            SessionEvent::Started,
            SessionEvent::Stopping,
            SessionEvent::Stopped,
        ]
    );
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let driver = Arc::new(StubDriver::new());
    let mut session = Session::builder(driver)
        .registry(two_service_registry())
        .config(config_for(&["s3"]))
        .build()
        .unwrap();

    session.start(Duration::from_secs(60)).await.unwrap();
    let err = session.start(Duration::from_secs(60)).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyStarted));

    session.stop(Duration::from_secs(10)).await.unwrap();
}

#[tokio::test]
async fn empty_service_set_starts_without_checks() {
    let driver = Arc::new(StubDriver::new());
    let mut session = Session::builder(driver.clone())
        .registry(two_service_registry())
        .config(config_for(&[]))
        .build()
        .unwrap();

    session.start(Duration::from_secs(60)).await.unwrap();
    assert!(session.is_running());
    session.stop(Duration::from_secs(10)).await.unwrap();
}

// ── Port mapping and endpoints ─────────────────────────────────────────────

#[tokio::test]
async fn map_port_requires_running_container() {
    let driver = Arc::new(StubDriver::new());
    let mut session = Session::builder(driver)
        .registry(two_service_registry())
        .config(config_for(&["s3"]))
        .build()
        .unwrap();

    assert!(matches!(
        session.map_port(4566).await,
        Err(Error::NotStarted)
    ));

    session.start(Duration::from_secs(60)).await.unwrap();
    assert_eq!(session.map_port(4566).await.unwrap(), Some(45678));

    session.stop(Duration::from_secs(10)).await.unwrap();
    assert!(matches!(
        session.map_port(4566).await,
        Err(Error::NotStarted)
    ));
}

#[tokio::test]
async fn endpoint_url_composition() {
    let driver = Arc::new(StubDriver::new());
    let mut session = Session::builder(driver.clone())
        .registry(two_service_registry())
        .config(config_for(&["s3"]))
        .build()
        .unwrap();

    session.start(Duration::from_secs(60)).await.unwrap();
    assert_eq!(
        session.endpoint_url("s3").await.unwrap(),
        "http://127.0.0.1:45678"
    );
    session.stop(Duration::from_secs(10)).await.unwrap();

    let mut ssl_session = Session::builder(driver)
        .registry(two_service_registry())
        .config(SessionConfig {
            use_ssl: true,
            ..config_for(&["s3"])
        })
        .build()
        .unwrap();
    ssl_session.start(Duration::from_secs(60)).await.unwrap();
    assert_eq!(
        ssl_session.endpoint_url("s3").await.unwrap(),
        "https://127.0.0.1:45678"
    );
    ssl_session.stop(Duration::from_secs(10)).await.unwrap();
}

// ── Hook failure semantics ─────────────────────────────────────────────────

struct FailOn {
    event: SessionEvent,
}

#[async_trait]
impl SessionHook for FailOn {
    async fn on_started(&self, _session: &mut Session) -> anyhow::Result<()> {
        if self.event == SessionEvent::Started {
            anyhow::bail!("started hook exploded");
        }
        Ok(())
    }
}

#[tokio::test]
async fn failing_started_hook_leaves_container_running() {
    let driver = Arc::new(StubDriver::new());
    let mut bus = HookBus::new();
    bus.register(Arc::new(FailOn {
        event: SessionEvent::Started,
    }));

    let mut session = Session::builder(driver.clone())
        .registry(two_service_registry())
        .config(config_for(&["s3"]))
        .hooks(Arc::new(bus))
        .build()
        .unwrap();

    let err = session.start(Duration::from_secs(60)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Hook {
            event: SessionEvent::Started,
            ..
        }
    ));
    // The hook aborted the transition, not the container.
    assert!(session.is_running());
    assert_eq!(driver.count(|c| matches!(c, DriverCall::Stop(_))), 0);

    session.stop(Duration::from_secs(10)).await.unwrap();
}

struct LabelHook {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl SessionHook for LabelHook {
    async fn on_starting(&self, _session: &mut Session) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(self.label);
        Ok(())
    }
}

#[tokio::test]
async fn hooks_dispatch_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut bus = HookBus::new();
    for label in ["first", "second", "third"] {
        bus.register(Arc::new(LabelHook {
            label,
            log: log.clone(),
        }));
    }

    let driver = Arc::new(StubDriver::new());
    let mut session = Session::builder(driver)
        .registry(two_service_registry())
        .config(config_for(&["s3"]))
        .hooks(Arc::new(bus))
        .build()
        .unwrap();

    session.start(Duration::from_secs(60)).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    session.stop(Duration::from_secs(10)).await.unwrap();
}

// ── Scoped teardown ────────────────────────────────────────────────────────

#[tokio::test]
async fn scoped_stops_container_when_body_fails() {
    let driver = Arc::new(StubDriver::new());
    let mut session = Session::builder(driver.clone())
        .registry(two_service_registry())
        .config(config_for(&["s3"]))
        .build()
        .unwrap();

    let err = session
        .scoped(async |_session| -> anyhow::Result<()> {
            anyhow::bail!("test body failed")
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "test body failed");
    assert!(!session.is_running());
    assert_eq!(driver.count(|c| matches!(c, DriverCall::Stop(_))), 1);
}

// ── Naming ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sequential_sessions_get_distinct_names() {
    let driver = Arc::new(StubDriver::new());
    let mut names = Vec::new();

    for _ in 0..2 {
        let mut session = Session::builder(driver.clone())
            .registry(two_service_registry())
            .config(config_for(&["s3"]))
            .build()
            .unwrap();
        session
            .scoped(async |session| {
                Ok(session.container_name().to_string())
            })
            .await
            .map(|name| names.push(name))
            .unwrap();
    }

    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);
    for name in &names {
        assert!(name.starts_with("localstack-harness-"));
    }
}
