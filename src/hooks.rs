//! Lifecycle hooks and extension capabilities.
//!
//! Extensions subscribe to session lifecycle events through a [`HookBus`]
//! owned by (or shared between) sessions, and attach capability objects to
//! the session's [`Extensions`] map, typically during `starting`/`started`.
//! Dispatch is sequential in registration order; the first failing hook
//! aborts the remaining ones for that event.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::session::Session;

/// Lifecycle events a session emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// `start` was called; the container is not running yet.
    Starting,
    /// All requested services reported ready.
    Started,
    /// `stop` was called; the container is still running.
    Stopping,
    /// The container was stopped and handles cleared.
    Stopped,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::Starting => "starting",
            SessionEvent::Started => "started",
            SessionEvent::Stopping => "stopping",
            SessionEvent::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Extension subscribed to session lifecycle events.
///
/// Implement the events you care about; the rest default to no-ops.
#[async_trait]
pub trait SessionHook: Send + Sync {
    /// Fires before the container is launched.
    async fn on_starting(&self, _session: &mut Session) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fires once all requested services report ready.
    async fn on_started(&self, _session: &mut Session) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fires before the container is stopped.
    async fn on_stopping(&self, _session: &mut Session) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fires after the container was stopped.
    async fn on_stopped(&self, _session: &mut Session) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered collection of hooks.
///
/// Register everything up front, then share the bus with sessions via `Arc`.
#[derive(Default)]
pub struct HookBus {
    hooks: Vec<Arc<dyn SessionHook>>,
}

impl HookBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; dispatch order is registration order.
    pub fn register(&mut self, hook: Arc<dyn SessionHook>) {
        self.hooks.push(hook);
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether any hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) async fn dispatch(&self, event: SessionEvent, session: &mut Session) -> Result<()> {
        for hook in &self.hooks {
            let outcome = match event {
                SessionEvent::Starting => hook.on_starting(session).await,
                SessionEvent::Started => hook.on_started(session).await,
                SessionEvent::Stopping => hook.on_stopping(session).await,
                SessionEvent::Stopped => hook.on_stopped(session).await,
            };
            outcome.map_err(|source| Error::Hook { event, source })?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookBus")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Typed capability map extensions attach to a session.
///
/// Keyed by extension identifier; values are arbitrary capability objects
/// recovered by type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Attach a capability under `name`, replacing any previous one.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, capability: T) {
        self.map.insert(name.into(), Box::new(capability));
    }

    /// The capability stored under `name`, if present and of type `T`.
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.map.get(name)?.downcast_ref()
    }

    /// Whether a capability is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Detach and return the capability under `name`.
    pub fn remove<T: Any>(&mut self, name: &str) -> Option<Box<T>> {
        let boxed = self.map.remove(name)?;
        boxed.downcast().ok()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}
