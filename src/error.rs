//! Error types for the session lifecycle.

use thiserror::Error;

use crate::hooks::SessionEvent;

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing a LocalStack session.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested service identifier is not in the registry.
    #[error("unknown service '{name}'")]
    UnknownService {
        /// The unrecognized identifier.
        name: String,
    },

    /// Image tag predates the oldest supported LocalStack release.
    #[error("unsupported localstack version '{version}', minimum supported is 0.11")]
    UnsupportedVersion {
        /// The rejected tag.
        version: String,
    },

    /// `start` called while a container is already running.
    #[error("session already started")]
    AlreadyStarted,

    /// Operation requires a running container.
    #[error("session not started")]
    NotStarted,

    /// The container port has no host-side binding.
    #[error("container port {port} is not published")]
    PortNotPublished {
        /// The unpublished container port.
        port: u16,
    },

    /// Readiness deadline passed with services still pending.
    #[error("localstack service not started: {service}")]
    Timeout {
        /// One of the services that never became ready.
        service: String,
    },

    /// Invalid session configuration.
    #[error("invalid session configuration: {reason}")]
    Config {
        /// Reason for rejection.
        reason: String,
    },

    /// Container-driver failure. Infrastructure errors pass through unwrapped.
    #[error(transparent)]
    Driver(anyhow::Error),

    /// A lifecycle hook failed; remaining hooks for the event were skipped.
    #[error("hook failed during '{event}' dispatch: {source}")]
    Hook {
        /// The event being dispatched.
        event: SessionEvent,
        /// The hook's error.
        #[source]
        source: anyhow::Error,
    },
}
