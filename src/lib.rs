//! Run ephemeral LocalStack containers as AWS stand-ins for integration
//! tests.
//!
//! The session controller launches a `localstack/localstack` container,
//! polls every requested service's readiness check with backoff until the
//! emulated APIs respond correctly, exposes the dynamically mapped edge
//! port, and tears the container down afterward, on failure paths too.
//! Extensions subscribe to lifecycle events through a [`HookBus`] and attach
//! client factory capabilities to the session.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use localstack_harness::{DockerDriver, Session, SessionConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let driver = Arc::new(DockerDriver::connect().await?);
//! let mut session = Session::builder(driver)
//!     .config(SessionConfig {
//!         services: Some(vec!["s3".to_string(), "sqs".to_string()]),
//!         ..Default::default()
//!     })
//!     .build()?;
//!
//! session
//!     .scoped(async |session| {
//!         let url = session.endpoint_url("s3").await?;
//!         // drive the emulated API through `url`
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod contrib;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod probe;
pub mod registry;
pub mod session;
pub mod testing;

pub use config::SessionConfig;
pub use driver::{ContainerDriver, ContainerHandle, ContainerSpec, DockerDriver, LogStream, connect_docker};
pub use error::{Error, Result};
pub use hooks::{Extensions, HookBus, SessionEvent, SessionHook};
pub use probe::{NotReady, ServiceCheck, is_port_open};
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use session::{Session, SessionBuilder};
