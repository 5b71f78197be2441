//! Container runtime driver.
//!
//! The session controller consumes the container runtime through the
//! [`ContainerDriver`] capability: pull an image, run/stop a container,
//! resolve published ports, follow output streams. [`DockerDriver`] is the
//! production implementation on top of bollard; tests substitute
//! [`crate::testing::StubDriver`].

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::error::{Error, Result};

/// Which container output stream to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Opaque reference to a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-assigned container id.
    pub id: String,
    /// Container name.
    pub name: String,
}

impl ContainerHandle {
    /// Abbreviated id for log output.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

/// Everything needed to launch one detached container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Image reference including tag.
    pub image: String,
    /// Container name.
    pub name: String,
    /// Environment passed into the container.
    pub env: Vec<(String, String)>,
    /// Container port published with a dynamically allocated host port.
    pub expose_port: u16,
    /// Delete the container when it stops.
    pub auto_remove: bool,
}

/// Capability the session controller uses to manage containers.
///
/// Failures are infrastructure errors outside the harness's control and are
/// surfaced unwrapped as [`Error::Driver`]; callers do not retry them.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Materialize the image locally.
    async fn pull(&self, image: &str) -> Result<()>;

    /// Create and start a detached container.
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Stop the container, killing it after `grace`.
    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<()>;

    /// Host port bound to `container_port`, if published.
    async fn host_port(
        &self,
        handle: &ContainerHandle,
        container_port: u16,
    ) -> Result<Option<u16>>;

    /// Follow one output stream as lines. The stream ends when the container
    /// stops.
    async fn logs(&self, handle: &ContainerHandle, stream: LogStream) -> BoxStream<'static, String>;
}

/// Connect to the local Docker daemon.
///
/// Tries bollard's default connection (honors `DOCKER_HOST`, falls back to
/// the standard socket), then the rootless socket under `XDG_RUNTIME_DIR`.
pub async fn connect_docker() -> Result<Docker> {
    let docker = Docker::connect_with_local_defaults().map_err(driver_err)?;
    if docker.ping().await.is_ok() {
        return Ok(docker);
    }

    #[cfg(unix)]
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        let socket = format!("{runtime_dir}/docker.sock");
        if std::path::Path::new(&socket).exists() {
            let rootless = Docker::connect_with_socket(&socket, 120, bollard::API_DEFAULT_VERSION)
                .map_err(driver_err)?;
            if rootless.ping().await.is_ok() {
                return Ok(rootless);
            }
        }
    }

    docker.ping().await.map_err(driver_err)?;
    Ok(docker)
}

/// Docker implementation of [`ContainerDriver`].
#[derive(Clone)]
pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    /// Wrap an existing bollard client.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the local daemon.
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(connect_docker().await?))
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn pull(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!(%image, "image exists locally");
            return Ok(());
        }

        tracing::info!(%image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let info = progress.map_err(driver_err)?;
            if let Some(status) = info.status {
                tracing::trace!(%image, "pull status: {status}");
            }
        }
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let port_key = format!("{}/tcp", spec.expose_port);

        // A null host port makes the daemon allocate an ephemeral one.
        let port_bindings = HashMap::from([(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: None,
            }]),
        )]);
        let exposed_ports = HashMap::from([(port_key, HashMap::new())]);

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                auto_remove: Some(spec.auto_remove),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(driver_err)?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(driver_err)?;

        Ok(ContainerHandle {
            id: created.id,
            name: spec.name.clone(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker
            .stop_container(&handle.id, Some(options))
            .await
            .map_err(driver_err)
    }

    async fn host_port(
        &self,
        handle: &ContainerHandle,
        container_port: u16,
    ) -> Result<Option<u16>> {
        let inspected = self
            .docker
            .inspect_container(&handle.id, None)
            .await
            .map_err(driver_err)?;

        let port = inspected
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| ports.get(&format!("{container_port}/tcp")).cloned())
            .flatten()
            .and_then(|bindings| bindings.into_iter().next())
            .and_then(|binding| binding.host_port)
            .and_then(|host_port| host_port.parse().ok());
        Ok(port)
    }

    async fn logs(&self, handle: &ContainerHandle, stream: LogStream) -> BoxStream<'static, String> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: stream == LogStream::Stdout,
            stderr: stream == LogStream::Stderr,
            ..Default::default()
        };
        self.docker
            .logs(&handle.id, Some(options))
            .filter_map(|chunk| async move {
                let line = match chunk {
                    Ok(output) => String::from_utf8_lossy(&output.into_bytes())
                        .trim_end()
                        .to_string(),
                    Err(_) => return None,
                };
                (!line.is_empty()).then_some(line)
            })
            .boxed()
    }
}

fn driver_err(err: bollard::errors::Error) -> Error {
    Error::Driver(anyhow::Error::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_truncates() {
        let handle = ContainerHandle {
            id: "0123456789abcdef".to_string(),
            name: "x".to_string(),
        };
        assert_eq!(handle.short_id(), "0123456789ab");

        let short = ContainerHandle {
            id: "abc".to_string(),
            name: "x".to_string(),
        };
        assert_eq!(short.short_id(), "abc");
    }

    #[test]
    fn test_log_stream_display() {
        assert_eq!(LogStream::Stdout.to_string(), "stdout");
        assert_eq!(LogStream::Stderr.to_string(), "stderr");
    }
}
