//! Session lifecycle controller.
//!
//! A [`Session`] owns one LocalStack container: it launches the container,
//! polls every requested service's readiness check with per-pass exponential
//! backoff until all pass or the timeout budget runs out, exposes the
//! dynamically mapped edge port, and guarantees the container is torn down
//! on both normal and failure paths.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Level, debug, error, info, trace, warn};

use crate::config::{self, SessionConfig};
use crate::driver::{ContainerDriver, ContainerHandle, ContainerSpec, LogStream};
use crate::error::{Error, Result};
use crate::hooks::{Extensions, HookBus, SessionEvent};
use crate::registry::ServiceRegistry;

/// First inter-pass delay of the readiness loop.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Ceiling for inter-pass delays.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Grace period for the automatic stop after a readiness timeout.
const ABORT_STOP_TIMEOUT: Duration = Duration::from_millis(100);

/// One managed LocalStack instance.
///
/// Construct through [`Session::builder`], drive with [`Session::start`] /
/// [`Session::stop`], or let [`Session::scoped`] pair them for you. A
/// dropped running session attempts a best-effort stop, but relying on that
/// path has undefined timing; always prefer the scoped form.
pub struct Session {
    driver: Arc<dyn ContainerDriver>,
    registry: Arc<ServiceRegistry>,
    hooks: Arc<HookBus>,
    config: SessionConfig,
    services: Vec<String>,
    region: String,
    container_name: String,
    hostname: String,
    container: Option<ContainerHandle>,
    tailers: Vec<JoinHandle<()>>,
    extensions: Extensions,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("services", &self.services)
            .field("region", &self.region)
            .field("container_name", &self.container_name)
            .field("hostname", &self.hostname)
            .field("running", &self.container.is_some())
            .finish()
    }
}

/// Builder wiring a [`Session`] with its collaborators.
pub struct SessionBuilder {
    driver: Arc<dyn ContainerDriver>,
    config: SessionConfig,
    registry: Arc<ServiceRegistry>,
    hooks: Arc<HookBus>,
}

impl SessionBuilder {
    /// Start from defaults: full builtin catalog, empty hook bus.
    pub fn new(driver: Arc<dyn ContainerDriver>) -> Self {
        Self {
            driver,
            config: SessionConfig::default(),
            registry: ServiceRegistry::builtin(),
            hooks: Arc::new(HookBus::new()),
        }
    }

    /// Use this configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an alternate service registry.
    pub fn registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use this hook bus.
    pub fn hooks(mut self, hooks: Arc<HookBus>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate the configuration and build the session. Nothing is started.
    pub fn build(self) -> Result<Session> {
        let Self {
            driver,
            config,
            registry,
            hooks,
        } = self;

        config.validate()?;

        let services = match &config.services {
            Some(requested) => {
                for name in requested {
                    if !registry.contains(name) {
                        return Err(Error::UnknownService { name: name.clone() });
                    }
                }
                requested.clone()
            }
            None => registry.names().map(str::to_string).collect(),
        };

        if config.api_key.is_none() {
            let paid: Vec<&str> = services
                .iter()
                .filter(|name| registry.get(name).is_some_and(|d| d.is_pro()))
                .map(String::as_str)
                .collect();
            if !paid.is_empty() {
                warn!(
                    services = %paid.join(","),
                    "paid-tier services requested without an api key"
                );
            }
        }

        let region = resolve_region(config.region.as_deref());
        let container_name = config
            .container_name
            .clone()
            .unwrap_or_else(config::generate_container_name);

        Ok(Session {
            driver,
            registry,
            hooks,
            config,
            services,
            region,
            container_name,
            hostname: config::LOCALHOST.to_string(),
            container: None,
            tailers: Vec::new(),
            extensions: Extensions::default(),
        })
    }
}

impl Session {
    /// Builder with `driver` and defaults for everything else.
    pub fn builder(driver: Arc<dyn ContainerDriver>) -> SessionBuilder {
        SessionBuilder::new(driver)
    }

    /// Shorthand for `Session::builder(driver).config(config).build()`.
    pub fn new(driver: Arc<dyn ContainerDriver>, config: SessionConfig) -> Result<Self> {
        Self::builder(driver).config(config).build()
    }

    /// Hostname the emulated services are reached on.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Effective region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Requested services, in check order.
    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Name of the (running or future) container.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Whether the emulated APIs are served over TLS.
    pub fn use_ssl(&self) -> bool {
        self.config.use_ssl
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle of the running container, if any.
    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    /// Whether the container is currently running.
    pub fn is_running(&self) -> bool {
        self.container.is_some()
    }

    /// Capabilities attached by extensions.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access for extensions attaching capabilities.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Start the container and wait for the requested services.
    ///
    /// Fires the `starting` hooks, pulls the image if configured, launches
    /// the container with dynamic edge-port allocation, tails its output,
    /// runs the readiness loop within the remaining `timeout` budget, then
    /// fires the `started` hooks. A readiness timeout stops the
    /// partially-started container before the error propagates, so no
    /// container is orphaned on failure.
    pub async fn start(&mut self, timeout: Duration) -> Result<()> {
        if self.container.is_some() {
            return Err(Error::AlreadyStarted);
        }

        debug!(container = %self.container_name, "running starting hooks");
        let hooks = Arc::clone(&self.hooks);
        hooks.dispatch(SessionEvent::Starting, self).await?;

        let image = format!("{}:{}", config::IMAGE_NAME, self.config.version);
        if self.config.pull_image {
            self.driver.pull(&image).await?;
        }

        let started_at = Instant::now();
        let spec = ContainerSpec {
            image,
            name: self.container_name.clone(),
            env: self.container_environment(),
            expose_port: config::EDGE_PORT,
            auto_remove: self.config.auto_remove,
        };
        info!(container = %self.container_name, "starting localstack container");
        let handle = self.driver.run(&spec).await?;
        debug!(
            container = %self.container_name,
            id = %handle.short_id(),
            "container running"
        );
        self.spawn_log_tailers(&handle).await;
        self.container = Some(handle);

        let remaining = timeout.saturating_sub(started_at.elapsed());
        if let Err(err) = self.check_services(remaining).await {
            warn!(
                container = %self.container_name,
                error = %err,
                "services never became ready, stopping container"
            );
            if let Err(stop_err) = self.stop(ABORT_STOP_TIMEOUT).await {
                warn!(
                    container = %self.container_name,
                    error = %stop_err,
                    "best-effort stop after readiness failure also failed"
                );
            }
            return Err(err);
        }

        debug!(container = %self.container_name, "running started hooks");
        hooks.dispatch(SessionEvent::Started, self).await?;
        info!(
            container = %self.container_name,
            services = self.services.len(),
            "localstack session ready"
        );
        Ok(())
    }

    /// Stop the container. No-op when nothing is running.
    ///
    /// Fires the `stopping` hooks, stops the container with the given grace
    /// period, clears the container and log-tailer handles, then fires the
    /// `stopped` hooks.
    pub async fn stop(&mut self, timeout: Duration) -> Result<()> {
        if self.container.is_none() {
            return Ok(());
        }

        debug!(container = %self.container_name, "running stopping hooks");
        let hooks = Arc::clone(&self.hooks);
        hooks.dispatch(SessionEvent::Stopping, self).await?;

        if let Some(handle) = self.container.as_ref() {
            self.driver.stop(handle, timeout).await?;
        }
        self.container = None;
        for tailer in self.tailers.drain(..) {
            tailer.abort();
        }

        debug!(container = %self.container_name, "running stopped hooks");
        hooks.dispatch(SessionEvent::Stopped, self).await?;
        info!(container = %self.container_name, "localstack session stopped");
        Ok(())
    }

    /// Start, run `body`, and stop on every exit path.
    ///
    /// Uses the default start and stop timeouts. A failing body still stops
    /// the container; the body's error wins over any stop failure.
    pub async fn scoped<T>(
        &mut self,
        body: impl AsyncFnOnce(&mut Self) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        self.start(config::DEFAULT_START_TIMEOUT).await?;
        match body(self).await {
            Ok(value) => {
                self.stop(config::DEFAULT_STOP_TIMEOUT).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(stop_err) = self.stop(config::DEFAULT_STOP_TIMEOUT).await {
                    warn!(
                        container = %self.container_name,
                        error = %stop_err,
                        "failed to stop session while unwinding"
                    );
                }
                Err(err)
            }
        }
    }

    /// Host port bound to a container port, queried from the driver at call
    /// time so it is always current.
    pub async fn map_port(&self, port: u16) -> Result<Option<u16>> {
        let handle = self.container.as_ref().ok_or(Error::NotStarted)?;
        self.driver.host_port(handle, port).await
    }

    /// Host and port for an emulated service. Every service shares the edge
    /// port, so the identifier only names the caller's intent.
    pub async fn service_hostname(&self, _service: &str) -> Result<String> {
        let port = self
            .map_port(config::EDGE_PORT)
            .await?
            .ok_or(Error::PortNotPublished {
                port: config::EDGE_PORT,
            })?;
        Ok(format!("{}:{}", self.hostname, port))
    }

    /// URL for a service endpoint, composed from the SSL flag, hostname and
    /// mapped edge port.
    pub async fn endpoint_url(&self, service: &str) -> Result<String> {
        let scheme = if self.config.use_ssl { "https" } else { "http" };
        Ok(format!("{scheme}://{}", self.service_hostname(service).await?))
    }

    /// Environment passed into the container.
    fn container_environment(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("DEFAULT_REGION".to_string(), self.region.clone()),
            ("SERVICES".to_string(), self.services.join(",")),
            (
                "KINESIS_ERROR_PROBABILITY".to_string(),
                format!("{:.6}", self.config.kinesis_error_probability),
            ),
            (
                "DYNAMODB_ERROR_PROBABILITY".to_string(),
                format!("{:.6}", self.config.dynamodb_error_probability),
            ),
            ("USE_SSL".to_string(), self.config.use_ssl.to_string()),
        ];
        if let Some(key) = &self.config.api_key {
            env.push(("LOCALSTACK_API_KEY".to_string(), key.clone()));
        }
        env
    }

    async fn spawn_log_tailers(&mut self, handle: &ContainerHandle) {
        let level = self.config.container_log_level;
        for stream in [LogStream::Stdout, LogStream::Stderr] {
            let lines = self.driver.logs(handle, stream).await;
            let container = self.container_name.clone();
            self.tailers
                .push(tokio::spawn(tail_logs(container, stream, level, lines)));
        }
    }

    /// Poll every pending service until all pass or the deadline expires.
    async fn check_services(&self, timeout: Duration) -> Result<()> {
        self.check_services_with(timeout, INITIAL_RETRY_DELAY, MAX_RETRY_DELAY)
            .await
    }

    /// Readiness loop. Backoff applies per full pass over the pending set,
    /// so one slow service cannot starve checks of the others. A service that
    /// passed once is never re-checked within this attempt.
    async fn check_services_with(
        &self,
        timeout: Duration,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Result<()> {
        let mut pending: Vec<&str> = self.services.iter().map(String::as_str).collect();
        if pending.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            if started.elapsed() >= timeout {
                return Err(Error::Timeout {
                    service: pending[0].to_string(),
                });
            }

            let mut still_pending = Vec::with_capacity(pending.len());
            for name in pending {
                // Membership was validated at build time.
                let Some(descriptor) = self.registry.get(name) else {
                    continue;
                };
                match descriptor.check(self).await {
                    Ok(()) => trace!(service = name, "service ready"),
                    Err(not_ready) => {
                        trace!(service = name, reason = %not_ready, "service not ready");
                        still_pending.push(name);
                    }
                }
            }
            pending = still_pending;
            if pending.is_empty() {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(Error::Timeout {
                    service: pending[0].to_string(),
                });
            }

            let delay = backoff_delay(initial_delay, max_delay, attempt);
            trace!(
                pending = pending.len(),
                delay_ms = delay.as_millis() as u64,
                "waiting before next readiness pass"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.container.take() {
            warn!(
                container = %self.container_name,
                "session dropped while running, attempting best-effort stop"
            );
            for tailer in self.tailers.drain(..) {
                tailer.abort();
            }
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let driver = Arc::clone(&self.driver);
                runtime.spawn(async move {
                    let _ = driver.stop(&handle, ABORT_STOP_TIMEOUT).await;
                });
            }
        }
    }
}

/// `min(max_delay, initial * 2^attempt)`.
fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}

fn resolve_region(explicit: Option<&str>) -> String {
    if let Some(region) = explicit {
        return region.to_string();
    }
    for var in ["AWS_DEFAULT_REGION", "AWS_REGION"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return value;
            }
        }
    }
    config::DEFAULT_REGION.to_string()
}

async fn tail_logs(
    container: String,
    stream: LogStream,
    level: Level,
    mut lines: BoxStream<'static, String>,
) {
    while let Some(line) = lines.next().await {
        emit_log(level, &container, stream, &line);
    }
    trace!(%container, %stream, "log stream closed");
}

fn emit_log(level: Level, container: &str, stream: LogStream, line: &str) {
    match level {
        Level::ERROR => error!(%container, %stream, "{line}"),
        Level::WARN => warn!(%container, %stream, "{line}"),
        Level::INFO => info!(%container, %stream, "{line}"),
        Level::DEBUG => debug!(%container, %stream, "{line}"),
        _ => trace!(%container, %stream, "{line}"),
    }
}
