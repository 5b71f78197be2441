//! Plain-HTTP client factory.
//!
//! [`RestFactoryHook`] subscribes to the `started` event and attaches a
//! [`RestClientFactory`] under the [`CAPABILITY`] key. The factory hands out
//! request builders aimed at the session's edge endpoint, carrying the
//! stand-in credentials LocalStack accepts, so tests can talk to the
//! emulated APIs without a full SDK.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use tracing::debug;
use url::Url;

use crate::config::EDGE_PORT;
use crate::hooks::{HookBus, SessionHook};
use crate::probe::dummy_authorization;
use crate::session::Session;

/// Extension key the factory is stored under.
pub const CAPABILITY: &str = "rest";

/// Builds HTTP requests against the emulated endpoints.
pub struct RestClientFactory {
    client: reqwest::Client,
    base_url: Url,
    region: String,
}

impl RestClientFactory {
    fn new(base_url: Url, region: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            region,
        }
    }

    /// Edge endpoint all services share.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Region the session runs in.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Request builder aimed at an emulated service.
    ///
    /// `path` is joined onto the edge endpoint; the credential scope in the
    /// authorization header names `service`.
    pub fn request(&self, method: Method, service: &str, path: &str) -> reqwest::RequestBuilder {
        let url = self
            .base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone());
        self.client
            .request(method, url)
            .header(AUTHORIZATION, dummy_authorization(&self.region, service))
    }
}

/// Hook attaching a [`RestClientFactory`] once the session is ready.
pub struct RestFactoryHook;

#[async_trait]
impl SessionHook for RestFactoryHook {
    async fn on_started(&self, session: &mut Session) -> anyhow::Result<()> {
        let port = session
            .map_port(EDGE_PORT)
            .await?
            .context("edge port is not published")?;
        let scheme = if session.use_ssl() { "https" } else { "http" };
        let base_url = Url::parse(&format!("{scheme}://{}:{port}/", session.hostname()))?;

        let factory = RestClientFactory::new(base_url, session.region().to_string());
        session.extensions_mut().insert(CAPABILITY, factory);
        debug!(container = %session.container_name(), "attached rest client factory");
        Ok(())
    }
}

/// Register the factory hook on a bus.
pub fn register(bus: &mut HookBus) {
    bus.register(Arc::new(RestFactoryHook));
}
