//! Port and protocol-level readiness probing.
//!
//! Each service's readiness predicate either completes (ready) or returns
//! [`NotReady`], the retry signal the readiness loop in
//! [`crate::session::Session`] acts on. Transport and protocol failures fold
//! into `NotReady` so the loop can tell "not answering yet" from genuine
//! programming errors, which surface as panics or driver errors elsewhere.

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tokio::net::TcpStream;
use url::Url;

use crate::config::{DEFAULT_ACCESS_KEY_ID, LOCALHOST};
use crate::session::Session;

/// Socket-level timeout for raw connection attempts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Reused across checks; retries belong to the readiness loop, not here.
static PROBE_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Retry signal from a readiness check: the service is not answering yet.
#[derive(Debug, thiserror::Error)]
#[error("service '{service}' not ready: {reason}")]
pub struct NotReady {
    /// Service that failed the check.
    pub service: String,
    /// What went wrong, for trace output.
    pub reason: String,
}

impl NotReady {
    /// Build a retry signal for `service`.
    pub fn new(service: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}

/// Pluggable predicate confirming one emulated service responds correctly.
#[async_trait]
pub trait ServiceCheck: Send + Sync {
    /// Probe the service through the session's endpoint.
    async fn check(&self, session: &Session) -> Result<(), NotReady>;
}

/// Check whether a TCP endpoint accepts connections within `timeout`.
pub async fn is_port_open(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Expected JSON layout of a cheap list-style API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// The whole response is a JSON object.
    Object,
    /// An array nested under the given key path (empty path: top level).
    ArrayAt(&'static [&'static str]),
}

impl ResponseShape {
    /// Whether `value` has this shape.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ResponseShape::Object => value.is_object(),
            ResponseShape::ArrayAt(keys) => {
                let mut current = value;
                for key in *keys {
                    match current.get(key) {
                        Some(nested) => current = nested,
                        None => return false,
                    }
                }
                current.is_array()
            }
        }
    }
}

/// How the probing query reaches the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiQuery {
    /// JSON-protocol POST dispatched via an `X-Amz-Target` header.
    Target {
        /// Header value, e.g. `DynamoDB_20120810.ListTables`.
        header: &'static str,
        /// Protocol content type, e.g. `application/x-amz-json-1.0`.
        content_type: &'static str,
    },
    /// REST-style GET on a fixed path.
    Get {
        /// Absolute path of the list operation.
        path: &'static str,
    },
}

/// Check that a service's port accepts connections.
pub fn port_check(service: &str) -> Arc<dyn ServiceCheck> {
    Arc::new(PortCheck {
        service: service.to_string(),
    })
}

/// Check a service by issuing one cheap, argument-free API query and
/// verifying the response shape. Performs the port check first.
pub fn api_check(service: &str, query: ApiQuery, shape: ResponseShape) -> Arc<dyn ServiceCheck> {
    Arc::new(ApiCheck {
        service: service.to_string(),
        query,
        shape,
    })
}

struct PortCheck {
    service: String,
}

#[async_trait]
impl ServiceCheck for PortCheck {
    async fn check(&self, session: &Session) -> Result<(), NotReady> {
        probe_endpoint(session, &self.service).await.map(|_| ())
    }
}

struct ApiCheck {
    service: String,
    query: ApiQuery,
    shape: ResponseShape,
}

#[async_trait]
impl ServiceCheck for ApiCheck {
    async fn check(&self, session: &Session) -> Result<(), NotReady> {
        let endpoint = probe_endpoint(session, &self.service).await?;

        let request = match self.query {
            ApiQuery::Target {
                header,
                content_type,
            } => PROBE_CLIENT
                .post(endpoint)
                .header("X-Amz-Target", header)
                .header(CONTENT_TYPE, content_type)
                .body("{}"),
            ApiQuery::Get { path } => {
                let url = endpoint
                    .join(path)
                    .map_err(|err| NotReady::new(&self.service, err))?;
                PROBE_CLIENT.get(url)
            }
        };

        let response = request
            .header(
                AUTHORIZATION,
                dummy_authorization(session.region(), &self.service),
            )
            .send()
            .await
            .map_err(|err| NotReady::new(&self.service, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotReady::new(&self.service, format!("status {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| NotReady::new(&self.service, err))?;
        if self.shape.matches(&body) {
            Ok(())
        } else {
            Err(NotReady::new(&self.service, "unexpected response shape"))
        }
    }
}

/// Resolve a service's endpoint URL and confirm its port accepts connections.
async fn probe_endpoint(session: &Session, service: &str) -> Result<Url, NotReady> {
    let endpoint = session
        .endpoint_url(service)
        .await
        .map_err(|err| NotReady::new(service, err))?;
    let url = Url::parse(&endpoint).map_err(|err| NotReady::new(service, err))?;

    let host = url.host_str().unwrap_or(LOCALHOST).to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| NotReady::new(service, "endpoint has no port"))?;

    if is_port_open(&host, port, CONNECT_TIMEOUT).await {
        Ok(url)
    } else {
        Err(NotReady::new(service, format!("{host}:{port} unreachable")))
    }
}

/// SigV4-shaped header carrying the stand-in credentials. LocalStack only
/// parses the credential scope out of it; the signature is never verified.
pub(crate) fn dummy_authorization(region: &str, service: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256 Credential={DEFAULT_ACCESS_KEY_ID}/20200101/{region}/{service}/aws4_request, \
         SignedHeaders=host;x-amz-date, Signature=0"
    )
}
