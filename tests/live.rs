//! Tier 2 live tests against a real Docker daemon and LocalStack image.
//!
//! Requires Docker and network access to pull `localstack/localstack`.
//! Enable with: cargo test --test live --features live-docker-tests

use std::sync::Arc;
use std::time::Duration;

use localstack_harness::contrib::rest::{self, RestClientFactory};
use localstack_harness::{DockerDriver, HookBus, Session, SessionConfig, is_port_open};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

#[tokio::test]
async fn session_starts_sqs_and_serves_the_edge_port() {
    init_logging();
    let driver = Arc::new(
        DockerDriver::connect()
            .await
            .expect("docker daemon should be reachable"),
    );

    let mut bus = HookBus::new();
    rest::register(&mut bus);

    let mut session = Session::builder(driver)
        .config(SessionConfig {
            services: Some(vec!["sqs".to_string()]),
            ..Default::default()
        })
        .hooks(Arc::new(bus))
        .build()
        .expect("session should build");

    session
        .scoped(async |session| {
            let port = session
                .map_port(4566)
                .await?
                .expect("edge port should be published");
            assert!(is_port_open("127.0.0.1", port, Duration::from_secs(1)).await);

            let factory = session
                .extensions()
                .get::<RestClientFactory>(rest::CAPABILITY)
                .expect("rest factory should be attached");
            let response = factory
                .request(reqwest::Method::POST, "sqs", "/")
                .header("X-Amz-Target", "AmazonSQS.ListQueues")
                .header("Content-Type", "application/x-amz-json-1.0")
                .body("{}")
                .send()
                .await?;
            assert!(response.status().is_success());
            Ok(())
        })
        .await
        .expect("scoped session should succeed");

    assert!(!session.is_running());
}
