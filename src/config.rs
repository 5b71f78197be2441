//! Session configuration and harness-wide constants.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Loopback address the emulated services are reached on.
pub const LOCALHOST: &str = "127.0.0.1";

/// Region assumed when none is configured or found in the environment.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Stand-in access key id accepted by LocalStack.
pub const DEFAULT_ACCESS_KEY_ID: &str = "accesskey";

/// Stand-in secret access key accepted by LocalStack.
pub const DEFAULT_SECRET_ACCESS_KEY: &str = "secretkey";

/// Stand-in session token accepted by LocalStack.
pub const DEFAULT_SESSION_TOKEN: &str = "token";

/// Single edge port every emulated service is published on.
pub const EDGE_PORT: u16 = 4566;

/// Docker image the session runs.
pub const IMAGE_NAME: &str = "localstack/localstack";

/// Default budget for `start`.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Default grace period for `stop`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

// Releases before 0.11 predate the single edge-port layout.
const MIN_SUPPORTED_VERSION: (u64, u64) = (0, 11);

const CONTAINER_NAME_PREFIX: &str = "localstack-harness-";

/// Configuration for a LocalStack session.
///
/// All fields have working defaults; a `SessionConfig::default()` session
/// starts the full service catalog on the latest image.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Services to start. `None` starts the entire catalog. Restricting this
    /// reduces container startup time and therefore test time.
    pub services: Option<Vec<String>>,
    /// Region the container assumes. Resolution order: this field, then the
    /// `AWS_DEFAULT_REGION`/`AWS_REGION` environment, then `us-east-1`.
    pub region: Option<String>,
    /// Probability in [0.0, 1.0] of injected throughput errors in Kinesis
    /// responses.
    pub kinesis_error_probability: f64,
    /// Probability in [0.0, 1.0] of injected throughput errors in DynamoDB
    /// responses.
    pub dynamodb_error_probability: f64,
    /// Level container stdout/stderr lines are re-emitted at.
    pub container_log_level: tracing::Level,
    /// Image tag to run.
    pub version: String,
    /// Delete the container when it stops.
    pub auto_remove: bool,
    /// Pull the image before starting.
    pub pull_image: bool,
    /// Explicit container name; auto-generated when absent.
    pub container_name: Option<String>,
    /// Serve the emulated APIs over TLS.
    pub use_ssl: bool,
    /// API key unlocking paid-tier services.
    pub api_key: Option<String>,
    /// Passthrough values retained for extensions.
    pub extra: HashMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            services: None,
            region: None,
            kinesis_error_probability: 0.0,
            dynamodb_error_probability: 0.0,
            container_log_level: tracing::Level::DEBUG,
            version: "latest".to_string(),
            auto_remove: true,
            pull_image: true,
            container_name: None,
            use_ssl: false,
            api_key: None,
            extra: HashMap::new(),
        }
    }
}

impl SessionConfig {
    /// Accept the legacy mapping form of the service set. Only the keys are
    /// kept (sorted for determinism); every service is served on the shared
    /// edge port regardless of the mapped values.
    pub fn with_service_mapping(mut self, mapping: HashMap<String, u16>) -> Self {
        let mut names: Vec<String> = mapping.into_keys().collect();
        names.sort();
        self.services = Some(names);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("kinesis_error_probability", self.kinesis_error_probability),
            ("dynamodb_error_probability", self.dynamodb_error_probability),
        ] {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(Error::Config {
                    reason: format!("{name} must be within [0.0, 1.0], got {value}"),
                });
            }
        }

        if self.version != "latest" {
            let parsed = version_tuple(&self.version).ok_or_else(|| Error::Config {
                reason: format!("unparsable version tag '{}'", self.version),
            })?;
            let minimum = [MIN_SUPPORTED_VERSION.0, MIN_SUPPORTED_VERSION.1];
            if parsed.as_slice() < &minimum[..] {
                return Err(Error::UnsupportedVersion {
                    version: self.version.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Parse a dotted release tag into its numeric components.
///
/// Stops at the first non-numeric segment, so `"0.12.11.1"` gives
/// `[0, 12, 11, 1]` and `"1.4-rc1"` gives `[1]`. Returns `None` when no
/// leading numeric segment exists (e.g. `"latest"`).
pub(crate) fn version_tuple(tag: &str) -> Option<Vec<u64>> {
    let parts: Vec<u64> = tag
        .split('.')
        .map_while(|segment| segment.parse().ok())
        .collect();
    if parts.is_empty() { None } else { Some(parts) }
}

/// Generate a random name for a LocalStack container.
pub fn generate_container_name() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = std::iter::repeat_with(|| rng.sample(rand::distributions::Alphanumeric))
        .map(char::from)
        .filter(char::is_ascii_alphabetic)
        .take(6)
        .collect();
    format!("{CONTAINER_NAME_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_version_tuple() {
        assert_eq!(version_tuple("1.2.3"), Some(vec![1, 2, 3]));
        assert_eq!(version_tuple("0.11"), Some(vec![0, 11]));
        assert_eq!(version_tuple("1.4-rc1"), Some(vec![1]));
        assert_eq!(version_tuple("latest"), None);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_old_version_rejected() {
        let config = SessionConfig {
            version: "0.10.5".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_minimum_version_accepted() {
        for tag in ["0.11", "0.11.0", "0.12.11", "1.4", "latest"] {
            let config = SessionConfig {
                version: tag.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "tag {tag} should be accepted");
        }
    }

    #[test]
    fn test_unparsable_version_rejected() {
        let config = SessionConfig {
            version: "edge".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_probability_bounds() {
        for bad in [-0.1, 1.1, f64::NAN] {
            let config = SessionConfig {
                kinesis_error_probability: bad,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(Error::Config { .. })));
        }
    }

    #[test]
    fn test_service_mapping_keeps_names() {
        let mapping = HashMap::from([("sqs".to_string(), 4576), ("s3".to_string(), 4572)]);
        let config = SessionConfig::default().with_service_mapping(mapping);
        assert_eq!(
            config.services,
            Some(vec!["s3".to_string(), "sqs".to_string()])
        );
    }

    #[test]
    fn test_generated_container_names() {
        let first = generate_container_name();
        let second = generate_container_name();

        for name in [&first, &second] {
            let suffix = name.strip_prefix(CONTAINER_NAME_PREFIX).unwrap();
            assert_eq!(suffix.len(), 6);
            assert!(suffix.chars().all(|c| c.is_ascii_alphabetic()));
        }
        assert_ne!(first, second);
    }
}
