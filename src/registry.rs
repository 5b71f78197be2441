//! Catalog of emulated services and their readiness checks.
//!
//! The registry is defined once at process start and shared read-only across
//! sessions. Services with a JSON wire protocol get a deep API check; the
//! rest get a port check (their XML protocols are not worth parsing just to
//! confirm liveness).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::probe::{ApiQuery, ResponseShape, ServiceCheck, api_check, port_check};

const JSON_1_0: &str = "application/x-amz-json-1.0";
const JSON_1_1: &str = "application/x-amz-json-1.1";

/// One emulated service: identifier, readiness check, tier flag.
#[derive(Clone)]
pub struct ServiceDescriptor {
    name: String,
    readiness: Arc<dyn ServiceCheck>,
    pro: bool,
}

impl ServiceDescriptor {
    /// Descriptor for a community-tier service.
    pub fn new(name: impl Into<String>, readiness: Arc<dyn ServiceCheck>) -> Self {
        Self {
            name: name.into(),
            readiness,
            pro: false,
        }
    }

    /// Mark the service as requiring the paid tier.
    pub fn pro(mut self) -> Self {
        self.pro = true;
        self
    }

    /// Service identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the service requires the paid tier.
    pub fn is_pro(&self) -> bool {
        self.pro
    }

    /// Run the readiness check against `session`.
    pub async fn check(&self, session: &crate::session::Session) -> Result<(), crate::probe::NotReady> {
        self.readiness.check(session).await
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("pro", &self.pro)
            .finish_non_exhaustive()
    }
}

/// Read-only, ordered mapping from service identifier to descriptor.
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
    index: HashMap<String, usize>,
}

impl ServiceRegistry {
    /// Build a registry from descriptors, preserving their order.
    pub fn new(descriptors: impl IntoIterator<Item = ServiceDescriptor>) -> Self {
        let services: Vec<ServiceDescriptor> = descriptors.into_iter().collect();
        let index = services
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        Self { services, index }
    }

    /// The built-in LocalStack catalog.
    pub fn builtin() -> Arc<ServiceRegistry> {
        Arc::clone(&BUILTIN)
    }

    /// Look up a service by identifier.
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.index.get(name).map(|&i| &self.services[i])
    }

    /// Whether `name` is a known service.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Service identifiers in catalog order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|d| d.name.as_str())
    }

    /// Number of services in the catalog.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.len())
            .finish()
    }
}

static BUILTIN: LazyLock<Arc<ServiceRegistry>> = LazyLock::new(|| Arc::new(builtin_catalog()));

fn builtin_catalog() -> ServiceRegistry {
    use ResponseShape::{ArrayAt, Object};

    let port = |name: &'static str| ServiceDescriptor::new(name, port_check(name));
    let target = |name: &'static str,
                  header: &'static str,
                  content_type: &'static str,
                  keys: &'static [&'static str]| {
        ServiceDescriptor::new(
            name,
            api_check(
                name,
                ApiQuery::Target {
                    header,
                    content_type,
                },
                ArrayAt(keys),
            ),
        )
    };
    let rest = |name: &'static str, path: &'static str, keys: &'static [&'static str]| {
        ServiceDescriptor::new(name, api_check(name, ApiQuery::Get { path }, ArrayAt(keys)))
    };

    ServiceRegistry::new([
        port("apigateway"),
        rest("amplify", "/apps", &["apps"]).pro(),
        rest("appsync", "/v1/apis", &["graphqlApis"]).pro(),
        target("athena", "AmazonAthena.ListDataCatalogs", JSON_1_1, &["DataCatalogsSummary"]).pro(),
        port("cloudformation"),
        port("cloudfront").pro(),
        target("cloudtrail", "CloudTrail_20131101.ListTrails", JSON_1_1, &["Trails"]).pro(),
        port("cloudwatch"),
        target("codecommit", "CodeCommit_20150413.ListRepositories", JSON_1_1, &["repositories"]).pro(),
        port("cognito").pro(),
        target("dynamodb", "DynamoDB_20120810.ListTables", JSON_1_0, &["TableNames"]),
        target("dynamodbstreams", "DynamoDBStreams_20120810.ListStreams", JSON_1_0, &["Streams"]),
        target("ecr", "AmazonEC2ContainerRegistry_V20150921.DescribeRepositories", JSON_1_1, &["repositories"]).pro(),
        target("ecs", "AmazonEC2ContainerServiceV20141113.ListClusters", JSON_1_1, &["clusterArns"]).pro(),
        rest("eks", "/clusters", &["clusters"]).pro(),
        port("ec2"),
        port("elasticache"),
        port("elb"),
        target("emr", "ElasticMapReduce.ListClusters", JSON_1_1, &["Clusters"]),
        target("events", "AWSEvents.ListEventBuses", JSON_1_1, &["EventBuses"]),
        rest("es", "/2015-01-01/domain", &["DomainNames"]),
        target("firehose", "Firehose_20150804.ListDeliveryStreams", JSON_1_1, &["DeliveryStreamNames"]),
        rest("glacier", "/-/vaults", &["VaultList"]),
        target("glue", "AWSGlue.ListCrawlers", JSON_1_1, &["CrawlerNames"]),
        rest("iot", "/streams", &["streams"]),
        port("iam"),
        target("kinesis", "Kinesis_20131202.ListStreams", JSON_1_1, &["StreamNames"]),
        rest("kafka", "/v1/clusters", &["ClusterInfoList"]),
        target("kinesisanalytics", "KinesisAnalytics_20150814.ListApplications", JSON_1_1, &["ApplicationSummaries"]),
        target("kms", "TrentService.ListKeys", JSON_1_1, &["Keys"]),
        rest("lambda", "/2015-03-31/functions", &["Functions"]),
        target("mediastore", "MediaStore_20170901.ListContainers", JSON_1_1, &["Containers"]),
        target("organizations", "AWSOrganizationsV20161128.ListAccounts", JSON_1_1, &["Accounts"]),
        target("logs", "Logs_20140328.DescribeLogGroups", JSON_1_1, &["logGroups"]),
        port("redshift"),
        port("route53"),
        rest("qldb", "/ledgers", &["Ledgers"]),
        port("rds"),
        port("s3"),
        target("secretsmanager", "secretsmanager.ListSecrets", JSON_1_1, &["SecretList"]),
        port("ses"),
        port("sns"),
        // ListQueues has no mandatory fields but its JSON response may omit
        // the queue list entirely, hence the object shape.
        ServiceDescriptor::new(
            "sqs",
            api_check(
                "sqs",
                ApiQuery::Target {
                    header: "AmazonSQS.ListQueues",
                    content_type: JSON_1_0,
                },
                Object,
            ),
        ),
        target("ssm", "AmazonSSM.DescribeParameters", JSON_1_1, &["Parameters"]),
        target("stepfunctions", "AWSStepFunctions.ListActivities", JSON_1_0, &["activities"]),
        target("timestream", "Timestream_20181101.DescribeEndpoints", JSON_1_0, &["Endpoints"]),
        target("transfer", "TransferService.ListServers", JSON_1_1, &["Servers"]),
        port("xray"),
    ])
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_builtin_contains_core_services() {
        let registry = ServiceRegistry::builtin();
        for name in ["s3", "sqs", "sns", "dynamodb", "kinesis", "lambda"] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert!(!registry.contains("made-up-service"));
    }

    #[test]
    fn test_builtin_pro_flags() {
        let registry = ServiceRegistry::builtin();
        assert!(registry.get("athena").unwrap().is_pro());
        assert!(registry.get("eks").unwrap().is_pro());
        assert!(!registry.get("s3").unwrap().is_pro());
        assert!(!registry.get("dynamodb").unwrap().is_pro());
    }

    #[test]
    fn test_names_preserve_catalog_order() {
        let registry = ServiceRegistry::builtin();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names.first(), Some(&"apigateway"));
        assert_eq!(names.last(), Some(&"xray"));
        assert_eq!(names.len(), registry.len());
    }

    #[test]
    fn test_get_returns_descriptor() {
        let registry = ServiceRegistry::builtin();
        let descriptor = registry.get("dynamodb").unwrap();
        assert_eq!(descriptor.name(), "dynamodb");
    }
}
