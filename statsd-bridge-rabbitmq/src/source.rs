//! Metric source: the RabbitMQ management HTTP API.
//!
//! Each cycle queries four endpoints and flattens the numeric leaves of every
//! entity into [`MetricSample`]s:
//!
//! | Endpoint         | Category   | Name                          | Scope |
//! |------------------|------------|-------------------------------|-------|
//! | `/api/overview`  | `overview` | `cluster_name` or `cluster`   | -     |
//! | `/api/nodes`     | `node`     | node name                     | -     |
//! | `/api/exchanges` | `exchange` | exchange name                 | vhost |
//! | `/api/queues`    | `queue`    | queue name                    | vhost |
//!
//! Nested objects become dotted metric paths (`message_stats.publish`).
//! Strings, booleans and arrays are skipped.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use statsight_common::MetricSample;
use thiserror::Error;

use crate::auth::Credentials;
use crate::config::RabbitmqBridgeConfig;
use crate::connection::ConnectionInfo;

pub const CATEGORY_OVERVIEW: &str = "overview";
pub const CATEGORY_NODE: &str = "node";
pub const CATEGORY_EXCHANGE: &str = "exchange";
pub const CATEGORY_QUEUE: &str = "queue";

/// Name used for the overview entity when the broker reports no cluster name.
const DEFAULT_CLUSTER_NAME: &str = "cluster";

/// Errors raised while fetching metrics.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Unexpected payload from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("Metric source timed out after {0:?}")]
    Timeout(Duration),
}

/// Something that can produce the current set of metric samples.
pub trait MetricSource: Send + Sync {
    /// Fetch all current samples. `scope` restricts scoped entities to those
    /// whose scope starts with it.
    fn fetch(
        &self,
        scope: Option<&str>,
    ) -> impl Future<Output = Result<Vec<MetricSample>, SourceError>> + Send;
}

/// Client for the management HTTP API.
pub struct ManagementClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl ManagementClient {
    /// Create a client for the given connection and credentials.
    pub fn new(connection: &ConnectionInfo, credentials: &Credentials) -> Result<Self, SourceError> {
        if !connection.validate_certs() {
            tracing::warn!(url = %connection.url(), "TLS certificate validation disabled");
        }

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!connection.validate_certs())
            .user_agent(concat!("statsd-bridge-rabbitmq/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: connection.url(),
            credentials: credentials.clone(),
        })
    }

    /// Create a client from a loaded configuration.
    pub fn from_config(config: &RabbitmqBridgeConfig) -> Result<Self, SourceError> {
        Self::new(config.management(), config.credentials())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Result<Value, SourceError> {
        let endpoint = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&endpoint)
            .basic_auth(
                self.credentials.username(),
                Some(self.credentials.password()),
            )
            .send()
            .await
            .map_err(|source| SourceError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|source| SourceError::Request { endpoint, source })
    }

    async fn entities(
        &self,
        path: &str,
        category: &str,
        scope: Option<&str>,
    ) -> Result<Vec<MetricSample>, SourceError> {
        let payload = self.get_json(path).await?;
        entity_samples(category, &payload, scope).map_err(|reason| SourceError::Decode {
            endpoint: format!("{}{}", self.base_url, path),
            reason,
        })
    }
}

impl MetricSource for ManagementClient {
    async fn fetch(&self, scope: Option<&str>) -> Result<Vec<MetricSample>, SourceError> {
        let overview = self.get_json("/api/overview").await?;
        let mut samples = overview_samples(&overview);

        samples.extend(self.entities("/api/nodes", CATEGORY_NODE, None).await?);
        samples.extend(
            self.entities("/api/exchanges", CATEGORY_EXCHANGE, scope)
                .await?,
        );
        samples.extend(self.entities("/api/queues", CATEGORY_QUEUE, scope).await?);

        tracing::debug!(url = %self.base_url, samples = samples.len(), "Fetched management metrics");

        Ok(samples)
    }
}

/// Wraps a source with a deadline on each fetch.
pub struct Timed<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Timed<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<S: MetricSource> MetricSource for Timed<S> {
    async fn fetch(&self, scope: Option<&str>) -> Result<Vec<MetricSample>, SourceError> {
        tokio::time::timeout(self.timeout, self.inner.fetch(scope))
            .await
            .map_err(|_| SourceError::Timeout(self.timeout))?
    }
}

/// Samples for the `/api/overview` document.
pub fn overview_samples(overview: &Value) -> Vec<MetricSample> {
    let name = overview
        .get("cluster_name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_CLUSTER_NAME);

    flatten_numeric(overview)
        .into_iter()
        .map(|(metric, value)| MetricSample::new(CATEGORY_OVERVIEW, name, metric, value))
        .collect()
}

/// Samples for a list endpoint (`/api/nodes`, `/api/exchanges`, `/api/queues`).
///
/// Entities with a `vhost` are scoped by it; when `scope` is set, entities
/// whose vhost does not start with it are dropped. Entities without a name
/// are skipped.
pub fn entity_samples(
    category: &str,
    payload: &Value,
    scope: Option<&str>,
) -> Result<Vec<MetricSample>, String> {
    let entities = payload
        .as_array()
        .ok_or_else(|| "expected a list of entities".to_string())?;

    let mut samples = Vec::new();
    for entity in entities {
        let Some(name) = entity.get("name").and_then(Value::as_str) else {
            tracing::debug!(category, "Skipping entity without a name");
            continue;
        };

        let vhost = entity.get("vhost").and_then(Value::as_str);
        if let (Some(prefix), Some(vhost)) = (scope, vhost) {
            if !vhost.starts_with(prefix) {
                continue;
            }
        }

        for (metric, value) in flatten_numeric(entity) {
            let sample = MetricSample::new(category, name, metric, value);
            samples.push(match vhost {
                Some(vhost) => sample.with_scope(vhost),
                None => sample,
            });
        }
    }

    Ok(samples)
}

/// Collect the finite numeric leaves of a JSON value with their dotted paths.
pub fn flatten_numeric(value: &Value) -> Vec<(String, f64)> {
    let mut out = Vec::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, path: String, out: &mut Vec<(String, f64)>) {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_f64().filter(|v| v.is_finite()) {
                if !path.is_empty() {
                    out.push((path, v));
                }
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                flatten_into(child, child_path, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn metric<'a>(samples: &'a [MetricSample], name: &str, metric: &str) -> Option<&'a MetricSample> {
        samples.iter().find(|s| s.name == name && s.metric == metric)
    }

    #[test]
    fn test_flatten_numeric() {
        let value = json!({
            "messages": 5,
            "durable": true,
            "name": "orders",
            "message_stats": {
                "publish": 10,
                "publish_details": { "rate": 0.5 }
            },
            "consumer_details": [{ "prefetch": 1 }]
        });

        let mut leaves = flatten_numeric(&value);
        leaves.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            leaves,
            vec![
                ("message_stats.publish".to_string(), 10.0),
                ("message_stats.publish_details.rate".to_string(), 0.5),
                ("messages".to_string(), 5.0),
            ]
        );
    }

    #[test]
    fn test_flatten_scalar_root_has_no_path() {
        assert!(flatten_numeric(&json!(5)).is_empty());
        assert!(flatten_numeric(&json!("x")).is_empty());
    }

    #[test]
    fn test_overview_samples() {
        let overview = json!({
            "cluster_name": "rabbit@mq",
            "queue_totals": { "messages": 7 },
            "object_totals": { "queues": 3 },
            "listeners": [{ "port": 5672 }]
        });

        let samples = overview_samples(&overview);
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.category == "overview"));

        let messages = metric(&samples, "rabbit@mq", "queue_totals.messages").unwrap();
        assert_eq!(messages.value, 7.0);
        assert_eq!(messages.scope, None);
    }

    #[test]
    fn test_overview_without_cluster_name() {
        let samples = overview_samples(&json!({ "object_totals": { "queues": 1 } }));
        assert_eq!(samples[0].name, "cluster");
    }

    #[test]
    fn test_entity_samples_scoped_by_vhost() {
        let payload = json!([
            { "name": "orders", "vhost": "prod", "messages": 4 },
            { "name": "amq.gen-1", "vhost": "prod-eu", "messages": 1 },
            { "name": "scratch", "vhost": "dev", "messages": 9 }
        ]);

        let all = entity_samples("queue", &payload, None).unwrap();
        assert_eq!(all.len(), 3);

        let scoped = entity_samples("queue", &payload, Some("prod")).unwrap();
        let names: Vec<_> = scoped.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "amq.gen-1"]);

        let orders = metric(&scoped, "orders", "messages").unwrap();
        assert_eq!(orders.scope.as_deref(), Some("prod"));
        assert_eq!(orders.path(), "queue.prod.orders.messages");
    }

    #[test]
    fn test_entity_samples_unscoped_entities_ignore_prefix() {
        let payload = json!([{ "name": "rabbit@node1", "mem_used": 1024 }]);
        let samples = entity_samples("node", &payload, Some("prod")).unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].scope, None);
    }

    #[test]
    fn test_entity_samples_skip_nameless() {
        let payload = json!([{ "messages": 1 }, { "name": "", "vhost": "/", "messages": 2 }]);
        let samples = entity_samples("exchange", &payload, None).unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, "");
        assert_eq!(samples[0].path(), "exchange._._.messages");
    }

    #[test]
    fn test_entity_samples_rejects_non_list() {
        assert!(entity_samples("queue", &json!({ "error": "x" }), None).is_err());
    }

    #[test]
    fn test_client_base_url() {
        let connection = ConnectionInfo::from_url("https://mq.local:15671", false).unwrap();
        let client = ManagementClient::new(&connection, &Credentials::default()).unwrap();
        assert_eq!(client.base_url(), "https://mq.local:15671");
    }

    struct SlowSource {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl MetricSource for SlowSource {
        async fn fetch(&self, _scope: Option<&str>) -> Result<Vec<MetricSample>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![MetricSample::new("queue", "q", "messages", 1.0)])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_source_times_out() {
        let source = Timed::new(
            SlowSource {
                delay: Duration::from_secs(30),
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(5),
        );

        let err = source.fetch(None).await.unwrap_err();
        assert!(matches!(err, SourceError::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_source_passes_through() {
        let source = Timed::new(
            SlowSource {
                delay: Duration::from_secs(1),
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(5),
        );

        let samples = source.fetch(Some("prod")).await.unwrap();
        assert_eq!(samples.len(), 1);
    }
}
