//! Configuration for the RabbitMQ bridge.
//!
//! The configuration document is a flat object of PascalCase keys:
//!
//! ```json
//! {
//!     "Host": "mq.local",
//!     "Port": 15672,
//!     "Username": "monitor",
//!     "Password": "secret",
//!     "StatsdAddress": "127.0.0.1",
//!     "StatsdPort": 8125,
//!     "VHostPrefix": "prod",
//!     "Ignore": [["exchange", "Regex", "^amq\\."]]
//! }
//! ```
//!
//! Every key except `Port` has a default, listed in [`FIELD_RULES`]. A key whose
//! value is falsy (`null`, `""`, `0`, `[]`, `{}`) is treated as absent.
//! Unknown keys are logged and ignored.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use statsight_bridge_framework::BridgeConfig;
use statsight_common::{
    Document, LogFormat, LoggingConfig, is_falsy, parse_document, value_kind,
};
use thiserror::Error;

use crate::auth::{Credentials, DEFAULT_PASSWORD, DEFAULT_REALM, DEFAULT_USERNAME};
use crate::connection::{
    ConnectionInfo, DEFAULT_MANAGEMENT_HOST, DEFAULT_STATSD_HOST, DEFAULT_STATSD_NAMESPACE,
    DEFAULT_STATSD_PORT, Scheme, StatsdConnection,
};
use crate::filter::{FilterCompileError, IgnoreFilter, IgnoreRule, RuleType};

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
/// Default management API timeout per cycle, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Configuration document keys.
pub mod keys {
    pub const HOST: &str = "Host";
    pub const PORT: &str = "Port";
    pub const SCHEME: &str = "Scheme";
    pub const VALIDATE_CERTS: &str = "ValidateCerts";
    pub const USERNAME: &str = "Username";
    pub const PASSWORD: &str = "Password";
    pub const REALM: &str = "Realm";
    pub const STATSD_ADDRESS: &str = "StatsdAddress";
    pub const STATSD_PORT: &str = "StatsdPort";
    pub const STATSD_PREFIX: &str = "StatsdPrefix";
    pub const STATSD_NAMESPACE: &str = "StatsdNamespace";
    pub const VHOST_PREFIX: &str = "VHostPrefix";
    pub const IGNORE: &str = "Ignore";
    pub const INTERVAL: &str = "Interval";
    pub const TIMEOUT: &str = "Timeout";
    pub const LOG_LEVEL: &str = "LogLevel";
    pub const LOG_FORMAT: &str = "LogFormat";
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error(
        "Unsupported rule type '{rule_type}' in {category} ignore rule (only 'Regex' is supported)"
    )]
    UnsupportedRuleType { category: String, rule_type: String },

    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(#[from] FilterCompileError),

    #[error("Malformed configuration document: {0}")]
    MalformedDocument(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Configuration file not found: {path}")]
    NotFound { path: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<statsight_common::Error> for ConfigError {
    fn from(err: statsight_common::Error) -> Self {
        match err {
            statsight_common::Error::NotFound { path } => ConfigError::NotFound { path },
            statsight_common::Error::Io(e) => ConfigError::Io(e),
            other => ConfigError::MalformedDocument(other.to_string()),
        }
    }
}

/// Default applied when a key is absent or falsy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    /// No default: loading fails with [`ConfigError::MissingField`].
    Required,
    /// Optional: stays unset when absent.
    Unset,
    Text(&'static str),
    Port(u16),
    Flag(bool),
    Seconds(u64),
}

impl FieldDefault {
    fn to_value(self) -> Option<Value> {
        match self {
            FieldDefault::Required | FieldDefault::Unset => None,
            FieldDefault::Text(s) => Some(Value::from(s)),
            FieldDefault::Port(p) => Some(Value::from(p)),
            FieldDefault::Flag(b) => Some(Value::from(b)),
            FieldDefault::Seconds(s) => Some(Value::from(s)),
        }
    }
}

/// A recognized document key and its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub key: &'static str,
    pub default: FieldDefault,
}

/// Every recognized key with its default.
pub const FIELD_RULES: &[FieldRule] = &[
    FieldRule { key: keys::HOST, default: FieldDefault::Text(DEFAULT_MANAGEMENT_HOST) },
    FieldRule { key: keys::PORT, default: FieldDefault::Required },
    FieldRule { key: keys::SCHEME, default: FieldDefault::Text("http") },
    FieldRule { key: keys::VALIDATE_CERTS, default: FieldDefault::Flag(true) },
    FieldRule { key: keys::USERNAME, default: FieldDefault::Text(DEFAULT_USERNAME) },
    FieldRule { key: keys::PASSWORD, default: FieldDefault::Text(DEFAULT_PASSWORD) },
    FieldRule { key: keys::REALM, default: FieldDefault::Text(DEFAULT_REALM) },
    FieldRule { key: keys::STATSD_ADDRESS, default: FieldDefault::Text(DEFAULT_STATSD_HOST) },
    FieldRule { key: keys::STATSD_PORT, default: FieldDefault::Port(DEFAULT_STATSD_PORT) },
    FieldRule { key: keys::STATSD_PREFIX, default: FieldDefault::Flag(true) },
    FieldRule {
        key: keys::STATSD_NAMESPACE,
        default: FieldDefault::Text(DEFAULT_STATSD_NAMESPACE),
    },
    FieldRule { key: keys::VHOST_PREFIX, default: FieldDefault::Unset },
    FieldRule { key: keys::IGNORE, default: FieldDefault::Unset },
    FieldRule {
        key: keys::INTERVAL,
        default: FieldDefault::Seconds(DEFAULT_POLL_INTERVAL_SECS),
    },
    FieldRule { key: keys::TIMEOUT, default: FieldDefault::Seconds(DEFAULT_TIMEOUT_SECS) },
    FieldRule { key: keys::LOG_LEVEL, default: FieldDefault::Text("info") },
    FieldRule { key: keys::LOG_FORMAT, default: FieldDefault::Text("text") },
];

/// Look up the rule for a document key.
pub fn field_rule(key: &str) -> Option<&'static FieldRule> {
    FIELD_RULES.iter().find(|rule| rule.key == key)
}

/// Complete bridge configuration.
///
/// Built once by the loader and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RabbitmqBridgeConfig {
    credentials: Credentials,
    management: ConnectionInfo,
    statsd: StatsdConnection,
    ignore: IgnoreFilter,
    vhost_prefix: Option<String>,
    poll_interval: Duration,
    request_timeout: Duration,
    logging: LoggingConfig,
    unknown_keys: Vec<String>,
}

impl RabbitmqBridgeConfig {
    /// Parse a configuration from a JSON or JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let doc = parse_document(content)?;
        let config = Self::from_document(&doc)?;
        config.validate()?;
        Ok(config)
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn management(&self) -> &ConnectionInfo {
        &self.management
    }

    pub fn statsd(&self) -> &StatsdConnection {
        &self.statsd
    }

    pub fn ignore(&self) -> &IgnoreFilter {
        &self.ignore
    }

    pub fn vhost_prefix(&self) -> Option<&str> {
        self.vhost_prefix.as_deref()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Keys present in the document that the bridge does not recognize.
    pub fn unknown_keys(&self) -> &[String] {
        &self.unknown_keys
    }

    /// Returns true if the metric for `name` in `category` should be suppressed.
    pub fn is_ignored(&self, category: &str, name: &str) -> bool {
        self.ignore.is_ignored(category, name)
    }
}

impl BridgeConfig for RabbitmqBridgeConfig {
    type Error = ConfigError;

    fn from_document(doc: &Document) -> Result<Self, Self::Error> {
        tracing::debug!(keys = doc.len(), "Configuring RabbitMQ bridge");

        let fields = Fields::collect(doc);

        let credentials = Credentials::new(
            fields.text(keys::USERNAME)?,
            fields.text(keys::PASSWORD)?,
            fields.text(keys::REALM)?,
        );

        let scheme = fields
            .text(keys::SCHEME)?
            .parse::<Scheme>()
            .map_err(|reason| invalid(keys::SCHEME, reason))?;

        let management = ConnectionInfo::new(
            &fields.text(keys::HOST)?,
            fields.port(keys::PORT)?,
            scheme,
            fields.flag(keys::VALIDATE_CERTS)?,
        )
        .map_err(|e| invalid(keys::HOST, e.to_string()))?;

        let statsd = StatsdConnection::new(
            &fields.text(keys::STATSD_ADDRESS)?,
            fields.port(keys::STATSD_PORT)?,
            fields.flag(keys::STATSD_PREFIX)?,
            fields.text(keys::STATSD_NAMESPACE)?,
        )
        .map_err(|e| invalid(keys::STATSD_ADDRESS, e.to_string()))?;

        let rules = fields.ignore_rules()?;
        let ignore = IgnoreFilter::compile(&rules)?;

        let logging = LoggingConfig {
            level: fields.text(keys::LOG_LEVEL)?,
            format: fields
                .text(keys::LOG_FORMAT)?
                .parse::<LogFormat>()
                .map_err(|reason| invalid(keys::LOG_FORMAT, reason))?,
        };

        let config = Self {
            credentials,
            management,
            statsd,
            ignore,
            vhost_prefix: fields.optional_text(keys::VHOST_PREFIX)?,
            poll_interval: fields.seconds(keys::INTERVAL)?,
            request_timeout: fields.seconds(keys::TIMEOUT)?,
            logging,
            unknown_keys: fields.unknown,
        };

        tracing::debug!(
            management = %config.management,
            statsd = %config.statsd.address(),
            ignore_rules = config.ignore.len(),
            vhost_prefix = ?config.vhost_prefix,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout > self.poll_interval {
            tracing::warn!(
                timeout_secs = self.request_timeout.as_secs(),
                interval_secs = self.poll_interval.as_secs(),
                "Timeout exceeds poll interval; slow cycles will delay subsequent ticks"
            );
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Recognized, non-falsy document values keyed by their rule.
struct Fields<'a> {
    values: HashMap<&'static str, &'a Value>,
    unknown: Vec<String>,
}

impl<'a> Fields<'a> {
    fn collect(doc: &'a Document) -> Self {
        let mut values = HashMap::new();
        let mut unknown = Vec::new();

        for (key, value) in doc {
            match field_rule(key) {
                Some(rule) if is_falsy(value) => {
                    tracing::debug!(key = rule.key, "Empty value, using default");
                }
                Some(rule) => {
                    tracing::debug!(key = rule.key, "Configuration key set");
                    values.insert(rule.key, value);
                }
                None => {
                    tracing::warn!(key = %key, "Ignoring unknown configuration key");
                    unknown.push(key.clone());
                }
            }
        }

        Self { values, unknown }
    }

    /// The provided value, else the default, else `None` for unset keys.
    fn value(&self, key: &'static str) -> Result<Option<Cow<'a, Value>>, ConfigError> {
        if let Some(value) = self.values.get(key) {
            return Ok(Some(Cow::Borrowed(*value)));
        }

        match field_rule(key).map(|rule| rule.default) {
            Some(FieldDefault::Required) => Err(ConfigError::MissingField { field: key }),
            Some(default) => Ok(default.to_value().map(Cow::Owned)),
            None => Ok(None),
        }
    }

    fn resolved(&self, key: &'static str) -> Result<Cow<'a, Value>, ConfigError> {
        self.value(key)?
            .ok_or(ConfigError::MissingField { field: key })
    }

    fn text(&self, key: &'static str) -> Result<String, ConfigError> {
        as_text(key, self.resolved(key)?.as_ref())
    }

    fn optional_text(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        self.value(key)?.map(|v| as_text(key, &v)).transpose()
    }

    fn port(&self, key: &'static str) -> Result<u16, ConfigError> {
        let value = self.resolved(key)?;
        let port = as_integer(key, &value)?;
        u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid(key, format!("port {} is not between 1 and 65535", port)))
    }

    fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        match self.resolved(key)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(invalid(
                key,
                format!("expected a boolean, found {}", value_kind(other)),
            )),
        }
    }

    fn seconds(&self, key: &'static str) -> Result<Duration, ConfigError> {
        let secs = as_integer(key, self.resolved(key)?.as_ref())?;
        if secs == 0 {
            return Err(invalid(key, "must be at least 1 second"));
        }
        Ok(Duration::from_secs(secs))
    }

    /// Ignore entries: a sequence of `[category, ruleType, pattern]` triples.
    fn ignore_rules(&self) -> Result<Vec<IgnoreRule>, ConfigError> {
        let Some(value) = self.value(keys::IGNORE)? else {
            return Ok(Vec::new());
        };

        let entries = value.as_array().ok_or_else(|| {
            ConfigError::MalformedDocument(format!(
                "'{}' must be a list of [category, type, pattern] entries, found {}",
                keys::IGNORE,
                value_kind(&value)
            ))
        })?;

        let mut rules = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let (category, rule_type, pattern) = ignore_triple(entry).ok_or_else(|| {
                ConfigError::MalformedDocument(format!(
                    "'{}' entry {} must be [category, type, pattern] strings",
                    keys::IGNORE,
                    index
                ))
            })?;

            let rule_type = rule_type.parse::<RuleType>().map_err(|rule_type| {
                ConfigError::UnsupportedRuleType {
                    category: category.to_string(),
                    rule_type,
                }
            })?;

            tracing::debug!(category, %rule_type, pattern, "Ignore rule");

            rules.push(IgnoreRule {
                category: category.to_string(),
                rule_type,
                pattern: pattern.to_string(),
            });
        }

        Ok(rules)
    }
}

fn ignore_triple(entry: &Value) -> Option<(&str, &str, &str)> {
    match entry.as_array()?.as_slice() {
        [category, rule_type, pattern] => {
            Some((category.as_str()?, rule_type.as_str()?, pattern.as_str()?))
        }
        _ => None,
    }
}

fn as_text(key: &'static str, value: &Value) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(invalid(
            key,
            format!("expected a string, found {}", value_kind(other)),
        )),
    }
}

/// Accepts non-negative integers, integral floats and numeric strings.
fn as_integer(key: &'static str, value: &Value) -> Result<u64, ConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| {
        invalid(
            key,
            format!("expected a non-negative integer, found {}", value),
        )
    })
}
