//! Statsd bridge for the RabbitMQ management API.
//!
//! This bridge polls the management HTTP API on a fixed interval and forwards
//! every metric that no ignore rule suppresses to statsd as a gauge.
//!
//! # Metric Names
//!
//! ```text
//! [<namespace>.]<category>[.<vhost>].<name>.<metric>
//! ```
//!
//! Where:
//! - `<namespace>` - `StatsdNamespace` (default `rabbitmq`), present when `StatsdPrefix` is on
//! - `<category>` - `overview`, `node`, `exchange`, or `queue`
//! - `<vhost>` - Virtual host of exchanges and queues
//! - `<name>` - Entity name, the subject of ignore rules
//! - `<metric>` - Dotted path of the numeric field (e.g. `message_stats.publish`)

pub mod auth;
pub mod config;
pub mod connection;
pub mod filter;
pub mod poller;
pub mod sink;
pub mod source;

pub use auth::Credentials;
pub use config::{ConfigError, RabbitmqBridgeConfig};
pub use connection::{ConnectionError, ConnectionInfo, Scheme, StatsdConnection};
pub use filter::{IgnoreFilter, IgnoreRule, RuleType};
pub use poller::{CycleFault, CycleResult, PollScheduler, run_one_cycle};
pub use sink::{MetricSink, StatsdSink};
pub use source::{ManagementClient, MetricSource, Timed};
