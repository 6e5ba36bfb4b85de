//! Statsd bridge for the RabbitMQ management API.
//!
//! Polls overview, node, exchange and queue statistics and forwards them to
//! statsd as gauges.

use std::sync::Arc;

use anyhow::{Context, Result};
use statsd_bridge_rabbitmq::{
    ManagementClient, PollScheduler, RabbitmqBridgeConfig, StatsdSink, Timed,
};
use statsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("statsd.json");

    let config = RabbitmqBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut runner = BridgeRunner::new_with_args("rabbitmq", config, Some(&args))?;
    let config = Arc::new(runner.config().clone());

    tracing::info!(path = ?args.config, "Loaded configuration");
    for key in config.unknown_keys() {
        tracing::warn!(key = %key, "Unknown configuration key ignored");
    }

    let client = ManagementClient::from_config(&config)?;
    let source = Timed::new(client, config.request_timeout());
    let sink = StatsdSink::connect(config.statsd())
        .await
        .with_context(|| format!("Failed to set up statsd sink {}", config.statsd().address()))?;

    let scheduler = PollScheduler::new(Arc::clone(&config), source, sink);
    let stats = scheduler.stats();

    if args.once {
        let result = scheduler.tick_once().await;
        println!("{:?}", result);
        return match result.error {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        };
    }

    let metadata = serde_json::json!({
        "management": config.management().url(),
        "statsd": config.statsd().address(),
        "interval_secs": config.poll_interval().as_secs(),
        "ignore_rules": config.ignore().len(),
        "vhost_prefix": config.vhost_prefix(),
    });

    runner.spawn_graceful(|shutdown| async move { scheduler.run_until(shutdown.wait()).await });
    runner.run_with_metadata(Some(metadata)).await?;

    tracing::info!(
        stats = %serde_json::to_string(&stats.snapshot())?,
        "Scheduler statistics"
    );

    Ok(())
}
