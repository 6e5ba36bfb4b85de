//! Bridge runner for lifecycle management.

use std::future::Future;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use statsight_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::Result;

/// Bridge runner that manages the lifecycle of a metric bridge.
///
/// Handles:
/// - Logging initialization
/// - Task spawning and management
/// - Graceful shutdown on Ctrl+C or SIGTERM
///
/// Tasks started with [`spawn`](Self::spawn) are aborted on shutdown. Tasks
/// started with [`spawn_graceful`](Self::spawn_graceful) are told to stop and
/// awaited.
///
/// # Example
///
/// ```ignore
/// use statsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///
///     runner.spawn_graceful(|shutdown| async move {
///         // Worker logic here, finishing once `shutdown.wait()` resolves
///     });
///
///     runner.run_with_metadata(None).await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Spawned tasks, aborted on shutdown.
    tasks: Vec<JoinHandle<()>>,
    /// Tasks that stop on their own once notified.
    graceful: Vec<JoinHandle<()>>,
    /// Shutdown notification for graceful tasks.
    shutdown: broadcast::Sender<()>,
}

/// Notification handed to graceful workers.
#[derive(Debug)]
pub struct Shutdown {
    receiver: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Resolve once the runner begins shutting down.
    pub async fn wait(mut self) {
        // A closed channel also means the runner is gone.
        let _ = self.receiver.recv().await;
    }
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner and initialize logging.
    ///
    /// A `--log-level` in `args` overrides the configured level.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = effective_logging(config.logging(), args);
        init_tracing(&log_config)?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        Ok(Self::with_parts(name, version, config))
    }

    fn with_parts(name: String, version: String, config: C) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            name,
            version,
            config,
            tasks: Vec::new(),
            graceful: Vec::new(),
            shutdown,
        }
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Spawn a worker task.
    ///
    /// The task will be tracked and aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Spawn a worker that finishes its current work on shutdown.
    ///
    /// The worker receives a [`Shutdown`] and must return soon after it
    /// resolves. The runner awaits it before returning.
    pub fn spawn_graceful<F, Fut>(&mut self, worker: F)
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = Shutdown {
            receiver: self.shutdown.subscribe(),
        };
        let handle = tokio::spawn(worker(shutdown));
        self.graceful.push(handle);
    }

    /// Run the bridge, logging the given metadata once at startup.
    ///
    /// This will:
    /// 1. Log the running state (with metadata)
    /// 2. Wait for Ctrl+C or SIGTERM
    /// 3. Notify graceful workers and abort the other tasks
    /// 4. Wait for graceful workers to finish
    pub async fn run_with_metadata(self, metadata: Option<serde_json::Value>) -> Result<()> {
        self.run_until(metadata, shutdown_signal()).await
    }

    async fn run_until<S>(self, metadata: Option<serde_json::Value>, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let metadata = metadata.unwrap_or(serde_json::Value::Null);

        tracing::info!(
            bridge = %self.name,
            version = %self.version,
            tasks = self.tasks.len() + self.graceful.len(),
            metadata = %metadata,
            "Bridge running. Press Ctrl+C to stop."
        );

        signal.await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        // No receivers only means every graceful worker already ended.
        let _ = self.shutdown.send(());

        for task in &self.tasks {
            task.abort();
        }

        for task in self.graceful {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Worker ended abnormally");
            }
        }

        // Wait for the aborted tasks to unwind
        for task in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Worker ended abnormally");
                }
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Resolve the logging configuration, applying the CLI override if present.
fn effective_logging(config: &LoggingConfig, args: Option<&BridgeArgs>) -> LoggingConfig {
    match args.and_then(|a| a.log_level.as_ref()) {
        Some(level) => LoggingConfig {
            level: level.clone(),
            format: config.format,
        },
        None => config.clone(),
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
