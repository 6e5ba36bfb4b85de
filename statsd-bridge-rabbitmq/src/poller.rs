//! Collection cycles and the fixed-interval scheduler that drives them.
//!
//! A cycle fetches the current samples, drops the ignored ones and emits the
//! rest. Faults never escape a cycle: they are reported in
//! [`CycleResult::error`] and the scheduler moves on to the next tick.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};

use crate::config::RabbitmqBridgeConfig;
use crate::sink::MetricSink;
use crate::source::MetricSource;

/// A recoverable failure inside one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleFault {
    #[error("Metric source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Metric sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Anything else, including a panic while filtering or emitting.
    #[error("Unexpected cycle failure: {0}")]
    Unexpected(String),
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleResult {
    /// Samples handed to the sink.
    pub emitted: usize,
    /// Samples suppressed by ignore rules.
    pub ignored: usize,
    /// The fault that ended the cycle early, if any.
    pub error: Option<CycleFault>,
}

impl CycleResult {
    fn fault(error: CycleFault) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Run one fetch-filter-emit pass.
///
/// A source failure yields an empty result with `SourceUnavailable`. A sink
/// failure stops the cycle; samples emitted before it are still counted.
pub async fn run_one_cycle<S, K>(config: &RabbitmqBridgeConfig, source: &S, sink: &K) -> CycleResult
where
    S: MetricSource,
    K: MetricSink,
{
    let samples = match source.fetch(config.vhost_prefix()).await {
        Ok(samples) => samples,
        Err(e) => return CycleResult::fault(CycleFault::SourceUnavailable(e.to_string())),
    };

    let mut result = CycleResult::default();

    for sample in &samples {
        if config.is_ignored(&sample.category, &sample.name) {
            tracing::trace!(category = %sample.category, name = %sample.name, metric = %sample.metric, "Ignored");
            result.ignored += 1;
            continue;
        }

        let name = config.statsd().metric_name(sample);
        if let Err(e) = sink.emit(&name, sample.value).await {
            result.error = Some(CycleFault::SinkUnavailable(e.to_string()));
            break;
        }
        result.emitted += 1;
    }

    result
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Waiting for the next tick.
    Idle,
    /// A cycle is in progress.
    Collecting,
}

/// Counters shared between the scheduler and whoever is watching it.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles: AtomicU64,
    faults: AtomicU64,
    emitted: AtomicU64,
    ignored: AtomicU64,
    collecting: AtomicBool,
}

impl SchedulerStats {
    fn begin(&self) {
        self.collecting.store(true, Ordering::Relaxed);
    }

    fn record(&self, result: &CycleResult) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.emitted.fetch_add(result.emitted as u64, Ordering::Relaxed);
        self.ignored.fetch_add(result.ignored as u64, Ordering::Relaxed);
        if result.error.is_some() {
            self.faults.fetch_add(1, Ordering::Relaxed);
        }
        self.collecting.store(false, Ordering::Relaxed);
    }

    pub fn state(&self) -> SchedulerState {
        if self.collecting.load(Ordering::Relaxed) {
            SchedulerState::Collecting
        } else {
            SchedulerState::Idle
        }
    }

    /// Get current statistics.
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            state: self.state(),
        }
    }
}

/// Snapshot of scheduler statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatsSnapshot {
    /// Completed cycles.
    pub cycles: u64,
    /// Cycles that ended with a fault.
    pub faults: u64,
    /// Samples emitted across all cycles.
    pub emitted: u64,
    /// Samples ignored across all cycles.
    pub ignored: u64,
    pub state: SchedulerState,
}

/// Drives [`run_one_cycle`] on a fixed interval.
///
/// At most one cycle runs at a time. Ticks stay on the wall-clock grid of the
/// interval: a cycle that overruns is followed at once by the next one, missed
/// ticks are skipped rather than queued, and later cycles return to the grid.
pub struct PollScheduler<S, K> {
    config: Arc<RabbitmqBridgeConfig>,
    source: Arc<S>,
    sink: Arc<K>,
    interval: Duration,
    stats: Arc<SchedulerStats>,
}

impl<S, K> PollScheduler<S, K>
where
    S: MetricSource + 'static,
    K: MetricSink + 'static,
{
    /// Create a scheduler ticking at the configured poll interval.
    pub fn new(config: Arc<RabbitmqBridgeConfig>, source: S, sink: K) -> Self {
        let interval = config.poll_interval();
        Self {
            config,
            source: Arc::new(source),
            sink: Arc::new(sink),
            interval,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Run a single cycle now.
    ///
    /// The cycle runs in its own task, so a panic inside it is reported as
    /// [`CycleFault::Unexpected`] instead of unwinding into the caller.
    pub async fn tick_once(&self) -> CycleResult {
        self.stats.begin();

        let config = Arc::clone(&self.config);
        let source = Arc::clone(&self.source);
        let sink = Arc::clone(&self.sink);

        let handle =
            tokio::spawn(async move { run_one_cycle(&config, source.as_ref(), sink.as_ref()).await });

        let result = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                CycleResult::fault(CycleFault::Unexpected(panic_message(e.into_panic())))
            }
            Err(e) => CycleResult::fault(CycleFault::Unexpected(e.to_string())),
        };

        match &result.error {
            None => tracing::debug!(
                emitted = result.emitted,
                ignored = result.ignored,
                "Cycle complete"
            ),
            Some(fault @ CycleFault::Unexpected(_)) => tracing::error!(
                error = %fault,
                "Cycle aborted"
            ),
            Some(fault) => tracing::warn!(
                emitted = result.emitted,
                ignored = result.ignored,
                error = %fault,
                "Cycle failed"
            ),
        }

        self.stats.record(&result);
        result
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// Shutdown is checked between cycles; an in-flight cycle always completes.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(
            url = %self.config.management().url(),
            statsd = %self.config.statsd().address(),
            interval_secs = self.interval.as_secs_f64(),
            "Starting poll scheduler"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            self.tick_once().await;
        }

        tracing::info!(stats = ?self.stats.snapshot(), "Poll scheduler stopped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;
    use crate::source::SourceError;
    use statsight_common::MetricSample;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn config(extra: &str) -> Arc<RabbitmqBridgeConfig> {
        let doc = format!(r#"{{ "Port": 15672, "Interval": 10 {} }}"#, extra);
        Arc::new(RabbitmqBridgeConfig::parse(&doc).unwrap())
    }

    fn samples() -> Vec<MetricSample> {
        vec![
            MetricSample::new("exchange", "amq.direct", "messages", 1.0).with_scope("/"),
            MetricSample::new("exchange", "orders", "messages", 2.0).with_scope("/"),
            MetricSample::new("queue", "amq.gen-1", "messages", 3.0).with_scope("/"),
        ]
    }

    /// Source returning fixed samples, or a failure.
    struct FakeSource {
        fail: bool,
        scopes: Mutex<Vec<Option<String>>>,
    }

    impl FakeSource {
        fn ok() -> Self {
            Self {
                fail: false,
                scopes: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                scopes: Mutex::new(Vec::new()),
            }
        }
    }

    impl MetricSource for FakeSource {
        async fn fetch(&self, scope: Option<&str>) -> Result<Vec<MetricSample>, SourceError> {
            self.scopes.lock().unwrap().push(scope.map(str::to_string));
            if self.fail {
                return Err(SourceError::Status {
                    endpoint: "http://mq.local:15672/api/overview".to_string(),
                    status: 503,
                });
            }
            Ok(samples())
        }
    }

    /// Sink recording emitted lines, optionally failing after `limit` emits.
    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<String>>,
        limit: Option<usize>,
    }

    impl MetricSink for RecordingSink {
        async fn emit(&self, name: &str, value: f64) -> Result<(), SinkError> {
            let mut lines = self.lines.lock().unwrap();
            if self.limit.is_some_and(|limit| lines.len() >= limit) {
                return Err(SinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            lines.push(format!("{}={}", name, value));
            Ok(())
        }
    }

    /// Source whose n-th fetch takes `durations[n]` seconds (the last entry
    /// repeats), recording start and end times.
    struct SlowSource {
        durations: Vec<u64>,
        spans: Mutex<Vec<(Instant, Instant)>>,
    }

    impl SlowSource {
        fn new(durations: &[u64]) -> Self {
            Self {
                durations: durations.to_vec(),
                spans: Mutex::new(Vec::new()),
            }
        }

        fn starts(&self, origin: Instant) -> Vec<u64> {
            self.spans
                .lock()
                .unwrap()
                .iter()
                .map(|(start, _)| (*start - origin).as_secs())
                .collect()
        }
    }

    impl MetricSource for SlowSource {
        async fn fetch(&self, _scope: Option<&str>) -> Result<Vec<MetricSample>, SourceError> {
            let n = self.spans.lock().unwrap().len();
            let secs = self
                .durations
                .get(n)
                .or(self.durations.last())
                .copied()
                .unwrap_or(0);

            let start = Instant::now();
            tokio::time::sleep(Duration::from_secs(secs)).await;
            self.spans.lock().unwrap().push((start, Instant::now()));
            Ok(Vec::new())
        }
    }

    struct PanickingSource;

    impl MetricSource for PanickingSource {
        async fn fetch(&self, _scope: Option<&str>) -> Result<Vec<MetricSample>, SourceError> {
            panic!("malformed payload");
        }
    }

    #[tokio::test]
    async fn test_cycle_filters_and_emits() {
        let config = config(r#", "Ignore": [["exchange", "Regex", "^amq\\."]]"#);
        let sink = RecordingSink::default();

        let result = run_one_cycle(&config, &FakeSource::ok(), &sink).await;

        assert_eq!(
            result,
            CycleResult {
                emitted: 2,
                ignored: 1,
                error: None
            }
        );
        assert_eq!(
            *sink.lines.lock().unwrap(),
            vec![
                "rabbitmq.exchange._.orders.messages=2".to_string(),
                "rabbitmq.queue._.amq_gen-1.messages=3".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cycle_passes_vhost_prefix_to_source() {
        let config = config(r#", "VHostPrefix": "prod""#);
        let source = FakeSource::ok();

        run_one_cycle(&config, &source, &RecordingSink::default()).await;

        assert_eq!(*source.scopes.lock().unwrap(), vec![Some("prod".to_string())]);
    }

    #[tokio::test]
    async fn test_source_unavailable() {
        let sink = RecordingSink::default();
        let result = run_one_cycle(&config(""), &FakeSource::failing(), &sink).await;

        assert_eq!(result.emitted, 0);
        assert!(matches!(result.error, Some(CycleFault::SourceUnavailable(ref msg)) if msg.contains("503")));
        assert!(sink.lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_stops_cycle() {
        let sink = RecordingSink {
            limit: Some(1),
            ..Default::default()
        };

        let result = run_one_cycle(&config(""), &FakeSource::ok(), &sink).await;

        assert_eq!(result.emitted, 1);
        assert!(matches!(result.error, Some(CycleFault::SinkUnavailable(_))));
        assert_eq!(sink.lines.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_unexpected_fault() {
        let scheduler = PollScheduler::new(config(""), PanickingSource, RecordingSink::default());

        let result = scheduler.tick_once().await;
        match result.error {
            Some(CycleFault::Unexpected(msg)) => assert!(msg.contains("malformed payload")),
            other => panic!("expected Unexpected, got {:?}", other),
        }

        // The scheduler is still usable afterwards.
        let again = scheduler.tick_once().await;
        assert!(matches!(again.error, Some(CycleFault::Unexpected(_))));

        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.faults, 2);
        assert_eq!(stats.state, SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycles_do_not_stop_the_loop() {
        let scheduler = PollScheduler::new(config(""), FakeSource::failing(), RecordingSink::default());

        scheduler
            .run_until(tokio::time::sleep(Duration::from_secs(25)))
            .await;

        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.faults, 3);
        assert_eq!(stats.emitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycles_never_overlap() {
        let scheduler =
            PollScheduler::new(config(""), SlowSource::new(&[15]), RecordingSink::default());
        assert_eq!(scheduler.interval(), Duration::from_secs(10));

        let origin = Instant::now();
        scheduler
            .run_until(tokio::time::sleep(Duration::from_secs(40)))
            .await;

        assert_eq!(scheduler.source.starts(origin), vec![0, 15, 30]);

        let spans = scheduler.source.spans.lock().unwrap().clone();
        for pair in spans.windows(2) {
            assert!(pair[1].0 >= pair[0].1, "cycle started before the previous one ended");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_cycles_keep_wall_clock_spacing() {
        let scheduler =
            PollScheduler::new(config(""), SlowSource::new(&[3]), RecordingSink::default());

        let origin = Instant::now();
        scheduler
            .run_until(tokio::time::sleep(Duration::from_secs(35)))
            .await;

        assert_eq!(scheduler.source.starts(origin), vec![0, 10, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_return_to_grid_after_overrun() {
        let scheduler = PollScheduler::new(
            config(""),
            SlowSource::new(&[15, 3]),
            RecordingSink::default(),
        );

        let origin = Instant::now();
        scheduler
            .run_until(tokio::time::sleep(Duration::from_secs(35)))
            .await;

        // The overrun starts the second cycle late; the third is back on the
        // 10 second grid rather than 10 seconds after the second.
        assert_eq!(scheduler.source.starts(origin), vec![0, 15, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_cycle_completes_the_cycle() {
        let scheduler =
            PollScheduler::new(config(""), SlowSource::new(&[15]), RecordingSink::default());

        let origin = Instant::now();
        scheduler
            .run_until(tokio::time::sleep(Duration::from_secs(5)))
            .await;

        let spans = scheduler.source.spans.lock().unwrap().clone();
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].1 - origin).as_secs(), 15);

        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.state, SchedulerState::Idle);
    }

    #[test]
    fn test_stats_record() {
        let stats = SchedulerStats::default();
        stats.begin();
        assert_eq!(stats.state(), SchedulerState::Collecting);

        stats.record(&CycleResult {
            emitted: 4,
            ignored: 2,
            error: None,
        });
        stats.record(&CycleResult::fault(CycleFault::SourceUnavailable("down".into())));

        assert_eq!(
            stats.snapshot(),
            SchedulerStatsSnapshot {
                cycles: 2,
                faults: 1,
                emitted: 4,
                ignored: 2,
                state: SchedulerState::Idle,
            }
        );
    }
}
