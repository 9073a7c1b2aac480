//! Serialized update pipeline
//!
//! Producers talk to a [`PipelineHandle`], which enqueues [`PipelineEvent`]s
//! on an unbounded channel. A single [`UpdatePipeline`] task drains the
//! channel, applies each event to the [`MetricRegistry`] it owns, and hands
//! [`Snapshot`]s to a [`SnapshotSink`].
//!
//! Dispatch is shaped by three settings:
//! - throttling: dirty metrics are collected and flushed on a timer tick
//!   instead of after every sample;
//! - visibility: while the consumer is hidden the registry is still updated
//!   but nothing is built or dispatched;
//! - UI optimization: when off, visibility is ignored.
//!
//! Rollbacks are never throttled.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::PipelineConfig;
use crate::error::{check_window, ConfigError};
use crate::registry::MetricRegistry;
use crate::sink::SnapshotSink;
use crate::snapshot::{DispatchReason, MetricSnapshot, Snapshot, SnapshotBuilder};

/// Which series a window resize applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowTarget {
    All,
    Metric(String),
}

/// Events accepted by the pipeline worker
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Sample { metric: String, key: i64, value: f64 },
    Rollback(i64),
    Resize { target: WindowTarget, size: usize },
    /// New throttle interval, `None` to dispatch on every event
    Throttle(Option<Duration>),
    Visibility(bool),
    UiOptimization(bool),
    Reset,
    Shutdown,
}

/// Where the worker ended up after the last event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Processing,
    /// Changes are pending a tick or visibility
    Throttled,
    /// A snapshot went out
    Dispatched,
}

/// Cloneable producer-side handle.
///
/// Every method enqueues and returns immediately. Reconfiguration is
/// validated here, so a rejected request never reaches the worker.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    capacity: usize,
}

impl PipelineHandle {
    fn send(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            debug!("Pipeline worker has stopped, event dropped");
        }
    }

    /// Record a sample for `metric` at `key`
    pub fn record_sample(&self, metric: &str, key: i64, value: f64) {
        self.send(PipelineEvent::Sample {
            metric: metric.to_string(),
            key,
            value,
        });
    }

    /// Retract every timeline entry above `key`
    pub fn rollback(&self, key: i64) {
        self.send(PipelineEvent::Rollback(key));
    }

    /// Resize the moving-average window of one or all metrics
    pub fn set_window(&self, target: WindowTarget, size: usize) -> Result<(), ConfigError> {
        check_window(size, self.capacity)?;
        self.send(PipelineEvent::Resize { target, size });
        Ok(())
    }

    /// Enable batched dispatch every `interval_ms`, or disable it
    pub fn set_throttle(&self, enabled: bool, interval_ms: u32) -> Result<(), ConfigError> {
        let interval = if enabled {
            if interval_ms == 0 {
                return Err(ConfigError::InvalidThrottleInterval);
            }
            Some(Duration::from_millis(interval_ms.into()))
        } else {
            None
        };
        self.send(PipelineEvent::Throttle(interval));
        Ok(())
    }

    pub fn set_visible(&self, visible: bool) {
        self.send(PipelineEvent::Visibility(visible));
    }

    pub fn set_ui_optimization(&self, enabled: bool) {
        self.send(PipelineEvent::UiOptimization(enabled));
    }

    /// Forget all metrics, e.g. when attaching to another node
    pub fn reset(&self) {
        self.send(PipelineEvent::Reset);
    }

    /// Stop the worker once everything queued so far is processed
    pub fn shutdown(&self) {
        self.send(PipelineEvent::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The background worker of one dashboard session
pub struct UpdatePipeline {
    registry: MetricRegistry,
    builder: SnapshotBuilder,
    sink: Box<dyn SnapshotSink>,
    throttle: Option<Duration>,
    visible: bool,
    ui_optimization: bool,
    /// Metrics changed since their last dispatch
    dirty: BTreeSet<String>,
    /// Last built snapshot of every metric, replayed on visibility
    cache: BTreeMap<String, MetricSnapshot>,
    sequence: u64,
    state: PipelineState,
    rx: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl UpdatePipeline {
    /// Create a worker and the handle that feeds it.
    ///
    /// The consumer starts out visible.
    pub fn new(
        config: &PipelineConfig,
        sink: impl SnapshotSink + 'static,
    ) -> Result<(Self, PipelineHandle), ConfigError> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let pipeline = Self {
            registry: MetricRegistry::new(config.capacity, config.window)?,
            builder: SnapshotBuilder::new(config.render_points),
            sink: Box::new(sink),
            throttle: config.throttle,
            visible: true,
            ui_optimization: config.ui_optimization,
            dirty: BTreeSet::new(),
            cache: BTreeMap::new(),
            sequence: 0,
            state: PipelineState::Idle,
            rx,
        };
        let handle = PipelineHandle {
            tx,
            capacity: config.capacity,
        };
        Ok((pipeline, handle))
    }

    /// Create a worker and spawn it on the current tokio runtime
    pub fn spawn(
        config: &PipelineConfig,
        sink: impl SnapshotSink + 'static,
    ) -> Result<(PipelineHandle, JoinHandle<()>), ConfigError> {
        let (pipeline, handle) = Self::new(config, sink)?;
        Ok((handle, tokio::spawn(pipeline.run())))
    }

    /// Drain events until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(
            "Metrics pipeline started (throttle: {:?}, capacity: {})",
            self.throttle,
            self.registry.capacity()
        );
        let mut ticker = self.throttle.map(throttle_ticker);

        loop {
            let event = match ticker.as_mut() {
                Some(ticker) => {
                    tokio::select! {
                        event = self.rx.recv() => event,
                        _ = ticker.tick() => {
                            self.tick();
                            continue;
                        }
                    }
                }
                None => self.rx.recv().await,
            };

            let Some(event) = event else {
                debug!("All pipeline handles dropped");
                break;
            };

            let throttle = self.throttle;
            if !self.handle(event) {
                break;
            }
            if self.throttle != throttle {
                // Dirty metrics survive; only the timer restarts
                ticker = self.throttle.map(throttle_ticker);
            }
        }

        info!("Metrics pipeline stopped after {} snapshots", self.sequence);
    }

    /// Apply one event. Returns `false` on shutdown.
    ///
    /// A panic while applying is logged and swallowed so collection goes on.
    pub fn handle(&mut self, event: PipelineEvent) -> bool {
        if event == PipelineEvent::Shutdown {
            return false;
        }
        if catch_unwind(AssertUnwindSafe(|| self.apply(event))).is_err() {
            error!("Metrics pipeline panicked while processing an event, continuing");
            self.set_state(PipelineState::Idle);
        }
        true
    }

    /// Throttle timer tick: flush every dirty metric
    pub fn tick(&mut self) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            if !self.dirty.is_empty() && self.dispatch_allowed() {
                self.flush_dirty(DispatchReason::Tick, None);
            }
        }));
        if result.is_err() {
            error!("Metrics pipeline panicked during a throttle tick, continuing");
            self.set_state(PipelineState::Idle);
        }
    }

    fn apply(&mut self, event: PipelineEvent) {
        self.set_state(PipelineState::Processing);

        match event {
            PipelineEvent::Sample { metric, key, value } => {
                self.registry.record(&metric, key, value);
                self.dirty.insert(metric);
                self.dispatch_or_defer(DispatchReason::Sample);
            }
            PipelineEvent::Rollback(key) => {
                self.registry.rollback_all(key);
                self.dirty.extend(self.registry.names());
                if self.dispatch_allowed() {
                    self.flush_dirty(DispatchReason::Rollback, Some(key));
                } else {
                    self.set_state(PipelineState::Throttled);
                }
            }
            PipelineEvent::Resize { target, size } => {
                let result = match &target {
                    WindowTarget::All => self.registry.set_window_all(size).map(|_| true),
                    WindowTarget::Metric(name) => self.registry.set_window(name, size),
                };
                match result {
                    Ok(true) => {
                        info!("Moving-average window of {:?} set to {}", target, size);
                        match target {
                            WindowTarget::All => self.dirty.extend(self.registry.names()),
                            WindowTarget::Metric(name) => {
                                self.dirty.insert(name);
                            }
                        }
                        self.dispatch_or_defer(DispatchReason::Resize);
                    }
                    Ok(false) => {
                        debug!("Window resize for unknown metric {:?} ignored", target);
                        self.settle();
                    }
                    Err(e) => {
                        warn!("Rejected window resize: {}", e);
                        self.settle();
                    }
                }
            }
            PipelineEvent::Throttle(interval) => {
                info!("Throttle interval set to {:?}", interval);
                self.throttle = interval;
                if interval.is_none() && !self.dirty.is_empty() && self.dispatch_allowed() {
                    self.flush_dirty(DispatchReason::Tick, None);
                } else {
                    self.settle();
                }
            }
            PipelineEvent::Visibility(visible) => {
                debug!("Consumer visibility changed to {}", visible);
                let resumed = visible && !self.visible;
                self.visible = visible;
                if resumed && self.ui_optimization {
                    self.replay(DispatchReason::Replay);
                } else {
                    self.settle();
                }
            }
            PipelineEvent::UiOptimization(enabled) => {
                info!("UI optimization {}", if enabled { "enabled" } else { "disabled" });
                let was_enabled = self.ui_optimization;
                self.ui_optimization = enabled;
                if was_enabled && !enabled {
                    self.replay(DispatchReason::Refresh);
                } else {
                    self.settle();
                }
            }
            PipelineEvent::Reset => {
                info!("Resetting metrics registry ({} metrics)", self.registry.len());
                self.registry.clear();
                self.dirty.clear();
                self.cache.clear();
                if self.dispatch_allowed() {
                    self.dispatch(DispatchReason::Reset, None, Vec::new());
                } else {
                    self.settle();
                }
            }
            PipelineEvent::Shutdown => {}
        }
    }

    /// Dispatch now when unthrottled and observed, otherwise leave dirty
    fn dispatch_or_defer(&mut self, reason: DispatchReason) {
        if self.throttle.is_none() && self.dispatch_allowed() {
            self.flush_dirty(reason, None);
        } else {
            self.set_state(PipelineState::Throttled);
        }
    }

    fn dispatch_allowed(&self) -> bool {
        self.visible || !self.ui_optimization
    }

    /// Build and send a snapshot of all dirty metrics
    fn flush_dirty(&mut self, reason: DispatchReason, rollback_key: Option<i64>) {
        if self.dirty.is_empty() {
            self.settle();
            return;
        }
        let names = std::mem::take(&mut self.dirty);
        let metrics = self.rebuild(names);
        self.dispatch(reason, rollback_key, metrics);
    }

    /// Resend every cached metric, rebuilding those that changed meanwhile
    fn replay(&mut self, reason: DispatchReason) {
        let names = std::mem::take(&mut self.dirty);
        self.rebuild(names);
        if self.cache.is_empty() {
            self.settle();
            return;
        }
        debug!("Replaying {} cached metrics", self.cache.len());
        let metrics = self.cache.values().cloned().collect();
        self.dispatch(reason, None, metrics);
    }

    /// Refresh the cache for `names` and return the fresh snapshots
    fn rebuild(&mut self, names: BTreeSet<String>) -> Vec<MetricSnapshot> {
        names
            .into_iter()
            .map(|name| {
                let metric = self.builder.build_metric(&self.registry, &name);
                self.cache.insert(name, metric.clone());
                metric
            })
            .collect()
    }

    fn dispatch(
        &mut self,
        reason: DispatchReason,
        rollback_key: Option<i64>,
        metrics: Vec<MetricSnapshot>,
    ) {
        self.sequence += 1;
        trace!(
            "Dispatching snapshot #{} ({:?}, {} metrics)",
            self.sequence,
            reason,
            metrics.len()
        );
        self.sink.deliver(Snapshot {
            sequence: self.sequence,
            reason,
            rollback_key,
            metrics,
        });
        self.set_state(PipelineState::Dispatched);
    }

    /// Nothing dispatched: report pending work, if any
    fn settle(&mut self) {
        let state = if self.dirty.is_empty() {
            PipelineState::Idle
        } else {
            PipelineState::Throttled
        };
        self.set_state(state);
    }

    fn set_state(&mut self, state: PipelineState) {
        if self.state != state {
            trace!("Pipeline state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Metrics waiting for dispatch
    pub fn dirty(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }
}

fn throttle_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
