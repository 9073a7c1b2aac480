//! sigview - streaming metrics aggregation for blockchain node dashboards
//!
//! Producers feed numeric samples keyed by block height (or any event
//! counter) into a [`PipelineHandle`]. A single background worker keeps a
//! [`MetricRegistry`] of keyed timelines and moving-window statistics,
//! truncates them on chain rollbacks, and hands immutable [`Snapshot`]s to
//! the presentation layer through a [`SnapshotSink`].

pub mod command;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod series;
pub mod sink;
pub mod snapshot;
pub mod timeline;

pub use config::PipelineConfig;
pub use error::ConfigError;
pub use pipeline::{PipelineEvent, PipelineHandle, PipelineState, UpdatePipeline, WindowTarget};
pub use registry::{MetricEntry, MetricRegistry};
pub use series::WindowedSeries;
pub use sink::SnapshotSink;
pub use snapshot::{DispatchReason, MetricSnapshot, Snapshot, SnapshotBuilder, TailStats};
pub use timeline::{KeyedTimeline, Point};
