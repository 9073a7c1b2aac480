//! Configuration handling for sigview
//!
//! The pipeline is configured through [`PipelineConfig`], which follows the
//! 12-factor style and reads `SIGVIEW_*` environment variables. The binary
//! layers an optional TOML file and CLI flags on top via [`AppConfig`].

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::debug;

use crate::error::{check_window, ConfigError};

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_WINDOW: usize = 100;
const DEFAULT_RENDER_POINTS: usize = 300;

/// Settings of one dashboard pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Samples retained per metric, and the key-width of the retention horizon
    pub capacity: usize,
    /// Initial moving-average window
    pub window: usize,
    /// Batch dispatch interval; `None` dispatches on every event
    pub throttle: Option<Duration>,
    /// Maximum timeline points copied into a snapshot
    pub render_points: usize,
    /// Skip snapshot dispatch while the consumer is hidden
    pub ui_optimization: bool,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let throttle_ms: u64 = env_parse("SIGVIEW_THROTTLE_MS").unwrap_or(0);

        Self {
            capacity: env_parse("SIGVIEW_CAPACITY").unwrap_or(DEFAULT_CAPACITY),
            window: env_parse("SIGVIEW_WINDOW").unwrap_or(DEFAULT_WINDOW),
            throttle: (throttle_ms > 0).then(|| Duration::from_millis(throttle_ms)),
            render_points: env_parse("SIGVIEW_RENDER_POINTS").unwrap_or(DEFAULT_RENDER_POINTS),
            ui_optimization: env_parse("SIGVIEW_UI_OPTIMIZATION").unwrap_or(true),
        }
    }

    /// Check capacity, window and throttle interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        check_window(self.window, self.capacity)?;
        if self.throttle.is_some_and(|interval| interval.is_zero()) {
            return Err(ConfigError::InvalidThrottleInterval);
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            window: DEFAULT_WINDOW,
            throttle: None,
            render_points: DEFAULT_RENDER_POINTS,
            ui_optimization: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Command-line arguments
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "sigview",
    version,
    about = "Aggregate node metric events from stdin into dashboard snapshots"
)]
pub struct Cli {
    /// Config file (defaults to ~/.config/sigview/config.toml)
    #[arg(short, long, env = "SIGVIEW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Samples retained per metric
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Moving-average window
    #[arg(short, long)]
    pub window: Option<usize>,

    /// Throttle interval in milliseconds (0 disables throttling)
    #[arg(short, long)]
    pub throttle_ms: Option<u64>,

    /// Timeline points per metric in each snapshot
    #[arg(long)]
    pub render_points: Option<usize>,

    /// Start with the consumer hidden
    #[arg(long)]
    pub hidden: bool,

    /// Pretty-print snapshot JSON
    #[arg(long)]
    pub pretty: bool,
}

/// `[pipeline]` table of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub pipeline: FilePipelineConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilePipelineConfig {
    pub capacity: Option<usize>,
    pub window: Option<usize>,
    pub throttle_ms: Option<u64>,
    pub render_points: Option<usize>,
    pub ui_optimization: Option<bool>,
}

impl FileConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse config file {:?}", path))
    }
}

/// Resolved configuration of the binary
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    /// Initial consumer visibility
    pub visible: bool,
    pub pretty: bool,
}

impl AppConfig {
    /// Load configuration from CLI, environment, and config file
    pub fn load() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    /// Resolve defaults < environment < config file < CLI flags
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let mut pipeline = PipelineConfig::from_env();

        let file_path = cli.config.clone().or_else(default_config_path);
        if let Some(path) = file_path.filter(|p| cli.config.is_some() || p.exists()) {
            debug!("Loading config file {:?}", path);
            let file = FileConfig::load(&path)?;
            apply_file(&mut pipeline, &file.pipeline);
        }

        if let Some(capacity) = cli.capacity {
            pipeline.capacity = capacity;
        }
        if let Some(window) = cli.window {
            pipeline.window = window;
        }
        if let Some(ms) = cli.throttle_ms {
            pipeline.throttle = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(points) = cli.render_points {
            pipeline.render_points = points;
        }

        pipeline.validate()?;

        Ok(Self {
            pipeline,
            visible: !cli.hidden,
            pretty: cli.pretty,
        })
    }
}

fn apply_file(pipeline: &mut PipelineConfig, file: &FilePipelineConfig) {
    if let Some(capacity) = file.capacity {
        pipeline.capacity = capacity;
    }
    if let Some(window) = file.window {
        pipeline.window = window;
    }
    if let Some(ms) = file.throttle_ms {
        pipeline.throttle = (ms > 0).then(|| Duration::from_millis(ms));
    }
    if let Some(points) = file.render_points {
        pipeline.render_points = points;
    }
    if let Some(enabled) = file.ui_optimization {
        pipeline.ui_optimization = enabled;
    }
}

/// Get the default config file path
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sigview").join("config.toml"))
}
