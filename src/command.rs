//! Line protocol understood by the sigview binary
//!
//! One command per line:
//!
//! ```text
//! sample <metric> <key> <value>
//! rollback <key>
//! window <size> [metric]
//! throttle off | throttle <ms>
//! show | hide
//! optimize on|off
//! reset
//! ```
//!
//! Anything after `#` is ignored.

use std::str::FromStr;

use thiserror::Error;

use crate::error::ConfigError;
use crate::pipeline::{PipelineHandle, WindowTarget};

/// A parsed input line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Sample { metric: String, key: i64, value: f64 },
    Rollback(i64),
    Window { size: usize, metric: Option<String> },
    /// Throttle interval in milliseconds, `None` to disable
    Throttle(Option<u32>),
    Visible(bool),
    Optimize(bool),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'{command}' expects: {usage}")]
    Usage {
        command: &'static str,
        usage: &'static str,
    },
    #[error("invalid number '{0}'")]
    Number(String),
}

fn number<T: FromStr>(s: &str) -> Result<T, ParseError> {
    s.parse().map_err(|_| ParseError::Number(s.to_string()))
}

fn on_off(s: &str) -> Option<bool> {
    match s {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.split('#').next().unwrap_or_default();
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = parts.split_first() else {
            return Err(ParseError::Empty);
        };

        match (name, args) {
            ("sample", [metric, key, value]) => Ok(Command::Sample {
                metric: metric.to_string(),
                key: number(key)?,
                value: number(value)?,
            }),
            ("sample", _) => Err(ParseError::Usage {
                command: "sample",
                usage: "sample <metric> <key> <value>",
            }),
            ("rollback", [key]) => Ok(Command::Rollback(number(key)?)),
            ("rollback", _) => Err(ParseError::Usage {
                command: "rollback",
                usage: "rollback <key>",
            }),
            ("window", [size]) => Ok(Command::Window {
                size: number(size)?,
                metric: None,
            }),
            ("window", [size, metric]) => Ok(Command::Window {
                size: number(size)?,
                metric: Some(metric.to_string()),
            }),
            ("window", _) => Err(ParseError::Usage {
                command: "window",
                usage: "window <size> [metric]",
            }),
            ("throttle", ["off"]) => Ok(Command::Throttle(None)),
            ("throttle", [ms]) => Ok(Command::Throttle(Some(number(ms)?))),
            ("throttle", _) => Err(ParseError::Usage {
                command: "throttle",
                usage: "throttle off | throttle <ms>",
            }),
            ("show", []) => Ok(Command::Visible(true)),
            ("hide", []) => Ok(Command::Visible(false)),
            ("optimize", [flag]) => on_off(flag).map(Command::Optimize).ok_or(ParseError::Usage {
                command: "optimize",
                usage: "optimize on|off",
            }),
            ("reset", []) => Ok(Command::Reset),
            (other, _) => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

impl Command {
    /// Forward the command to a pipeline
    pub fn apply(self, handle: &PipelineHandle) -> Result<(), ConfigError> {
        match self {
            Command::Sample { metric, key, value } => handle.record_sample(&metric, key, value),
            Command::Rollback(key) => handle.rollback(key),
            Command::Window { size, metric } => {
                let target = metric.map_or(WindowTarget::All, WindowTarget::Metric);
                handle.set_window(target, size)?;
            }
            Command::Throttle(Some(ms)) => handle.set_throttle(true, ms)?,
            Command::Throttle(None) => handle.set_throttle(false, 0)?,
            Command::Visible(visible) => handle.set_visible(visible),
            Command::Optimize(enabled) => handle.set_ui_optimization(enabled),
            Command::Reset => handle.reset(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample() {
        assert_eq!(
            "sample latency 42 12.5".parse::<Command>(),
            Ok(Command::Sample {
                metric: "latency".to_string(),
                key: 42,
                value: 12.5
            })
        );
        assert!(matches!(
            "sample latency 42 NaN".parse::<Command>(),
            Ok(Command::Sample { value, .. }) if value.is_nan()
        ));
    }

    #[test]
    fn test_parse_control_commands() {
        assert_eq!("rollback 100".parse::<Command>(), Ok(Command::Rollback(100)));
        assert_eq!(
            "window 20".parse::<Command>(),
            Ok(Command::Window {
                size: 20,
                metric: None
            })
        );
        assert_eq!(
            "window 20 deadline".parse::<Command>(),
            Ok(Command::Window {
                size: 20,
                metric: Some("deadline".to_string())
            })
        );
        assert_eq!("throttle off".parse::<Command>(), Ok(Command::Throttle(None)));
        assert_eq!("throttle 250".parse::<Command>(), Ok(Command::Throttle(Some(250))));
        assert_eq!("  hide ".parse::<Command>(), Ok(Command::Visible(false)));
        assert_eq!("optimize off".parse::<Command>(), Ok(Command::Optimize(false)));
        assert_eq!("reset".parse::<Command>(), Ok(Command::Reset));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(ParseError::Empty));
        assert_eq!("# comment".parse::<Command>(), Err(ParseError::Empty));
        assert_eq!("reset # again".parse::<Command>(), Ok(Command::Reset));
        assert_eq!(
            "jump 3".parse::<Command>(),
            Err(ParseError::Unknown("jump".to_string()))
        );
        assert_eq!(
            "rollback x".parse::<Command>(),
            Err(ParseError::Number("x".to_string()))
        );
        assert!(matches!(
            "sample latency 1".parse::<Command>(),
            Err(ParseError::Usage { command: "sample", .. })
        ));
        assert!("optimize maybe".parse::<Command>().is_err());
    }
}
