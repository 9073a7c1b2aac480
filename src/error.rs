//! Error types for the metrics pipeline

use thiserror::Error;

/// Rejected configuration of a series, registry or pipeline.
///
/// Returned synchronously to the caller; the target is never mutated when
/// one of these is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Window size outside `1..=capacity`
    #[error("window size {window} must be between 1 and capacity {capacity}")]
    InvalidWindow { window: usize, capacity: usize },
    /// A bounded series needs room for at least one sample
    #[error("capacity must be greater than zero")]
    ZeroCapacity,
    /// Throttling was enabled with a zero interval
    #[error("throttle interval must be greater than zero when throttling is enabled")]
    InvalidThrottleInterval,
}

/// Check that `window` fits inside `capacity`.
pub(crate) fn check_window(window: usize, capacity: usize) -> Result<(), ConfigError> {
    if window == 0 || window > capacity {
        return Err(ConfigError::InvalidWindow { window, capacity });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_window_bounds() {
        assert!(check_window(1, 1).is_ok());
        assert!(check_window(10, 10).is_ok());
        assert_eq!(
            check_window(0, 10),
            Err(ConfigError::InvalidWindow {
                window: 0,
                capacity: 10
            })
        );
        assert!(check_window(11, 10).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::InvalidWindow {
            window: 0,
            capacity: 5,
        };
        assert_eq!(
            err.to_string(),
            "window size 0 must be between 1 and capacity 5"
        );
    }
}
