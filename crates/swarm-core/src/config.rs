//! Worker configuration (§6). Validated once at construction; an invalid
//! configuration is a startup error, not a runtime one.

use crate::error::SwarmError;

/// Immutable, validated worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub master_host: String,
    pub master_port: u16,
    pub buffer_size: usize,
    pub threads: usize,
    pub stat_interval: std::time::Duration,
    pub random_seed: u64,
    pub max_rps: f64,
}

impl WorkerConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        master_host: impl Into<String>,
        master_port: u16,
        buffer_size: usize,
        threads: usize,
        stat_interval: std::time::Duration,
        random_seed: u64,
        max_rps: f64,
    ) -> Result<Self, SwarmError> {
        if buffer_size == 0 || (buffer_size & (buffer_size - 1)) != 0 {
            return Err(SwarmError::Config(format!(
                "buffer_size must be a power of two, got {buffer_size}"
            )));
        }
        if threads == 0 {
            return Err(SwarmError::Config("threads must be at least 1".to_string()));
        }
        if stat_interval.is_zero() {
            return Err(SwarmError::Config("stat_interval must be positive".to_string()));
        }
        let master_host = master_host.into();
        if master_host.trim().is_empty() {
            return Err(SwarmError::Config("master_host must not be empty".to_string()));
        }
        Ok(Self {
            master_host,
            master_port,
            buffer_size,
            threads,
            stat_interval,
            random_seed,
            max_rps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn valid() -> Result<WorkerConfig, SwarmError> {
        WorkerConfig::new("localhost", 5557, 256, 4, Duration::from_secs(3), 0, 0.0)
    }

    #[test]
    fn valid_config_constructs() {
        assert!(valid().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_buffer_size() {
        let err = WorkerConfig::new("localhost", 5557, 300, 4, Duration::from_secs(3), 0, 0.0);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_zero_threads() {
        let err = WorkerConfig::new("localhost", 5557, 256, 0, Duration::from_secs(3), 0, 0.0);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_zero_stat_interval() {
        let err = WorkerConfig::new("localhost", 5557, 256, 4, Duration::from_secs(0), 0, 0.0);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_empty_master_host() {
        let err = WorkerConfig::new("  ", 5557, 256, 4, Duration::from_secs(3), 0, 0.0);
        assert!(err.is_err());
    }
}
