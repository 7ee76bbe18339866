use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup sanity checks. Bad configuration is a hard failure before any
    /// stream worker exists; nothing here is recoverable at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.grid.rows == 0 || self.grid.cols == 0 {
            bail!(
                "grid must have at least one row and one column (got {}x{})",
                self.grid.rows,
                self.grid.cols
            );
        }
        if self.tracker.memory_window == 0 {
            bail!("tracker.memory_window must be at least 1 frame");
        }
        if !(0.0..=1.0).contains(&self.tracker.min_affinity) {
            bail!(
                "tracker.min_affinity must be within 0..=1 (got {})",
                self.tracker.min_affinity
            );
        }
        if self.velocity.smoothing <= 0.0 || self.velocity.smoothing >= 1.0 {
            bail!(
                "velocity.smoothing must be within (0, 1) (got {})",
                self.velocity.smoothing
            );
        }
        if self.handoff.lookahead_ms <= 0.0 {
            bail!("handoff.lookahead_ms must be positive");
        }
        if self.handoff.arrival_tolerance_ms <= 0.0 {
            bail!("handoff.arrival_tolerance_ms must be positive");
        }
        if self.handoff.entry_tolerance <= 0.0 {
            bail!("handoff.entry_tolerance must be positive");
        }
        if self.snapshot.interval_ms == 0 {
            bail!("snapshot.interval_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_grid_rejected() {
        let mut config = Config::default();
        config.grid.cols = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_smoothing_rejected() {
        let mut config = Config::default();
        config.velocity.smoothing = 1.0;
        assert!(config.validate().is_err());
        config.velocity.smoothing = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_with_partial_sections_falls_back_to_defaults() {
        let config: Config = serde_yaml::from_str("grid:\n  rows: 3\n  cols: 4\n").unwrap();
        assert_eq!(config.grid.rows, 3);
        assert_eq!(config.grid.cols, 4);
        assert_eq!(config.tracker.memory_window, 30);
        assert!(config.handoff.enabled);
    }

    #[test]
    fn test_yaml_with_partial_fields_falls_back_to_defaults() {
        // A section that names only some of its fields still parses.
        let yaml = "grid:\n  rows: 3\nhandoff:\n  lookahead_ms: 500.0\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.grid.rows, 3);
        assert_eq!(config.grid.cols, 3);
        assert_eq!(config.handoff.lookahead_ms, 500.0);
        assert!(config.handoff.enabled);
        assert_eq!(config.handoff.max_wait_frames, 90);
        assert!(config.validate().is_ok());
    }
}
