//! Index configuration with documented constants
//!
//! The two tunables are collected here with explanations of their purpose
//! and how they interact with the per-frame budget.

use serde::{Deserialize, Serialize};

/// Configuration for a broad-phase grid and its metrics collector
///
/// Consumed once at construction; a grid never reconfigures itself
/// mid-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Size of each cell in world units
    ///
    /// Should be on the order of a typical entity's bounding box.
    /// Smaller = more cells per spanning entity, higher per-insert cost
    /// Larger = fewer cells, but more entities to filter per query
    pub cell_size: f32,

    /// Number of occupancy samples retained in the rolling history
    ///
    /// At one sample per frame, 60 covers one second at 60fps. The
    /// history is evicted oldest-first, so memory stays bounded no
    /// matter how long a session runs.
    pub metrics_window: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: 64.0,
            metrics_window: 60,
        }
    }
}

impl GridConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<(), String> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(format!(
                "cell_size ({}) must be a positive finite number",
                self.cell_size
            ));
        }

        if self.metrics_window == 0 {
            return Err("metrics_window must be at least 1".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = GridConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cell_size, 64.0);
        assert_eq!(config.metrics_window, 60);
    }

    #[test]
    fn test_rejects_bad_cell_size() {
        let mut config = GridConfig::default();
        config.cell_size = 0.0;
        assert!(config.validate().is_err());
        config.cell_size = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_window() {
        let mut config = GridConfig::default();
        config.metrics_window = 0;
        assert!(config.validate().is_err());
    }
}
