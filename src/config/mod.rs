//! Application Configuration
//!
//! Operator-tunable defaults stored in TOML format. These seed new programs
//! at calibration time; values inside a persisted program document always win
//! for that program.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::program::{DEFAULT_NFEATURES, DEFAULT_OK_THRESHOLD, DEFAULT_RANSAC, DEFAULT_RATIO_TEST};

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tick loop settings
    pub capture: CaptureSettings,
    /// Defaults for newly calibrated programs
    pub pipeline: PipelineSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

/// Tick loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Nominal tick period in milliseconds
    pub tick_ms: u64,
    /// Start with the frame source frozen
    pub start_frozen: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            tick_ms: 33,
            start_frozen: false,
        }
    }
}

/// Defaults applied when a new template is calibrated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Feature budget per extraction
    pub nfeatures: usize,
    /// Ratio-test threshold
    pub ratio_test: f32,
    /// RANSAC reprojection threshold in template pixels
    pub ransac: f64,
    /// Default pass threshold for TEMPLATE regions
    pub ok_threshold: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            nfeatures: DEFAULT_NFEATURES,
            ratio_test: DEFAULT_RATIO_TEST,
            ransac: DEFAULT_RANSAC,
            ok_threshold: DEFAULT_OK_THRESHOLD,
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a TOML file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
