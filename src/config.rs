use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

/// Shape constants handed to the daily value generator.
///
/// Immutable once built; tests construct their own instead of relying on
/// module-level constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributionConfig {
    /// Weight of the first position of a progressive curve.
    #[serde(default = "default_progressive_initial_factor")]
    pub progressive_initial_factor: f64,
    /// Weight of the last position of a progressive curve.
    #[serde(default = "default_progressive_final_factor")]
    pub progressive_final_factor: f64,
    /// Saturday/Sunday multiplier, strictly between 0 and 1.
    #[serde(default = "default_weekday_bias_factor")]
    pub weekday_bias_factor: f64,
    /// Peak relative deviation applied to Average KPIs.
    #[serde(default = "default_deviation_scale")]
    pub deviation_scale: f64,
    #[serde(default = "default_sine_amplitude")]
    pub sine_amplitude: f64,
    /// Radians.
    #[serde(default = "default_sine_phase")]
    pub sine_phase: f64,
    #[serde(default = "default_sine_floor")]
    pub sine_floor: f64,
    /// Added to every parabolic weight so the curve edges never reach zero.
    #[serde(default = "default_parabolic_floor")]
    pub parabolic_floor: f64,
    /// Percentage points an Incremental repartition may drift from 100.
    #[serde(default = "default_repartition_tolerance_pct")]
    pub repartition_tolerance_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/target-repartition/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let mut parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        parsed.distribution = parsed.distribution.sanitized();
        Ok(parsed)
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn default_template() -> String {
        let template = r#"[storage]
db_path = "~/.local/share/target-repartition/targets.db"

[distribution]
# progressive curves interpolate from the initial to the final factor
progressive_initial_factor = 0.5
progressive_final_factor = 1.5
# weekend multiplier for the weekday-bias profile (0 < bias < 1)
weekday_bias_factor = 0.6
# peak relative deviation for Average KPIs
deviation_scale = 0.2
sine_amplitude = 0.3
sine_phase = 0.0
sine_floor = 0.000001
parabolic_floor = 1.0
repartition_tolerance_pct = 1.0

[logging]
filter = "info"
"#;
        template.to_string()
    }
}

impl DistributionConfig {
    /// Replaces out-of-range constants with their defaults.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let mut out = self;
        if !(out.progressive_initial_factor.is_finite() && out.progressive_final_factor.is_finite())
        {
            warn!("non-finite progressive factors in config, using defaults");
            out.progressive_initial_factor = defaults.progressive_initial_factor;
            out.progressive_final_factor = defaults.progressive_final_factor;
        }
        if !(out.weekday_bias_factor > 0.0 && out.weekday_bias_factor < 1.0) {
            warn!(
                "weekday_bias_factor {} outside (0, 1), using {}",
                out.weekday_bias_factor, defaults.weekday_bias_factor
            );
            out.weekday_bias_factor = defaults.weekday_bias_factor;
        }
        if !(out.deviation_scale.is_finite() && (0.0..1.0).contains(&out.deviation_scale)) {
            warn!(
                "deviation_scale {} outside [0, 1), using {}",
                out.deviation_scale, defaults.deviation_scale
            );
            out.deviation_scale = defaults.deviation_scale;
        }
        if !(out.sine_amplitude.is_finite() && out.sine_amplitude >= 0.0) {
            warn!("invalid sine_amplitude {}, using default", out.sine_amplitude);
            out.sine_amplitude = defaults.sine_amplitude;
        }
        if !out.sine_phase.is_finite() {
            out.sine_phase = defaults.sine_phase;
        }
        if !(out.sine_floor.is_finite() && out.sine_floor > 0.0) {
            out.sine_floor = defaults.sine_floor;
        }
        if !(out.parabolic_floor.is_finite() && out.parabolic_floor > 0.0) {
            out.parabolic_floor = defaults.parabolic_floor;
        }
        if !(out.repartition_tolerance_pct.is_finite() && out.repartition_tolerance_pct >= 0.0) {
            out.repartition_tolerance_pct = defaults.repartition_tolerance_pct;
        }
        out
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            progressive_initial_factor: default_progressive_initial_factor(),
            progressive_final_factor: default_progressive_final_factor(),
            weekday_bias_factor: default_weekday_bias_factor(),
            deviation_scale: default_deviation_scale(),
            sine_amplitude: default_sine_amplitude(),
            sine_phase: default_sine_phase(),
            sine_floor: default_sine_floor(),
            parabolic_floor: default_parabolic_floor(),
            repartition_tolerance_pct: default_repartition_tolerance_pct(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_db_path() -> String {
    "~/.local/share/target-repartition/targets.db".to_string()
}

fn default_progressive_initial_factor() -> f64 {
    0.5
}

fn default_progressive_final_factor() -> f64 {
    1.5
}

fn default_weekday_bias_factor() -> f64 {
    0.6
}

fn default_deviation_scale() -> f64 {
    0.2
}

fn default_sine_amplitude() -> f64 {
    0.3
}

fn default_sine_phase() -> f64 {
    0.0
}

fn default_sine_floor() -> f64 {
    1e-6
}

fn default_parabolic_floor() -> f64 {
    1.0
}

fn default_repartition_tolerance_pct() -> f64 {
    1.0
}

fn default_log_filter() -> String {
    "info".to_string()
}
