use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct RemessaConfig {
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub tax: TaxSection,
    #[serde(default)]
    pub apply: ApplySection,
    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    /// Taxable value ceiling for a single sub-order.
    pub threshold: f64,
    /// Plans projecting less than this are discarded.
    pub min_savings: f64,
    /// Keep multi-split plans even when projected savings are negative.
    pub always_plan: bool,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            threshold: 49.0,
            min_savings: 0.01,
            always_plan: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaxSection {
    pub low_rate: f64,
    pub bracket_boundary: f64,
    pub high_rate: f64,
    pub high_deduction: f64,
    pub consumption_rate: f64,
}

impl Default for TaxSection {
    fn default() -> Self {
        Self {
            low_rate: 0.20,
            bracket_boundary: 50.0,
            high_rate: 0.60,
            high_deduction: 20.0,
            consumption_rate: 0.17,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplySection {
    pub max_discovery_attempts: usize,
    pub quantity_settle_ms: u64,
    pub selection_settle_ms: u64,
    pub reveal_settle_ms: u64,
    pub action_pace_ms: [u64; 2],
}

impl Default for ApplySection {
    fn default() -> Self {
        Self {
            max_discovery_attempts: 20,
            quantity_settle_ms: 1000,
            selection_settle_ms: 1500,
            reveal_settle_ms: 3000,
            action_pace_ms: [100, 250],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: "remessa.sqlite".to_string(),
        }
    }
}

pub fn load_remessa_config<P: AsRef<Path>>(path: P) -> Result<RemessaConfig> {
    let config: RemessaConfig = read_toml(path.as_ref())?;
    validate(&config, path.as_ref())?;
    Ok(config)
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn validate(config: &RemessaConfig, path: &Path) -> Result<()> {
    let fail = |message: String| ConfigError::Invalid {
        path: path.to_path_buf(),
        message,
    };
    if config.planner.threshold <= 0.0 {
        return Err(fail(format!(
            "planner.threshold must be positive, got {}",
            config.planner.threshold
        )));
    }
    for (name, rate) in [
        ("tax.low_rate", config.tax.low_rate),
        ("tax.high_rate", config.tax.high_rate),
    ] {
        if !(0.0..10.0).contains(&rate) {
            return Err(fail(format!("{name} out of range: {rate}")));
        }
    }
    if !(0.0..1.0).contains(&config.tax.consumption_rate) {
        return Err(fail(format!(
            "tax.consumption_rate must be in [0, 1), got {}",
            config.tax.consumption_rate
        )));
    }
    let [lo, hi] = config.apply.action_pace_ms;
    if lo > hi {
        return Err(fail(format!("apply.action_pace_ms range inverted: [{lo}, {hi}]")));
    }
    Ok(())
}
