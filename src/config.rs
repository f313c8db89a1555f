//! Runtime configuration, loaded from a JSON file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TIMETABLE_CONFIG";

/// Which optimizer backend drives generation steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Colony,
    Ilp,
}

/// Ant colony parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColonyConfig {
    /// Ants constructing a timetable per iteration
    pub num_of_ants: usize,
    /// Pheromone deposit scale, also the heuristic numerator
    pub q: f64,
    /// Pheromone exponent
    pub alpha: f64,
    /// Heuristic exponent
    pub beta: f64,
    /// Evaporation rate in (0, 1)
    pub rou: f64,
    pub tau_min: f64,
    pub tau_max: f64,
    /// Probability that an ant ignores pheromone and picks a free slot uniformly
    pub ant_prob_random: f64,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            num_of_ants: 3,
            q: 10.0,
            alpha: 1.0,
            beta: 1.0,
            rou: 0.5,
            tau_min: 0.001,
            tau_max: 100000.0,
            ant_prob_random: 0.0,
            seed: None,
        }
    }
}

impl ColonyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.num_of_ants == 0 {
            return Err("num_of_ants must be at least 1".into());
        }
        if self.q <= 0.0 {
            return Err(format!("q must be positive, got {}", self.q));
        }
        if self.rou <= 0.0 || self.rou >= 1.0 {
            return Err(format!("rou must be in (0, 1), got {}", self.rou));
        }
        if self.tau_min <= 0.0 || self.tau_min > self.tau_max {
            return Err(format!(
                "tau bounds must satisfy 0 < tau_min <= tau_max, got [{}, {}]",
                self.tau_min, self.tau_max
            ));
        }
        if !(0.0..=1.0).contains(&self.ant_prob_random) {
            return Err(format!(
                "ant_prob_random must be in [0, 1], got {}",
                self.ant_prob_random
            ));
        }
        Ok(())
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    /// Upper bound on one optimizer round trip, in milliseconds
    pub step_timeout_ms: u64,
    pub optimizer: OptimizerKind,
    pub colony: ColonyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            step_timeout_ms: 30_000,
            optimizer: OptimizerKind::default(),
            colony: ColonyConfig::default(),
        }
    }
}

impl Config {
    /// Loads the file named by `TIMETABLE_CONFIG`, or the defaults if it is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("loading config file {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).context("parsing config")?;
        config
            .colony
            .validate()
            .map_err(anyhow::Error::msg)
            .context("invalid colony config")?;
        Ok(config)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}
