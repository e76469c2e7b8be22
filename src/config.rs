use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{GroupTerms, InterestType};

/// Connection settings for the SQLite store, supplied at process start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; `None` keeps everything in memory.
    pub path: Option<String>,
    pub pool_size: usize,
    /// How long a unit of work waits for a free connection.
    pub acquire_timeout_ms: u64,
    /// SQLite busy handler timeout for writers contending on the file lock.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig { path: None, pool_size: 4, acquire_timeout_ms: 5_000, busy_timeout_ms: 2_000 }
    }
}

/// How simulated members behave each month. Probabilities are per member
/// per month; whatever is left after `on_time` and `late` is a skipped month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviourConfig {
    pub on_time: f64,
    pub late: f64,
    /// Fraction of payments self-reported for treasurer review rather than
    /// recorded directly.
    pub self_reported: f64,
    /// Log-space spread of the amount paid around the monthly due.
    pub amount_sigma: f64,
    /// Chance per month that an eligible member asks for a loan.
    pub loan_request: f64,
    /// Chance a pending loan request is approved by the treasurer.
    pub loan_approval: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub months: u32,
    pub start: NaiveDate,
    pub group_name: String,
    pub group: GroupTerms,
    pub members: usize,
    pub behaviour: BehaviourConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("parsing {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

impl SimulationConfig {
    pub fn canonical() -> Self {
        // All monetary values in minor units (cents).
        SimulationConfig {
            seed: 42,
            months: 12,
            start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default(),
            group_name: "Umoja Savings Circle".to_string(),
            group: GroupTerms {
                monthly_contribution: 10_000,
                penalty_amount: 1_000,
                contribution_due_day: 10,
                interest_rate: 10.0,
                loan_interest_type: InterestType::ReducingBalance,
                max_loan_multiplier: 3.0,
                min_loan_amount: 5_000,
                cycle_end_date: NaiveDate::from_ymd_opt(2025, 12, 31),
            },
            members: 20,
            behaviour: BehaviourConfig {
                on_time: 0.75,
                late: 0.15,
                self_reported: 0.3,
                amount_sigma: 0.25,
                loan_request: 0.08,
                loan_approval: 0.8,
            },
            store: StoreConfig::default(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: display.clone(), source })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: display, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_terms_are_valid() {
        let c = SimulationConfig::canonical();
        assert!(c.group.validate().is_ok());
        assert!(c.behaviour.on_time + c.behaviour.late <= 1.0);
        assert!(c.members > 0);
    }

    #[test]
    fn store_config_fills_defaults() {
        let c: StoreConfig = serde_json::from_str(r#"{"pool_size": 8}"#).unwrap();
        assert_eq!(c.pool_size, 8);
        assert_eq!(c.acquire_timeout_ms, StoreConfig::default().acquire_timeout_ms);
        assert_eq!(c.path, None);
    }

    #[test]
    fn simulation_config_round_trips_through_json() {
        let c = SimulationConfig::canonical();
        let json = serde_json::to_string(&c).unwrap();
        let back: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seed, c.seed);
        assert_eq!(back.start, c.start);
        assert_eq!(back.group.cycle_end_date, c.group.cycle_end_date);
        assert_eq!(back.group.loan_interest_type, c.group.loan_interest_type);
        assert_eq!(back.store, c.store);
    }

    #[test]
    fn missing_config_file_is_io_error() {
        let err = SimulationConfig::from_json_file(Path::new("/nonexistent/chama.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
