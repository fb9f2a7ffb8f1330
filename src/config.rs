use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::models::Period;
use crate::period::{parse_window, PeriodPair, CRISIS, PRE_CRISIS};

pub const DEFAULT_DATA_DIR: &str = "input/RPC_18_Datasets";
pub const DEFAULT_MIN_BASELINE: usize = 10;

/// Optional JSON config file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub periods: Option<PeriodsConfig>,
    #[serde(default)]
    pub targets: BTreeMap<String, f64>,
    pub data_dir: Option<PathBuf>,
    pub min_baseline: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeriodsConfig {
    pub pre: Period,
    pub crisis: Period,
}

/// Command-line values that win over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub pre: Option<String>,
    pub crisis: Option<String>,
    pub min_baseline: Option<usize>,
}

#[derive(Debug)]
pub struct AppConfig {
    pub periods: PeriodPair,
    pub targets: BTreeMap<String, f64>,
    pub data_dir: PathBuf,
    pub min_baseline: usize,
}

impl AppConfig {
    pub fn load(path: Option<&Path>, overrides: Overrides) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => read_file(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, overrides)
    }

    pub fn resolve(file: FileConfig, overrides: Overrides) -> anyhow::Result<Self> {
        let defaults = PeriodPair::default();
        let (mut pre, mut crisis) = match file.periods {
            Some(periods) => (periods.pre, periods.crisis),
            None => (defaults.pre().clone(), defaults.crisis().clone()),
        };

        if let Some(window) = overrides.pre.as_deref() {
            pre = parse_window(PRE_CRISIS, window)?;
        }
        if let Some(window) = overrides.crisis.as_deref() {
            crisis = parse_window(CRISIS, window)?;
        }

        let periods = PeriodPair::new(pre, crisis).context("invalid period configuration")?;

        Ok(Self {
            periods,
            targets: file.targets,
            data_dir: overrides
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            min_baseline: overrides
                .min_baseline
                .or(file.min_baseline)
                .unwrap_or(DEFAULT_MIN_BASELINE),
        })
    }
}

fn read_file(path: &Path) -> anyhow::Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

pub fn database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance for snapshot storage")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_2025_windows() {
        let config = AppConfig::resolve(FileConfig::default(), Overrides::default()).unwrap();
        assert_eq!(config.periods.pre(), &Period::new(PRE_CRISIS, 2025, 1, 5));
        assert_eq!(config.periods.crisis(), &Period::new(CRISIS, 2025, 6, 9));
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.min_baseline, DEFAULT_MIN_BASELINE);
    }

    #[test]
    fn reads_periods_and_targets_from_json() {
        let file: FileConfig = serde_json::from_str(
            r#"{
                "periods": {
                    "pre": {"name": "baseline", "year": 2024, "month_start": 9, "month_end": 12},
                    "crisis": {"name": "outage", "year": 2025, "month_start": 1, "month_end": 3}
                },
                "targets": {"sla_compliance": 95.0},
                "min_baseline": 25
            }"#,
        )
        .unwrap();
        let config = AppConfig::resolve(file, Overrides::default()).unwrap();

        assert_eq!(config.periods.pre().name, "baseline");
        assert_eq!(config.periods.crisis(), &Period::new("outage", 2025, 1, 3));
        assert_eq!(config.targets.get("sla_compliance"), Some(&95.0));
        assert_eq!(config.min_baseline, 25);
    }

    #[test]
    fn cli_windows_override_file_periods() {
        let overrides = Overrides {
            pre: Some("2025:1-4".to_string()),
            crisis: Some("2025:5-9".to_string()),
            ..Overrides::default()
        };
        let config = AppConfig::resolve(FileConfig::default(), overrides).unwrap();
        assert_eq!(config.periods.pre(), &Period::new(PRE_CRISIS, 2025, 1, 4));
        assert_eq!(config.periods.crisis(), &Period::new(CRISIS, 2025, 5, 9));
    }

    #[test]
    fn overlapping_windows_are_fatal() {
        let overrides = Overrides {
            crisis: Some("2025:5-9".to_string()),
            ..Overrides::default()
        };
        assert!(AppConfig::resolve(FileConfig::default(), overrides).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: Result<FileConfig, _> = serde_json::from_str(r#"{"crisis_month": 6}"#);
        assert!(parsed.is_err());
    }
}
