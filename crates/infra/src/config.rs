//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by the ledger, allocator, sync engine and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Products per page during a full resync.
    pub sync_page_size: usize,
    /// Deadline applied to every service operation.
    #[serde(with = "duration_secs")]
    pub operation_timeout: Duration,
    /// Re-read attempts after an optimistic concurrency conflict.
    pub max_conflict_retries: u32,
    /// Width of the "expiring soon" window, at most `MAX_EXPIRING_WINDOW_DAYS`
    /// when read from the environment.
    pub expiring_window_days: i64,
    /// Length of the top-selling list in daily summaries.
    pub top_selling_limit: usize,
}

/// Upper bound for `STOCKLEDGER_EXPIRING_WINDOW_DAYS`.
pub const MAX_EXPIRING_WINDOW_DAYS: i64 = 36_500;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_page_size: 500,
            operation_timeout: Duration::from_secs(10),
            max_conflict_retries: 3,
            expiring_window_days: 7,
            top_selling_limit: 10,
        }
    }
}

impl EngineConfig {
    /// Read `STOCKLEDGER_*` variables, falling back to defaults for anything
    /// missing or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            sync_page_size: parse("STOCKLEDGER_SYNC_PAGE_SIZE")
                .filter(|n| *n > 0)
                .map_or(defaults.sync_page_size, |n| n as usize),
            operation_timeout: parse("STOCKLEDGER_OPERATION_TIMEOUT_SECS")
                .filter(|n| *n > 0)
                .map_or(defaults.operation_timeout, Duration::from_secs),
            max_conflict_retries: parse("STOCKLEDGER_MAX_CONFLICT_RETRIES")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_conflict_retries),
            expiring_window_days: parse("STOCKLEDGER_EXPIRING_WINDOW_DAYS")
                .map_or(defaults.expiring_window_days, |n| {
                    i64::try_from(n).map_or(MAX_EXPIRING_WINDOW_DAYS, |n| n.min(MAX_EXPIRING_WINDOW_DAYS))
                }),
            top_selling_limit: parse("STOCKLEDGER_TOP_SELLING_LIMIT")
                .map_or(defaults.top_selling_limit, |n| n as usize),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_and_defaults() {
        let vars: HashMap<&str, &str> = [
            ("STOCKLEDGER_SYNC_PAGE_SIZE", "100"),
            ("STOCKLEDGER_OPERATION_TIMEOUT_SECS", "oops"),
            ("STOCKLEDGER_MAX_CONFLICT_RETRIES", "5"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.sync_page_size, 100);
        assert_eq!(config.operation_timeout, Duration::from_secs(10));
        assert_eq!(config.max_conflict_retries, 5);
        assert_eq!(config.expiring_window_days, 7);
    }

    #[test]
    fn expiring_window_is_clamped() {
        let huge = EngineConfig::from_lookup(|k| {
            (k == "STOCKLEDGER_EXPIRING_WINDOW_DAYS").then(|| u64::MAX.to_string())
        });
        assert_eq!(huge.expiring_window_days, MAX_EXPIRING_WINDOW_DAYS);

        let month = EngineConfig::from_lookup(|k| (k == "STOCKLEDGER_EXPIRING_WINDOW_DAYS").then(|| "30".to_string()));
        assert_eq!(month.expiring_window_days, 30);
    }

    #[test]
    fn deserializes_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"operation_timeout": 3, "top_selling_limit": 5}"#).unwrap();
        assert_eq!(config.operation_timeout, Duration::from_secs(3));
        assert_eq!(config.top_selling_limit, 5);
        assert_eq!(config.sync_page_size, 500);
    }
}
