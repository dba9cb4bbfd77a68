//! Typed view over the table properties stored in `Metadata.configuration`.
//!
//! Properties are shared by every writer of the table, unlike
//! [`crate::config::EngineConfig`] which is per handle. Values written by
//! other engines may be malformed; reading is therefore lenient (warn and
//! use the default) while [`TableConfig::validate`] is strict and is used
//! before committing new properties.
use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use log::warn;
use snafu::prelude::*;

/// How long version files are kept once a newer checkpoint covers them.
pub const LOG_RETENTION_KEY: &str = "delta.logRetentionDuration";
/// How long tombstoned data files are kept before vacuum may delete them.
pub const DELETED_FILE_RETENTION_KEY: &str = "delta.deletedFileRetentionDuration";
/// Versions between automatic checkpoints.
pub const CHECKPOINT_INTERVAL_KEY: &str = "delta.checkpointInterval";

/// Default for [`LOG_RETENTION_KEY`].
pub const DEFAULT_LOG_RETENTION: &str = "interval 30 days";
/// Default for [`DELETED_FILE_RETENTION_KEY`].
pub const DEFAULT_DELETED_FILE_RETENTION: &str = "interval 7 days";

/// Errors raised when validating table properties.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TableConfigError {
    /// A known property has a value that cannot be parsed.
    #[snafu(display("Invalid value for table property {key}: '{value}' ({reason})"))]
    InvalidProperty {
        /// Property name.
        key: String,
        /// Offending value.
        value: String,
        /// What was expected.
        reason: String,
    },
}

/// Parsed table properties with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Age after which version files may be pruned.
    pub log_retention: TimeDelta,
    /// Minimum age of a tombstone before its file may be vacuumed.
    pub deleted_file_retention: TimeDelta,
    /// Table-level checkpoint cadence, overriding the engine default.
    pub checkpoint_interval: Option<u64>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            log_retention: TimeDelta::days(30),
            deleted_file_retention: TimeDelta::days(7),
            checkpoint_interval: None,
        }
    }
}

impl TableConfig {
    /// Parse properties, falling back to defaults for malformed values.
    pub fn from_configuration(configuration: &BTreeMap<String, String>) -> Self {
        let mut cfg = Self::default();
        for (key, value) in configuration {
            match parse_property(key, value) {
                Ok(Some(Parsed::LogRetention(d))) => cfg.log_retention = d,
                Ok(Some(Parsed::DeletedFileRetention(d))) => cfg.deleted_file_retention = d,
                Ok(Some(Parsed::CheckpointInterval(n))) => cfg.checkpoint_interval = Some(n),
                Ok(None) => {}
                Err(e) => warn!("{e}; using the default"),
            }
        }
        cfg
    }

    /// Check every known property in `properties`. Unknown keys pass.
    pub fn validate(properties: &BTreeMap<String, String>) -> Result<(), TableConfigError> {
        for (key, value) in properties {
            parse_property(key, value)?;
        }
        Ok(())
    }

    /// Vacuum minimum retention in (fractional) hours.
    pub fn deleted_file_retention_hours(&self) -> f64 {
        self.deleted_file_retention.num_milliseconds() as f64 / 3_600_000.0
    }
}

enum Parsed {
    LogRetention(TimeDelta),
    DeletedFileRetention(TimeDelta),
    CheckpointInterval(u64),
}

fn parse_property(key: &str, value: &str) -> Result<Option<Parsed>, TableConfigError> {
    let invalid = |reason: &str| {
        InvalidPropertySnafu {
            key,
            value,
            reason,
        }
        .build()
    };
    match key {
        LOG_RETENTION_KEY => parse_interval(value)
            .map(|d| Some(Parsed::LogRetention(d)))
            .ok_or_else(|| invalid("expected 'interval <n> <unit>'")),
        DELETED_FILE_RETENTION_KEY => parse_interval(value)
            .map(|d| Some(Parsed::DeletedFileRetention(d)))
            .ok_or_else(|| invalid("expected 'interval <n> <unit>'")),
        CHECKPOINT_INTERVAL_KEY => match value.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(Some(Parsed::CheckpointInterval(n))),
            _ => Err(invalid("expected a positive integer")),
        },
        _ => Ok(None),
    }
}

/// `now - retention`, clamped to the earliest representable instant when
/// the subtraction overflows. Nothing is older than that cutoff.
pub fn retention_cutoff(now: DateTime<Utc>, retention: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Parse `interval <n> <unit>` (the `interval` keyword is optional).
///
/// Units: millisecond, second, minute, hour, day, week, singular or plural,
/// case-insensitive. Negative amounts are rejected, and so are intervals
/// too long to subtract from the current time.
pub fn parse_interval(s: &str) -> Option<TimeDelta> {
    let lower = s.trim().to_ascii_lowercase();
    let mut parts = lower.split_whitespace().peekable();
    if parts.peek() == Some(&"interval") {
        parts.next();
    }
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() || amount < 0 {
        return None;
    }
    let unit = unit.strip_suffix('s').unwrap_or(unit);
    let delta = match unit {
        "millisecond" => TimeDelta::try_milliseconds(amount),
        "second" => TimeDelta::try_seconds(amount),
        "minute" => TimeDelta::try_minutes(amount),
        "hour" => TimeDelta::try_hours(amount),
        "day" => TimeDelta::try_days(amount),
        "week" => TimeDelta::try_weeks(amount),
        _ => None,
    }?;
    Utc::now().checked_sub_signed(delta).map(|_| delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_thirty_and_seven_days() {
        let cfg = TableConfig::from_configuration(&BTreeMap::new());
        assert_eq!(cfg.log_retention, TimeDelta::days(30));
        assert_eq!(cfg.deleted_file_retention, TimeDelta::days(7));
        assert_eq!(cfg.deleted_file_retention_hours(), 168.0);
        assert_eq!(cfg.checkpoint_interval, None);
    }

    #[test]
    fn parse_interval_accepts_documented_forms() {
        assert_eq!(parse_interval("interval 30 days"), Some(TimeDelta::days(30)));
        assert_eq!(parse_interval("INTERVAL 1 Hour"), Some(TimeDelta::hours(1)));
        assert_eq!(parse_interval("2 weeks"), Some(TimeDelta::weeks(2)));
        assert_eq!(parse_interval("interval 0 seconds"), Some(TimeDelta::zero()));
        assert_eq!(parse_interval("interval -1 days"), None);
        assert_eq!(parse_interval("interval days"), None);
        assert_eq!(parse_interval("interval 3 fortnights"), None);
        assert_eq!(parse_interval("interval 3 days extra"), None);
    }

    #[test]
    fn intervals_reaching_past_the_calendar_are_rejected() {
        assert_eq!(parse_interval("interval 100000000 days"), None);
        assert_eq!(parse_interval("interval 9000000000000 seconds"), None);

        let err = TableConfig::validate(&props(&[(
            DELETED_FILE_RETENTION_KEY,
            "interval 100000000 days",
        )]))
        .unwrap_err();
        assert!(matches!(err, TableConfigError::InvalidProperty { .. }));
    }

    #[test]
    fn retention_cutoff_clamps_on_overflow() {
        let now = Utc::now();
        assert_eq!(retention_cutoff(now, TimeDelta::days(1)), now - TimeDelta::days(1));
        assert_eq!(retention_cutoff(now, TimeDelta::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn from_configuration_applies_overrides_and_ignores_bad_values() {
        let cfg = TableConfig::from_configuration(&props(&[
            (LOG_RETENTION_KEY, "interval 2 days"),
            (DELETED_FILE_RETENTION_KEY, "soon"),
            (CHECKPOINT_INTERVAL_KEY, "5"),
            ("owner", "analytics"),
        ]));
        assert_eq!(cfg.log_retention, TimeDelta::days(2));
        assert_eq!(cfg.deleted_file_retention, TimeDelta::days(7));
        assert_eq!(cfg.checkpoint_interval, Some(5));
    }

    #[test]
    fn validate_rejects_malformed_known_keys() {
        assert!(TableConfig::validate(&props(&[("owner", "anything")])).is_ok());

        let err = TableConfig::validate(&props(&[(CHECKPOINT_INTERVAL_KEY, "0")])).unwrap_err();
        assert!(matches!(
            err,
            TableConfigError::InvalidProperty { key, .. } if key == CHECKPOINT_INTERVAL_KEY
        ));
    }
}
