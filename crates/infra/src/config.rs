//! Pipeline configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

const DEV_WEBHOOK_SECRET: &str = "dev-webhook-secret";
const RETENTION_DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=3650;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Runtime settings shared by every pipeline component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub environment: Environment,
    pub webhook_secret: String,
    pub sweep_batch_limit: usize,
    pub retention_days: i64,
    pub reconciliation_tolerance: Decimal,
    /// Offset that defines a merchant's calendar day for aggregation.
    pub merchant_utc_offset: FixedOffset,
    pub expiry_sweep_interval: Duration,
    pub archive_sweep_interval: Duration,
    pub database_url: Option<String>,
    pub store_timeout: Duration,
    pub bind_addr: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            webhook_secret: DEV_WEBHOOK_SECRET.to_string(),
            sweep_batch_limit: 500,
            retention_days: 30,
            reconciliation_tolerance: Decimal::new(1, 2),
            merchant_utc_offset: Utc.fix(),
            expiry_sweep_interval: Duration::from_secs(3600),
            archive_sweep_interval: Duration::from_secs(86_400),
            database_url: None,
            store_timeout: Duration::from_secs(5),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the process environment
    /// in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let environment = match get("BILEE_ENV").as_deref() {
            None | Some("development") | Some("dev") | Some("test") => Environment::Development,
            Some("production") | Some("prod") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "BILEE_ENV",
                    value: other.to_string(),
                    reason: "expected development or production".to_string(),
                });
            }
        };

        let webhook_secret = match get("WEBHOOK_SECRET") {
            Some(secret) => secret,
            None if environment.is_production() => return Err(ConfigError::Missing("WEBHOOK_SECRET")),
            None => {
                tracing::warn!("WEBHOOK_SECRET not set; using insecure dev default");
                DEV_WEBHOOK_SECRET.to_string()
            }
        };

        let offset_minutes: i32 = parse_or(&get, "MERCHANT_UTC_OFFSET_MINUTES", 0)?;
        let merchant_utc_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                key: "MERCHANT_UTC_OFFSET_MINUTES",
                value: offset_minutes.to_string(),
                reason: "offset out of range".to_string(),
            })?;

        let sweep_batch_limit: usize = parse_or(&get, "SWEEP_BATCH_LIMIT", defaults.sweep_batch_limit)?;
        if sweep_batch_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "SWEEP_BATCH_LIMIT",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let retention_days: i64 = parse_or(&get, "RETENTION_DAYS", defaults.retention_days)?;
        if !RETENTION_DAYS_RANGE.contains(&retention_days) {
            return Err(ConfigError::Invalid {
                key: "RETENTION_DAYS",
                value: retention_days.to_string(),
                reason: format!(
                    "must be between {} and {}",
                    RETENTION_DAYS_RANGE.start(),
                    RETENTION_DAYS_RANGE.end()
                ),
            });
        }

        let expiry_sweep_interval = positive_secs(&get, "EXPIRY_SWEEP_INTERVAL_SECS", defaults.expiry_sweep_interval)?;
        let archive_sweep_interval =
            positive_secs(&get, "ARCHIVE_SWEEP_INTERVAL_SECS", defaults.archive_sweep_interval)?;

        let reconciliation_tolerance: Decimal =
            parse_or(&get, "RECONCILIATION_TOLERANCE", defaults.reconciliation_tolerance)?;
        if reconciliation_tolerance.is_sign_negative() {
            return Err(ConfigError::Invalid {
                key: "RECONCILIATION_TOLERANCE",
                value: reconciliation_tolerance.to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        Ok(Self {
            environment,
            webhook_secret,
            sweep_batch_limit,
            retention_days,
            reconciliation_tolerance,
            merchant_utc_offset,
            expiry_sweep_interval,
            archive_sweep_interval,
            database_url: get("DATABASE_URL"),
            store_timeout: Duration::from_secs(parse_or(
                &get,
                "STORE_TIMEOUT_SECS",
                defaults.store_timeout.as_secs(),
            )?),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Sweep periods feed `tokio::time::interval`, which rejects zero.
fn positive_secs<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(get, key, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.sweep_batch_limit, 500);
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.reconciliation_tolerance, Decimal::new(1, 2));
        assert_eq!(cfg.expiry_sweep_interval, Duration::from_secs(3600));
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn production_requires_a_webhook_secret() {
        let err = load(&[("BILEE_ENV", "production")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("WEBHOOK_SECRET"));

        let cfg = load(&[("BILEE_ENV", "production"), ("WEBHOOK_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.webhook_secret, "s3cret");
    }

    #[test]
    fn merchant_offset_is_read_in_minutes() {
        let cfg = load(&[("MERCHANT_UTC_OFFSET_MINUTES", "330")]).unwrap();
        assert_eq!(cfg.merchant_utc_offset.local_minus_utc(), 330 * 60);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert!(matches!(
            load(&[("SWEEP_BATCH_LIMIT", "lots")]),
            Err(ConfigError::Invalid { key: "SWEEP_BATCH_LIMIT", .. })
        ));
        assert!(load(&[("RECONCILIATION_TOLERANCE", "-0.5")]).is_err());
    }

    #[test]
    fn retention_days_must_be_in_range() {
        for raw in ["0", "-3", "3651", "9223372036854775807"] {
            assert!(
                matches!(
                    load(&[("RETENTION_DAYS", raw)]),
                    Err(ConfigError::Invalid { key: "RETENTION_DAYS", .. })
                ),
                "RETENTION_DAYS={raw}"
            );
        }
        assert_eq!(load(&[("RETENTION_DAYS", "3650")]).unwrap().retention_days, 3650);
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        assert!(matches!(
            load(&[("ARCHIVE_SWEEP_INTERVAL_SECS", "0")]),
            Err(ConfigError::Invalid { key: "ARCHIVE_SWEEP_INTERVAL_SECS", .. })
        ));
    }
}
