use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Gate thresholds. Loaded once at startup, immutable afterwards, shared
/// read-only across all entities and components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Health floor below which a cycle fails.
    pub min_health: f64,
    /// Stability floor below which a cycle fails.
    pub min_stability: f64,
    /// Ceiling on the per-cycle progress step.
    pub max_evolution_rate: f64,
    /// Health floor below which recovery performs a rollback. Stricter than
    /// `min_health`.
    pub critical_health: f64,
    /// Consecutive failed cycles tolerated before quarantine.
    pub max_retries: u32,
    /// Band above a floor inside which a passing score only warns.
    pub warn_margin: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_health: 0.5,
            min_stability: 0.5,
            max_evolution_rate: 0.34,
            critical_health: 0.3,
            max_retries: 2,
            warn_margin: 0.10,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, val) in [
            ("min_health", self.min_health),
            ("min_stability", self.min_stability),
            ("max_evolution_rate", self.max_evolution_rate),
            ("critical_health", self.critical_health),
            ("warn_margin", self.warn_margin),
        ] {
            if !val.is_finite() || !(0.0..=1.0).contains(&val) {
                anyhow::bail!("{} must be in [0.0, 1.0] and finite, got {}", name, val);
            }
        }
        if self.max_evolution_rate == 0.0 {
            anyhow::bail!("max_evolution_rate must be > 0");
        }
        if self.critical_health >= self.min_health {
            anyhow::bail!(
                "critical_health ({}) must be stricter than min_health ({})",
                self.critical_health,
                self.min_health
            );
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be > 0");
        }
        Ok(())
    }
}

/// Snapshot retention: rows older than the window AND beyond the minimum
/// retained count may be pruned. `min_retained >= 1` keeps the latest
/// snapshot available for recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age_hours: u64,
    pub min_retained: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_hours: 168,
            min_retained: 16,
        }
    }
}

impl RetentionPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_age_hours == 0 || self.max_age_hours > 8760 {
            anyhow::bail!(
                "retention max_age_hours must be between 1 and 8760 (got {})",
                self.max_age_hours
            );
        }
        if self.min_retained == 0 {
            anyhow::bail!("retention min_retained must be >= 1");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Per-cycle progress increment. Explicitly configured, never inferred;
    /// clamped to `max_evolution_rate` at load.
    pub progress_step: f64,
    /// Capacity of the alert delivery queue.
    pub alert_buffer: usize,
    pub thresholds: ThresholdConfig,
    pub retention: RetentionPolicy,
}

fn float_env(key: &str, default: f64) -> anyhow::Result<f64> {
    let val = env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<f64>()
        .with_context(|| format!("Failed to parse {}", key))?;
    Ok(val)
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let database_url =
            env::var("ASCEND_DATABASE_URL").unwrap_or_else(|_| "sqlite:data/ascend.db".to_string());

        let thresholds = ThresholdConfig {
            min_health: float_env("ASCEND_MIN_HEALTH", 0.5)?,
            min_stability: float_env("ASCEND_MIN_STABILITY", 0.5)?,
            max_evolution_rate: float_env("ASCEND_MAX_EVOLUTION_RATE", 0.34)?,
            critical_health: float_env("ASCEND_CRITICAL_HEALTH", 0.3)?,
            max_retries: env::var("ASCEND_MAX_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<u32>()
                .context("Failed to parse ASCEND_MAX_RETRIES")?,
            warn_margin: float_env("ASCEND_WARN_MARGIN", 0.10)?,
        };
        thresholds.validate()?;

        let mut progress_step = float_env("ASCEND_PROGRESS_STEP", 0.25)?;
        if !progress_step.is_finite() || progress_step <= 0.0 || progress_step > 1.0 {
            anyhow::bail!(
                "ASCEND_PROGRESS_STEP must be in (0.0, 1.0] (got {})",
                progress_step
            );
        }
        if progress_step > thresholds.max_evolution_rate {
            warn!(
                progress_step,
                max_evolution_rate = thresholds.max_evolution_rate,
                "ASCEND_PROGRESS_STEP exceeds max_evolution_rate; clamping"
            );
            progress_step = thresholds.max_evolution_rate;
        }

        let alert_buffer = env::var("ASCEND_ALERT_BUFFER")
            .unwrap_or_else(|_| "256".to_string())
            .parse::<usize>()
            .context("Failed to parse ASCEND_ALERT_BUFFER")?;
        if alert_buffer == 0 || alert_buffer > 65536 {
            anyhow::bail!(
                "ASCEND_ALERT_BUFFER must be between 1 and 65536 (got {})",
                alert_buffer
            );
        }

        let retention = RetentionPolicy {
            max_age_hours: env::var("ASCEND_RETENTION_HOURS")
                .unwrap_or_else(|_| "168".to_string())
                .parse::<u64>()
                .context("Failed to parse ASCEND_RETENTION_HOURS")?,
            min_retained: env::var("ASCEND_MIN_RETAINED")
                .unwrap_or_else(|_| "16".to_string())
                .parse::<u32>()
                .context("Failed to parse ASCEND_MIN_RETAINED")?,
        };
        retention.validate()?;

        Ok(Self {
            database_url,
            progress_step,
            alert_buffer,
            thresholds,
            retention,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests run serially (prevents parallel test interference)
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // Guard to ensure env var cleanup even on panic
    struct EnvGuard(&'static str);

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            std::env::remove_var(self.0);
        }
    }

    #[test]
    fn test_defaults_load() {
        let _lock = ENV_LOCK.lock().unwrap();
        let config = AppConfig::load().unwrap();
        assert_eq!(config.thresholds.min_health, 0.5);
        assert_eq!(config.thresholds.max_retries, 2);
        assert_eq!(config.progress_step, 0.25);
        assert_eq!(config.retention.min_retained, 16);
    }

    #[test]
    fn test_progress_step_clamped_to_rate_ceiling() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("ASCEND_PROGRESS_STEP", "0.9");
        let _guard = EnvGuard("ASCEND_PROGRESS_STEP");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.progress_step, config.thresholds.max_evolution_rate);
    }

    #[test]
    fn test_critical_must_be_stricter_than_floor() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("ASCEND_CRITICAL_HEALTH", "0.6");
        let _guard = EnvGuard("ASCEND_CRITICAL_HEALTH");

        assert!(AppConfig::load().is_err());
    }

    #[test]
    fn test_invalid_retention_rejected() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("ASCEND_MIN_RETAINED", "0");
        let _guard = EnvGuard("ASCEND_MIN_RETAINED");

        assert!(AppConfig::load().is_err());
    }

    #[test]
    fn test_threshold_validation_bounds() {
        let mut t = ThresholdConfig::default();
        assert!(t.validate().is_ok());
        t.min_health = 1.2;
        assert!(t.validate().is_err());
        t.min_health = 0.5;
        t.max_retries = 0;
        assert!(t.validate().is_err());
    }
}
