//! Config file + environment loading (spec §6). Precedence: environment
//! variables win over the TOML file, which wins over built-in defaults.

use crate::error::{ConfigError, Result};
use crate::schema::AiosConfig;
use std::env;
use std::path::PathBuf;

const ENV_PREFIX: &str = "AIOS_";

/// Resolves `$AIOS_HOME`, falling back to `~/.aios`.
pub fn home_dir() -> PathBuf {
    if let Ok(home) = env::var("AIOS_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".aios")
}

/// Resolves `$AIOS_CONFIG_PATH`, falling back to `<home_dir>/config.toml`.
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("AIOS_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    home_dir().join("config.toml")
}

/// Loads the effective configuration: file (if present) overlaid with
/// `AIOS_*` environment overrides, else built-in defaults overlaid the
/// same way.
pub fn load() -> Result<AiosConfig> {
    let path = config_file_path();
    let mut config = if path.exists() {
        load_from_file(&path)?
    } else {
        tracing::debug!(path = %path.display(), "no config file found, using defaults");
        AiosConfig::default()
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

pub fn load_from_file(path: &std::path::Path) -> Result<AiosConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Scans `AIOS_*` environment variables and overlays the scalar top-level
/// settings they name. Unrecognized `AIOS_*` keys are ignored, since they
/// may be consumed elsewhere (e.g. `AIOS_HOME`, `AIOS_CONFIG_PATH`).
pub fn apply_env_overrides(config: &mut AiosConfig) -> Result<()> {
    for (key, value) in env::vars() {
        let Some(setting) = key.strip_prefix(ENV_PREFIX) else { continue };
        match setting {
            "RETENTION_DAYS" => config.retention_days = parse_env(&key, &value)?,
            "FUSE_THRESHOLD" => config.fuse_threshold = parse_env(&key, &value)?,
            "OUTCOME_WINDOW" => config.outcome_window = parse_env(&key, &value)?,
            "DISABLE_FLOOR" => config.disable_floor = parse_env(&key, &value)?,
            "ACTION_COOLDOWN_SEC" => config.action_cooldown_sec = parse_env(&key, &value)?,
            "QUOTA_PER_HOUR" => config.quota_per_hour = parse_env(&key, &value)?,
            "QUOTA_PER_DAY" => config.quota_per_day = parse_env(&key, &value)?,
            "EXECUTION_TIMEOUT_SEC" => config.execution_timeout_sec = parse_env(&key, &value)?,
            "EXECUTION_MAX_RETRIES" => config.execution_max_retries = parse_env(&key, &value)?,
            "BUDGET_CEILING" => config.budget_ceiling = parse_env(&key, &value)?,
            "BUDGET_PRESSURE_FRACTION" => config.budget_pressure_fraction = parse_env(&key, &value)?,
            "BREAKER_MAX_TRIGGERS_IN_WINDOW" => config.breaker.max_triggers_in_window = parse_env(&key, &value)?,
            "BREAKER_WINDOW_SECONDS" => config.breaker.window_seconds = parse_env(&key, &value)?,
            "BREAKER_MAX_FAILURES" => config.breaker.max_failures = parse_env(&key, &value)?,
            "BREAKER_FAILURE_WINDOW_SECONDS" => config.breaker.failure_window_seconds = parse_env(&key, &value)?,
            "BREAKER_COOLDOWN_SECONDS" => config.breaker.cooldown_seconds = parse_env(&key, &value)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| ConfigError::Env(format!("{key}={value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_used_when_no_file_is_present() {
        let config = AiosConfig::default();
        assert_eq!(config.retention_days, 14);
        assert_eq!(config.fuse_threshold, 5);
    }

    #[test]
    fn file_values_round_trip_through_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "retention_days = 30\nfuse_threshold = 9\n").unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.fuse_threshold, 9);
        assert_eq!(config.outcome_window, 20, "unset fields fall back to their serde default");
    }

    #[test]
    fn env_override_wins_over_file_value() {
        let mut config = AiosConfig { retention_days: 30, ..AiosConfig::default() };
        std::env::set_var("AIOS_RETENTION_DAYS", "7");

        apply_env_overrides(&mut config).unwrap();

        std::env::remove_var("AIOS_RETENTION_DAYS");
        assert_eq!(config.retention_days, 7);
    }

    #[test]
    fn malformed_env_override_is_rejected() {
        let mut config = AiosConfig::default();
        std::env::set_var("AIOS_FUSE_THRESHOLD", "not-a-number");

        let result = apply_env_overrides(&mut config);

        std::env::remove_var("AIOS_FUSE_THRESHOLD");
        assert!(matches!(result, Err(ConfigError::Env(_))));
    }

    #[test]
    fn unrecognized_aios_prefixed_var_is_ignored() {
        let mut config = AiosConfig::default();
        std::env::set_var("AIOS_HOME", "/tmp/somewhere");

        let result = apply_env_overrides(&mut config);

        std::env::remove_var("AIOS_HOME");
        assert!(result.is_ok());
    }
}
