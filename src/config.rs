//! Configuration handling for the nestql CLI
//!
//! Manages the nestql.toml configuration file.
//!
//! ## Environment Variables
//!
//! The following environment variables override config file settings:
//!
//! - `NESTQL_TYPING_MODE` - `legacy` or `permissive`
//! - `NESTQL_UNDEFINED_VARIABLE` - `error` or `missing`
//! - `NESTQL_TIMEZONE_OFFSET` - default offset in minutes for TIME WITH TIME ZONE literals
//! - `NESTQL_LOG` - tracing filter directive
//!
//! These can be set in a `.env` file next to the configuration file.

use std::path::Path;
use std::sync::Arc;

use nestql_core::{CompileOptions, TypingMode, UndefinedVariableBehavior};
use serde::{Deserialize, Serialize};

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "nestql.toml";

/// Environment variable names
pub const ENV_TYPING_MODE: &str = "NESTQL_TYPING_MODE";
pub const ENV_UNDEFINED_VARIABLE: &str = "NESTQL_UNDEFINED_VARIABLE";
pub const ENV_TIMEZONE_OFFSET: &str = "NESTQL_TIMEZONE_OFFSET";
pub const ENV_LOG: &str = "NESTQL_LOG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Options every query is compiled with
    pub compile: CompileOptions,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "nestql=info,nestql_core=info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a directory
    ///
    /// This also loads any `.env` file in the directory and applies
    /// environment variable overrides. A missing config file yields defaults.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            dotenvy::from_path(&env_path)?;
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides looked up by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(mode) = set(ENV_TYPING_MODE) {
            self.compile.typing_mode = match mode.to_ascii_lowercase().as_str() {
                "legacy" => TypingMode::Legacy,
                "permissive" => TypingMode::Permissive,
                other => anyhow::bail!("{}: unknown typing mode '{}'", ENV_TYPING_MODE, other),
            };
        }

        if let Some(behavior) = set(ENV_UNDEFINED_VARIABLE) {
            self.compile.undefined_variable = match behavior.to_ascii_lowercase().as_str() {
                "error" => UndefinedVariableBehavior::Error,
                "missing" => UndefinedVariableBehavior::Missing,
                other => anyhow::bail!("{}: unknown behavior '{}'", ENV_UNDEFINED_VARIABLE, other),
            };
        }

        if let Some(offset) = set(ENV_TIMEZONE_OFFSET) {
            self.compile.default_timezone_offset_minutes = offset
                .parse()
                .map_err(|e| anyhow::anyhow!("{}: {}", ENV_TIMEZONE_OFFSET, e))?;
        }

        if let Some(filter) = set(ENV_LOG) {
            self.log.filter = filter;
        }

        Ok(())
    }

    /// Save configuration to a directory
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE_NAME), content)?;
        Ok(())
    }

    pub fn compile_options(&self) -> Arc<CompileOptions> {
        Arc::new(self.compile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.compile, CompileOptions::default());
        assert_eq!(config.log.filter, "nestql=info,nestql_core=info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[compile]\ntyping_mode = \"permissive\"\nprojection_iteration = \"unfiltered\"\n\n[log]\nfilter = \"debug\"\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.compile.typing_mode, TypingMode::Permissive);
        assert_eq!(
            config.compile.projection_iteration,
            nestql_core::ProjectionIteration::Unfiltered
        );
        assert_eq!(config.compile.undefined_variable, UndefinedVariableBehavior::Error);
        assert_eq!(config.log.filter, "debug");
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.compile.default_timezone_offset_minutes = 90;
        config.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.compile.default_timezone_offset_minutes, 90);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_TYPING_MODE, "PERMISSIVE"),
            (ENV_UNDEFINED_VARIABLE, "missing"),
            (ENV_TIMEZONE_OFFSET, "-300"),
            (ENV_LOG, ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.compile.typing_mode, TypingMode::Permissive);
        assert_eq!(config.compile.undefined_variable, UndefinedVariableBehavior::Missing);
        assert_eq!(config.compile.default_timezone_offset_minutes, -300);
        assert_eq!(config.log.filter, LogConfig::default().filter);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|name| (name == ENV_TYPING_MODE).then(|| "lenient".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("lenient"));
    }
}
