//! Configuration Loader
//!
//! Environment-aware configuration loading: built-in defaults, overlaid by an
//! optional TOML file, overlaid by a small set of environment variables for
//! the settings operators most commonly override per deployment.

use super::CoreConfig;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid environment override {variable}: {message}")]
    EnvOverride { variable: String, message: String },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigurationError>;

impl CoreConfig {
    /// Load configuration with environment auto-detection.
    ///
    /// Looks for a file at `$STOREFRONT_CONFIG_PATH`, falling back to
    /// `config/storefront-core.toml` relative to the working directory. A
    /// missing file is not an error; defaults apply.
    pub fn load() -> ConfigResult<Self> {
        let path = env::var("STOREFRONT_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/storefront-core.toml"));
        Self::load_from_path(&path)
    }

    /// Load configuration from an explicit file path, then apply environment
    /// overrides and validate.
    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        let mut config = if path.exists() {
            debug!(path = %path.display(), "Loading configuration file");
            let content = std::fs::read_to_string(path).map_err(|source| {
                ConfigurationError::FileRead {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            toml::from_str(&content).map_err(|source| ConfigurationError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            debug!(path = %path.display(), "Configuration file not found, using defaults");
            CoreConfig::default()
        };

        config.apply_env_overrides()?;

        config
            .validate()
            .map_err(ConfigurationError::Invalid)?;

        Ok(config)
    }

    /// Apply environment variable overrides for deployment-specific settings.
    ///
    /// - `STOREFRONT_REDIS_URL`: remote cache tier URL (presence enables the
    ///   remote tier even when the file omits it)
    /// - `STOREFRONT_CACHE_TTL_SECONDS`: default cache TTL
    fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(url) = env::var("STOREFRONT_REDIS_URL") {
            match &mut self.cache.redis {
                Some(redis) => redis.url = url,
                None => {
                    self.cache.redis = Some(super::RedisConfig {
                        url,
                        connection_timeout_seconds:
                            super::RedisConfig::default_connection_timeout_seconds(),
                    });
                }
            }
        }

        if let Ok(raw) = env::var("STOREFRONT_CACHE_TTL_SECONDS") {
            let ttl = raw
                .parse::<u64>()
                .map_err(|e| ConfigurationError::EnvOverride {
                    variable: "STOREFRONT_CACHE_TTL_SECONDS".to_string(),
                    message: e.to_string(),
                })?;
            if ttl == 0 {
                warn!("STOREFRONT_CACHE_TTL_SECONDS=0 ignored, keeping configured TTL");
            } else {
                self.cache.default_ttl_seconds = ttl;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config =
            CoreConfig::load_from_path(Path::new("/nonexistent/storefront-core.toml")).unwrap();
        assert_eq!(config.cache.default_ttl_seconds, 300);
        assert_eq!(config.circuit_breakers.max_circuit_breakers, 50);
    }

    #[test]
    fn test_load_partial_file_merges_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cache]
default_ttl_seconds = 120

[circuit_breakers.default_config]
failure_threshold = 7
"#
        )
        .unwrap();

        let config = CoreConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.cache.default_ttl_seconds, 120);
        assert_eq!(config.circuit_breakers.default_config.failure_threshold, 7);
        // Untouched fields keep their defaults
        assert_eq!(
            config.circuit_breakers.default_config.volume_threshold,
            10
        );
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_component_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[circuit_breakers.component_configs.remote-cache]
failure_threshold = 5
volume_threshold = 10
error_threshold_percentage = 50.0
reset_timeout_ms = 15000
request_timeout_ms = 1000
half_open_max_probes = 2
"#
        )
        .unwrap();

        let config = CoreConfig::load_from_path(file.path()).unwrap();
        let remote = config
            .circuit_breakers
            .config_for_component("remote-cache");
        assert_eq!(remote.reset_timeout_ms, 15_000);
        assert_eq!(remote.half_open_max_probes, 2);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[retry]
max_attempts = 0
"#
        )
        .unwrap();

        let result = CoreConfig::load_from_path(file.path());
        assert!(matches!(result, Err(ConfigurationError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [[[").unwrap();

        let result = CoreConfig::load_from_path(file.path());
        assert!(matches!(result, Err(ConfigurationError::Parse { .. })));
    }
}
