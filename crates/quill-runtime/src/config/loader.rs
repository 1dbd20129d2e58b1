//! Configuration loader using figment.
//!
//! Configuration is layered, lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`quill.{profile}.toml`)
//! 3. Main config file (`quill.toml` / `config.toml`)
//! 4. Environment variables (`QUILL_*`)
//! 5. Programmatic overrides
//!
//! Environment variables use the `QUILL_` prefix with `__` as the section
//! separator:
//!
//! - `QUILL_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `QUILL_STORE__BACKEND=sqlite` → `store.backend = "sqlite"`
//! - `QUILL_DISPATCH__MAX_CONCURRENCY=16` → `dispatch.max_concurrency = 16`
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new().with_current_dir().load()?;
//!
//! let config = ConfigLoader::new()
//!     .file("./config/quill.toml")
//!     .profile("production")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use tracing::{debug, info, trace, warn};

use super::schema::QuillConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `QUILL_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("QUILL_PROFILE")
            .map(|p| match p.to_lowercase().as_str() {
                "production" | "prod" => Self::Production,
                "development" | "dev" => Self::Development,
                other => Self::Custom(other.to_string()),
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Multi-source configuration loader.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader with defaults and the profile from the environment.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        let p = profile.into();
        self.profile = match p.to_lowercase().as_str() {
            "production" | "prod" => Profile::Production,
            "development" | "dev" => Profile::Development,
            _ => Profile::Custom(p),
        };
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to the search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    /// Adds the user config directory (`~/.config/quill`) to the search
    /// paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("quill"))
        } else {
            self
        }
    }

    /// Loads a specific configuration file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables `QUILL_*` environment variables (default).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges programmatic overrides on top of everything else.
    pub fn merge(mut self, config: QuillConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<QuillConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: QuillConfig = figment
            .extract()
            .map_err(|e| ConfigError::Parse(format!("failed to extract configuration: {e}")))?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            "configuration loaded"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(QuillConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = &self.config_file {
            if path.exists() {
                info!(path = %path.display(), "loading configuration file");
                figment = figment.merge(Toml::file(path));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("loading environment variables with QUILL_ prefix");
            figment = figment.merge(
                Env::prefixed("QUILL_")
                    .split("__")
                    .map(|key| key.as_str().replace("__", ".").into()),
            );
        }

        Ok(figment)
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            let mut paths = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                paths.push(cwd);
            }
            if let Some(config_dir) = dirs::config_dir() {
                paths.push(config_dir.join("quill"));
            }
            paths
        } else {
            self.search_paths.clone()
        }
    }

    /// Searches `search_paths × base_names`, merging a profile-specific
    /// variant first, then the base file. Stops at the first base file.
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        'search: for search_path in &search_paths {
            for base_name in ["quill.toml", "config.toml"] {
                let stem = base_name.trim_end_matches(".toml");

                let profile_name = format!("{}.{}.toml", stem, self.profile.as_str());
                let profile_path = search_path.join(&profile_name);
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "loading profile-specific config");
                    figment = figment.merge(Toml::file(&profile_path));
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "loading configuration file");
                    figment = figment.merge(Toml::file(&base_path));
                    found = true;
                    break 'search;
                }
            }
        }

        if !found {
            warn!("no configuration file found, using defaults");
        }
        figment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LogLevel, OverflowPolicy, StoreConfig};

    #[test]
    fn defaults_load_without_files() {
        let config = ConfigLoader::new().without_env().load().unwrap();

        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(matches!(config.store, StoreConfig::Memory { .. }));
        assert_eq!(config.dispatch.queue_capacity, 1024);
        assert_eq!(config.dispatch.overflow, OverflowPolicy::Wait);
        assert_eq!(config.outbox.max_attempts, 5);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quill.toml");
        std::fs::write(
            &path,
            r#"
[logging]
level = "debug"

[store]
backend = "sqlite"
path = "/tmp/state.db"

[dispatch]
queue_capacity = 8
overflow = "drop"
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .file(&path)
            .without_env()
            .load()
            .unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(matches!(config.store, StoreConfig::Sqlite { .. }));
        assert_eq!(config.dispatch.queue_capacity, 8);
        assert_eq!(config.dispatch.overflow, OverflowPolicy::Drop);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = ConfigLoader::new()
            .file("/definitely/not/here.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
