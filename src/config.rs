use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cli::GlobalArgs;
use crate::error::{Error, Result};
use crate::platform::{self, OPAQUE_ORIGIN};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub origin: String,
    pub location: String,
    pub log_level: String,
}

/// Everything optional: unset keys fall back to the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    origin: Option<String>,
    location: Option<String>,
    log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = platform::data_dir().unwrap_or_else(|| PathBuf::from(".kvsnap"));
        Config::with_data_dir(data_dir)
    }
}

impl Config {
    /// Defaults, then the config file, then command-line flags.
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        let mut config = Config::default();

        let explicit = args.config.is_some();
        let path = args.config.clone().or_else(platform::config_path);
        if let Some(path) = path {
            if path.exists() {
                config = config.merge_file(&path)?;
            } else if explicit {
                return Err(Error::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
        }

        if let Some(dir) = &args.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(origin) = &args.origin {
            config.origin = origin.clone();
        }
        if let Some(location) = &args.location {
            config.location = location.clone();
        }
        if args.verbose {
            config.log_level = "debug".to_string();
        }

        Ok(config)
    }

    /// Defaults rooted at `data_dir`, for embedding and tests.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let location = format!("file://{}", data_dir.display());
        Config {
            data_dir,
            origin: OPAQUE_ORIGIN.to_string(),
            location,
            log_level: "warn".to_string(),
        }
    }

    fn merge_file(self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        self.merge_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn merge_toml(mut self, text: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;

        if let Some(dir) = file.data_dir {
            self.data_dir = dir;
        }
        if let Some(origin) = file.origin {
            self.origin = origin;
        }
        if let Some(location) = file.location {
            self.location = location;
        }
        if let Some(level) = file.log_level {
            self.log_level = level;
        }
        Ok(self)
    }

    /// Origin snapshots are filed under, after the opaque-origin rule.
    pub fn resolved_origin(&self) -> String {
        platform::resolve_origin(&self.origin, &self.location)
    }

    /// Storage area holding this origin's databases.
    pub fn databases_dir(&self) -> PathBuf {
        self.data_dir
            .join("origins")
            .join(platform::path_component(&self.resolved_origin()))
    }

    /// Storage area of the snapshot metadata store, shared by all origins.
    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join("app")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_defaults() {
        let config = Config::with_data_dir("/tmp/kv")
            .merge_toml("origin = \"https://shop.example\"\nlog_level = \"info\"\n")
            .unwrap();
        assert_eq!(config.origin, "https://shop.example");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/kv"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::with_data_dir("/tmp/kv")
            .merge_toml("orign = \"typo\"")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(&file, "origin = \"https://from-file\"\n").unwrap();

        let args = GlobalArgs {
            config: Some(file),
            data_dir: Some(dir.path().to_path_buf()),
            origin: Some("https://from-flag".into()),
            location: None,
            verbose: true,
        };
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.origin, "https://from-flag");
        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn missing_explicit_config_fails() {
        let args = GlobalArgs {
            config: Some(PathBuf::from("/definitely/not/here.toml")),
            ..GlobalArgs::default()
        };
        assert!(Config::from_args(&args).is_err());
    }

    #[test]
    fn origins_get_separate_storage_areas() {
        let mut a = Config::with_data_dir("/tmp/kv");
        a.origin = "https://a.example".into();
        let mut b = a.clone();
        b.origin = "https://b.example".into();

        assert_ne!(a.databases_dir(), b.databases_dir());
        assert_eq!(a.metadata_dir(), b.metadata_dir());
    }

    #[test]
    fn default_origin_is_opaque() {
        let config = Config::with_data_dir("/tmp/kv");
        assert_eq!(config.resolved_origin(), "opaque:file:///tmp/kv");
    }
}
