use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// File names probed in the working directory when no config path is given.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["tidemark.toml", "tidemark.yml", "tidemark.yaml"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a config file, picking the format from its extension.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = Self::parse(&contents, ext)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str, ext: &str) -> Result<AppConfig> {
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// First of [`DEFAULT_CONFIG_FILES`] that exists under `dir`.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        DEFAULT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.is_file())
    }

    /// Load `path` if given, else a discovered file in `dir`, else defaults.
    ///
    /// An explicit path that does not exist is an error; a missing
    /// discovered file is not.
    pub fn load_or_default(path: Option<&Path>, dir: &Path) -> Result<AppConfig> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::discover(dir) {
            Some(found) => Self::load(&found),
            None => {
                debug!("no config file in {}, using defaults", dir.display());
                Ok(AppConfig::default())
            }
        }
    }
}
