//! Framework configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use nd_types::{NdError, NdResult};

fn default_catalog_path() -> PathBuf {
    PathBuf::from("/etc/netdirect/providers.toml")
}

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Where the provider catalog lives.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// How often the catalog file is checked for changes, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for FrameworkConfig {
    fn default() -> FrameworkConfig {
        FrameworkConfig {
            catalog_path: default_catalog_path(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl FrameworkConfig {
    pub fn load(path: &Path) -> NdResult<FrameworkConfig> {
        let text = std::fs::read_to_string(path)?;
        let config = toml::from_str(&text).map_err(|err| {
            NdError::unsuccessful(format!("malformed config {}: {}", path.display(), err))
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FrameworkConfig::default();
        assert_eq!(config.catalog_path, PathBuf::from("/etc/netdirect/providers.toml"));
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_overrides() {
        let config: FrameworkConfig = toml::from_str("poll_interval_ms = 50").unwrap();
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.catalog_path, PathBuf::from("/etc/netdirect/providers.toml"));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join("nd-test-framework-config.toml");
        std::fs::write(&path, "catalog_path = \"/tmp/providers.toml\"\n").unwrap();

        let config = FrameworkConfig::load(&path).unwrap();
        assert_eq!(config.catalog_path, PathBuf::from("/tmp/providers.toml"));
        assert_eq!(config.poll_interval_ms, 500);
        let _ = std::fs::remove_file(&path);

        assert!(FrameworkConfig::load(Path::new("/nonexistent/nd-config.toml")).is_err());
    }
}
