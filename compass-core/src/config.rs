//! Global compass configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CompassError, CompassResult};
use crate::provider::{ProviderSync, SubprocessProvider};
use crate::recurrence::DEFAULT_MAX_INSTANCES;
use crate::resolver::ScopeResolver;
use crate::store::FileStore;

static DEFAULT_DATA_DIR: &str = "~/.local/share/compass";
static DEFAULT_TIMEOUT: &str = "10s";
/// Default pull and listing window, in days either side of now.
const DEFAULT_SYNC_DAYS: i64 = 30;

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_provider_timeout() -> String {
    DEFAULT_TIMEOUT.to_string()
}

fn default_max_instances() -> u16 {
    DEFAULT_MAX_INSTANCES
}

fn default_sync_days() -> i64 {
    DEFAULT_SYNC_DAYS
}

/// Configuration at ~/.config/compass/config.toml, overridable with
/// `COMPASS_*` environment variables (e.g. `COMPASS_PROVIDER=google`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompassConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Provider plugin suffix: `google` runs `compass-provider-google`.
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default = "default_provider_timeout")]
    pub provider_timeout: String,

    #[serde(default = "default_max_instances")]
    pub max_instances: u16,

    #[serde(default = "default_sync_days")]
    pub sync_days: i64,

    /// Valid calendar ids. Empty accepts any non-empty id.
    #[serde(default)]
    pub calendars: Vec<String>,
}

impl Default for CompassConfig {
    fn default() -> Self {
        CompassConfig {
            data_dir: default_data_dir(),
            provider: None,
            provider_timeout: default_provider_timeout(),
            max_instances: default_max_instances(),
            sync_days: default_sync_days(),
            calendars: Vec::new(),
        }
    }
}

impl CompassConfig {
    pub fn config_path() -> CompassResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CompassError::Config("Could not determine config directory".into()))?
            .join("compass");

        Ok(config_dir.join("config.toml"))
    }

    /// Load the global config, writing a commented default file first if
    /// there is none.
    pub fn load() -> CompassResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    /// Load from `path` layered with the environment. A missing file means
    /// defaults.
    pub fn load_from(path: &Path) -> CompassResult<Self> {
        let config: CompassConfig = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("COMPASS")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("calendars"),
            )
            .build()
            .map_err(|e| CompassError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CompassError::Config(e.to_string()))?;

        config.provider_timeout()?;
        Ok(config)
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CompassResult<()> {
        let contents = format!(
            "\
# compass configuration

# Where the event store lives:
# data_dir = \"{DEFAULT_DATA_DIR}\"

# Provider to mirror events to (runs compass-provider-<name>):
# provider = \"google\"

# Give up on a provider call after:
# provider_timeout = \"{DEFAULT_TIMEOUT}\"

# Instances materialised for rules without COUNT or UNTIL:
# max_instances = {DEFAULT_MAX_INSTANCES}

# Days either side of today covered by `compass pull` and `compass events`:
# sync_days = {DEFAULT_SYNC_DAYS}

# Accepted calendar ids (empty accepts any):
# calendars = [\"primary\"]
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CompassError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CompassError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    pub fn data_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.data_dir.to_string_lossy()).into_owned();

        PathBuf::from(full_path_str)
    }

    pub fn provider_timeout(&self) -> CompassResult<Duration> {
        humantime::parse_duration(&self.provider_timeout).map_err(|e| {
            CompassError::Config(format!(
                "Invalid provider_timeout '{}': {e}",
                self.provider_timeout
            ))
        })
    }

    pub fn resolver(&self) -> ScopeResolver {
        ScopeResolver::new(self.max_instances, self.calendars.clone())
    }

    pub fn store(&self) -> FileStore {
        FileStore::new(&self.data_path())
    }

    /// The configured provider, or `None` for local-only operation.
    pub fn provider_sync(&self) -> CompassResult<Option<ProviderSync>> {
        let Some(name) = &self.provider else {
            return Ok(None);
        };
        let client = SubprocessProvider::from_name(name);
        Ok(Some(ProviderSync::new(Arc::new(client), self.provider_timeout()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompassConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.max_instances, 52);
        assert_eq!(config.sync_days, 30);
        assert_eq!(config.provider_timeout().unwrap(), Duration::from_secs(10));
        assert!(config.provider_sync().unwrap().is_none());
    }

    #[test]
    fn test_commented_default_file_parses_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        CompassConfig::create_default_config(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("# provider = \"google\""));

        let config = CompassConfig::load_from(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert!(config.calendars.is_empty());
    }

    #[test]
    fn test_file_values_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "data_dir = \"/tmp/compass\"\nprovider = \"google\"\nprovider_timeout = \"1m 30s\"\n\
             max_instances = 10\ncalendars = [\"primary\"]\n",
        )
        .unwrap();

        let config = CompassConfig::load_from(&path).unwrap();
        assert_eq!(config.data_path(), PathBuf::from("/tmp/compass"));
        assert_eq!(config.provider_timeout().unwrap(), Duration::from_secs(90));
        assert_eq!(config.calendars, vec!["primary".to_string()]);

        let sync = config.provider_sync().unwrap().unwrap();
        assert_eq!(sync.timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_bad_timeout_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "provider_timeout = \"soon\"\n").unwrap();

        let err = CompassConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, CompassError::Config(_)));
    }

    #[test]
    fn test_data_path_expands_tilde() {
        let config = CompassConfig::default();
        assert!(!config.data_path().to_string_lossy().starts_with('~'));
    }
}
