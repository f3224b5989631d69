use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_CACHE_PATH: &str = "beatmap_details.json";
const DEFAULT_CHUNK_SIZE: usize = 10;
const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub version: u32,
    pub cache_path: String,
    pub on_demand_chunk_size: usize,
    pub caching_chunk_size: usize,
    pub progress_interval_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            cache_path: DEFAULT_CACHE_PATH.to_string(),
            on_demand_chunk_size: DEFAULT_CHUNK_SIZE,
            caching_chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl LoaderConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    pub fn on_demand_window(&self) -> usize {
        self.on_demand_chunk_size.max(1)
    }

    pub fn caching_chunk(&self) -> usize {
        self.caching_chunk_size.max(1)
    }

    /// Where the details cache lives for a config loaded from `config_path`.
    pub fn cache_file(&self, config_path: &Path) -> PathBuf {
        resolve_path(config_path, &self.cache_path)
    }

    fn repair(&mut self) {
        if self.version < CONFIG_VERSION {
            self.version = CONFIG_VERSION;
        }
        if self.cache_path.trim().is_empty() {
            self.cache_path = DEFAULT_CACHE_PATH.to_string();
        }
        if self.on_demand_chunk_size == 0 {
            self.on_demand_chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.caching_chunk_size == 0 {
            self.caching_chunk_size = self.on_demand_chunk_size;
        }
        if self.progress_interval_ms == 0 {
            self.progress_interval_ms = DEFAULT_PROGRESS_INTERVAL_MS;
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "loader config io: {}", err),
            ConfigError::Yaml(err) => write!(f, "loader config yaml: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

/// `BEATMAP_DETAILS_CONFIG`, else `config.yaml` next to the executable.
pub fn config_path_from_env() -> PathBuf {
    if let Ok(value) = env::var("BEATMAP_DETAILS_CONFIG") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("config.yaml")))
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}

/// Reads the config at `path` without touching the filesystem otherwise.
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<LoaderConfig, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(LoaderConfig::default()),
        Err(err) => return Err(err.into()),
    };
    let mut config: LoaderConfig = serde_yaml::from_str(&contents)?;
    config.repair();
    Ok(config)
}

/// Like [`load_config`], but writes the defaults to `path` when it is absent.
/// The flag is `true` when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(LoaderConfig, bool), ConfigError> {
    if path.exists() {
        return Ok((load_config(path)?, false));
    }

    let config = LoaderConfig::default();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_yaml::to_string(&config)?)?;
    Ok((config, true))
}

/// Resolves `value` against the directory holding the config file.
pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
