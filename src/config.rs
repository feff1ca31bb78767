use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::repository::RepositoryConfig;
use crate::semantic::MissingEmbeddingPolicy;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_SEED_PATH: &str = "seed.json";
/// Default upper bound for a single store call
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file, relative to the base path. Cache-only when unset.
    #[serde(default)]
    pub database_path: Option<String>,

    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
        }
    }
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

fn default_seed_path() -> String {
    DEFAULT_SEED_PATH.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Seed file, relative to the base path
    #[serde(default = "default_seed_path")]
    pub seed_path: String,

    #[serde(default)]
    pub missing_embedding_policy: MissingEmbeddingPolicy,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed_path: default_seed_path(),
            missing_embedding_policy: MissingEmbeddingPolicy::default(),
            store: StoreConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

/// `DEXMATCH_BASE_PATH`, or `~/.local/share/dexmatch`.
pub fn default_base_path() -> anyhow::Result<PathBuf> {
    if let Ok(base_path) = std::env::var("DEXMATCH_BASE_PATH") {
        return Ok(PathBuf::from(base_path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/dexmatch"))
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.store.timeout_ms == 0 {
            bail!("store.timeout_ms must be greater than 0");
        }
        if self.seed_path.trim().is_empty() {
            bail!("seed_path must not be empty");
        }
        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults first.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let path = base_path.join(CONFIG_FILE);
        if !path.exists() {
            write_atomic(&path, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str =
            std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;
        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&default_base_path()?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        write_atomic(&self.base_path.join(CONFIG_FILE), config_str.as_bytes())
    }

    pub fn seed_path(&self) -> PathBuf {
        self.base_path.join(&self.seed_path)
    }

    /// Database file, `DEXMATCH_DATABASE` taking precedence over the config.
    pub fn database_path(&self) -> Option<PathBuf> {
        if let Ok(path) = std::env::var("DEXMATCH_DATABASE") {
            return Some(PathBuf::from(path));
        }
        self.store
            .database_path
            .as_ref()
            .map(|path| self.base_path.join(path))
    }

    pub fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            seed_path: self.seed_path(),
            store_timeout: Duration::from_millis(self.store.timeout_ms),
            missing_embedding_policy: self.missing_embedding_policy,
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(CONFIG_FILE);
    let temp_path = path.with_file_name(format!("{}-{file_name}", rusty_ulid::generate_ulid_string()));

    std::fs::write(&temp_path, data).with_context(|| format!("failed to write {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
