//! # Configuration Module
//!
//! Data directory layout and the tunables file.
//!
//! ## Data Storage
//!
//! Everything lives under the platform-standard data directory:
//! - Linux: `~/.local/share/playlist-rl/`
//! - macOS: `~/Library/Application Support/playlist-rl/`
//! - Windows: `%APPDATA%\playlist-rl\`
//!
//! holding `playlists.db` (catalog and training history), `embeddings.txt`
//! and `models/dqn_model.json`.
//!
//! ## Tunables
//!
//! [`AppConfig`] is read from a JSON file (`--config`). Every field has a
//! default, so a file only needs the values it changes:
//!
//! ```json
//! { "reward_preset": "diversity_focused", "training": { "episodes": 200 } }
//! ```

use crate::agent::AgentConfig;
use crate::environment::EnvironmentConfig;
use crate::features::FeatureExtractor;
use crate::generator::SessionSettings;
use crate::reward::{RewardConfig, RewardPreset};
use crate::trainer::TrainingConfig;
use anyhow::{Context, Result};
use log::debug;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "playlist-rl";

/// Returns the platform-appropriate data directory, creating it if needed.
///
/// # Errors
///
/// Fails when the system data directory cannot be determined or the
/// `playlist-rl` subdirectory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Default database location, `<data dir>/playlists.db`.
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("playlists.db"))
}

/// Resolve a user-supplied path against the current directory.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("Cannot resolve path {}", path.display()))?
        .into_owned())
}

/// File locations for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub db_path: PathBuf,
    pub embeddings_path: PathBuf,
    pub model_path: PathBuf,
}

impl RuntimeConfig {
    /// Standard locations under the data directory.
    pub fn new() -> Result<Self> {
        Ok(Self::in_dir(&get_data_dir()?))
    }

    /// All files under `dir`; used for tests and portable setups.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            db_path: dir.join("playlists.db"),
            embeddings_path: dir.join("embeddings.txt"),
            model_path: dir.join("models").join("dqn_model.json"),
        }
    }

    /// Replace the database location with an absolutized `db_path`.
    pub fn with_db_path(mut self, db_path: &Path) -> Result<Self> {
        self.db_path = absolute(db_path)?;
        Ok(self)
    }
}

/// Every tunable of the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub features: FeatureExtractor,
    pub reward_preset: RewardPreset,
    /// Full reward configuration; overrides `reward_preset` when present.
    pub reward: Option<RewardConfig>,
    pub environment: EnvironmentConfig,
    pub agent: AgentConfig,
    pub training: TrainingConfig,
    /// Keep only the newest songs; all songs when absent.
    pub catalog_limit: Option<usize>,
    /// Dimension of embeddings read from disk. Defaults to the feature
    /// dimension, which is what `embed` writes.
    pub embedding_dimension: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            features: FeatureExtractor::default(),
            reward_preset: RewardPreset::default(),
            reward: None,
            environment: EnvironmentConfig::default(),
            agent: AgentConfig::default(),
            training: TrainingConfig::default(),
            catalog_limit: Some(10_000),
            embedding_dimension: None,
        }
    }
}

impl AppConfig {
    pub fn reward_config(&self) -> RewardConfig {
        self.reward
            .clone()
            .unwrap_or_else(|| RewardConfig::preset(self.reward_preset))
    }

    pub fn embedding_dimension(&self) -> usize {
        self.embedding_dimension
            .unwrap_or_else(|| self.features.dimension())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            features: self.features,
            reward: self.reward_config(),
            environment: self.environment,
            agent: self.agent.clone(),
            training: self.training.clone(),
        }
    }
}

/// Read the configuration file, or defaults when `path` is `None` or the
/// file does not exist.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let Some(path) = path else {
        return Ok(AppConfig::default());
    };

    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config file {}", path.display()))?;

    config
        .reward_config()
        .validate()
        .context("Invalid reward configuration")?;
    config
        .agent
        .validate()
        .context("Invalid agent configuration")?;

    debug!("Loaded config from {}", path.display());
    Ok(config)
}
