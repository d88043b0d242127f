//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::task::AccountId;
use crate::{Error, Result};

/// An account the engine should activate, with its protocol family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBinding {
    /// Account id.
    pub id: AccountId,
    /// Account type, e.g. `imap`, `gmail` or `pop3`.
    pub account_type: String,
}

/// Settings for the task engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Task state database; `None` uses the per-user data directory.
    pub database_path: Option<PathBuf>,
    /// Namespaces the overlay manager serves.
    pub overlay_namespaces: Vec<String>,
    /// Capacity of the overlay update broadcast channel.
    pub overlay_channel_capacity: usize,
    /// Accounts to activate.
    pub accounts: Vec<AccountBinding>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            overlay_namespaces: ["accounts", "folders", "conversations", "messages"]
                .into_iter()
                .map(String::from)
                .collect(),
            overlay_channel_capacity: 64,
            accounts: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("maildelta")
            .join("engine.json")
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        info!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Self::default());
        }
        Self::load(&path).await
    }

    /// Save configuration as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;
        info!("Engine config saved to {:?}", path);
        Ok(())
    }

    /// Resolved database path.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("maildelta")
                .join("tasks.db")
        })
    }

    fn validate(&self) -> Result<()> {
        if self.overlay_channel_capacity == 0 {
            return Err(Error::Config(
                "overlay_channel_capacity must be at least 1".to_string(),
            ));
        }
        if let Some(binding) = self.accounts.iter().find(|a| a.account_type.is_empty()) {
            return Err(Error::Config(format!(
                "account {} has no account_type",
                binding.id
            )));
        }
        Ok(())
    }
}
