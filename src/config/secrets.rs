// Storage for API keys
//
// Keys are stored in ~/.consult-agents/secrets.toml (global only, never in the
// project file). Environment variables take precedence over the file.

use crate::config::loader::APP_DIR;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const POSTGREST_API_KEY_ENV: &str = "POSTGREST_API_KEY";

/// Secrets stored in ~/.consult-agents/secrets.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SecretsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgrest_api_key: Option<String>,
}

impl SecretsConfig {
    /// Get the secrets file path (~/.consult-agents/secrets.toml)
    pub fn get_secrets_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(APP_DIR).join("secrets.toml"))
    }

    /// Load secrets from the default location
    pub fn load() -> Result<Self> {
        let path = Self::get_secrets_path()
            .ok_or_else(|| anyhow!("Could not determine home directory"))?;
        Self::load_from(&path)
    }

    /// Load secrets from `path`. A missing file yields empty secrets.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read secrets file '{}': {}", path.display(), e))?;

        toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse secrets file '{}': {}", path.display(), e))
    }

    /// Save secrets to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::get_secrets_path()
            .ok_or_else(|| anyhow!("Could not determine home directory"))?;
        self.save_to(&path)
    }

    /// Save secrets to `path` with owner-only permissions
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    anyhow!(
                        "Failed to create secrets directory '{}': {}",
                        parent.display(),
                        e
                    )
                })?;
            }
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize secrets: {}", e))?;

        fs::write(path, contents)
            .map_err(|e| anyhow!("Failed to write secrets file '{}': {}", path.display(), e))?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, permissions).map_err(|e| {
                anyhow!(
                    "Failed to set permissions on secrets file '{}': {}",
                    path.display(),
                    e
                )
            })?;
        }

        log::info!("Saved secrets to: {}", path.display());
        Ok(())
    }

    /// Overlay keys present in the environment
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = non_empty_env(GEMINI_API_KEY_ENV) {
            self.gemini_api_key = Some(key);
        }
        if let Some(key) = non_empty_env(POSTGREST_API_KEY_ENV) {
            self.postgrest_api_key = Some(key);
        }
        self
    }

    /// Gemini key, or an error naming where to put it
    pub fn require_gemini_key(&self) -> Result<&str> {
        self.gemini_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "Gemini API key not configured. Set {} or add gemini_api_key to ~/{}/secrets.toml",
                    GEMINI_API_KEY_ENV,
                    APP_DIR
                )
            })
    }

    /// PostgREST key, or an error naming where to put it
    pub fn require_postgrest_key(&self) -> Result<&str> {
        self.postgrest_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "PostgREST API key not configured. Set {} or add postgrest_api_key to ~/{}/secrets.toml",
                    POSTGREST_API_KEY_ENV,
                    APP_DIR
                )
            })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_secrets_config_default() {
        let config = SecretsConfig::default();
        assert!(config.gemini_api_key.is_none());
        assert!(config.require_gemini_key().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("secrets.toml");

        let config = SecretsConfig {
            gemini_api_key: Some("gm-123".to_string()),
            postgrest_api_key: None,
        };
        config.save_to(&path).unwrap();

        let loaded = SecretsConfig::load_from(&path).unwrap();
        assert_eq!(loaded.require_gemini_key().unwrap(), "gm-123");
        assert!(loaded.require_postgrest_key().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secrets.toml");
        SecretsConfig::default().save_to(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = SecretsConfig::load_from(&temp_dir.path().join("none.toml")).unwrap();
        assert_eq!(loaded, SecretsConfig::default());
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        let config = SecretsConfig {
            gemini_api_key: Some("  ".to_string()),
            postgrest_api_key: None,
        };
        assert!(config.require_gemini_key().is_err());
    }
}
