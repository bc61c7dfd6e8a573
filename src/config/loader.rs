// Configuration file loading

use crate::config::merger::PartialConfig;
use crate::orchestrator::policy::{
    PersistFailureAction, DEFAULT_GENERATION_TIMEOUT_SECS, DEFAULT_PERSIST_BACKOFF_MS,
    DEFAULT_PERSIST_MAX_ATTEMPTS, DEFAULT_RESEARCH_ITERATIONS, RESEARCH_ITERATIONS_RANGE,
};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Project-level config file name, looked up in the working directory
pub const PROJECT_CONFIG_FILE: &str = "consult-agents.toml";
/// Directory under the home directory holding global config and secrets
pub const APP_DIR: &str = ".consult-agents";

/// Full application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed browser origins; empty allows localhost only
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_port() -> u16 { 3430 }
fn default_bind() -> String { "127.0.0.1".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

/// Generation service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory with `research_prompt.tera` / `synthesis_prompt.tera` overrides
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
}

fn default_model() -> String { crate::generation::gemini::DEFAULT_MODEL.to_string() }
fn default_base_url() -> String { crate::generation::gemini::DEFAULT_BASE_URL.to_string() }
fn default_timeout_secs() -> u64 { DEFAULT_GENERATION_TIMEOUT_SECS }

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            templates_dir: None,
        }
    }
}

/// Which datastore backend holds sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreBackend {
    #[default]
    Memory,
    File,
    Postgrest,
}

impl fmt::Display for DatastoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatastoreBackend::Memory => write!(f, "memory"),
            DatastoreBackend::File => write!(f, "file"),
            DatastoreBackend::Postgrest => write!(f, "postgrest"),
        }
    }
}

impl std::str::FromStr for DatastoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(DatastoreBackend::Memory),
            "file" => Ok(DatastoreBackend::File),
            "postgrest" | "supabase" => Ok(DatastoreBackend::Postgrest),
            other => Err(format!(
                "Unknown datastore backend '{}'. Expected memory, file or postgrest",
                other
            )),
        }
    }
}

/// Datastore settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatastoreConfig {
    #[serde(default)]
    pub backend: DatastoreBackend,
    /// Root directory of the file backend (default `~/.consult-agents/data`)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Base URL of the PostgREST/Supabase project
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_table() -> String { "sessions".to_string() }
fn default_request_timeout_secs() -> u64 { 30 }

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            backend: DatastoreBackend::default(),
            data_dir: None,
            url: None,
            table: default_table(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Workflow settings, turned into a `WorkflowPolicy`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    #[serde(default = "default_research_iterations")]
    pub research_iterations: u32,
    #[serde(default = "default_persist_max_attempts")]
    pub persist_max_attempts: u32,
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
    #[serde(default)]
    pub on_persist_failure: PersistFailureAction,
}

fn default_research_iterations() -> u32 { DEFAULT_RESEARCH_ITERATIONS }
fn default_persist_max_attempts() -> u32 { DEFAULT_PERSIST_MAX_ATTEMPTS }
fn default_persist_backoff_ms() -> u64 { DEFAULT_PERSIST_BACKOFF_MS }

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            research_iterations: default_research_iterations(),
            persist_max_attempts: default_persist_max_attempts(),
            persist_backoff_ms: default_persist_backoff_ms(),
            on_persist_failure: PersistFailureAction::default(),
        }
    }
}

/// Validate config values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if !RESEARCH_ITERATIONS_RANGE.contains(&config.workflow.research_iterations) {
        return Err(anyhow!(
            "research_iterations must be between {} and {}",
            RESEARCH_ITERATIONS_RANGE.start(),
            RESEARCH_ITERATIONS_RANGE.end()
        ));
    }

    if config.workflow.persist_max_attempts == 0 {
        return Err(anyhow!("persist_max_attempts must be greater than 0"));
    }

    if config.generation.timeout_secs == 0 {
        return Err(anyhow!("generation timeout_secs must be greater than 0"));
    }

    if config.datastore.backend == DatastoreBackend::Postgrest && config.datastore.url.is_none() {
        return Err(anyhow!("datastore.url is required for the postgrest backend"));
    }

    Ok(())
}

/// Config loader
pub struct ConfigLoader {
    /// Global config path
    global_path: Option<PathBuf>,
    /// Project config path
    project_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a loader for `~/.consult-agents/config.toml` and
    /// `./consult-agents.toml`
    pub fn new() -> Self {
        Self {
            global_path: Self::get_global_config_path(),
            project_path: Some(PathBuf::from(PROJECT_CONFIG_FILE)),
        }
    }

    /// Look for the project file in `dir` instead of the working directory
    pub fn with_project_dir(mut self, dir: &Path) -> Self {
        self.project_path = Some(dir.join(PROJECT_CONFIG_FILE));
        self
    }

    /// Use an explicit global config file
    pub fn with_global_path(mut self, path: Option<PathBuf>) -> Self {
        self.global_path = path;
        self
    }

    /// Get the global config path
    fn get_global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(APP_DIR).join("config.toml"))
    }

    /// Load global config
    pub fn load_global(&self) -> Result<Option<PartialConfig>> {
        match self.global_path {
            Some(ref path) => self.load_from_path(path),
            None => Ok(None),
        }
    }

    /// Load project config
    pub fn load_project(&self) -> Result<Option<PartialConfig>> {
        match self.project_path {
            Some(ref path) => self.load_from_path(path),
            None => Ok(None),
        }
    }

    /// Load a config layer from a specific path. Missing files are not an error.
    pub fn load_from_path(&self, path: &Path) -> Result<Option<PartialConfig>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: PartialConfig = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;

        log::debug!("Loaded config layer from {}", path.display());
        Ok(Some(config))
    }

    /// Get the global config path
    pub fn global_config_path(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Get the project config path
    pub fn project_config_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3430);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.generation.model, "gemini-2.5-flash");
        assert_eq!(config.generation.timeout_secs, 120);
        assert_eq!(config.datastore.backend, DatastoreBackend::Memory);
        assert_eq!(config.datastore.table, "sessions");
        assert_eq!(config.workflow.research_iterations, 2);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_full_config_parses_with_missing_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [workflow]
            research_iterations = 4
            on_persist_failure = "continue"
            "#,
        )
        .unwrap();

        assert_eq!(config.workflow.research_iterations, 4);
        assert_eq!(
            config.workflow.on_persist_failure,
            PersistFailureAction::Continue
        );
        assert_eq!(config.workflow.persist_max_attempts, 3);
        assert_eq!(config.server.port, 3430);
    }

    #[test]
    fn test_validation_rejects_out_of_range_iterations() {
        let mut config = AppConfig::default();
        config.workflow.research_iterations = 11;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_postgrest_requires_url() {
        let mut config = AppConfig::default();
        config.datastore.backend = DatastoreBackend::Postgrest;
        assert!(validate_config(&config).is_err());

        config.datastore.url = Some("https://abc.supabase.co".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(
            "Supabase".parse::<DatastoreBackend>().unwrap(),
            DatastoreBackend::Postgrest
        );
        assert!("sqlite".parse::<DatastoreBackend>().is_err());
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_global_path(None);
        assert!(loader.load_project().unwrap().is_none());
        assert!(loader.load_global().unwrap().is_none());
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(PROJECT_CONFIG_FILE), "[server\nport = ").unwrap();

        let loader = ConfigLoader::new().with_project_dir(temp_dir.path());
        assert!(loader.load_project().is_err());
    }
}
