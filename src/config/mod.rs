// Layered configuration and handle resolution

pub mod loader;
pub mod merger;
pub mod secrets;

// Re-export main types
pub use loader::{
    AppConfig, ConfigLoader, DatastoreBackend, DatastoreConfig, GenerationConfig, ServerConfig,
    WorkflowConfig,
};
pub use merger::{ConfigMerger, PartialConfig};
pub use secrets::SecretsConfig;

use crate::datastore::{Datastore, FileDatastore, InMemoryDatastore, PostgrestDatastore};
use crate::generation::{GeminiClient, GenerationClient};
use crate::orchestrator::{ConsultationOrchestrator, WorkflowPolicy};
use crate::templates::PromptTemplates;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Load and merge configuration from all sources
/// Priority: CLI -> Project -> Global -> Defaults
pub fn load_merged_config(
    project_dir: Option<&Path>,
    cli_overrides: Option<PartialConfig>,
) -> Result<AppConfig> {
    let loader = match project_dir {
        Some(dir) => ConfigLoader::new().with_project_dir(dir),
        None => ConfigLoader::new(),
    };

    let global = loader.load_global()?;
    let project = loader.load_project()?;

    let config = ConfigMerger::new()
        .with_global(global)
        .with_project(project)
        .with_cli(cli_overrides)
        .merge();

    loader::validate_config(&config)?;
    Ok(config)
}

/// Ready-to-use handles built from configuration and secrets
pub struct ResolvedHandles {
    pub datastore: Arc<dyn Datastore>,
    pub generator: Arc<dyn GenerationClient>,
    pub policy: WorkflowPolicy,
    pub templates: PromptTemplates,
}

impl ResolvedHandles {
    /// Resolve every handle the orchestrator needs. Fails on the first
    /// missing credential instead of falling back.
    pub fn resolve(config: &AppConfig, secrets: &SecretsConfig) -> Result<Self> {
        Ok(Self {
            datastore: build_datastore(&config.datastore, secrets)?,
            generator: build_generator(&config.generation, secrets)?,
            policy: build_policy(config)?,
            templates: PromptTemplates::load(config.generation.templates_dir.as_deref())
                .context("Failed to compile prompt templates")?,
        })
    }

    pub fn into_orchestrator(self) -> ConsultationOrchestrator {
        ConsultationOrchestrator::with_templates(
            self.datastore,
            self.generator,
            self.policy,
            self.templates,
        )
    }
}

/// Build the configured datastore backend
pub fn build_datastore(
    config: &DatastoreConfig,
    secrets: &SecretsConfig,
) -> Result<Arc<dyn Datastore>> {
    let datastore: Arc<dyn Datastore> = match config.backend {
        DatastoreBackend::Memory => {
            log::warn!("Using the in-memory datastore; sessions are lost on exit");
            Arc::new(InMemoryDatastore::new())
        }
        DatastoreBackend::File => {
            let dir = match config.data_dir {
                Some(ref dir) => dir.clone(),
                None => default_data_dir()?,
            };
            log::info!("Storing sessions under {}", dir.display());
            Arc::new(FileDatastore::new(dir))
        }
        DatastoreBackend::Postgrest => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| anyhow!("datastore.url is required for the postgrest backend"))?;
            let key = secrets.require_postgrest_key()?;
            log::info!("Using PostgREST table '{}' at {}", config.table, url);
            Arc::new(
                PostgrestDatastore::new(
                    url,
                    key,
                    &config.table,
                    Duration::from_secs(config.request_timeout_secs),
                )
                .context("Failed to create PostgREST client")?,
            )
        }
    };
    Ok(datastore)
}

/// Build the Gemini client
pub fn build_generator(
    config: &GenerationConfig,
    secrets: &SecretsConfig,
) -> Result<Arc<dyn GenerationClient>> {
    let key = secrets.require_gemini_key()?;
    let client = GeminiClient::new(key)
        .with_model(&config.model)
        .with_base_url(&config.base_url)
        .with_timeout(Duration::from_secs(config.timeout_secs));
    log::info!("Using generation model {}", client.model());
    Ok(Arc::new(client))
}

/// Turn the `[workflow]` and `[generation]` sections into a validated policy
pub fn build_policy(config: &AppConfig) -> Result<WorkflowPolicy> {
    WorkflowPolicy::new(
        config.workflow.research_iterations,
        Duration::from_secs(config.generation.timeout_secs),
        config.workflow.persist_max_attempts,
        Duration::from_millis(config.workflow.persist_backoff_ms),
        config.workflow.on_persist_failure,
    )
    .map_err(|e| anyhow!("Invalid workflow configuration: {}", e))
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(loader::APP_DIR).join("data"))
        .ok_or_else(|| anyhow!("Could not determine home directory for the data dir"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_merged_config_reads_project_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(loader::PROJECT_CONFIG_FILE),
            "[server]\nport = 9000\n",
        )
        .unwrap();

        let config = load_merged_config(Some(temp_dir.path()), None).unwrap();
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_load_merged_config_rejects_invalid_values() {
        let temp_dir = TempDir::new().unwrap();
        let cli = PartialConfig {
            workflow: Some(merger::PartialWorkflowConfig {
                research_iterations: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(load_merged_config(Some(temp_dir.path()), Some(cli)).is_err());
    }

    #[test]
    fn test_resolve_requires_gemini_key() {
        let result = ResolvedHandles::resolve(&AppConfig::default(), &SecretsConfig::default());
        let err = result.err().unwrap().to_string();
        assert!(err.contains("Gemini API key"));
    }

    #[test]
    fn test_resolve_postgrest_requires_key() {
        let mut config = AppConfig::default();
        config.datastore.backend = DatastoreBackend::Postgrest;
        config.datastore.url = Some("https://abc.supabase.co".to_string());

        let result = build_datastore(&config.datastore, &SecretsConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_with_keys() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.datastore.backend = DatastoreBackend::File;
        config.datastore.data_dir = Some(temp_dir.path().to_path_buf());
        config.workflow.research_iterations = 3;

        let secrets = SecretsConfig {
            gemini_api_key: Some("gm-123".to_string()),
            postgrest_api_key: None,
        };

        let handles = ResolvedHandles::resolve(&config, &secrets).unwrap();
        assert_eq!(handles.policy.research_iterations(), 3);
        assert_eq!(handles.policy.generation_timeout(), Duration::from_secs(120));
    }
}
