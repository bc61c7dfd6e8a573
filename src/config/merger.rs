// Configuration merging with priority

use crate::config::loader::{AppConfig, DatastoreBackend};
use crate::orchestrator::policy::PersistFailureAction;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Partial configuration for merging
/// Uses Option<T> for all fields so a layer only overrides what it sets
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialConfig {
    #[serde(default)]
    pub server: Option<PartialServerConfig>,
    #[serde(default)]
    pub generation: Option<PartialGenerationConfig>,
    #[serde(default)]
    pub datastore: Option<PartialDatastoreConfig>,
    #[serde(default)]
    pub workflow: Option<PartialWorkflowConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialServerConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialGenerationConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub templates_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialDatastoreConfig {
    pub backend: Option<DatastoreBackend>,
    pub data_dir: Option<PathBuf>,
    pub url: Option<String>,
    pub table: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PartialWorkflowConfig {
    pub research_iterations: Option<u32>,
    pub persist_max_attempts: Option<u32>,
    pub persist_backoff_ms: Option<u64>,
    pub on_persist_failure: Option<PersistFailureAction>,
}

/// Configuration merger
/// Priority order: CLI -> Project -> Global -> Defaults
pub struct ConfigMerger {
    defaults: AppConfig,
    global: Option<PartialConfig>,
    project: Option<PartialConfig>,
    cli: Option<PartialConfig>,
}

impl ConfigMerger {
    /// Create a new config merger with defaults
    pub fn new() -> Self {
        Self {
            defaults: AppConfig::default(),
            global: None,
            project: None,
            cli: None,
        }
    }

    /// Set global config
    pub fn with_global(mut self, config: Option<PartialConfig>) -> Self {
        self.global = config;
        self
    }

    /// Set project config
    pub fn with_project(mut self, config: Option<PartialConfig>) -> Self {
        self.project = config;
        self
    }

    /// Set CLI overrides
    pub fn with_cli(mut self, config: Option<PartialConfig>) -> Self {
        self.cli = config;
        self
    }

    /// Merge all layers, lowest priority first
    pub fn merge(&self) -> AppConfig {
        let mut result = self.defaults.clone();

        for layer in [&self.global, &self.project, &self.cli].into_iter().flatten() {
            apply_partial(&mut result, layer);
        }

        result
    }
}

impl Default for ConfigMerger {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_partial(config: &mut AppConfig, partial: &PartialConfig) {
    if let Some(ref server) = partial.server {
        if let Some(port) = server.port {
            config.server.port = port;
        }
        if let Some(ref bind) = server.bind {
            config.server.bind = bind.clone();
        }
        if let Some(ref origins) = server.cors_origins {
            config.server.cors_origins = origins.clone();
        }
    }

    if let Some(ref generation) = partial.generation {
        if let Some(ref model) = generation.model {
            config.generation.model = model.clone();
        }
        if let Some(ref base_url) = generation.base_url {
            config.generation.base_url = base_url.clone();
        }
        if let Some(timeout) = generation.timeout_secs {
            config.generation.timeout_secs = timeout;
        }
        if let Some(ref dir) = generation.templates_dir {
            config.generation.templates_dir = Some(dir.clone());
        }
    }

    if let Some(ref datastore) = partial.datastore {
        if let Some(backend) = datastore.backend {
            config.datastore.backend = backend;
        }
        if let Some(ref dir) = datastore.data_dir {
            config.datastore.data_dir = Some(dir.clone());
        }
        if let Some(ref url) = datastore.url {
            config.datastore.url = Some(url.clone());
        }
        if let Some(ref table) = datastore.table {
            config.datastore.table = table.clone();
        }
        if let Some(timeout) = datastore.request_timeout_secs {
            config.datastore.request_timeout_secs = timeout;
        }
    }

    if let Some(ref workflow) = partial.workflow {
        if let Some(iterations) = workflow.research_iterations {
            config.workflow.research_iterations = iterations;
        }
        if let Some(attempts) = workflow.persist_max_attempts {
            config.workflow.persist_max_attempts = attempts;
        }
        if let Some(backoff) = workflow.persist_backoff_ms {
            config.workflow.persist_backoff_ms = backoff;
        }
        if let Some(action) = workflow.on_persist_failure {
            config.workflow.on_persist_failure = action;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow_layer(iterations: u32) -> PartialConfig {
        PartialConfig {
            workflow: Some(PartialWorkflowConfig {
                research_iterations: Some(iterations),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_defaults_only() {
        assert_eq!(ConfigMerger::new().merge(), AppConfig::default());
    }

    #[test]
    fn test_priority_cli_over_project_over_global() {
        let merged = ConfigMerger::new()
            .with_global(Some(workflow_layer(3)))
            .with_project(Some(workflow_layer(4)))
            .with_cli(Some(workflow_layer(5)))
            .merge();
        assert_eq!(merged.workflow.research_iterations, 5);

        let merged = ConfigMerger::new()
            .with_global(Some(workflow_layer(3)))
            .with_project(Some(workflow_layer(4)))
            .merge();
        assert_eq!(merged.workflow.research_iterations, 4);
    }

    #[test]
    fn test_unset_fields_fall_through() {
        let global = PartialConfig {
            server: Some(PartialServerConfig {
                port: Some(8080),
                ..Default::default()
            }),
            ..Default::default()
        };
        let project = PartialConfig {
            server: Some(PartialServerConfig {
                bind: Some("0.0.0.0".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = ConfigMerger::new()
            .with_global(Some(global))
            .with_project(Some(project))
            .merge();
        assert_eq!(merged.server.port, 8080);
        assert_eq!(merged.server.bind, "0.0.0.0");
    }

    #[test]
    fn test_partial_parses_from_toml() {
        let partial: PartialConfig = toml::from_str(
            r#"
            [datastore]
            backend = "file"
            data_dir = "/tmp/consult"
            "#,
        )
        .unwrap();

        let merged = ConfigMerger::new().with_project(Some(partial)).merge();
        assert_eq!(merged.datastore.backend, DatastoreBackend::File);
        assert_eq!(merged.datastore.data_dir, Some(PathBuf::from("/tmp/consult")));
        assert_eq!(merged.datastore.table, "sessions");
    }
}
