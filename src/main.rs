use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use consult_agents_lib::config::merger::{
    PartialDatastoreConfig, PartialGenerationConfig, PartialServerConfig, PartialWorkflowConfig,
};
use consult_agents_lib::config::{
    load_merged_config, DatastoreBackend, PartialConfig, ResolvedHandles, SecretsConfig,
};
use consult_agents_lib::orchestrator::{ConsultationOrchestrator, PersistFailureAction};
use consult_agents_lib::realtime::SessionView;
use consult_agents_lib::server::{self, generate_auth_token, ServerAppState};
use consult_agents_lib::shutdown::{register_signal_handlers, ShutdownState};
use std::path::PathBuf;
use std::sync::Arc;

/// Consult Agents - two-agent business consulting: research, then an executive report
#[derive(Parser, Debug)]
#[command(name = "consult-agents")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP/WebSocket server
    Serve {
        /// Port to bind the server to
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind the server to
        #[arg(long)]
        bind: Option<String>,

        /// Fixed auth token (or set CONSULT_SERVER_TOKEN env var)
        /// If not provided, a random token is generated on each startup
        #[arg(long, env = "CONSULT_SERVER_TOKEN")]
        token: Option<String>,

        /// Allowed CORS origin (repeatable). Any origin when omitted.
        #[arg(long = "cors-origin")]
        cors_origins: Vec<String>,
    },

    /// Run one consultation and print the final report to stdout
    Consult {
        /// Company or topic to analyse
        #[arg(required = true, num_args = 1..)]
        topic: Vec<String>,

        /// Owner of the new session. A random id is used when omitted.
        #[arg(long)]
        user_id: Option<String>,
    },
}

/// Command-line overrides, highest priority configuration layer
#[derive(Args, Debug, Default)]
struct ConfigOverrides {
    /// Directory holding consult-agents.toml (defaults to the current directory)
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Datastore backend: memory, file or postgrest
    #[arg(long, global = true)]
    backend: Option<DatastoreBackend>,

    /// Directory for the file backend
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Base URL of the PostgREST backend
    #[arg(long, global = true)]
    datastore_url: Option<String>,

    /// Gemini model name
    #[arg(long, global = true)]
    model: Option<String>,

    /// Seconds to wait for one generation call
    #[arg(long, global = true)]
    generation_timeout: Option<u64>,

    /// Directory with research_prompt.tera / synthesis_prompt.tera overrides
    #[arg(long, global = true)]
    templates_dir: Option<PathBuf>,

    /// Number of research iterations per consultation
    #[arg(long, global = true)]
    research_iterations: Option<u32>,

    /// What to do when an update cannot be persisted: abort or continue
    #[arg(long, global = true)]
    on_persist_failure: Option<PersistFailureAction>,
}

impl ConfigOverrides {
    fn into_partial(self, server: Option<PartialServerConfig>) -> PartialConfig {
        PartialConfig {
            server,
            generation: Some(PartialGenerationConfig {
                model: self.model,
                base_url: None,
                timeout_secs: self.generation_timeout,
                templates_dir: self.templates_dir,
            }),
            datastore: Some(PartialDatastoreConfig {
                backend: self.backend,
                data_dir: self.data_dir,
                url: self.datastore_url,
                table: None,
                request_timeout_secs: None,
            }),
            workflow: Some(PartialWorkflowConfig {
                research_iterations: self.research_iterations,
                persist_max_attempts: None,
                persist_backoff_ms: None,
                on_persist_failure: self.on_persist_failure,
            }),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let project_dir = cli.overrides.project_dir.clone();

    match cli.command {
        Command::Serve {
            port,
            bind,
            token,
            cors_origins,
        } => {
            let server_overrides = PartialServerConfig {
                port,
                bind,
                cors_origins: (!cors_origins.is_empty()).then_some(cors_origins),
            };
            let overrides = cli.overrides.into_partial(Some(server_overrides));
            let config = load_merged_config(project_dir.as_deref(), Some(overrides))?;
            let orchestrator = build_orchestrator(&config)?;

            runtime.block_on(run_server_mode(config, orchestrator, token))
        }
        Command::Consult { topic, user_id } => {
            let overrides = cli.overrides.into_partial(None);
            let config = load_merged_config(project_dir.as_deref(), Some(overrides))?;
            let orchestrator = build_orchestrator(&config)?;

            runtime.block_on(run_consult_mode(orchestrator, topic.join(" "), user_id))
        }
    }
}

fn build_orchestrator(
    config: &consult_agents_lib::config::AppConfig,
) -> Result<Arc<ConsultationOrchestrator>> {
    let secrets = SecretsConfig::load()?.with_env_overrides();
    let handles = ResolvedHandles::resolve(config, &secrets)?;
    log::info!(
        "Using {} datastore, {} research iteration(s)",
        config.datastore.backend,
        handles.policy.research_iterations()
    );
    Ok(Arc::new(handles.into_orchestrator()))
}

async fn run_server_mode(
    config: consult_agents_lib::config::AppConfig,
    orchestrator: Arc<ConsultationOrchestrator>,
    token: Option<String>,
) -> Result<()> {
    let shutdown_state = ShutdownState::new();
    if let Err(e) = register_signal_handlers(shutdown_state.clone()) {
        log::warn!("Failed to register signal handlers: {}", e);
    }

    // Use provided token or generate a random one
    let auth_token = token.unwrap_or_else(generate_auth_token);
    let state = ServerAppState::new(auth_token, orchestrator, shutdown_state);

    let cors_origins = Some(config.server.cors_origins.clone());
    server::run_server(config.server.port, &config.server.bind, state, cors_origins)
        .await
        .map_err(anyhow::Error::msg)
}

async fn run_consult_mode(
    orchestrator: Arc<ConsultationOrchestrator>,
    topic: String,
    user_id: Option<String>,
) -> Result<()> {
    let session = orchestrator
        .create_session(user_id.as_deref())
        .await
        .context("Failed to create session")?;
    log::info!("Created session {}", session.id);

    let mut view = SessionView::attach(orchestrator.datastore().as_ref(), &session.id).await?;
    let prepared = orchestrator.prepare(&session.id, &topic).await?;
    let run = tokio::spawn(prepared.run());

    let progress = tokio::spawn(async move {
        let mut last_state = view.snapshot().current_state;
        let mut last_findings = 0;
        while let Some(session) = view.changed().await {
            if session.current_state != last_state {
                last_state = session.current_state;
                log::info!("{}", last_state.display_name());
            }
            if session.research_results.len() > last_findings {
                last_findings = session.research_results.len();
                log::info!("Pedro recorded finding #{}", last_findings);
            }
            if session.is_finished() {
                break;
            }
        }
    });

    let outcome = run.await.context("Consultation task failed")??;
    progress.abort();

    if outcome.persist_failures > 0 {
        log::warn!(
            "{} update(s) could not be persisted for session {}",
            outcome.persist_failures,
            outcome.session.id
        );
    }

    println!("{}", outcome.session.report_final);
    Ok(())
}
