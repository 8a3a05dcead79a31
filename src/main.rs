use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, Level};

use tern_core::session::SessionStatus;
use tern_engine::tools::create_default_registry;
use tern_engine::{EngineError, Orchestrator, OrchestratorConfig};
use tern_llm::{ProviderConfig, ProviderFactory, RetryPolicy};
use tern_server::ServerConfig;
use tern_settings::TernSettings;
use tern_store::{SqliteStore, Store};
use tern_telemetry::{LogFormat, TelemetryConfig, TelemetryGuard};

#[derive(Parser)]
#[command(name = "tern", version, about = "Agent runtime: provider streams, tools, and live session events")]
struct Cli {
    /// Settings file. Defaults to ~/.tern/settings.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one turn in a new session, printing every event as a JSON line.
    Run {
        /// Project root for the session. Defaults to the current directory.
        #[arg(long)]
        project: Option<PathBuf>,
        prompt: String,
    },
    /// List stored sessions, newest first.
    Sessions {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => tern_settings::load_settings_from_path(path),
        None => tern_settings::load_settings(),
    }
    .context("loading settings")?;

    let _telemetry = init_telemetry(&settings)?;

    match cli.command {
        Command::Serve { host, port } => serve(settings, host, port).await,
        Command::Run { project, prompt } => run(settings, project, &prompt).await,
        Command::Sessions { status, limit } => sessions(settings, status, limit).await,
    }
}

fn init_telemetry(settings: &TernSettings) -> Result<TelemetryGuard> {
    let t = &settings.telemetry;
    let level = |s: &str| Level::from_str(s).map_err(|_| anyhow::anyhow!("unknown log level '{s}'"));
    let module_levels = t
        .modules
        .iter()
        .map(|(module, lvl)| -> Result<(String, Level)> { Ok((module.clone(), level(lvl)?)) })
        .collect::<Result<Vec<_>>>()?;
    let config = TelemetryConfig {
        log_level: level(&t.level)?,
        module_levels,
        format: match t.format {
            tern_settings::LogFormat::Json => LogFormat::Json,
            tern_settings::LogFormat::Text => LogFormat::Text,
        },
        log_db_path: t.persist_logs.then(|| PathBuf::from(&t.log_db_path)),
    };
    Ok(tern_telemetry::init_telemetry(config)?)
}

fn open_store(settings: &TernSettings) -> Result<Arc<dyn Store>> {
    let store = if settings.database_path == ":memory:" {
        SqliteStore::in_memory()
    } else {
        SqliteStore::open(Path::new(&settings.database_path))
    }
    .with_context(|| format!("opening database {}", settings.database_path))?;
    Ok(Arc::new(store))
}

fn orchestrator_config(settings: &TernSettings) -> OrchestratorConfig {
    let o = &settings.orchestrator;
    OrchestratorConfig {
        max_rounds: o.max_rounds,
        tool_concurrency: o.tool_concurrency,
        tool_timeout: Duration::from_millis(o.tool_timeout_ms),
        provider_timeout: Duration::from_millis(o.provider_timeout_ms),
        retry: RetryPolicy {
            max_retries: o.max_retries,
            base_delay: Duration::from_millis(o.retry_base_delay_ms),
            max_delay: Duration::from_millis(o.retry_max_delay_ms),
            ..RetryPolicy::default()
        },
        subscriber_capacity: o.subscriber_capacity,
        max_tool_output_bytes: o.max_tool_output_bytes,
        trace_deltas: o.trace_deltas,
        tool_env: o.tool_env.clone().into_iter().collect(),
    }
}

fn build_orchestrator(settings: &TernSettings) -> Result<Arc<Orchestrator>> {
    let provider = ProviderFactory::with_defaults()
        .build(&ProviderConfig {
            name: settings.provider.name.clone(),
            script_path: settings.provider.script_path.as_ref().map(PathBuf::from),
        })
        .with_context(|| format!("building provider '{}'", settings.provider.name))?;
    Ok(Arc::new(Orchestrator::new(
        open_store(settings)?,
        provider,
        Arc::new(create_default_registry()),
        orchestrator_config(settings),
    )))
}

async fn serve(settings: TernSettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let orchestrator = build_orchestrator(&settings)?;
    let s = &settings.server;
    let config = ServerConfig {
        host: host.unwrap_or_else(|| s.host.clone()),
        port: port.unwrap_or(s.port),
        heartbeat_interval_secs: s.heartbeat_interval_secs,
        request_timeout_secs: s.request_timeout_secs,
        shutdown_timeout_secs: s.shutdown_timeout_secs,
    };

    let handle = tern_server::start(config, orchestrator.clone())
        .await
        .context("starting server")?;
    info!(url = %handle.url(), provider = %settings.provider.name, "tern server ready");

    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("shutting down");
    let cancelled = orchestrator.cancel_all();
    handle.shutdown().await;
    info!(cancelled, "server stopped");
    Ok(())
}

async fn run(settings: TernSettings, project: Option<PathBuf>, prompt: &str) -> Result<()> {
    let root = match project {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("project root {}", root.display()))?;

    let orchestrator = build_orchestrator(&settings)?;
    let session = orchestrator.create_session(&root).await?;
    let mut events = orchestrator.subscribe(&session.id);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "unprintable event"),
            }
        }
    });

    let ctrl_c = {
        let orchestrator = orchestrator.clone();
        let session_id = session.id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel(&session_id);
            }
        })
    };

    let result = orchestrator.run_turn(&session.id, prompt).await;
    ctrl_c.abort();
    orchestrator.bus().close(&session.id);
    let _ = printer.await;

    match result {
        Ok(outcome) => {
            info!(session_id = %outcome.session_id, status = ?outcome.status, rounds = outcome.rounds, "turn done");
            Ok(())
        }
        Err(EngineError::Cancelled) => bail!("turn cancelled"),
        Err(e) => Err(e.into()),
    }
}

async fn sessions(settings: TernSettings, status: Option<String>, limit: u32) -> Result<()> {
    let status = status
        .map(|s| SessionStatus::parse(&s).with_context(|| format!("unknown status '{s}'")))
        .transpose()?;
    let store = open_store(&settings)?;
    for session in store.list_sessions(status, limit, 0).await? {
        println!("{}", serde_json::to_string(&session)?);
    }
    Ok(())
}
