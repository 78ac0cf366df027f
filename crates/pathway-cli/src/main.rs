use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pathway_core::app::{render_line, App, AppBuilder, PollScheduler, TaskCounts};
use pathway_core::domain::{CreateRequest, TaskId, TaskKind};
use pathway_core::impls::{HttpApiClient, InMemoryTaskService, ScriptStep};
use pathway_core::PathwayConfig;

/// Create knowledge graphs and follow their background tasks.
#[derive(Debug, Parser)]
#[command(name = "pathway", version, about)]
struct Cli {
    /// JSON config file (`{"client": {...}, "poller": {...}}`).
    #[arg(long, env = "PATHWAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Backend base URL.
    #[arg(long, env = "PATHWAY_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Milliseconds between status checks.
    #[arg(long, env = "PATHWAY_POLL_INTERVAL_MS", global = true)]
    poll_interval_ms: Option<u64>,

    /// Status checks per task before it is failed as timed out.
    #[arg(long, env = "PATHWAY_MAX_ATTEMPTS", global = true)]
    max_attempts: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a top-level graph for a keyword and wait for it.
    CreateL1 { keyword: String },

    /// Create a second-level graph under an existing graph and wait for it.
    CreateL2 {
        keyword: String,

        #[arg(long)]
        parent: String,
    },

    /// Follow tasks created elsewhere.
    Watch {
        #[arg(required = true)]
        task_ids: Vec<String>,
    },

    /// Run against a scripted in-process backend.
    Demo,
}

impl Cli {
    fn load_config(&self) -> Result<PathwayConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                PathwayConfig::from_json(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => PathwayConfig::default(),
        };

        // フラグ / 環境変数 > ファイル > デフォルト
        if let Some(base_url) = &self.base_url {
            config.client.base_url = base_url.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_attempts {
            config.poller.max_attempts = max;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pathway=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = cli.load_config()?;

    match cli.command {
        Command::CreateL1 { keyword } => {
            let app = http_app(&config)?;
            let scheduler = app.start_polling();
            app.launcher.launch(CreateRequest::l1(keyword)).await?;
            require_success(watch_until_done(&app, scheduler).await)
        }
        Command::CreateL2 { keyword, parent } => {
            let app = http_app(&config)?;
            let scheduler = app.start_polling();
            app.launcher
                .launch(CreateRequest::l2(keyword, parent))
                .await?;
            require_success(watch_until_done(&app, scheduler).await)
        }
        Command::Watch { task_ids } => {
            let app = http_app(&config)?;
            let scheduler = app.start_polling();
            for id in task_ids {
                app.launcher
                    .track(TaskId::new(id.clone()), TaskKind::L1GraphCreation, id)
                    .await?;
            }
            require_success(watch_until_done(&app, scheduler).await)
        }
        Command::Demo => {
            if cli.poll_interval_ms.is_none() && cli.config.is_none() {
                config.poller.poll_interval = Duration::from_millis(500);
            }
            run_demo(&config).await
        }
    }
}

fn http_app(config: &PathwayConfig) -> Result<App> {
    let client = Arc::new(HttpApiClient::new(&config.client)?);
    info!(base_url = client.base_url(), "using backend");
    let app = AppBuilder::new(client.clone(), client)
        .poller_config(config.poller.clone())
        .build()?;
    Ok(app)
}

async fn run_demo(config: &PathwayConfig) -> Result<()> {
    let service = Arc::new(InMemoryTaskService::with_system_ids());
    service.set_latency(Some(Duration::from_millis(50))).await;
    service
        .set_default_script([
            ScriptStep::running(),
            ScriptStep::Unavailable("connection reset by peer".into()),
            ScriptStep::running(),
            ScriptStep::completed(
                Some("graph ready"),
                Some(serde_json::json!({"graph_id": "g-demo-1"})),
            ),
        ])
        .await;

    let app = AppBuilder::new(service.clone(), service.clone())
        .poller_config(config.poller.clone())
        .build()?;
    let scheduler = app.start_polling();

    app.launcher.launch(CreateRequest::l1("rust")).await?;
    let doomed = app
        .launcher
        .launch(CreateRequest::l2("ownership", "g-demo-1"))
        .await?;
    service
        .script(
            &doomed,
            [ScriptStep::running(), ScriptStep::failed("keyword too broad")],
        )
        .await;

    service.reject_creations(Some("graph already exists")).await;
    if let Err(e) = app.launcher.launch(CreateRequest::l1("rust")).await {
        warn!(error = %e, "second creation refused");
    }

    watch_until_done(&app, scheduler).await;
    Ok(())
}

/// Print the task list on every registry change until nothing is processing.
async fn watch_until_done(app: &App, scheduler: PollScheduler) -> TaskCounts {
    let mut changes = app.registry.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    print_views(app).await;
    while !app.monitor.all_terminal().await {
        tokio::select! {
            res = changes.changed() => {
                if res.is_err() {
                    break;
                }
                print_views(app).await;
            }
            _ = &mut ctrl_c => {
                warn!("interrupted, stopping");
                break;
            }
        }
    }
    scheduler.shutdown_and_join().await;

    let counts = app.monitor.counts().await;
    info!(
        completed = counts.completed,
        failed = counts.failed,
        processing = counts.processing,
        "done"
    );
    counts
}

fn require_success(counts: TaskCounts) -> Result<()> {
    if counts.failed > 0 {
        anyhow::bail!("{} of {} task(s) failed", counts.failed, counts.total());
    }
    if counts.processing > 0 {
        anyhow::bail!("stopped with {} task(s) still processing", counts.processing);
    }
    Ok(())
}

async fn print_views(app: &App) {
    println!("--");
    for view in app.monitor.views().await {
        println!("{}", render_line(&view));
    }
}
