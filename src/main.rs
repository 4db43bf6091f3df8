use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use osf_archiver::core::{NewArchiveJob, Orchestrator, User, create_signals};
use osf_archiver::{adapters, config, context, db, logging, web};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "osf-archiver")]
#[command(about = "Archives the storage addons of new registrations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    simulation: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the archive worker and HTTP API
    Serve(ServeArgs),
    /// Print one archive job
    Status { job_id: String },
    /// Record an archive job and run it to completion
    Create(CreateArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize, Default)]
struct ServeArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    http_bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    max_archive_size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(skip)]
    simulation: Option<bool>,
}

#[derive(Args)]
struct CreateArgs {
    /// Node being registered
    #[arg(long)]
    src: String,
    /// Registration node receiving the archive
    #[arg(long)]
    dst: String,
    #[arg(long)]
    user: String,
    #[arg(long)]
    cookie: String,
    /// Addon short name, repeatable
    #[arg(long = "addon", required = true)]
    addons: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = match &cli.command {
        Commands::Serve(args) => ServeArgs {
            http_bind: args.http_bind.clone(),
            max_archive_size: args.max_archive_size,
            verbose: args.verbose,
            json_logs: args.json_logs,
            simulation: cli.simulation,
        },
        _ => ServeArgs {
            simulation: cli.simulation,
            ..Default::default()
        },
    };
    let config = config::AppConfig::new(cli.config.as_deref(), Some(&overrides))
        .context("Failed to load configuration")?;

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    logging::init(logging::LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    match cli.command {
        Commands::Serve(_) => run_server(config).await.context("Archiver server failed")?,
        Commands::Status { job_id } => run_status(config, &job_id)
            .await
            .context("Failed to read archive job")?,
        Commands::Create(args) => run_create(config, args)
            .await
            .context("Failed to run archive job")?,
        Commands::Config => {}
    }

    Ok(())
}

async fn build(config: config::AppConfig) -> Result<std::sync::Arc<Orchestrator>> {
    let db_conn = db::init(&config.database_path)
        .await
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    let (nodes, file_api) = adapters::get_adapters(&config);
    let signals = create_signals(&config.signals);
    let ctx = context::AppContext::new(config, db_conn, nodes, file_api, signals);
    Ok(Orchestrator::start(ctx))
}

async fn run_server(config: config::AppConfig) -> Result<()> {
    let bind = config.http_bind;
    let orchestrator = build(config).await?;
    let server = web::WebServer::new(orchestrator, bind);

    tokio::select! {
        res = server.start() => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
            server.shutdown();
        }
    }
    Ok(())
}

async fn run_status(config: config::AppConfig, job_id: &str) -> Result<()> {
    let db_conn = db::init(&config.database_path).await?;
    let job = db::jobs::load(&db_conn, job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn run_create(config: config::AppConfig, args: CreateArgs) -> Result<()> {
    let orchestrator = build(config).await?;
    let job_id = orchestrator
        .create_job(NewArchiveJob {
            src_node: args.src,
            dst_node: args.dst,
            initiator: User {
                id: args.user,
                cookie: args.cookie,
            },
            addons: args.addons,
        })
        .await?;
    orchestrator.start_archive(&job_id).await?;
    orchestrator.idle().await;

    let job = db::jobs::load(&orchestrator.context().db, &job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}
