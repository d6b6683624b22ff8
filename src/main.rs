use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use fanload::adapters;
use fanload::config::AppConfig;
use fanload::context::AppContext;
use fanload::core::archive::HttpFetcher;
use fanload::core::history::LogStats;
use fanload::core::models::{DestinationView, StoredUploadLog};
use fanload::core::notifications::Toast;
use fanload::core::orchestrator::BatchStatus;
use fanload::core::validator::Rejection;
use fanload::db::SqliteStore;
use fanload::logging::{self, LogConfig};
use fanload::rpc::{RpcClient, RpcServer};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "fanload")]
#[command(about = "Upload files to several storage destinations at once", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Serialize)]
struct GlobalArgs {
    /// Configuration file (defaults to ./fanload.toml)
    #[serde(skip)]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    rpc_bind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    json_logs: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload daemon
    Daemon(DaemonArgs),
    /// Upload files to the selected destinations
    Upload(UploadArgs),
    /// Show progress of the current batch
    Status,
    /// Stop in-flight transfers and hold the next file
    Pause,
    /// Continue with files not yet attempted
    Resume,
    /// Cancel the current batch
    Cancel,
    /// Bundle the last batch's uploads into a zip file
    Archive {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Manage external storage accounts
    #[command(subcommand)]
    Accounts(AccountsCommand),
    /// Show upload history
    Logs(LogsArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize)]
struct DaemonArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    database_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    transfer_timeout_secs: Option<u64>,
}

#[derive(Args)]
struct UploadArgs {
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Destination id; repeat for several. Defaults to the last selection.
    #[arg(long = "to")]
    to: Vec<String>,

    /// Follow progress until the batch ends
    #[arg(long)]
    wait: bool,
}

#[derive(Subcommand)]
enum AccountsCommand {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        region: Option<String>,
        #[arg(long, env = "FANLOAD_ACCESS_KEY_ID")]
        access_key_id: String,
        #[arg(long, env = "FANLOAD_SECRET_ACCESS_KEY", hide_env_values = true)]
        secret_access_key: String,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        access_key_id: Option<String>,
        #[arg(long)]
        secret_access_key: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    Remove {
        id: String,
    },
}

#[derive(Args)]
struct LogsArgs {
    #[arg(long)]
    limit: Option<usize>,
    /// succeeded | failed
    #[arg(long)]
    status: Option<String>,
    /// all | builtin | external | <account id>
    #[arg(long)]
    destination: Option<String>,
    #[arg(long)]
    search: Option<String>,
    /// Print success/failure counts instead of entries
    #[arg(long)]
    stats: bool,
    /// Delete the entry with this id
    #[arg(long, conflicts_with = "stats")]
    delete: Option<String>,
}

#[derive(Serialize)]
struct Overrides<'a> {
    #[serde(flatten)]
    global: &'a GlobalArgs,
    #[serde(flatten)]
    daemon: Option<&'a DaemonArgs>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let daemon_args = match &cli.command {
        Commands::Daemon(args) => Some(args),
        _ => None,
    };
    let overrides = Overrides {
        global: &cli.global,
        daemon: daemon_args,
    };
    let config = AppConfig::load(cli.global.config.as_deref(), Some(&overrides))?;

    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    })?;

    if let Commands::Daemon(_) = cli.command {
        return run_daemon(config).await.context("Daemon failed");
    }
    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let client = RpcClient::new(rpc_addr(&config)?);
    match cli.command {
        Commands::Upload(args) => upload(&client, args).await,
        Commands::Status => status(&client).await,
        Commands::Pause => toggle(&client, "batch.pause", "Uploads paused", "Nothing to pause").await,
        Commands::Resume => toggle(&client, "batch.resume", "Uploads resumed", "Nothing to resume").await,
        Commands::Cancel => toggle(&client, "batch.cancel", "Batch cancelled", "No batch is running").await,
        Commands::Archive { output } => archive(&client, output).await,
        Commands::Accounts(cmd) => accounts(&client, cmd).await,
        Commands::Logs(args) => logs(&client, args).await,
        Commands::Daemon(_) | Commands::Config => Ok(()),
    }
}

fn rpc_addr(config: &AppConfig) -> Result<SocketAddr> {
    config
        .rpc_bind
        .parse()
        .with_context(|| format!("Invalid rpc_bind address: {}", config.rpc_bind))
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let addr = rpc_addr(&config)?;
    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database_path.display()))?,
    );
    let resolver = adapters::get_resolver(&config)?;
    let simulation = config.simulation;
    let ctx = AppContext::new(config, store, resolver, Arc::new(HttpFetcher::new()))?;

    info!(%addr, simulation, "Starting fanload daemon");
    let server = RpcServer::new(ctx.clone(), addr);

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            server.shutdown();
            if let Some(batch) = ctx.dispatcher.current().await {
                if !batch.state().is_done() {
                    batch.teardown();
                    batch.wait().await;
                }
            }
        }
    }

    Ok(())
}

#[derive(Deserialize)]
struct SubmitResult {
    batch_id: String,
    accepted: usize,
    rejected: Vec<Rejection>,
    destinations: Vec<String>,
}

async fn upload(client: &RpcClient, args: UploadArgs) -> Result<()> {
    let mut paths = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        paths.push(
            std::path::absolute(path).with_context(|| format!("Invalid path: {}", path.display()))?,
        );
    }

    let result: SubmitResult = client
        .call("batch.submit", Some(json!({ "paths": paths, "destinations": args.to })))
        .await?;

    println!(
        "Batch {}: {} file(s) to {}",
        result.batch_id,
        result.accepted,
        result.destinations.join(", ")
    );
    for rejection in &result.rejected {
        println!("  skipped {}: {}", rejection.file_name, rejection.reason);
    }

    if args.wait {
        follow(client).await?;
    }
    Ok(())
}

/// Print a line whenever the batch moves, until it ends.
async fn follow(client: &RpcClient) -> Result<()> {
    let mut last_line = String::new();
    loop {
        let status: BatchStatus = client.call_no_params("batch.status").await?;
        let line = progress_line(&status);
        if line != last_line {
            println!("{line}");
            last_line = line;
        }
        if status.state.is_done() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let toasts: Vec<Toast> = client.call_no_params("toasts.recent").await?;
    if let Some(last) = toasts.last() {
        println!("{}", last.message);
    }
    Ok(())
}

fn progress_line(status: &BatchStatus) -> String {
    let board = &status.board;
    format!(
        "[{:?}] {}/{} files | {} {}% ({} ok, {} failed)",
        status.state,
        board.files_processed,
        board.files_total,
        board.current_file.as_deref().unwrap_or("-"),
        board.summary.percentage,
        board.summary.succeeded,
        board.summary.failed,
    )
}

async fn status(client: &RpcClient) -> Result<()> {
    let status: BatchStatus = client.call_no_params("batch.status").await?;
    println!("Batch {} started {}", status.id, status.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!("{}", progress_line(&status));
    for task in &status.board.tasks {
        println!(
            "  {:<24} {:<12} {:>3}% {}",
            task.destination_name,
            format!("{:?}", task.status),
            task.progress,
            task.error.as_deref().unwrap_or("")
        );
    }
    if status.archive_ready {
        println!("{} uploaded file(s) ready to archive", status.completed);
    }
    Ok(())
}

async fn toggle(client: &RpcClient, method: &str, changed: &str, unchanged: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct Changed {
        changed: bool,
    }

    let result: Changed = client.call_no_params(method).await?;
    println!("{}", if result.changed { changed } else { unchanged });
    Ok(())
}

async fn archive(client: &RpcClient, output: Option<PathBuf>) -> Result<()> {
    #[derive(Deserialize)]
    struct ArchiveResult {
        path: PathBuf,
        count: usize,
        failed: Vec<String>,
        notice: Option<String>,
    }

    let output_dir = match output {
        Some(dir) => std::path::absolute(dir)?,
        None => std::env::current_dir()?,
    };

    let result: ArchiveResult = client
        .call("archive.build", Some(json!({ "output_dir": output_dir })))
        .await?;

    println!("Wrote {} file(s) to {}", result.count, result.path.display());
    for name in &result.failed {
        println!("  could not fetch {name}");
    }
    if let Some(notice) = result.notice {
        println!("Note: {notice}");
    }
    Ok(())
}

async fn accounts(client: &RpcClient, cmd: AccountsCommand) -> Result<()> {
    match cmd {
        AccountsCommand::List => {
            let views: Vec<DestinationView> = client.call_no_params("destinations.list").await?;
            for view in views {
                println!(
                    "{:<38} {:<24} {:<9} {}{}",
                    view.id.as_str(),
                    view.name,
                    view.kind,
                    view.endpoint.as_deref().unwrap_or(""),
                    if view.active { "" } else { " (inactive)" }
                );
            }
        }
        AccountsCommand::Add {
            name,
            endpoint,
            bucket,
            region,
            access_key_id,
            secret_access_key,
        } => {
            let view: DestinationView = client
                .call(
                    "destinations.create",
                    Some(json!({
                        "name": name,
                        "endpoint": endpoint,
                        "bucket": bucket,
                        "region": region,
                        "access_key_id": access_key_id,
                        "secret_access_key": secret_access_key,
                    })),
                )
                .await?;
            println!("Added account {} ({})", view.name, view.id);
        }
        AccountsCommand::Update {
            id,
            name,
            endpoint,
            bucket,
            region,
            access_key_id,
            secret_access_key,
            active,
        } => {
            let mut params = serde_json::Map::new();
            params.insert("id".into(), Value::String(id));
            let fields = [
                ("name", name),
                ("endpoint", endpoint),
                ("bucket", bucket),
                ("region", region),
                ("access_key_id", access_key_id),
                ("secret_access_key", secret_access_key),
            ];
            for (key, value) in fields {
                if let Some(value) = value {
                    params.insert(key.into(), Value::String(value));
                }
            }
            if let Some(active) = active {
                params.insert("active".into(), Value::Bool(active));
            }
            if params.len() == 1 {
                bail!("Nothing to update");
            }

            let view: DestinationView = client.call("destinations.update", Some(Value::Object(params))).await?;
            println!("Updated account {} ({})", view.name, view.id);
        }
        AccountsCommand::Remove { id } => {
            let _: Value = client.call("destinations.delete", Some(json!({ "id": id }))).await?;
            println!("Removed account {id}");
        }
    }
    Ok(())
}

async fn logs(client: &RpcClient, args: LogsArgs) -> Result<()> {
    if let Some(id) = args.delete {
        let _: Value = client.call("logs.delete", Some(json!({ "id": id }))).await?;
        println!("Deleted log entry {id}");
        return Ok(());
    }

    if args.stats {
        let stats: LogStats = client.call_no_params("logs.stats").await?;
        println!(
            "{} entries: {} destination upload(s) succeeded, {} failed",
            stats.entries, stats.succeeded, stats.failed
        );
        return Ok(());
    }

    let mut params = serde_json::Map::new();
    if let Some(limit) = args.limit {
        params.insert("limit".into(), json!(limit));
    }
    for (key, value) in [
        ("status", args.status),
        ("destination", args.destination),
        ("search", args.search),
    ] {
        if let Some(value) = value {
            params.insert(key.into(), Value::String(value));
        }
    }

    let entries: Vec<StoredUploadLog> = client.call("logs.list", Some(Value::Object(params))).await?;
    for log in entries {
        let entry = &log.entry;
        println!(
            "{}  {}  {} ({} bytes, {} ms): {} ok, {} failed",
            log.created_at.format("%Y-%m-%d %H:%M:%S"),
            log.id,
            entry.file_name,
            entry.file_size,
            entry.duration_ms,
            entry.succeeded(),
            entry.failed()
        );
        for result in &entry.results {
            println!(
                "    {:<24} {:?} {}",
                result.destination_name,
                result.status,
                result.url.as_deref().or(result.error.as_deref()).unwrap_or("")
            );
        }
    }
    Ok(())
}
