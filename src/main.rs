// FleetCheck - 服务器巡检与 SSH 隧道命令行
// 应用入口

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use fleetcheck::models::{AppSettings, CheckStatus};
use fleetcheck::services::batch::{BatchOrchestrator, BatchRequest};
use fleetcheck::services::executor::{CommandExecutor, CommandRunner};
use fleetcheck::services::storage::{self, Inventory, JsonStore, ResultFilter, ResultStore};
use fleetcheck::services::tunnel::TunnelManager;

#[derive(Parser)]
#[command(name = "fleetcheck", version, about = "Run checks and hold SSH tunnels for a server inventory")]
struct Cli {
    /// 数据目录（默认使用系统配置目录下的 fleetcheck）
    #[arg(long, global = true, env = "FLEETCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 写入默认清单与设置
    Init,
    /// 批量执行，事件以 SSE 帧输出到 stdout
    Run {
        #[arg(long, value_delimiter = ',', required = true)]
        servers: Vec<i64>,
        #[arg(long, value_delimiter = ',', required = true)]
        commands: Vec<i64>,
    },
    /// 单项检查并保存结果
    Exec { server: i64, command: i64 },
    /// 连通性测试
    Test { server: i64 },
    /// 启动隧道，Ctrl-C 后全部停止
    Tunnel {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// 查询执行结果（最新的在前）
    Results {
        #[arg(long)]
        server: Option<i64>,
        #[arg(long)]
        command: Option<i64>,
        #[arg(long)]
        status: Option<CheckStatus>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=fleetcheck=trace
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_dir = match cli.config {
        Some(dir) => dir,
        None => storage::get_config_dir()?,
    };
    let settings = storage::load_settings(&config_dir)?;
    let store = Arc::new(JsonStore::open(&config_dir).await?);

    match cli.command {
        Commands::Init => init(&config_dir, &settings, &store).await,
        Commands::Run { servers, commands } => {
            run_batch(orchestrator(&settings, &store), servers, commands).await
        }
        Commands::Exec { server, command } => {
            let result = orchestrator(&settings, &store)
                .execute_one(server, command)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Test { server } => test_connection(&settings, &store, server).await,
        Commands::Tunnel { ids } => hold_tunnels(&settings, &store, &ids).await,
        Commands::Results {
            server,
            command,
            status,
            limit,
            offset,
        } => {
            let filter = ResultFilter {
                server_id: server,
                command_id: command,
                status,
                limit: Some(limit.unwrap_or(settings.batch.results_page_size)),
                offset,
            };
            for result in store.results(&filter).await? {
                println!("{}", serde_json::to_string(&result)?);
            }
            Ok(())
        }
    }
}

fn orchestrator(settings: &AppSettings, store: &Arc<JsonStore>) -> BatchOrchestrator {
    let inventory: Arc<dyn Inventory> = store.clone();
    let results: Arc<dyn ResultStore> = store.clone();
    let runner: Arc<dyn CommandRunner> =
        Arc::new(CommandExecutor::new(settings.connection.clone()));
    BatchOrchestrator::new(inventory, results, runner)
}

async fn init(config_dir: &std::path::Path, settings: &AppSettings, store: &JsonStore) -> Result<()> {
    // 新建时由 JsonStore::init 记录日志
    if !store.init().await? {
        info!("[Storage] Inventory already exists at {}", store.inventory_file().display());
    }
    if !storage::get_settings_file(config_dir).exists() {
        storage::save_settings(config_dir, settings)?;
    }
    Ok(())
}

async fn run_batch(orchestrator: BatchOrchestrator, servers: Vec<i64>, commands: Vec<i64>) -> Result<()> {
    let request = BatchRequest::new(servers, commands)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move { orchestrator.run(request, tx).await });

    while let Some(event) = rx.recv().await {
        print!("{}", event.to_sse()?);
    }
    task.await.context("Batch task failed")?;
    Ok(())
}

async fn test_connection(settings: &AppSettings, store: &JsonStore, server_id: i64) -> Result<()> {
    let server = store
        .server(server_id)
        .await?
        .with_context(|| format!("Server {} not found", server_id))?;
    let executor = CommandExecutor::new(settings.connection.clone());
    if !executor.test_connection(&server).await {
        bail!("Connection test to {} failed", server.address_label());
    }
    println!("Connection to {} OK", server.address_label());
    Ok(())
}

async fn hold_tunnels(settings: &AppSettings, store: &JsonStore, ids: &[i64]) -> Result<()> {
    let manager = TunnelManager::with_ssh(settings.connection.clone());

    for &id in ids {
        let Some(tunnel) = store.tunnel(id).await? else {
            warn!("[Tunnel] Tunnel {} not found", id);
            continue;
        };
        let Some(server) = store.server(tunnel.server_id).await? else {
            warn!("[Tunnel] Server {} for tunnel {} not found", tunnel.server_id, id);
            continue;
        };
        let outcome = manager.start(&server, &tunnel).await;
        println!("{}", serde_json::to_string(&manager.status(id).await)?);
        if let Some(error) = outcome.error {
            warn!("[Tunnel] Tunnel {}: {}", id, error);
        }
    }

    if manager.list_active().await.is_empty() {
        bail!("No tunnel is running");
    }
    info!("[Tunnel] Press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Unable to listen for Ctrl-C")?;
    manager.stop_all().await;
    Ok(())
}
