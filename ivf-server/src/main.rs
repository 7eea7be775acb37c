//! IVF预测服务器主程序

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ivf_core::Role;
use ivf_database::{DatabasePool, DatabaseQueries, MemoryStore, Store};
use ivf_model::ModelProvider;
use ivf_services::{NewUser, Services};
use ivf_web::{AppState, WebServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, DatabaseBackend};

/// IVF预测服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "ivf-server")]
#[command(about = "IVF 结局预测后端服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 日志级别，覆盖配置文件中的 logging.level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 启动 HTTP 服务（默认）
    Serve,
    /// 创建数据表与索引
    Migrate,
    /// 创建账户
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// patient / doctor / admin / superuser
        #[arg(long, default_value = "patient")]
        role: Role,
        /// 创建后立即激活
        #[arg(long)]
        active: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;

    // 初始化日志
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid log level: {}", level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &args.config {
        Some(path) => info!("Configuration loaded from: {}", path.display()),
        None => info!("Configuration loaded from defaults and environment"),
    }

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Migrate => migrate(&config).await,
        Command::CreateUser {
            email,
            password,
            role,
            active,
        } => {
            create_user(
                &config,
                NewUser {
                    email,
                    password,
                    role,
                    is_active: active,
                },
            )
            .await
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn Store>> {
    match config.database.backend {
        DatabaseBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        DatabaseBackend::Postgres => {
            let queries = postgres(config).await?;
            Ok(Arc::new(queries))
        }
    }
}

async fn postgres(config: &AppConfig) -> Result<DatabaseQueries> {
    let url = config
        .database
        .url
        .as_deref()
        .context("database.url is required for the postgres backend")?;
    let pool = DatabasePool::connect(url, config.database.max_connections).await?;
    Ok(DatabaseQueries::new(pool))
}

async fn serve(config: &AppConfig) -> Result<()> {
    info!("启动IVF预测服务...");
    info!("  监听地址: {}:{}", config.server.host, config.server.port);
    info!("  模型目录: {}", config.model.artifact_dir.display());

    let store = open_store(config).await?;
    store.ping().await?;

    let model = Arc::new(ModelProvider::new(config.model_paths()));
    // 预热；失败时不中断启动，首个预测请求会再次尝试加载
    match model.get().await {
        Ok(artifact) => info!("Model artifact {} loaded", artifact.version()),
        Err(e) => warn!("Model artifact not loaded at startup: {}", e),
    }

    let services = Services::new(store.clone(), model.clone(), config.auth_settings());
    let state = AppState::new(services, store, model, config.web_settings());

    let server = WebServer::new(config.listen_addr()?, state);
    server.run().await?;
    Ok(())
}

async fn migrate(config: &AppConfig) -> Result<()> {
    if config.database.backend != DatabaseBackend::Postgres {
        warn!("Nothing to migrate for the in-memory store");
        return Ok(());
    }

    let queries = postgres(config).await?;
    queries.create_tables().await?;
    info!("Database schema is up to date");
    Ok(())
}

async fn create_user(config: &AppConfig, user: NewUser) -> Result<()> {
    let store = open_store(config).await?;
    let model = Arc::new(ModelProvider::new(config.model_paths()));
    let services = Services::new(store, model, config.auth_settings());

    let created = services.identity.create_account(user).await?;
    info!(
        "Created {} account {} ({})",
        created.account.role, created.account.id, created.account.email
    );
    Ok(())
}
