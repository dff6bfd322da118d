use anyhow::{Context, Result};
use clap::Parser;
use ingress_manager::IngressManager;
use ingress_manager_common::ConfigManager;
use kube::Client;
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// 根据 Service 注解自动创建和删除 Ingress
#[derive(Parser, Debug)]
#[command(name = "ingress-manager", version, about)]
struct Args {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 输出生效的配置后退出
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 加载配置
    let manager = ConfigManager::new(args.config.as_deref()).context("加载配置失败")?;
    let config_path = manager.config_path().map(|path| path.display().to_string());
    let config = manager.into_config();

    if args.dump_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 日志初始化之后再输出配置来源
    debug!(path = ?config_path, ?config, "配置加载完成");

    info!(
        annotation = %config.annotation_key,
        host = %config.ingress.host,
        workers = config.workers.count,
        "启动 Ingress Manager"
    );

    // 创建 Kubernetes 客户端
    let client = Client::try_default()
        .await
        .context("创建 Kubernetes 客户端失败")?;

    // 启动 Operator，直到收到 Ctrl-C
    IngressManager::new(client, &config)?
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("监听停止信号失败: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
