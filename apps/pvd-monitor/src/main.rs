//! PvD extraInfo 监控进程：连接 pvdd 守护进程，拉取并回写 extraInfo。

mod wiring;

use pvd_config::AppConfig;
use pvd_telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing(config.verbose);

    let runtime = wiring::start(&config)?;

    tokio::signal::ctrl_c().await?;
    info!(target: "pvd.monitor", "shutdown_requested");
    runtime.shutdown().await;
    Ok(())
}
