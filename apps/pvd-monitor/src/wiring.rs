//! 监控链路装配模块
//!
//! 把两条守护进程会话与监控循环组装在一起：
//! - 控制连接：提升权限、创建默认 PvD、回写 / 删除 extraInfo
//! - 普通连接：列表、订阅，事件全部转交监控循环
//! - 监控循环：注册表 + 拉取调度

use domain::SessionRole;
use pvd_config::AppConfig;
use pvd_monitoring::{HttpFetcher, Monitor, MonitorChannel, MonitorConfig, MonitorError};
use pvd_protocol::{Session, SessionConfig, SessionEvent, SessionEventKind, SessionHandle};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 运行中的监控链路。
pub struct MonitorRuntime {
    pub control: SessionHandle,
    pub regular: SessionHandle,
    monitor_task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl MonitorRuntime {
    /// 关闭两条会话并等待监控循环退出。
    pub async fn shutdown(self) {
        self.control.close();
        self.regular.close();
        self.cancel.cancel();
        if let Err(error) = self.monitor_task.await {
            warn!(target: "pvd.monitor", error = %error, "monitor_task_join_failed");
        }
        let snapshot = pvd_telemetry::metrics().snapshot();
        info!(
            target: "pvd.monitor",
            fetch_success = snapshot.fetch_success,
            fetch_failure = snapshot.fetch_failure,
            connection_failures = snapshot.connection_failures,
            "shutdown_complete"
        );
    }
}

/// 由应用配置生成会话配置。
pub fn session_config(config: &AppConfig, role: SessionRole) -> SessionConfig {
    let mut session = SessionConfig::new(config.daemon_host.clone(), config.daemon_port, role);
    session.dialect = config.dialect;
    session.reconnect_interval = config.reconnect_interval();
    session.connect_timeout = config.connect_timeout();
    session.keepalive = config.keepalive;
    if role == SessionRole::Control {
        session.default_pvds = config.default_pvds.clone();
    }
    session
}

pub fn monitor_config(config: &AppConfig) -> MonitorConfig {
    MonitorConfig {
        development: config.development,
        dev_url_template: config.dev_url_template.clone(),
        retry_delay: config.retry_delay(),
    }
}

/// 启动控制会话、普通会话与监控循环。
pub fn start(config: &AppConfig) -> Result<MonitorRuntime, MonitorError> {
    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout())?);

    let mut control = Session::new(session_config(config, SessionRole::Control));
    control.on(SessionEventKind::Connect, |_| {
        info!(target: "pvd.session", role = "control", "control_connection_ready");
    });
    let control = control.connect();

    let channel = MonitorChannel::new();
    let mut regular = Session::new(session_config(config, SessionRole::Regular));
    channel.handle().attach(&mut regular);
    regular.on(SessionEventKind::Data, |event| {
        if let SessionEvent::Data(line) = event {
            debug!(target: "pvd.session", line = %line, "line_received");
        }
    });
    let regular = regular.connect();

    let monitor = Monitor::with_channel(
        channel,
        monitor_config(config),
        fetcher,
        Arc::new(control.clone()),
        Arc::new(regular.clone()),
    );
    let cancel = CancellationToken::new();
    let monitor_task = tokio::spawn(monitor.run(cancel.clone()));

    info!(
        target: "pvd.monitor",
        host = %config.daemon_host,
        port = config.daemon_port,
        dialect = %config.dialect,
        development = config.development,
        default_pvds = config.default_pvds.len(),
        "monitor_runtime_started"
    );

    Ok(MonitorRuntime {
        control,
        regular,
        monitor_task,
        cancel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Dialect;
    use std::time::Duration;

    fn app_config() -> AppConfig {
        AppConfig {
            daemon_host: "10.0.0.1".to_string(),
            daemon_port: 10102,
            dialect: Dialect::Pvdid,
            development: true,
            dev_url_template: "http://127.0.0.1:9000/{pvd}".to_string(),
            default_pvds: vec!["a.example".to_string()],
            verbose: false,
            retry_delay_ms: 60_000,
            reconnect_interval_ms: 250,
            connect_timeout_ms: 100,
            fetch_timeout_ms: 1_000,
            keepalive: false,
        }
    }

    #[test]
    fn default_pvds_only_go_to_control_session() {
        let config = app_config();
        let control = session_config(&config, SessionRole::Control);
        let regular = session_config(&config, SessionRole::Regular);

        assert_eq!(control.default_pvds, vec!["a.example".to_string()]);
        assert!(regular.default_pvds.is_empty());
        assert_eq!(regular.dialect, Dialect::Pvdid);
        assert_eq!(regular.port, 10102);
        assert_eq!(regular.reconnect_interval, Duration::from_millis(250));
        assert!(!regular.keepalive);
    }

    #[test]
    fn monitor_config_follows_app_config() {
        let monitor = monitor_config(&app_config());
        assert!(monitor.development);
        assert_eq!(monitor.retry_delay, Duration::from_secs(60));
        assert_eq!(monitor.dev_url_template, "http://127.0.0.1:9000/{pvd}");
    }
}
