//! 追踪初始化、连接 ID 生成与进程级计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub lines_decoded: u64,
    pub messages_dropped: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub commands_sent: u64,
    pub commands_dropped: u64,
    pub fetch_success: u64,
    pub fetch_failure: u64,
    pub retries_scheduled: u64,
    pub refetches_scheduled: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    lines_decoded: AtomicU64,
    messages_dropped: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    commands_sent: AtomicU64,
    commands_dropped: AtomicU64,
    fetch_success: AtomicU64,
    fetch_failure: AtomicU64,
    retries_scheduled: AtomicU64,
    refetches_scheduled: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            lines_decoded: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
            fetch_success: AtomicU64::new(0),
            fetch_failure: AtomicU64::new(0),
            retries_scheduled: AtomicU64::new(0),
            refetches_scheduled: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lines_decoded: self.lines_decoded.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            fetch_success: self.fetch_success.load(Ordering::Relaxed),
            fetch_failure: self.fetch_failure.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            refetches_scheduled: self.refetches_scheduled.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info，verbose 时 debug；RUST_LOG 优先）。
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 为一次新建立的守护进程连接生成 connection_id。
pub fn new_connection_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录解码出的行数。
pub fn record_line_decoded() {
    metrics().lines_decoded.fetch_add(1, Ordering::Relaxed);
}

/// 记录被丢弃的消息（未识别或 JSON 非法）。
pub fn record_message_dropped() {
    metrics().messages_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接建立次数。
pub fn record_connection_established() {
    metrics()
        .connections_established
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录连接失败次数（含被抑制的重复失败）。
pub fn record_connection_failure() {
    metrics().connection_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录写出的命令数。
pub fn record_command_sent() {
    metrics().commands_sent.fetch_add(1, Ordering::Relaxed);
}

/// 记录因未连接而丢弃的命令数。
pub fn record_command_dropped() {
    metrics().commands_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录 extraInfo 拉取成功次数。
pub fn record_fetch_success() {
    metrics().fetch_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录 extraInfo 拉取失败次数（网络错误、状态码、非 JSON）。
pub fn record_fetch_failure() {
    metrics().fetch_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录固定延迟重试的调度次数。
pub fn record_retry_scheduled() {
    metrics().retries_scheduled.fetch_add(1, Ordering::Relaxed);
}

/// 记录按过期时间调度的次数。
pub fn record_refetch_scheduled() {
    metrics()
        .refetches_scheduled
        .fetch_add(1, Ordering::Relaxed);
}
