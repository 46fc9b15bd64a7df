//! 监控错误类型定义

/// extraInfo 拉取与监控循环错误
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// 网络层失败（连接、TLS、超时）
    #[error("fetch error: {0}")]
    Fetch(String),

    /// 非 2xx 状态码
    #[error("unexpected status: {0}")]
    Status(u16),

    /// 响应体不是合法 JSON
    #[error("invalid body: {0}")]
    Body(String),

    /// 监控循环已停止
    #[error("monitor stopped")]
    Stopped,
}
