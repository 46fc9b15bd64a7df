//! # PvD 监控能力模块
//!
//! 维护 PvD 注册表，并对 hFlag 为真的 PvD 周期性拉取 extraInfo 文档：
//!
//! ```text
//! 普通连接事件 ──► Registry（upsert / remove / reset_all / 属性更新）
//!                      │
//!                      ▼
//!                  Monitor（是否监控、何时拉取）
//!                      │
//!        ┌─────────────┼──────────────┐
//!        ▼             ▼              ▼
//!   HttpFetcher    Timer（过期/重试）  控制连接（SET / UNSET extraInfo）
//! ```
//!
//! 下一次拉取时间来自文档的 `expires`/`expireDate` 字段或 `Expires` 响应头；
//! 失败、时间已过或无法解析时按固定延迟重试。

mod error;
mod fetcher;
mod monitor;
mod registry;
mod schedule;
mod timer;

pub use error::MonitorError;
pub use fetcher::{ExtraInfoFetcher, FetchResponse, HttpFetcher, PVD_PLACEHOLDER, extra_info_url};
pub use monitor::{
    CommandSink, Monitor, MonitorChannel, MonitorConfig, MonitorEvent, MonitorHandle,
};
pub use registry::{PvdEntry, Registry};
pub use schedule::{NextFetch, expiration_hint, parse_expiration, plan_next_fetch};
pub use timer::Timer;
