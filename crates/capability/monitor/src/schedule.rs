//! 下一次拉取时间的决定
//!
//! 优先级：文档字段 `expires`、`expireDate`，其次响应头 `expires`、`expire`。
//! 时间已过或无法解析时退回固定重试延迟，避免对时钟偏差的服务器连续重拉。

use chrono::{DateTime, Utc};
use serde_json::Value;

const DOCUMENT_FIELDS: [&str; 2] = ["expires", "expireDate"];

/// 拉取成功后的下一步。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextFetch {
    /// 在指定时刻重新拉取
    At(DateTime<Utc>),
    /// 按固定延迟重试
    Retry,
    /// 没有过期信息，等待下一次属性更新
    Idle,
}

/// 找出过期时间的原始文本。
///
/// 字段值为假值（`null`、`false`、`0`、空字符串）时视为缺失，继续查看响应头。
pub fn expiration_hint(document: &Value, header: Option<&str>) -> Option<String> {
    let field = DOCUMENT_FIELDS
        .iter()
        .find_map(|name| document.get(*name).filter(|value| domain::is_truthy(value)));
    match field {
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
        None => header.filter(|text| !text.is_empty()).map(str::to_string),
    }
}

/// 解析 RFC 3339 或 RFC 2822（HTTP-date）时间。
pub fn parse_expiration(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// 根据过期信息与当前时间决定下一步。
pub fn plan_next_fetch(hint: Option<&str>, now: DateTime<Utc>) -> NextFetch {
    let Some(text) = hint else {
        return NextFetch::Idle;
    };
    match parse_expiration(text) {
        Some(at) if at >= now => NextFetch::At(at),
        _ => NextFetch::Retry,
    }
}
