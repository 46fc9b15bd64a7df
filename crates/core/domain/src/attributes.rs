//! PvD 属性读取辅助。

use serde_json::{Map, Value};

/// 是否需要拉取 extraInfo 的标志属性。
pub const HFLAG: &str = "hFlag";
/// 守护进程维护的序列号，变化即表示 PvD 内容更新。
pub const SEQUENCE_NUMBER: &str = "sequenceNumber";
/// 由监控进程回写的派生属性。
pub const EXTRA_INFO: &str = "extraInfo";

/// 按 JSON 真值语义判断：`false`、`0`、空字符串与 `null` 为假。
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// 属性集中的 hFlag 是否为真（缺失视为假）。
pub fn honor_flag(attributes: &Map<String, Value>) -> bool {
    attributes.get(HFLAG).is_some_and(is_truthy)
}

/// 属性集中的序列号（缺失为 `None`）。
pub fn sequence_number(attributes: &Map<String, Value>) -> Option<&Value> {
    attributes.get(SEQUENCE_NUMBER)
}
