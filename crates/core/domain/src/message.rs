use serde_json::Value;

/// 守护进程下发的协议消息（单行与多行重组后共用同一组变体）。
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    /// `LIST <id>*`：当前全部 PvD。
    List(Vec<String>),
    /// `NEW_<ENTITY> <id>`：新增通知。
    NewPvd(String),
    /// `DEL_<ENTITY> <id>`：删除通知。
    DelPvd(String),
    /// `ATTRIBUTES <id> <json>`：完整属性集。
    Attributes { pvd_id: String, attributes: Value },
    /// `ATTRIBUTE <id> <name> <json>`：单个属性。
    Attribute {
        pvd_id: String,
        name: String,
        value: Value,
    },
    /// 无法识别或负载非法，静默丢弃。
    Unrecognized,
}
