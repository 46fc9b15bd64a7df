//! 发往守护进程的命令
//!
//! 每条命令编码为线上发送的完整文本（含结尾换行），调用方原样写出。

use domain::Dialect;
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};

/// SET_ATTRIBUTE 报文体的缩进。
const JSON_INDENT: &[u8] = b"            ";

/// 客户端命令。
#[derive(Debug, Clone, PartialEq)]
pub enum PvdCommand {
    /// 把当前连接提升为控制连接
    PromoteControl,
    /// 创建 PvD
    CreatePvd(String),
    /// 以事务 + 多行块写入一个属性
    SetAttribute {
        pvd_id: String,
        name: String,
        value: Value,
    },
    UnsetAttribute {
        pvd_id: String,
        name: String,
    },
    GetList,
    GetAttributes(String),
    GetAttribute {
        pvd_id: String,
        name: String,
    },
    /// 订阅属性变化（属性名或 `*`）
    Subscribe(String),
    Unsubscribe(String),
    /// 订阅新增 / 删除通知
    SubscribeNotifications,
    UnsubscribeNotifications,
    /// 空行探测：对端已消失时让写入尽快报错
    KeepAlive,
}

impl PvdCommand {
    /// 命令名（用于日志）。
    pub fn name(&self) -> &'static str {
        match self {
            Self::PromoteControl => "promote_control",
            Self::CreatePvd(_) => "create_pvd",
            Self::SetAttribute { .. } => "set_attribute",
            Self::UnsetAttribute { .. } => "unset_attribute",
            Self::GetList => "get_list",
            Self::GetAttributes(_) => "get_attributes",
            Self::GetAttribute { .. } => "get_attribute",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::SubscribeNotifications => "subscribe_notifications",
            Self::UnsubscribeNotifications => "unsubscribe_notifications",
            Self::KeepAlive => "keepalive",
        }
    }

    /// 编码为线上文本。
    pub fn encode(&self, dialect: Dialect) -> String {
        let kw = |name: &str| dialect.keyword(name);
        match self {
            Self::PromoteControl => format!("{}\n", kw("CONNECTION_PROMOTE_CONTROL")),
            Self::CreatePvd(pvd_id) => format!(
                "{} 0 {}\n",
                kw(&format!("CREATE_{}", dialect.entity())),
                pvd_id
            ),
            Self::SetAttribute {
                pvd_id,
                name,
                value,
            } => format!(
                "{} {pvd_id}\n{}\n{} {pvd_id} {name}\n{}\n{}\n{} {pvd_id}\n",
                kw("BEGIN_TRANSACTION"),
                dialect.begin_multiline(),
                kw("SET_ATTRIBUTE"),
                pretty_json(value),
                dialect.end_multiline(),
                kw("END_TRANSACTION"),
            ),
            Self::UnsetAttribute { pvd_id, name } => {
                format!("{} {} {}\n", kw("UNSET_ATTRIBUTE"), pvd_id, name)
            }
            Self::GetList => format!("{}\n", kw("GET_LIST")),
            Self::GetAttributes(pvd_id) => format!("{} {}\n", kw("GET_ATTRIBUTES"), pvd_id),
            Self::GetAttribute { pvd_id, name } => {
                format!("{} {} {}\n", kw("GET_ATTRIBUTE"), pvd_id, name)
            }
            Self::Subscribe(name) => format!("{} {}\n", kw("SUBSCRIBE"), name),
            Self::Unsubscribe(name) => format!("{} {}\n", kw("UNSUBSCRIBE"), name),
            Self::SubscribeNotifications => format!("{}\n", kw("SUBSCRIBE_NOTIFICATIONS")),
            Self::UnsubscribeNotifications => format!("{}\n", kw("UNSUBSCRIBE_NOTIFICATIONS")),
            Self::KeepAlive => "\n".to_string(),
        }
    }
}

fn pretty_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(JSON_INDENT));
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn simple_commands_carry_dialect_prefix() {
        let pvdd = Dialect::Pvdd;
        assert_eq!(PvdCommand::PromoteControl.encode(pvdd), "PVD_CONNECTION_PROMOTE_CONTROL\n");
        assert_eq!(PvdCommand::GetList.encode(pvdd), "PVD_GET_LIST\n");
        assert_eq!(
            PvdCommand::Subscribe("*".to_string()).encode(pvdd),
            "PVD_SUBSCRIBE *\n"
        );
        assert_eq!(
            PvdCommand::GetAttribute {
                pvd_id: "a.example".to_string(),
                name: "hFlag".to_string(),
            }
            .encode(pvdd),
            "PVD_GET_ATTRIBUTE a.example hFlag\n"
        );
        assert_eq!(PvdCommand::KeepAlive.encode(pvdd), "\n");
    }

    #[test]
    fn create_uses_dialect_entity_word() {
        let id = "a.example".to_string();
        assert_eq!(
            PvdCommand::CreatePvd(id.clone()).encode(Dialect::Pvdd),
            "PVD_CREATE_PVD 0 a.example\n"
        );
        assert_eq!(
            PvdCommand::CreatePvd(id).encode(Dialect::Pvdid),
            "PVDID_CREATE_PVDID 0 a.example\n"
        );
    }

    #[test]
    fn unset_and_notifications() {
        let legacy = Dialect::Pvdid;
        assert_eq!(
            PvdCommand::UnsetAttribute {
                pvd_id: "a.example".to_string(),
                name: "extraInfo".to_string(),
            }
            .encode(legacy),
            "PVDID_UNSET_ATTRIBUTE a.example extraInfo\n"
        );
        assert_eq!(
            PvdCommand::UnsubscribeNotifications.encode(legacy),
            "PVDID_UNSUBSCRIBE_NOTIFICATIONS\n"
        );
    }

    #[test]
    fn set_attribute_is_wrapped_in_transaction_block() {
        let command = PvdCommand::SetAttribute {
            pvd_id: "a.example".to_string(),
            name: "extraInfo".to_string(),
            value: json!({ "name": "x" }),
        };
        let expected = "PVD_BEGIN_TRANSACTION a.example\n\
PVD_BEGIN_MULTILINE\n\
PVD_SET_ATTRIBUTE a.example extraInfo\n\
{\n            \"name\": \"x\"\n}\n\
PVD_END_MULTILINE\n\
PVD_END_TRANSACTION a.example\n";
        assert_eq!(command.encode(Dialect::Pvdd), expected);
        assert_eq!(command.name(), "set_attribute");
    }

    #[test]
    fn scalar_attribute_value_is_single_line() {
        let command = PvdCommand::SetAttribute {
            pvd_id: "a".to_string(),
            name: "n".to_string(),
            value: json!(3),
        };
        assert!(command.encode(Dialect::Pvdd).contains("PVD_SET_ATTRIBUTE a n\n3\nPVD_END_MULTILINE\n"));
    }
}
