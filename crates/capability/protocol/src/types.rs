//! 会话事件类型定义

use domain::ProtocolMessage;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 会话向监听器投递的事件
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 连接建立
    Connected,
    /// 已建立的连接断开
    Disconnected,
    /// 连接失败（同一失败序列只报告一次）
    Error(String),
    /// 收到的原始行（便于观测）
    Data(String),
    List(Vec<String>),
    NewPvd(String),
    DelPvd(String),
    PvdAttributes {
        pvd_id: String,
        attributes: Value,
    },
    PvdAttribute {
        pvd_id: String,
        name: String,
        value: Value,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> SessionEventKind {
        match self {
            Self::Connected => SessionEventKind::Connect,
            Self::Disconnected => SessionEventKind::Disconnect,
            Self::Error(_) => SessionEventKind::Error,
            Self::Data(_) => SessionEventKind::Data,
            Self::List(_) => SessionEventKind::List,
            Self::NewPvd(_) => SessionEventKind::NewPvd,
            Self::DelPvd(_) => SessionEventKind::DelPvd,
            Self::PvdAttributes { .. } => SessionEventKind::PvdAttributes,
            Self::PvdAttribute { .. } => SessionEventKind::PvdAttribute,
        }
    }

    /// 由解析结果生成事件；未识别的消息没有对应事件。
    pub fn from_message(message: ProtocolMessage) -> Option<Self> {
        match message {
            ProtocolMessage::List(ids) => Some(Self::List(ids)),
            ProtocolMessage::NewPvd(pvd_id) => Some(Self::NewPvd(pvd_id)),
            ProtocolMessage::DelPvd(pvd_id) => Some(Self::DelPvd(pvd_id)),
            ProtocolMessage::Attributes { pvd_id, attributes } => {
                Some(Self::PvdAttributes { pvd_id, attributes })
            }
            ProtocolMessage::Attribute {
                pvd_id,
                name,
                value,
            } => Some(Self::PvdAttribute {
                pvd_id,
                name,
                value,
            }),
            ProtocolMessage::Unrecognized => None,
        }
    }
}

/// 事件种类，用于注册监听器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    Connect,
    Disconnect,
    Error,
    Data,
    List,
    NewPvd,
    DelPvd,
    PvdAttributes,
    PvdAttribute,
}

impl SessionEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
            Self::Data => "data",
            Self::List => "list",
            Self::NewPvd => "newPvd",
            Self::DelPvd => "delPvd",
            Self::PvdAttributes => "pvdAttributes",
            Self::PvdAttribute => "pvdAttribute",
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionEventKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            "error" => Ok(Self::Error),
            "data" => Ok(Self::Data),
            "list" => Ok(Self::List),
            "newPvd" => Ok(Self::NewPvd),
            "delPvd" => Ok(Self::DelPvd),
            "pvdAttributes" => Ok(Self::PvdAttributes),
            "pvdAttribute" => Ok(Self::PvdAttribute),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}
