pub mod attributes;
pub mod message;

pub use attributes::{EXTRA_INFO, HFLAG, SEQUENCE_NUMBER, honor_flag, is_truthy, sequence_number};
pub use message::ProtocolMessage;

use std::fmt;
use std::str::FromStr;

/// 协议方言：两代守护进程仅关键字前缀与实体名不同。
///
/// - `Pvdd`（默认）：`PVD_LIST`、`PVD_NEW_PVD`、`PVD_CREATE_PVD`
/// - `Pvdid`（旧版）：`PVDID_LIST`、`PVDID_NEW_PVDID`、`PVDID_CREATE_PVDID`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Pvdd,
    Pvdid,
}

impl Dialect {
    /// 关键字前缀（含下划线）。
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Pvdd => "PVD_",
            Self::Pvdid => "PVDID_",
        }
    }

    /// 实体名，出现在 `NEW_<ENTITY>`、`DEL_<ENTITY>`、`CREATE_<ENTITY>` 中。
    pub fn entity(self) -> &'static str {
        match self {
            Self::Pvdd => "PVD",
            Self::Pvdid => "PVDID",
        }
    }

    /// 拼接带前缀的完整关键字，例如 `keyword("GET_LIST")`。
    pub fn keyword(self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }

    /// 多行块起始标记。
    pub fn begin_multiline(self) -> String {
        self.keyword("BEGIN_MULTILINE")
    }

    /// 多行块结束标记。
    pub fn end_multiline(self) -> String {
        self.keyword("END_MULTILINE")
    }

    /// 声明行数的多行块头（`<prefix>MULTILINE <n>`）的关键字部分。
    pub fn multiline_count(self) -> String {
        self.keyword("MULTILINE")
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pvdd" | "pvd" => Ok(Self::Pvdd),
            "pvdid" => Ok(Self::Pvdid),
            other => Err(format!("unknown dialect: {}", other)),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pvdd => write!(f, "pvdd"),
            Self::Pvdid => write!(f, "pvdid"),
        }
    }
}

/// 会话角色：控制连接可以修改 PvD 状态，普通连接用于查询与订阅。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    Control,
    Regular,
}

impl SessionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Regular => "regular",
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}
