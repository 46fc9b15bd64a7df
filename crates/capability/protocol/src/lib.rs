//! # pvdd 协议能力模块
//!
//! 与 pvdd 守护进程之间基于换行分隔的文本协议：
//! - **分帧**：把任意切分的字节流还原为单行消息与多行块
//! - **解析**：按关键字把消息归类为 [`domain::ProtocolMessage`]
//! - **命令**：组装发往守护进程的命令文本
//! - **会话**：维护一条控制或普通连接，断线后按固定间隔重连
//!
//! ## 数据流
//!
//! ```text
//! TcpStream 字节
//!       │
//!       ▼
//! FrameDecoder（单行 / BEGIN..END 多行块 / MULTILINE <n> 计数块）
//!       │
//!       ▼
//! Interpreter（LIST / NEW / DEL / ATTRIBUTES / ATTRIBUTE）
//!       │
//!       ▼
//! SessionEvent → 监听器（list、newPvd、delPvd、pvdAttributes、pvdAttribute、data）
//! ```
//!
//! ## 多行块
//!
//! ```text
//! PVD_BEGIN_MULTILINE
//! PVD_ATTRIBUTES a.example
//! { "hFlag": true, "sequenceNumber": 1 }
//! PVD_END_MULTILINE
//! ```
//!
//! 块内各行（不含标记行）以 `\n` 拼接后按单行消息同样的规则解析。

mod command;
mod error;
mod framing;
mod interpreter;
mod session;
mod types;

pub use command::PvdCommand;
pub use error::ProtocolError;
pub use framing::{Frame, FrameDecoder};
pub use interpreter::Interpreter;
pub use session::{Session, SessionConfig, SessionHandle};
pub use types::{SessionEvent, SessionEventKind};
