//! 消息解析：按关键字归类一条逻辑消息
//!
//! 关键字大小写不敏感，方言前缀可省略（`LIST x` 与 `PVD_LIST x` 等价）。
//! 未识别的消息与非法 JSON 负载一律丢弃，不会中断会话。

use domain::{Dialect, ProtocolMessage};
use serde_json::Value;
use tracing::{debug, warn};

/// 单个方言下的消息解析器。
#[derive(Debug, Clone)]
pub struct Interpreter {
    prefix: &'static str,
    new_keyword: String,
    del_keyword: String,
}

impl Interpreter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            prefix: dialect.prefix(),
            new_keyword: format!("NEW_{}", dialect.entity()),
            del_keyword: format!("DEL_{}", dialect.entity()),
        }
    }

    /// 解析一条逻辑消息（单行或重组后的多行块）。
    pub fn interpret(&self, text: &str) -> ProtocolMessage {
        let Some((keyword, rest)) = next_token(text) else {
            return ProtocolMessage::Unrecognized;
        };
        let keyword = keyword.to_ascii_uppercase();
        let keyword = keyword.strip_prefix(self.prefix).unwrap_or(&keyword);

        match keyword {
            "LIST" => ProtocolMessage::List(rest.split_whitespace().map(str::to_string).collect()),
            "ATTRIBUTES" => {
                let Some((pvd_id, json)) = next_token(rest) else {
                    return ProtocolMessage::Unrecognized;
                };
                match parse_json(json) {
                    Some(attributes) => ProtocolMessage::Attributes {
                        pvd_id: pvd_id.to_string(),
                        attributes,
                    },
                    None => {
                        warn!(target: "pvd.protocol", pvd_id = %pvd_id, "attributes_json_invalid");
                        ProtocolMessage::Unrecognized
                    }
                }
            }
            "ATTRIBUTE" => {
                let Some((pvd_id, rest)) = next_token(rest) else {
                    return ProtocolMessage::Unrecognized;
                };
                let Some((name, json)) = next_token(rest) else {
                    return ProtocolMessage::Unrecognized;
                };
                match parse_json(json) {
                    Some(value) => ProtocolMessage::Attribute {
                        pvd_id: pvd_id.to_string(),
                        name: name.to_string(),
                        value,
                    },
                    None => {
                        warn!(
                            target: "pvd.protocol",
                            pvd_id = %pvd_id,
                            attribute = %name,
                            "attribute_json_invalid"
                        );
                        ProtocolMessage::Unrecognized
                    }
                }
            }
            other if other == self.new_keyword => match next_token(rest) {
                Some((pvd_id, _)) => ProtocolMessage::NewPvd(pvd_id.to_string()),
                None => ProtocolMessage::Unrecognized,
            },
            other if other == self.del_keyword => match next_token(rest) {
                Some((pvd_id, _)) => ProtocolMessage::DelPvd(pvd_id.to_string()),
                None => ProtocolMessage::Unrecognized,
            },
            other => {
                debug!(target: "pvd.protocol", keyword = %other, "message_unrecognized");
                ProtocolMessage::Unrecognized
            }
        }
    }
}

/// 切出下一个以空白（含换行）分隔的词，返回 (词, 剩余部分)。
fn next_token(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    match text.find(char::is_whitespace) {
        Some(end) => Some((&text[..end], &text[end..])),
        None => Some((text, "")),
    }
}

fn parse_json(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}
