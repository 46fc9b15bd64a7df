//! 分帧：字节流 → 行 → 逻辑消息
//!
//! 两种状态：
//! - `Single`：每行立即作为一条候选消息输出
//! - `Collecting`：收集多行块，遇到结束标记或声明的行数收满后整体输出
//!
//! 解码器不持有线程、不阻塞，只在调用方推入数据时推进状态。

use domain::Dialect;

/// 一条逻辑消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 单行消息（不含换行符）
    Line(String),
    /// 多行块（块内各行以 `\n` 拼接，不含标记行）
    Block(String),
}

impl Frame {
    pub fn text(&self) -> &str {
        match self {
            Self::Line(text) | Self::Block(text) => text,
        }
    }
}

#[derive(Debug)]
enum DecoderState {
    Single,
    Collecting {
        lines: Vec<String>,
        /// `None`：等待结束标记；`Some(n)`：还需收集 n 行
        remaining: Option<usize>,
    },
}

/// 有状态的分帧器，每条连接一个实例。
#[derive(Debug)]
pub struct FrameDecoder {
    begin_marker: String,
    end_marker: String,
    count_keyword: String,
    /// 尚未遇到换行符的残余字节
    pending: Vec<u8>,
    state: DecoderState,
}

impl FrameDecoder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            begin_marker: dialect.begin_multiline(),
            end_marker: dialect.end_multiline(),
            count_keyword: dialect.multiline_count(),
            pending: Vec::new(),
            state: DecoderState::Single,
        }
    }

    /// 推入一段字节并返回其中完成的逻辑消息。
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.split_lines(chunk)
            .iter()
            .filter_map(|line| self.feed_line(line))
            .collect()
    }

    /// 推入一段字节并返回其中完整的行（去掉 `\n` 与行尾 `\r`）。
    ///
    /// 不完整的末行保留到下一次调用。
    pub fn split_lines(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut raw: Vec<u8> = self.pending.drain(..=pos).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            lines.push(String::from_utf8_lossy(&raw).into_owned());
        }
        lines
    }

    /// 推入一整行（不含换行符），若完成一条逻辑消息则返回。
    pub fn feed_line(&mut self, line: &str) -> Option<Frame> {
        // 先检查起始标记：上一个块未正常结束时丢弃其残余内容
        if line == self.begin_marker {
            self.state = DecoderState::Collecting {
                lines: Vec::new(),
                remaining: None,
            };
            return None;
        }

        match &mut self.state {
            DecoderState::Single => {
                if let Some(count) = self.declared_count(line) {
                    if count == 0 {
                        return Some(Frame::Block(String::new()));
                    }
                    self.state = DecoderState::Collecting {
                        lines: Vec::new(),
                        remaining: Some(count),
                    };
                    return None;
                }
                if line.is_empty() || line == self.end_marker {
                    return None;
                }
                Some(Frame::Line(line.to_string()))
            }
            DecoderState::Collecting { lines, remaining } => {
                // 计数块只按行数结束，结束标记也算作内容
                if remaining.is_none() && line == self.end_marker {
                    let block = lines.join("\n");
                    self.state = DecoderState::Single;
                    return Some(Frame::Block(block));
                }
                lines.push(line.to_string());
                if let Some(left) = remaining {
                    *left -= 1;
                    if *left == 0 {
                        let block = lines.join("\n");
                        self.state = DecoderState::Single;
                        return Some(Frame::Block(block));
                    }
                }
                None
            }
        }
    }

    /// 是否正处于多行块中。
    pub fn is_collecting(&self) -> bool {
        matches!(self.state, DecoderState::Collecting { .. })
    }

    /// 丢弃残余字节与未完成的块（连接重建时使用）。
    pub fn reset(&mut self) {
        self.pending.clear();
        self.state = DecoderState::Single;
    }

    /// 解析 `<prefix>MULTILINE <n>` 声明行。
    fn declared_count(&self, line: &str) -> Option<usize> {
        let rest = line.strip_prefix(self.count_keyword.as_str())?;
        if !rest.starts_with([' ', '\t']) {
            return None;
        }
        rest.trim().parse::<usize>().ok()
    }
}
