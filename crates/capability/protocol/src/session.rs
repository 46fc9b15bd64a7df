//! 守护进程会话
//!
//! 一个 [`Session`] 对应一条控制或普通连接。`connect()` 之后后台任务负责：
//! - 按固定间隔重连（无论此前是否成功过）
//! - 连接建立后写出引导命令（控制连接：提升权限 + 创建默认 PvD；普通连接：列表 + 订阅）
//! - 读取字节流并经过分帧、解析后投递事件
//! - 可选的空行保活探测
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let mut session = Session::new(SessionConfig::new("127.0.0.1", 10101, SessionRole::Regular));
//! session.on(SessionEventKind::List, |event| println!("{:?}", event));
//! let handle = session.connect();
//! handle.send(PvdCommand::GetAttributes("a.example".to_string()))?;
//! ```

use crate::command::PvdCommand;
use crate::error::ProtocolError;
use crate::framing::FrameDecoder;
use crate::interpreter::Interpreter;
use crate::types::{SessionEvent, SessionEventKind};
use domain::{ConnectionState, Dialect, SessionRole};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

const READ_BUFFER_SIZE: usize = 4096;

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// 会话配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub role: SessionRole,
    pub dialect: Dialect,
    /// 重连间隔，同时也是保活探测间隔
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    pub keepalive: bool,
    /// 控制连接建立后创建的 PvD
    pub default_pvds: Vec<String>,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, role: SessionRole) -> Self {
        Self {
            host: host.into(),
            port,
            role,
            dialect: Dialect::default(),
            reconnect_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(3),
            keepalive: true,
            default_pvds: Vec::new(),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 连接建立后立即写出的命令。
    fn bootstrap(&self) -> Vec<PvdCommand> {
        match self.role {
            SessionRole::Control => std::iter::once(PvdCommand::PromoteControl)
                .chain(self.default_pvds.iter().cloned().map(PvdCommand::CreatePvd))
                .collect(),
            SessionRole::Regular => vec![
                PvdCommand::GetList,
                PvdCommand::SubscribeNotifications,
                PvdCommand::Subscribe("*".to_string()),
            ],
        }
    }
}

/// 尚未连接的会话，用于注册监听器。
pub struct Session {
    config: SessionConfig,
    listeners: Vec<(SessionEventKind, Listener)>,
    attribute_listeners: Vec<(String, Listener)>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            listeners: Vec::new(),
            attribute_listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 注册某一类事件的监听器。
    pub fn on<F>(&mut self, kind: SessionEventKind, listener: F) -> &mut Self
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.listeners.push((kind, Box::new(listener)));
        self
    }

    /// 注册只针对某个属性名的单属性事件监听器。
    pub fn on_attribute<F>(&mut self, name: impl Into<String>, listener: F) -> &mut Self
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.attribute_listeners.push((name.into(), Box::new(listener)));
        self
    }

    /// 启动后台连接循环，立即返回句柄。
    ///
    /// 必须在 tokio 运行时中调用。
    pub fn connect(self) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();
        let role = self.config.role;
        let dialect = self.config.dialect;

        let worker = SessionLoop {
            addr: self.config.addr(),
            config: self.config,
            listeners: self.listeners,
            attribute_listeners: self.attribute_listeners,
            commands: command_rx,
            commands_open: true,
            state: state_tx,
            cancel: cancel.clone(),
            failure_reported: false,
        };
        tokio::spawn(worker.run());

        SessionHandle {
            role,
            dialect,
            commands: command_tx,
            state: state_rx,
            cancel,
        }
    }
}

/// 运行中会话的句柄，可克隆。
#[derive(Debug, Clone)]
pub struct SessionHandle {
    role: SessionRole,
    dialect: Dialect,
    commands: mpsc::UnboundedSender<PvdCommand>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 发送命令；未连接时直接丢弃，不跨重连排队。
    pub fn send(&self, command: PvdCommand) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::ChannelClosed);
        }
        if self.state() != ConnectionState::Connected {
            pvd_telemetry::record_command_dropped();
            debug!(
                target: "pvd.session",
                role = %self.role,
                command = command.name(),
                "command_dropped_not_connected"
            );
            return Ok(());
        }
        self.commands
            .send(command)
            .map_err(|_| ProtocolError::ChannelClosed)
    }

    /// 等待会话进入指定状态。
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ProtocolError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ProtocolError::ChannelClosed)
    }

    /// 停止连接循环并关闭连接。
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 一条连接的结束方式
enum ServeEnd {
    /// 本地关闭
    Closed,
    /// 对端关闭或读写出错
    Lost(ProtocolError),
}

struct SessionLoop {
    addr: String,
    config: SessionConfig,
    listeners: Vec<(SessionEventKind, Listener)>,
    attribute_listeners: Vec<(String, Listener)>,
    commands: mpsc::UnboundedReceiver<PvdCommand>,
    commands_open: bool,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    /// 当前失败序列是否已经报告过
    failure_reported: bool,
}

impl SessionLoop {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let role = self.config.role;

        loop {
            self.state.send_replace(ConnectionState::Connecting);
            debug!(target: "pvd.session", role = %role, addr = %self.addr, "session_connecting");

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = tokio::time::timeout(
                    self.config.connect_timeout,
                    TcpStream::connect(self.addr.as_str()),
                ) => result,
            };

            match attempt {
                Ok(Ok(stream)) => {
                    self.failure_reported = false;
                    let connection_id = pvd_telemetry::new_connection_id();
                    let span = info_span!(
                        target: "pvd.session",
                        "connection",
                        role = %role,
                        connection_id = %connection_id
                    );
                    let end = self.serve(stream).instrument(span).await;
                    self.state.send_replace(ConnectionState::Disconnected);
                    match end {
                        ServeEnd::Closed => break,
                        ServeEnd::Lost(error) => {
                            info!(target: "pvd.session", role = %role, error = %error, "session_disconnected");
                            self.emit(&SessionEvent::Disconnected);
                            self.report_failure(&error);
                        }
                    }
                }
                Ok(Err(error)) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    self.report_failure(&ProtocolError::Io(error));
                }
                Err(_) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    self.report_failure(&ProtocolError::Timeout(format!(
                        "connect to {} exceeded {}ms",
                        self.addr,
                        self.config.connect_timeout.as_millis()
                    )));
                }
            }

            if !self.wait_before_reconnect().await {
                break;
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        debug!(target: "pvd.session", role = %role, "session_closed");
    }

    /// 服务一条已建立的连接，直到关闭或出错。
    async fn serve(&mut self, stream: TcpStream) -> ServeEnd {
        let (mut reader, mut writer) = stream.into_split();
        let cancel = self.cancel.clone();

        // 未连接期间进入通道的命令一律丢弃，必须在切换为已连接之前完成
        while let Ok(command) = self.commands.try_recv() {
            self.drop_command(&command);
        }

        self.state.send_replace(ConnectionState::Connected);
        pvd_telemetry::record_connection_established();
        info!(target: "pvd.session", addr = %self.addr, "session_connected");
        self.emit(&SessionEvent::Connected);

        for command in self.config.bootstrap() {
            if let Err(error) = self.write_command(&mut writer, &command).await {
                return ServeEnd::Lost(error);
            }
        }

        let mut decoder = FrameDecoder::new(self.config.dialect);
        let interpreter = Interpreter::new(self.config.dialect);
        let period = self.config.reconnect_interval;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ServeEnd::Closed,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        return ServeEnd::Lost(ProtocolError::Connection(
                            "connection closed by peer".to_string(),
                        ));
                    }
                    Ok(n) => {
                        for line in decoder.split_lines(&buf[..n]) {
                            self.handle_line(&mut decoder, &interpreter, &line);
                        }
                    }
                    Err(error) => return ServeEnd::Lost(ProtocolError::Io(error)),
                },
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => {
                        if let Err(error) = self.write_command(&mut writer, &command).await {
                            return ServeEnd::Lost(error);
                        }
                    }
                    None => self.commands_open = false,
                },
                _ = keepalive.tick(), if self.config.keepalive => {
                    if let Err(error) = self.write_command(&mut writer, &PvdCommand::KeepAlive).await {
                        return ServeEnd::Lost(error);
                    }
                }
            }
        }
    }

    fn handle_line(&self, decoder: &mut FrameDecoder, interpreter: &Interpreter, line: &str) {
        pvd_telemetry::record_line_decoded();
        if !line.is_empty() {
            self.emit(&SessionEvent::Data(line.to_string()));
        }

        let Some(frame) = decoder.feed_line(line) else {
            return;
        };
        match SessionEvent::from_message(interpreter.interpret(frame.text())) {
            Some(event) => self.emit(&event),
            None => {
                pvd_telemetry::record_message_dropped();
                debug!(target: "pvd.session", message = %frame.text(), "message_dropped");
            }
        }
    }

    async fn write_command(
        &self,
        writer: &mut OwnedWriteHalf,
        command: &PvdCommand,
    ) -> Result<(), ProtocolError> {
        writer
            .write_all(command.encode(self.config.dialect).as_bytes())
            .await?;
        writer.flush().await?;
        pvd_telemetry::record_command_sent();
        debug!(target: "pvd.session", command = command.name(), "command_sent");
        Ok(())
    }

    fn drop_command(&self, command: &PvdCommand) {
        pvd_telemetry::record_command_dropped();
        debug!(
            target: "pvd.session",
            role = %self.config.role,
            command = command.name(),
            "command_dropped_not_connected"
        );
    }

    /// 记录一次失败；同一失败序列只告警并投递一次 error 事件。
    fn report_failure(&mut self, error: &ProtocolError) {
        pvd_telemetry::record_connection_failure();
        if self.failure_reported {
            debug!(target: "pvd.session", role = %self.config.role, error = %error, "session_retry_failed");
            return;
        }
        self.failure_reported = true;
        warn!(
            target: "pvd.session",
            role = %self.config.role,
            addr = %self.addr,
            error = %error,
            "session_unavailable"
        );
        self.emit(&SessionEvent::Error(error.to_string()));
    }

    /// 等待一个重连间隔，期间到达的命令被丢弃。返回 false 表示会话已关闭。
    async fn wait_before_reconnect(&mut self) -> bool {
        let cancel = self.cancel.clone();
        let sleep = tokio::time::sleep(self.config.reconnect_interval);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.drop_command(&command),
                    None => self.commands_open = false,
                },
            }
        }
    }

    fn emit(&self, event: &SessionEvent) {
        let kind = event.kind();
        for (_, listener) in self.listeners.iter().filter(|(k, _)| *k == kind) {
            listener(event);
        }
        if let SessionEvent::PvdAttribute { name, .. } = event {
            for (_, listener) in self
                .attribute_listeners
                .iter()
                .filter(|(attribute, _)| attribute == name)
            {
                listener(event);
            }
        }
    }
}
