//! 监控调度
//!
//! 单任务事件循环：会话事件、定时器触发、拉取完成都以 [`MonitorEvent`]
//! 投递到同一个通道，注册表只在这里被修改。
//!
//! ## 每个 PvD 的规则
//!
//! - hFlag 为真：未监控或序列号变化时立即拉取（先取消已有定时器）
//! - hFlag 为假：停止监控并在控制连接上删除 extraInfo
//! - 拉取成功：回写 extraInfo，按过期时间安排下一次拉取
//! - 拉取失败（网络、状态码、非 JSON）：固定延迟后重试
//!
//! 异步结果都带有令牌，令牌与注册表中记录的不一致即视为过期，直接忽略。

use crate::error::MonitorError;
use crate::fetcher::{ExtraInfoFetcher, FetchResponse, extra_info_url};
use crate::registry::Registry;
use crate::schedule::{NextFetch, expiration_hint, plan_next_fetch};
use crate::timer::Timer;
use chrono::Utc;
use pvd_protocol::{PvdCommand, Session, SessionEvent, SessionEventKind, SessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 命令出口（控制连接或普通连接）。
pub trait CommandSink: Send + Sync {
    fn submit(&self, command: PvdCommand);
}

impl CommandSink for SessionHandle {
    fn submit(&self, command: PvdCommand) {
        let name = command.name();
        if let Err(error) = self.send(command) {
            warn!(
                target: "pvd.monitor",
                role = %self.role(),
                command = name,
                error = %error,
                "command_submit_failed"
            );
        }
    }
}

/// 监控配置
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub development: bool,
    pub dev_url_template: String,
    pub retry_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            development: false,
            dev_url_template: "http://localhost:8000/{pvd}".to_string(),
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// 投递给监控循环的事件
#[derive(Debug)]
pub enum MonitorEvent {
    /// 普通连接上的会话事件
    Session(SessionEvent),
    TimerFired {
        pvd_id: String,
        timer_id: u64,
    },
    FetchCompleted {
        pvd_id: String,
        token: u64,
        url: String,
        outcome: Result<FetchResponse, MonitorError>,
    },
}

/// 向监控循环投递事件的句柄，可克隆。
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    events: mpsc::UnboundedSender<MonitorEvent>,
}

impl MonitorHandle {
    pub fn notify(&self, event: SessionEvent) -> Result<(), MonitorError> {
        self.events
            .send(MonitorEvent::Session(event))
            .map_err(|_| MonitorError::Stopped)
    }

    /// 把普通会话的相关事件接入监控循环。
    pub fn attach(&self, session: &mut Session) {
        for kind in [
            SessionEventKind::List,
            SessionEventKind::NewPvd,
            SessionEventKind::DelPvd,
            SessionEventKind::PvdAttributes,
            SessionEventKind::PvdAttribute,
            SessionEventKind::Disconnect,
        ] {
            let handle = self.clone();
            session.on(kind, move |event| {
                if handle.notify(event.clone()).is_err() {
                    debug!(target: "pvd.monitor", event = %kind, "monitor_stopped_event_dropped");
                }
            });
        }
    }
}

/// 监控事件通道
///
/// 普通会话的监听器要在 `connect()` 之前注册，而监控循环又需要会话句柄，
/// 所以先建立通道、接入会话，再用它创建 [`Monitor`]。
#[derive(Debug)]
pub struct MonitorChannel {
    tx: mpsc::UnboundedSender<MonitorEvent>,
    rx: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl MonitorChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            events: self.tx.clone(),
        }
    }
}

impl Default for MonitorChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// 监控循环
pub struct Monitor {
    config: MonitorConfig,
    registry: Registry,
    fetcher: Arc<dyn ExtraInfoFetcher>,
    control: Arc<dyn CommandSink>,
    regular: Arc<dyn CommandSink>,
    events_tx: mpsc::UnboundedSender<MonitorEvent>,
    events_rx: mpsc::UnboundedReceiver<MonitorEvent>,
    next_token: u64,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        fetcher: Arc<dyn ExtraInfoFetcher>,
        control: Arc<dyn CommandSink>,
        regular: Arc<dyn CommandSink>,
    ) -> Self {
        Self::with_channel(MonitorChannel::new(), config, fetcher, control, regular)
    }

    pub fn with_channel(
        channel: MonitorChannel,
        config: MonitorConfig,
        fetcher: Arc<dyn ExtraInfoFetcher>,
        control: Arc<dyn CommandSink>,
        regular: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            config,
            registry: Registry::new(),
            fetcher,
            control,
            regular,
            events_tx: channel.tx,
            events_rx: channel.rx,
            next_token: 0,
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            events: self.events_tx.clone(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 运行直到取消；退出前取消全部定时器。
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(target: "pvd.monitor", development = self.config.development, "monitor_started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => self.process(event),
                    None => break,
                },
            }
        }
        let cleared = self.registry.reset_all();
        info!(target: "pvd.monitor", cleared, "monitor_stopped");
    }

    /// 等待并处理下一个事件。
    pub async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.process(event);
                true
            }
            None => false,
        }
    }

    /// 处理一个已到达的事件（没有则立即返回 false）。
    pub fn try_step(&mut self) -> bool {
        match self.events_rx.try_recv() {
            Ok(event) => {
                self.process(event);
                true
            }
            Err(_) => false,
        }
    }

    pub fn process(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Session(event) => self.on_session_event(event),
            MonitorEvent::TimerFired { pvd_id, timer_id } => self.on_timer(&pvd_id, timer_id),
            MonitorEvent::FetchCompleted {
                pvd_id,
                token,
                url,
                outcome,
            } => self.on_fetch_completed(&pvd_id, token, &url, outcome),
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::List(ids) => {
                for pvd_id in ids {
                    self.discover(&pvd_id);
                }
            }
            SessionEvent::NewPvd(pvd_id) => self.discover(&pvd_id),
            SessionEvent::DelPvd(pvd_id) => {
                if self.registry.remove(&pvd_id) {
                    info!(target: "pvd.monitor", pvd_id = %pvd_id, "pvd_removed");
                }
            }
            SessionEvent::PvdAttributes { pvd_id, attributes } => {
                if let Some(force_now) = self.registry.update_attributes(&pvd_id, attributes) {
                    self.evaluate(&pvd_id, force_now);
                }
            }
            SessionEvent::PvdAttribute {
                pvd_id,
                name,
                value,
            } => {
                if let Some(force_now) = self.registry.merge_attribute(&pvd_id, &name, value) {
                    self.evaluate(&pvd_id, force_now);
                }
            }
            SessionEvent::Disconnected => {
                let cleared = self.registry.reset_all();
                info!(target: "pvd.monitor", cleared, "registry_reset");
            }
            SessionEvent::Connected | SessionEvent::Error(_) | SessionEvent::Data(_) => {}
        }
    }

    /// 新出现的 PvD：登记并查询属性。
    fn discover(&mut self, pvd_id: &str) {
        if self.registry.upsert(pvd_id) {
            self.regular
                .submit(PvdCommand::GetAttributes(pvd_id.to_string()));
        }
    }

    /// 属性更新后重新判断是否需要监控。
    fn evaluate(&mut self, pvd_id: &str, force_now: bool) {
        let Some(entry) = self.registry.get_mut(pvd_id) else {
            return;
        };

        if entry.honor_flag() {
            if force_now || !entry.monitored {
                entry.monitored = true;
                self.retrieve(pvd_id);
            }
            return;
        }

        if entry.monitored {
            entry.stop();
            info!(target: "pvd.monitor", pvd_id = %pvd_id, "monitoring_stopped");
        }
        // 无论之前是否写入过都删除
        self.control.submit(PvdCommand::UnsetAttribute {
            pvd_id: pvd_id.to_string(),
            name: domain::EXTRA_INFO.to_string(),
        });
    }

    /// 开始一次拉取；已有拉取进行中时只记下需要立即重拉。
    fn retrieve(&mut self, pvd_id: &str) {
        let token = self.allocate_token();
        let Some(entry) = self.registry.get_mut(pvd_id) else {
            return;
        };
        if !entry.monitored {
            return;
        }

        entry.cancel_timers();
        if entry.in_flight.is_some() {
            entry.pending_force = true;
            debug!(target: "pvd.fetch", pvd_id = %pvd_id, "fetch_already_in_flight");
            return;
        }
        entry.in_flight = Some(token);

        let url = extra_info_url(
            self.config.development,
            &self.config.dev_url_template,
            pvd_id,
        );
        info!(target: "pvd.fetch", pvd_id = %pvd_id, url = %url, "extra_info_fetch_started");

        let fetcher = self.fetcher.clone();
        let events = self.events_tx.clone();
        let pvd_id = pvd_id.to_string();
        tokio::spawn(async move {
            let outcome = fetcher.fetch(&url).await;
            let _ = events.send(MonitorEvent::FetchCompleted {
                pvd_id,
                token,
                url,
                outcome,
            });
        });
    }

    fn on_fetch_completed(
        &mut self,
        pvd_id: &str,
        token: u64,
        url: &str,
        outcome: Result<FetchResponse, MonitorError>,
    ) {
        let Some(entry) = self.registry.get_mut(pvd_id) else {
            debug!(target: "pvd.fetch", pvd_id = %pvd_id, "fetch_result_discarded_unknown_pvd");
            return;
        };
        if entry.in_flight != Some(token) {
            debug!(target: "pvd.fetch", pvd_id = %pvd_id, token, "fetch_result_discarded_stale");
            return;
        }
        entry.in_flight = None;
        if !entry.monitored {
            debug!(target: "pvd.fetch", pvd_id = %pvd_id, "fetch_result_discarded_unmonitored");
            return;
        }

        let (document, header) = match outcome.and_then(FetchResponse::into_document) {
            Ok(parsed) => parsed,
            Err(error) => {
                pvd_telemetry::record_fetch_failure();
                entry.pending_force = false;
                warn!(
                    target: "pvd.fetch",
                    pvd_id = %pvd_id,
                    url = %url,
                    error = %error,
                    "extra_info_fetch_failed"
                );
                self.schedule_retry(pvd_id);
                return;
            }
        };
        pvd_telemetry::record_fetch_success();
        let force_again = std::mem::take(&mut entry.pending_force);

        let hint = expiration_hint(&document, header.as_deref());
        self.control.submit(PvdCommand::SetAttribute {
            pvd_id: pvd_id.to_string(),
            name: domain::EXTRA_INFO.to_string(),
            value: document,
        });
        debug!(target: "pvd.fetch", pvd_id = %pvd_id, expires = ?hint, "extra_info_forwarded");

        if force_again {
            self.retrieve(pvd_id);
            return;
        }

        match plan_next_fetch(hint.as_deref(), Utc::now()) {
            NextFetch::At(at) => self.schedule_refetch(pvd_id, at),
            NextFetch::Retry => {
                warn!(
                    target: "pvd.monitor",
                    pvd_id = %pvd_id,
                    expires = ?hint,
                    "expiration_unusable"
                );
                self.schedule_retry(pvd_id);
            }
            NextFetch::Idle => {
                debug!(target: "pvd.monitor", pvd_id = %pvd_id, "monitoring_idle_no_expiration");
            }
        }
    }

    fn on_timer(&mut self, pvd_id: &str, timer_id: u64) {
        let Some(entry) = self.registry.get_mut(pvd_id) else {
            return;
        };
        let matches = |slot: &Option<Timer>| slot.as_ref().is_some_and(|t| t.id() == timer_id);
        if matches(&entry.refetch) {
            entry.refetch = None;
            entry.next_fetch_at = None;
        } else if matches(&entry.retry) {
            entry.retry = None;
        } else {
            debug!(target: "pvd.monitor", pvd_id = %pvd_id, timer_id, "timer_stale");
            return;
        }
        if entry.monitored {
            self.retrieve(pvd_id);
        }
    }

    fn schedule_retry(&mut self, pvd_id: &str) {
        let delay = self.config.retry_delay;
        let Some(timer) = self.arm_timer(pvd_id, Instant::now() + delay) else {
            return;
        };
        if let Some(entry) = self.registry.get_mut(pvd_id) {
            entry.cancel_timers();
            entry.retry = Some(timer);
            pvd_telemetry::record_retry_scheduled();
            info!(
                target: "pvd.monitor",
                pvd_id = %pvd_id,
                delay_ms = delay.as_millis() as u64,
                "retry_scheduled"
            );
        }
    }

    fn schedule_refetch(&mut self, pvd_id: &str, at: chrono::DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let Some(timer) = self.arm_timer(pvd_id, Instant::now() + delay) else {
            return;
        };
        if let Some(entry) = self.registry.get_mut(pvd_id) {
            entry.cancel_timers();
            entry.refetch = Some(timer);
            entry.next_fetch_at = Some(at);
            pvd_telemetry::record_refetch_scheduled();
            info!(
                target: "pvd.monitor",
                pvd_id = %pvd_id,
                at = %at.to_rfc3339(),
                "refetch_scheduled"
            );
        }
    }

    fn arm_timer(&mut self, pvd_id: &str, deadline: Instant) -> Option<Timer> {
        if !self.registry.contains(pvd_id) {
            return None;
        }
        let timer_id = self.allocate_token();
        let events = self.events_tx.clone();
        let pvd_id = pvd_id.to_string();
        Some(Timer::spawn(timer_id, deadline, move || {
            let _ = events.send(MonitorEvent::TimerFired { pvd_id, timer_id });
        }))
    }

    fn allocate_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}
