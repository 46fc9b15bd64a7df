//! PvD 注册表（内存）
//!
//! 以 PvD 标识为键（区分大小写）。每个条目独占自己的定时器：
//! 条目被删除或清空时定时器随之取消。

use crate::timer::Timer;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// 单个 PvD 的属性与监控状态。
#[derive(Debug)]
pub struct PvdEntry {
    pvd_id: String,
    attributes: Map<String, Value>,
    pub(crate) monitored: bool,
    /// 进行中的拉取令牌
    pub(crate) in_flight: Option<u64>,
    /// 拉取进行中收到了需要立即重拉的更新
    pub(crate) pending_force: bool,
    pub(crate) refetch: Option<Timer>,
    pub(crate) retry: Option<Timer>,
    pub(crate) next_fetch_at: Option<DateTime<Utc>>,
}

impl PvdEntry {
    fn new(pvd_id: &str) -> Self {
        Self {
            pvd_id: pvd_id.to_string(),
            attributes: Map::new(),
            monitored: false,
            in_flight: None,
            pending_force: false,
            refetch: None,
            retry: None,
            next_fetch_at: None,
        }
    }

    pub fn pvd_id(&self) -> &str {
        &self.pvd_id
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn monitored(&self) -> bool {
        self.monitored
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn honor_flag(&self) -> bool {
        domain::honor_flag(&self.attributes)
    }

    pub fn sequence_number(&self) -> Option<&Value> {
        domain::sequence_number(&self.attributes)
    }

    /// 按过期时间安排的下一次拉取时刻。
    pub fn next_fetch_at(&self) -> Option<DateTime<Utc>> {
        self.next_fetch_at
    }

    pub fn refetch_deadline(&self) -> Option<Instant> {
        self.refetch.as_ref().map(Timer::deadline)
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry.as_ref().map(Timer::deadline)
    }

    pub fn has_timer(&self) -> bool {
        self.refetch.is_some() || self.retry.is_some()
    }

    /// 取消并清空全部定时器。
    pub(crate) fn cancel_timers(&mut self) {
        if let Some(timer) = self.refetch.take() {
            timer.cancel();
        }
        if let Some(timer) = self.retry.take() {
            timer.cancel();
        }
        self.next_fetch_at = None;
    }

    /// 停止监控：进行中的拉取结果将被丢弃。
    pub(crate) fn stop(&mut self) {
        self.monitored = false;
        self.in_flight = None;
        self.pending_force = false;
        self.cancel_timers();
    }

    fn clear(&mut self) {
        self.attributes.clear();
        self.stop();
    }

    /// 整体替换属性，返回序列号是否变化。
    fn replace_attributes(&mut self, attributes: Map<String, Value>) -> bool {
        let force_now = domain::sequence_number(&attributes) != self.sequence_number();
        self.attributes = attributes;
        force_now
    }
}

/// PvD 注册表。
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, PvdEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记 PvD；已存在时不做任何事。返回是否为新登记。
    pub fn upsert(&mut self, pvd_id: &str) -> bool {
        if self.entries.contains_key(pvd_id) {
            return false;
        }
        self.entries
            .insert(pvd_id.to_string(), PvdEntry::new(pvd_id));
        debug!(target: "pvd.monitor", pvd_id = %pvd_id, "pvd_registered");
        true
    }

    /// 注销 PvD：清空属性、停止监控、取消定时器并删除条目。
    pub fn remove(&mut self, pvd_id: &str) -> bool {
        match self.entries.remove(pvd_id) {
            Some(mut entry) => {
                entry.clear();
                debug!(target: "pvd.monitor", pvd_id = %pvd_id, "pvd_unregistered");
                true
            }
            None => false,
        }
    }

    /// 清空整张表（普通连接断开时调用），返回被清除的条目数。
    pub fn reset_all(&mut self) -> usize {
        let count = self.entries.len();
        for entry in self.entries.values_mut() {
            entry.clear();
        }
        self.entries.clear();
        count
    }

    /// 整体替换属性集，返回 `Some(force_now)` 表示属性已更新。
    ///
    /// 未知 PvD 或非对象属性集被忽略（JSON 文本在解析阶段已校验）。
    pub fn update_attributes(&mut self, pvd_id: &str, attributes: Value) -> Option<bool> {
        let entry = self.entries.get_mut(pvd_id)?;
        match attributes {
            Value::Object(map) => Some(entry.replace_attributes(map)),
            other => {
                warn!(
                    target: "pvd.monitor",
                    pvd_id = %pvd_id,
                    attributes = %other,
                    "attributes_not_an_object"
                );
                None
            }
        }
    }

    /// 合并单个属性，序列号规则与整体更新相同。
    pub fn merge_attribute(&mut self, pvd_id: &str, name: &str, value: Value) -> Option<bool> {
        let entry = self.entries.get_mut(pvd_id)?;
        let mut attributes = entry.attributes.clone();
        attributes.insert(name.to_string(), value);
        Some(entry.replace_attributes(attributes))
    }

    pub fn get(&self, pvd_id: &str) -> Option<&PvdEntry> {
        self.entries.get(pvd_id)
    }

    pub(crate) fn get_mut(&mut self, pvd_id: &str) -> Option<&mut PvdEntry> {
        self.entries.get_mut(pvd_id)
    }

    pub fn contains(&self, pvd_id: &str) -> bool {
        self.entries.contains_key(pvd_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 已登记的标识（排序后）。
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}
