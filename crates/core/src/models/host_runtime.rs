use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrchestratorError, OrchestratorResult};

/// 主机保留状态
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum HostReservation {
    #[default]
    Unreserved,
    /// 为某个上下文保留
    Context(String),
    /// 为单个任务完全保留
    Exclusive,
}

impl HostReservation {
    pub fn is_reserved(&self) -> bool {
        !matches!(self, HostReservation::Unreserved)
    }

    pub fn is_reserved_for_context(&self, context_id: &str) -> bool {
        matches!(self, HostReservation::Context(id) if id == context_id)
    }
}

/// 主机在线状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HostStatus {
    Online,
    Offline,
}

/// 负载上限：按主机配置的上限与默认上限
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostLoadLimits {
    pub per_host: HashMap<String, u32>,
    pub default_limit: Option<u32>,
}

impl HostLoadLimits {
    pub fn limit_for(&self, host: &str) -> Option<u32> {
        self.per_host.get(host).copied().or(self.default_limit)
    }
}

/// 一个已注册的远程worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostRuntimeEntry {
    pub host_name: String,
    /// 当前累计负载单位
    pub load: u32,
    pub reservation: HostReservation,
    pub registered_at: DateTime<Utc>,
}

impl HostRuntimeEntry {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            load: 0,
            reservation: HostReservation::Unreserved,
            registered_at: Utc::now(),
        }
    }

    pub fn add_load(&mut self, units: u32) {
        self.load = self.load.saturating_add(units);
    }

    /// 负载不能减到零以下
    pub fn remove_load(&mut self, units: u32) -> OrchestratorResult<()> {
        match self.load.checked_sub(units) {
            Some(load) => {
                self.load = load;
                Ok(())
            }
            None => Err(OrchestratorError::Internal(format!(
                "主机 {} 的负载 {} 小于要移除的负载 {}",
                self.host_name, self.load, units
            ))),
        }
    }
}
