use std::collections::HashMap;

use rand::seq::SliceRandom;
use tracing::debug;

use orchestrator_core::models::{
    HostLoadLimits, HostReservation, HostRuntimeEntry, HostStatus, TaskExclusivity,
};

use crate::registry::Registry;

/// 负载处理器：判断主机能否吸收任务声明的负载，接受时立即记录负载
pub trait LoadHandler: Send + Sync {
    fn try_accept_load(&self, host: &mut HostRuntimeEntry, load_units: u32) -> bool;

    fn name(&self) -> &str;
}

/// 没有集群负载服务时使用：总是接受，只记录负载
#[derive(Debug, Default)]
pub struct NullLoadHandler;

impl LoadHandler for NullLoadHandler {
    fn try_accept_load(&self, host: &mut HostRuntimeEntry, load_units: u32) -> bool {
        host.add_load(load_units);
        true
    }

    fn name(&self) -> &str {
        "Null"
    }
}

/// 按主机负载上限接受负载
#[derive(Debug)]
pub struct LimitLoadHandler {
    limits: HostLoadLimits,
    /// 负载服务未给出默认上限时的后备值（内存启发式）
    fallback_limit: u32,
}

impl LimitLoadHandler {
    pub fn new(limits: HostLoadLimits, fallback_limit: u32) -> Self {
        Self {
            limits,
            fallback_limit,
        }
    }

    pub fn limit_for(&self, host: &str) -> u32 {
        self.limits.limit_for(host).unwrap_or(self.fallback_limit)
    }
}

impl LoadHandler for LimitLoadHandler {
    fn try_accept_load(&self, host: &mut HostRuntimeEntry, load_units: u32) -> bool {
        let limit = self.limit_for(&host.host_name);
        host.add_load(load_units);
        if host.load > limit {
            // 回滚
            host.load -= load_units;
            debug!(
                "主机 {} 负载 {} + {} 超出上限 {}",
                host.host_name, host.load, load_units, limit
            );
            return false;
        }
        true
    }

    fn name(&self) -> &str {
        "Limit"
    }
}

/// 一次调度轮次开始时获取的集群快照
pub struct FleetSnapshot {
    /// None 表示没有主机管理器，所有已注册主机视为在线
    pub statuses: Option<HashMap<String, HostStatus>>,
    pub load_handler: Box<dyn LoadHandler>,
}

impl FleetSnapshot {
    pub fn unmanaged() -> Self {
        Self {
            statuses: None,
            load_handler: Box::new(NullLoadHandler),
        }
    }

    pub fn is_online(&self, host: &str) -> bool {
        match &self.statuses {
            None => true,
            Some(statuses) => statuses.get(host) == Some(&HostStatus::Online),
        }
    }
}

/// 选择请求
#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    pub context_id: &'a str,
    pub exclusivity: TaskExclusivity,
    pub load_units: u32,
}

/// 主机选择器
#[derive(Debug, Default)]
pub struct HostSelector;

impl HostSelector {
    pub fn new() -> Self {
        Self
    }

    /// 从候选列表中选出一台主机，选中的主机被移到列表最前面
    ///
    /// 选中时负载已经记录到主机上；没有合适主机不是错误。
    pub fn select(
        &self,
        registry: &mut Registry,
        request: SelectionRequest<'_>,
        candidates: &mut Vec<String>,
        fleet: &FleetSnapshot,
    ) -> Option<String> {
        candidates.shuffle(&mut registry.rng);

        let mut selected = None;
        for (index, name) in candidates.iter().enumerate() {
            if !fleet.is_online(name) {
                debug!("主机 {} 不在线，跳过", name);
                continue;
            }
            let Some(entry) = registry.hosts.get(name) else {
                debug!("主机 {} 未注册，跳过", name);
                continue;
            };
            if !Self::exclusivity_allows(registry, entry, &request) {
                debug!(
                    "主机 {} 的保留状态 {:?} 不允许 {:?} 任务",
                    name, entry.reservation, request.exclusivity
                );
                continue;
            }
            let Some(entry) = registry.hosts.get_mut(name) else {
                continue;
            };
            if fleet.load_handler.try_accept_load(entry, request.load_units) {
                selected = Some(index);
                break;
            }
        }

        let index = selected?;
        let host = candidates.remove(index);
        candidates.insert(0, host.clone());
        debug!(
            "选择主机 {} (负载处理器: {})",
            host,
            fleet.load_handler.name()
        );
        Some(host)
    }

    fn exclusivity_allows(
        registry: &Registry,
        entry: &HostRuntimeEntry,
        request: &SelectionRequest<'_>,
    ) -> bool {
        let host = entry.host_name.as_str();
        match request.exclusivity {
            TaskExclusivity::NonExclusive => match &entry.reservation {
                HostReservation::Unreserved => true,
                HostReservation::Context(id) => id == request.context_id,
                HostReservation::Exclusive => false,
            },
            TaskExclusivity::ContextExclusive => match &entry.reservation {
                HostReservation::Unreserved => registry
                    .occupants(host)
                    .all(|t| t.context_id == request.context_id),
                HostReservation::Context(id) => id == request.context_id,
                HostReservation::Exclusive => false,
            },
            TaskExclusivity::Exclusive => {
                !entry.reservation.is_reserved() && registry.occupants(host).next().is_none()
            }
        }
    }
}
