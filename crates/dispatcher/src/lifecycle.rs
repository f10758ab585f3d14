use std::collections::{BTreeSet, VecDeque};

use tracing::{debug, info, warn};

use orchestrator_core::models::{
    Checkpoint, CheckpointTemplate, HostReservation, OrchestratorEvent, TaskEntry,
    TaskExclusivity, TaskKey, TaskState, CHECKPOINT_TASK_FINISHED, EXIT_CODE_ERROR,
};

use crate::orchestrator::Shared;
use crate::registry::Registry;

/// 任务完成事件，由生命周期管理器统一排空
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub key: TaskKey,
    pub state: TaskState,
}

impl Completion {
    pub fn new(key: TaskKey, state: TaskState) -> Self {
        Self { key, state }
    }

    pub fn aborted(key: TaskKey) -> Self {
        Self::new(key, TaskState::Aborted)
    }
}

/// 持锁应用完成事件后，需要在锁外处理的工作
#[derive(Debug, Default)]
struct Settled {
    /// 因保留上限被移出注册表的任务
    evicted: Vec<TaskEntry>,
    /// 超出关闭上下文保留数量、需要删除的上下文
    expired_contexts: Vec<String>,
}

/// 生命周期管理器
///
/// 完成事件进入工作队列；处理一个事件可能触发新的调度轮次，
/// 调度轮次产生的中止事件追加到同一个队列，而不是递归处理。
#[derive(Debug, Default)]
pub struct LifecycleManager;

impl LifecycleManager {
    pub fn new() -> Self {
        Self
    }

    /// 排空完成事件队列
    pub(crate) async fn settle(
        &self,
        shared: &Shared,
        completions: impl IntoIterator<Item = Completion>,
    ) {
        let mut queue: VecDeque<Completion> = completions.into_iter().collect();

        while let Some(completion) = queue.pop_front() {
            let settled = {
                let mut registry = shared.registry.lock().await;
                self.apply(&mut registry, &completion)
            };
            let Some(settled) = settled else {
                continue;
            };
            let Completion { key, state } = completion;

            let removed = shared.services.unregister_task(&key).await;
            if removed > 0 {
                debug!("任务 {} 结束，已注销 {} 个服务", key, removed);
            }
            // 没有订阅者时发送失败是正常的
            let _ = shared.events.send(OrchestratorEvent::TaskFinished {
                key: key.clone(),
                state,
            });
            shared.metrics.record_task_completed(state);
            shared.logger.log_task_reached_end(&key, state).await;
            shared.waiter.notify_all();

            // 淘汰任务的远程清理先于新的调度轮次完成
            for task in settled.evicted {
                self.discard_evicted(shared, task).await;
            }
            queue.extend(shared.scheduler.run(shared).await);

            for context_id in settled.expired_contexts {
                self.delete_inactive_context(shared, &context_id).await;
            }
        }
    }

    /// 持锁应用单个完成事件；任务不存在或已结束时返回 None
    fn apply(&self, registry: &mut Registry, completion: &Completion) -> Option<Settled> {
        let key = &completion.key;
        let task = registry.tasks.get_mut(key)?;
        if task.state.is_terminal() {
            debug!("任务 {} 已处于终止状态 {}，忽略完成事件", key, task.state);
            return None;
        }
        if let Err(e) = task.set_state(completion.state) {
            warn!("任务 {} 无法进入 {}: {}", key, completion.state, e);
            return None;
        }
        let host = task.host_name.clone();
        let exclusivity = task.exclusivity;
        let load_units = task.load_units;

        if completion.state == TaskState::Aborted {
            let finished = CheckpointTemplate::named(CHECKPOINT_TASK_FINISHED)
                .with_task(&key.task_id)
                .with_context(&key.context_id);
            if !registry.has_checkpoint(&finished) {
                registry.append_checkpoint(Checkpoint::new(
                    CHECKPOINT_TASK_FINISHED,
                    key.task_id.clone(),
                    key.context_id.clone(),
                    host.clone(),
                    Some(EXIT_CODE_ERROR.to_string()),
                ));
            }
        }

        if let Some(host) = host {
            Self::release_host(registry, &host, key, exclusivity, load_units);
        }

        Some(Settled {
            evicted: Self::enforce_retention(registry, &key.context_id),
            expired_contexts: registry.note_finished_context(&key.context_id),
        })
    }

    /// 释放任务在主机上的保留状态与负载
    ///
    /// CONTEXT_EXCLUSIVE：同一上下文仍有其他独占任务占用主机时保留，否则释放。
    /// EXCLUSIVE：无条件释放。
    pub(crate) fn release_host(
        registry: &mut Registry,
        host: &str,
        key: &TaskKey,
        exclusivity: TaskExclusivity,
        load_units: u32,
    ) {
        let context_still_holds = registry.occupants(host).any(|t| {
            t.key() != *key
                && t.context_id == key.context_id
                && t.exclusivity != TaskExclusivity::NonExclusive
        });

        let Some(entry) = registry.hosts.get_mut(host) else {
            debug!("主机 {} 已注销，无需释放任务 {} 的资源", host, key);
            return;
        };
        match exclusivity {
            TaskExclusivity::ContextExclusive
                if entry.reservation.is_reserved_for_context(&key.context_id)
                    && !context_still_holds =>
            {
                entry.reservation = HostReservation::Unreserved;
                debug!("主机 {} 的上下文保留已释放", host);
            }
            TaskExclusivity::Exclusive if entry.reservation == HostReservation::Exclusive => {
                entry.reservation = HostReservation::Unreserved;
                debug!("主机 {} 的独占保留已释放", host);
            }
            _ => {}
        }
        if let Err(e) = entry.remove_load(load_units) {
            warn!("释放主机 {} 的负载失败: {}", host, e);
        }
    }

    /// 超出保留上限的 FINISHED 任务（最早准入优先）移出注册表
    fn enforce_retention(registry: &mut Registry, context_id: &str) -> Vec<TaskEntry> {
        let Some(limit) = registry
            .contexts
            .get(context_id)
            .and_then(|context| context.finished_tasks_kept)
        else {
            return Vec::new();
        };

        let finished: Vec<TaskKey> = registry
            .tasks_in_context(context_id)
            .into_iter()
            .filter(|t| t.state == TaskState::Finished)
            .map(|t| t.key())
            .collect();
        let excess = finished.len().saturating_sub(limit);

        finished
            .iter()
            .take(excess)
            .filter_map(|key| {
                let task = registry.remove_task(key, false)?;
                registry.hold(key);
                Some(task)
            })
            .inspect(|task| debug!("上下文 {} 超出保留上限，淘汰任务 {}", context_id, task.key()))
            .collect()
    }

    async fn discard_evicted(&self, shared: &Shared, task: TaskEntry) {
        if let Some(host) = &task.host_name {
            if let Err(e) = shared
                .transport
                .destroy_task(host, &task.task_id, &task.context_id)
                .await
            {
                warn!("主机 {} 清理任务 {} 失败: {}", host, task.key(), e);
            }
        }
        if let Err(e) = shared
            .log_storage
            .remove_task(&task.context_id, &task.task_id)
            .await
        {
            warn!("删除任务 {} 的日志失败: {}", task.key(), e);
        }
        shared.release_hold(&task.key()).await;
    }

    /// 删除上下文：清理远程任务与上下文状态、日志，最后从注册表中遗忘
    ///
    /// 单台主机的清理失败只记录日志，不影响其他主机。系统上下文不受影响。
    pub(crate) async fn delete_inactive_context(&self, shared: &Shared, context_id: &str) {
        let removed = {
            let mut registry = shared.registry.lock().await;
            let removed = match registry.remove_context_by_force(context_id) {
                Ok(removed) => removed,
                Err(e) => {
                    debug!("上下文 {} 已不存在: {}", context_id, e);
                    return;
                }
            };
            for task in removed.tasks.iter().filter(|t| !t.state.is_terminal()) {
                if let Some(host) = &task.host_name {
                    Self::release_host(
                        &mut registry,
                        host,
                        &task.key(),
                        task.exclusivity,
                        task.load_units,
                    );
                }
            }
            removed
        };
        if removed.context.is_none() {
            return;
        }

        let hosts: BTreeSet<&str> = removed
            .tasks
            .iter()
            .filter_map(|t| t.host_name.as_deref())
            .collect();
        for task in &removed.tasks {
            let Some(host) = &task.host_name else {
                continue;
            };
            if let Err(e) = shared
                .transport
                .destroy_task(host, &task.task_id, &task.context_id)
                .await
            {
                warn!("主机 {} 清理任务 {} 失败: {}", host, task.key(), e);
            }
        }
        for host in hosts {
            if let Err(e) = shared.transport.delete_context(host, context_id).await {
                warn!("主机 {} 删除上下文 {} 失败: {}", host, context_id, e);
            }
        }
        if let Err(e) = shared.log_storage.remove_context(context_id).await {
            warn!("删除上下文 {} 的日志失败: {}", context_id, e);
        }
        shared.services.unregister_context(context_id).await;
        shared.logger.log_context_deleted(context_id).await;
        info!(
            "上下文 {} 已删除 ({} 个任务)",
            context_id,
            removed.tasks.len()
        );
        shared.waiter.notify_all();
    }
}
