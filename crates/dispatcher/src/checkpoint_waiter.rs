use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::debug;

use orchestrator_core::{
    models::{Checkpoint, CheckpointTemplate},
    OrchestratorError, OrchestratorResult,
};

use crate::registry::Registry;

/// 表示无限等待的毫秒值
pub const INFINITE_TIMEOUT_MILLIS: i64 = -1;

/// 检查点查询的等待时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    Infinite,
    After(Duration),
}

impl WaitTimeout {
    /// 负数表示无限等待，0 表示只查询一次
    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            WaitTimeout::Infinite
        } else {
            WaitTimeout::After(Duration::from_millis(millis as u64))
        }
    }
}

/// 检查点等待器
///
/// 使用独立于注册表锁的 watch 通道广播“检查点集合可能已变化”。
/// 等待方先标记当前代数再查询注册表，因此查询之后的任何通知都不会丢失。
pub struct CheckpointWaiter {
    generation: watch::Sender<u64>,
}

impl CheckpointWaiter {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    /// 唤醒所有等待者
    pub fn notify_all(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    pub fn waiter_count(&self) -> usize {
        self.generation.receiver_count()
    }

    /// 阻塞查询：直到出现匹配的检查点、超时（返回空）或检查点已不可能到达（返回错误）
    pub async fn look(
        &self,
        registry: &Mutex<Registry>,
        template: &CheckpointTemplate,
        timeout: WaitTimeout,
    ) -> OrchestratorResult<Vec<Checkpoint>> {
        let started = Instant::now();
        let mut changes = self.generation.subscribe();

        loop {
            changes.borrow_and_update();
            {
                let registry = registry.lock().await;
                let found = registry.find_checkpoints(template);
                if !found.is_empty() {
                    return Ok(found);
                }
                if !registry.is_checkpoint_reachable(template) {
                    return Err(OrchestratorError::CheckpointUnreachable {
                        name: template.display_name(),
                        task_id: template.task_id.clone(),
                        context_id: template.context_id.clone(),
                    });
                }
            }

            match timeout {
                WaitTimeout::Infinite => {
                    if changes.changed().await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                WaitTimeout::After(limit) => {
                    let remaining = limit.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        debug!("检查点 {} 等待超时", template.display_name());
                        return Ok(Vec::new());
                    }
                    match tokio::time::timeout(remaining, changes.changed()).await {
                        Ok(Ok(())) | Err(_) => {}
                        Ok(Err(_)) => return Ok(Vec::new()),
                    }
                }
            }
        }
    }
}

impl Default for CheckpointWaiter {
    fn default() -> Self {
        Self::new()
    }
}
