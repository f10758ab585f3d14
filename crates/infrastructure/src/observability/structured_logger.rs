//! Structured lifecycle logging
//!
//! Every lifecycle fact is emitted as a `tracing` event and appended to the
//! orchestrator's own log trail (system context, `taskmanager` task).

use std::sync::Arc;

use tracing::{info, warn};

use orchestrator_core::{
    models::{TaskKey, TaskState},
    traits::LogStorage,
    SYSTEM_CONTEXT_ID, TASK_MANAGER_TASK_ID,
};

/// 生命周期审计日志
pub struct StructuredLogger {
    storage: Arc<dyn LogStorage>,
}

impl StructuredLogger {
    pub fn new(storage: Arc<dyn LogStorage>) -> Self {
        Self { storage }
    }

    /// 审计失败只记录告警，不影响调用方
    async fn audit(&self, line: String) {
        if let Err(e) = self
            .storage
            .append(SYSTEM_CONTEXT_ID, TASK_MANAGER_TASK_ID, &line)
            .await
        {
            warn!("写入编排器审计日志失败: {}", e);
        }
    }

    pub async fn log_task_submitted(&self, key: &TaskKey, tree_address: &str) {
        info!(
            event = "task_submitted",
            task.id = %key.task_id,
            context.id = %key.context_id,
            task.tree_address = tree_address,
            "任务已提交"
        );
        self.audit(format!("task_submitted {key} tree={tree_address}"))
            .await;
    }

    pub async fn log_task_scheduled(&self, key: &TaskKey, host: &str) {
        info!(
            event = "task_scheduled",
            task.id = %key.task_id,
            context.id = %key.context_id,
            host = host,
            "任务已调度"
        );
        self.audit(format!("task_scheduled {key} host={host}")).await;
    }

    pub async fn log_task_started(&self, key: &TaskKey, host: &str) {
        info!(
            event = "task_started",
            task.id = %key.task_id,
            context.id = %key.context_id,
            host = host,
            "任务已在主机上启动"
        );
        self.audit(format!("task_started {key} host={host}")).await;
    }

    pub async fn log_task_reached_end(&self, key: &TaskKey, state: TaskState) {
        let event = match state {
            TaskState::Aborted => "task_aborted",
            _ => "task_finished",
        };
        info!(
            event = event,
            task.id = %key.task_id,
            context.id = %key.context_id,
            task.state = %state,
            "任务已结束"
        );
        self.audit(format!("{event} {key}")).await;
    }

    pub async fn log_checkpoint_reached(&self, key: &TaskKey, name: &str, value: Option<&str>) {
        info!(
            event = "checkpoint_reached",
            task.id = %key.task_id,
            context.id = %key.context_id,
            checkpoint.name = name,
            checkpoint.value = value.unwrap_or(""),
            "检查点已到达"
        );
        self.audit(format!(
            "checkpoint_reached {key} name=\"{name}\" value={}",
            value.unwrap_or("-")
        ))
        .await;
    }

    pub async fn log_host_registered(&self, host: &str) {
        info!(event = "host_registered", host = host, "主机运行时已注册");
        self.audit(format!("host_registered {host}")).await;
    }

    pub async fn log_host_unregistered(&self, host: &str, aborted_tasks: usize) {
        info!(
            event = "host_unregistered",
            host = host,
            aborted_tasks = aborted_tasks,
            "主机运行时已注销"
        );
        self.audit(format!(
            "host_unregistered {host} aborted_tasks={aborted_tasks}"
        ))
        .await;
    }

    pub async fn log_context_created(&self, context_id: &str, name: &str) {
        info!(
            event = "context_created",
            context.id = context_id,
            context.name = name,
            "上下文已创建"
        );
        self.audit(format!("context_created {context_id} name=\"{name}\""))
            .await;
    }

    pub async fn log_context_closed(&self, context_id: &str) {
        info!(event = "context_closed", context.id = context_id, "上下文已关闭");
        self.audit(format!("context_closed {context_id}")).await;
    }

    pub async fn log_context_deleted(&self, context_id: &str) {
        info!(event = "context_deleted", context.id = context_id, "上下文已删除");
        self.audit(format!("context_deleted {context_id}")).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_storage::InMemoryLogStorage;

    #[tokio::test]
    async fn test_audit_lines_land_in_system_trail() {
        let storage = Arc::new(InMemoryLogStorage::new());
        let logger = StructuredLogger::new(storage.clone());

        logger.log_host_registered("h1").await;
        logger
            .log_task_submitted(&TaskKey::new("a", "ctx"), "/suite/a")
            .await;

        let records = storage
            .read(SYSTEM_CONTEXT_ID, TASK_MANAGER_TASK_ID)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line, "host_registered h1");
        assert_eq!(records[1].line, "task_submitted a@ctx tree=/suite/a");
    }
}
