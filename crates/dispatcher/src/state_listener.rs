use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use orchestrator_core::{models::WorkerEvent, OrchestratorResult};

use crate::orchestrator::Orchestrator;

/// worker事件监听器
///
/// 按接收顺序逐个应用事件，因此同一任务的检查点总是先于结束事件生效。
pub struct WorkerEventListener {
    orchestrator: Orchestrator,
    running: Arc<RwLock<bool>>,
}

impl WorkerEventListener {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("worker事件监听器停止信号已发送");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn handle_event(&self, event: WorkerEvent) -> OrchestratorResult<()> {
        debug!("处理worker事件: {}", event.kind());
        match event {
            WorkerEvent::CheckpointReached {
                name,
                value,
                task_id,
                context_id,
                host_name,
            } => {
                self.orchestrator
                    .checkpoint_reached(&name, value.as_deref(), &task_id, &context_id, &host_name)
                    .await
            }
            WorkerEvent::TaskReachedEnd {
                task_id,
                context_id,
                state,
            } => {
                self.orchestrator
                    .task_reached_end(&task_id, &context_id, state)
                    .await
            }
            WorkerEvent::TaskRestarted {
                task_id,
                context_id,
            } => self.orchestrator.task_restarted(&task_id, &context_id).await,
            WorkerEvent::TaskSleeping {
                task_id,
                context_id,
            } => self.orchestrator.task_sleeping(&task_id, &context_id).await,
            WorkerEvent::TaskWoke {
                task_id,
                context_id,
            } => self.orchestrator.task_woke(&task_id, &context_id).await,
            WorkerEvent::Log {
                task_id,
                context_id,
                level,
                timestamp,
                message,
            } => {
                self.orchestrator
                    .log(&context_id, &task_id, level, timestamp, &message)
                    .await
            }
        }
    }

    /// 消费事件直到通道关闭、收到关闭信号或调用 `stop`
    pub async fn listen(
        &self,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> OrchestratorResult<()> {
        info!("启动worker事件监听器");
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        loop {
            if !self.is_running().await {
                info!("收到停止信号，退出worker事件监听");
                break;
            }

            let event = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("收到关闭信号，退出worker事件监听");
                    break;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                info!("worker事件通道已关闭");
                break;
            };

            let kind = event.kind();
            if let Err(e) = self.handle_event(event).await {
                if e.is_not_found() {
                    // 任务可能已被淘汰或所在上下文已删除
                    warn!("忽略worker事件 {}: {}", kind, e);
                } else {
                    error!("处理worker事件 {} 时出错: {}", kind, e);
                }
            }
        }

        *self.running.write().await = false;
        Ok(())
    }
}
