use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use orchestrator_core::{
    models::{TaskDescriptor, TaskDirectories, TaskKey, TaskState, WorkerEvent, CHECKPOINT_TASK_FINISHED},
    traits::HostRuntimeTransport,
    OrchestratorError, OrchestratorResult,
};

#[derive(Debug, Clone)]
pub struct LocalHostRuntimeConfig {
    /// 模拟任务的运行时长
    pub simulated_run: Duration,
    /// 任务目录根路径
    pub work_root: PathBuf,
}

impl Default for LocalHostRuntimeConfig {
    fn default() -> Self {
        Self {
            simulated_run: Duration::from_secs(1),
            work_root: PathBuf::from("/tmp/orchestrator"),
        }
    }
}

/// 进程内的主机运行时
///
/// 每个任务以一个 tokio 任务模拟，运行结束后通过事件通道上报
/// 结束检查点与 FINISHED 状态。
pub struct LocalHostRuntime {
    config: LocalHostRuntimeConfig,
    events: mpsc::UnboundedSender<WorkerEvent>,
    running: Mutex<HashMap<(String, TaskKey), JoinHandle<()>>>,
    package_cache_sizes: Mutex<HashMap<String, u64>>,
}

impl LocalHostRuntime {
    pub fn new(config: LocalHostRuntimeConfig, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            config,
            events,
            running: Mutex::new(HashMap::new()),
            package_cache_sizes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn package_cache_size(&self, host: &str) -> Option<u64> {
        self.package_cache_sizes.lock().await.get(host).copied()
    }

    pub async fn running_count(&self) -> usize {
        self.running
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    fn directories(&self, host: &str, descriptor: &TaskDescriptor) -> TaskDirectories {
        let task_dir = self
            .config
            .work_root
            .join(host)
            .join(&descriptor.context_id)
            .join(format!("{}-{}", descriptor.task_id, Uuid::new_v4().simple()));
        TaskDirectories {
            task: task_dir.display().to_string(),
            working: task_dir.join("work").display().to_string(),
            temporary: task_dir.join("tmp").display().to_string(),
        }
    }

    async fn cancel(&self, host: &str, task_id: &str, context_id: &str) -> bool {
        let key = (host.to_string(), TaskKey::new(task_id, context_id));
        match self.running.lock().await.remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl HostRuntimeTransport for LocalHostRuntime {
    async fn initialize(&self, host: &str, max_package_cache_size: u64) -> OrchestratorResult<()> {
        self.package_cache_sizes
            .lock()
            .await
            .insert(host.to_string(), max_package_cache_size);
        Ok(())
    }

    async fn create_task(
        &self,
        host: &str,
        descriptor: &TaskDescriptor,
    ) -> OrchestratorResult<TaskDirectories> {
        if self.events.is_closed() {
            return Err(OrchestratorError::host_runtime(host, "事件通道已关闭"));
        }
        let directories = self.directories(host, descriptor);
        let key = TaskKey::new(descriptor.task_id.clone(), descriptor.context_id.clone());
        let events = self.events.clone();
        let run_for = self.config.simulated_run;
        let host_name = host.to_string();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(run_for).await;
            debug!("本地任务 {} 在主机 {} 上运行结束", task_key, host_name);
            let finished = [
                WorkerEvent::CheckpointReached {
                    name: CHECKPOINT_TASK_FINISHED.to_string(),
                    value: Some("0".to_string()),
                    task_id: task_key.task_id.clone(),
                    context_id: task_key.context_id.clone(),
                    host_name: host_name.clone(),
                },
                WorkerEvent::TaskReachedEnd {
                    task_id: task_key.task_id.clone(),
                    context_id: task_key.context_id.clone(),
                    state: TaskState::Finished,
                },
            ];
            for event in finished {
                if events.send(event).is_err() {
                    warn!("事件通道已关闭，无法上报任务 {} 的结束", task_key);
                    return;
                }
            }
        });

        {
            let mut running = self.running.lock().await;
            // 已自然结束的模拟不会再被取消
            running.retain(|_, handle| !handle.is_finished());
            running.insert((host.to_string(), key.clone()), handle);
        }
        info!("本地主机 {} 已创建任务 {}", host, key);
        Ok(directories)
    }

    async fn terminate_task(
        &self,
        host: &str,
        task_id: &str,
        context_id: &str,
    ) -> OrchestratorResult<()> {
        if self.cancel(host, task_id, context_id).await {
            info!("本地主机 {} 已终止任务 {}@{}", host, task_id, context_id);
            let aborted = WorkerEvent::TaskReachedEnd {
                task_id: task_id.to_string(),
                context_id: context_id.to_string(),
                state: TaskState::Aborted,
            };
            if self.events.send(aborted).is_err() {
                warn!("事件通道已关闭，无法上报任务 {}@{} 的终止", task_id, context_id);
            }
        }
        Ok(())
    }

    async fn destroy_task(
        &self,
        host: &str,
        task_id: &str,
        context_id: &str,
    ) -> OrchestratorResult<()> {
        self.cancel(host, task_id, context_id).await;
        debug!("本地主机 {} 已清理任务 {}@{}", host, task_id, context_id);
        Ok(())
    }

    async fn delete_context(&self, host: &str, context_id: &str) -> OrchestratorResult<()> {
        let mut running = self.running.lock().await;
        running.retain(|(h, key), handle| {
            let drop_it = h == host && key.context_id == context_id;
            if drop_it {
                handle.abort();
            }
            !drop_it
        });
        debug!("本地主机 {} 已删除上下文 {}", host, context_id);
        Ok(())
    }

    async fn set_max_package_cache_size(&self, host: &str, bytes: u64) -> OrchestratorResult<()> {
        self.package_cache_sizes
            .lock()
            .await
            .insert(host.to_string(), bytes);
        Ok(())
    }
}
