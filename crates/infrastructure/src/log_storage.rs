use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use orchestrator_core::{
    traits::{LogRecord, LogStorage},
    OrchestratorError, OrchestratorResult, SYSTEM_CONTEXT_ID, TASK_MANAGER_TASK_ID,
};

#[derive(Debug, Clone)]
pub struct InMemoryLogStorageConfig {
    /// 每个任务保留的最大日志行数（0表示无限制），超出时丢弃最旧的行
    pub max_records_per_task: usize,
}

impl Default for InMemoryLogStorageConfig {
    fn default() -> Self {
        Self {
            max_records_per_task: 100_000,
        }
    }
}

#[derive(Debug, Default)]
struct TaskLog {
    host_name: Option<String>,
    records: Vec<LogRecord>,
}

/// 内存日志存储实现
///
/// 系统上下文与编排器自身的任务在创建时即存在。
#[derive(Debug)]
pub struct InMemoryLogStorage {
    contexts: RwLock<HashMap<String, HashMap<String, TaskLog>>>,
    config: InMemoryLogStorageConfig,
}

impl InMemoryLogStorage {
    pub fn new() -> Self {
        Self::with_config(InMemoryLogStorageConfig::default())
    }

    pub fn with_config(config: InMemoryLogStorageConfig) -> Self {
        let mut system = HashMap::new();
        system.insert(TASK_MANAGER_TASK_ID.to_string(), TaskLog::default());
        let mut contexts = HashMap::new();
        contexts.insert(SYSTEM_CONTEXT_ID.to_string(), system);
        Self {
            contexts: RwLock::new(contexts),
            config,
        }
    }

    pub async fn has_context(&self, context_id: &str) -> bool {
        self.contexts.read().await.contains_key(context_id)
    }

    pub async fn has_task(&self, context_id: &str, task_id: &str) -> bool {
        self.contexts
            .read()
            .await
            .get(context_id)
            .is_some_and(|tasks| tasks.contains_key(task_id))
    }

    pub async fn task_hostname(&self, context_id: &str, task_id: &str) -> Option<String> {
        self.contexts
            .read()
            .await
            .get(context_id)
            .and_then(|tasks| tasks.get(task_id))
            .and_then(|log| log.host_name.clone())
    }

    fn missing_task(context_id: &str, task_id: &str) -> OrchestratorError {
        OrchestratorError::LogStorage(format!(
            "日志存储中不存在任务 {task_id} (上下文: {context_id})"
        ))
    }
}

impl Default for InMemoryLogStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStorage for InMemoryLogStorage {
    async fn add_context(&self, context_id: &str) -> OrchestratorResult<()> {
        let mut contexts = self.contexts.write().await;
        if contexts.contains_key(context_id) {
            return Err(OrchestratorError::LogStorage(format!(
                "日志存储中已存在上下文 {context_id}"
            )));
        }
        contexts.insert(context_id.to_string(), HashMap::new());
        debug!("日志存储添加上下文: {}", context_id);
        Ok(())
    }

    async fn remove_context(&self, context_id: &str) -> OrchestratorResult<()> {
        if context_id == SYSTEM_CONTEXT_ID {
            return Err(OrchestratorError::LogStorage(
                "系统上下文的日志不能删除".to_string(),
            ));
        }
        self.contexts
            .write()
            .await
            .remove(context_id)
            .map(|_| debug!("日志存储删除上下文: {}", context_id))
            .ok_or_else(|| {
                OrchestratorError::LogStorage(format!("日志存储中不存在上下文 {context_id}"))
            })
    }

    async fn add_task(&self, context_id: &str, task_id: &str) -> OrchestratorResult<()> {
        let mut contexts = self.contexts.write().await;
        let tasks = contexts.get_mut(context_id).ok_or_else(|| {
            OrchestratorError::LogStorage(format!("日志存储中不存在上下文 {context_id}"))
        })?;
        // 重新提交的任务从空日志开始
        tasks.insert(task_id.to_string(), TaskLog::default());
        Ok(())
    }

    async fn remove_task(&self, context_id: &str, task_id: &str) -> OrchestratorResult<()> {
        let mut contexts = self.contexts.write().await;
        contexts
            .get_mut(context_id)
            .and_then(|tasks| tasks.remove(task_id))
            .map(|_| ())
            .ok_or_else(|| Self::missing_task(context_id, task_id))
    }

    async fn set_task_hostname(
        &self,
        context_id: &str,
        task_id: &str,
        host_name: &str,
    ) -> OrchestratorResult<()> {
        let mut contexts = self.contexts.write().await;
        let log = contexts
            .get_mut(context_id)
            .and_then(|tasks| tasks.get_mut(task_id))
            .ok_or_else(|| Self::missing_task(context_id, task_id))?;
        log.host_name = Some(host_name.to_string());
        Ok(())
    }

    async fn append_record(
        &self,
        context_id: &str,
        task_id: &str,
        record: LogRecord,
    ) -> OrchestratorResult<()> {
        let mut contexts = self.contexts.write().await;
        let log = contexts
            .get_mut(context_id)
            .and_then(|tasks| tasks.get_mut(task_id))
            .ok_or_else(|| Self::missing_task(context_id, task_id))?;
        log.records.push(record);
        let limit = self.config.max_records_per_task;
        if limit > 0 && log.records.len() > limit {
            let excess = log.records.len() - limit;
            log.records.drain(..excess);
        }
        Ok(())
    }

    async fn read(&self, context_id: &str, task_id: &str) -> OrchestratorResult<Vec<LogRecord>> {
        let contexts = self.contexts.read().await;
        contexts
            .get(context_id)
            .and_then(|tasks| tasks.get(task_id))
            .map(|log| log.records.clone())
            .ok_or_else(|| Self::missing_task(context_id, task_id))
    }

    async fn count(&self, context_id: &str, task_id: &str) -> OrchestratorResult<usize> {
        let contexts = self.contexts.read().await;
        contexts
            .get(context_id)
            .and_then(|tasks| tasks.get(task_id))
            .map(|log| log.records.len())
            .ok_or_else(|| Self::missing_task(context_id, task_id))
    }

    async fn read_range(
        &self,
        context_id: &str,
        task_id: &str,
        first: usize,
        last: usize,
    ) -> OrchestratorResult<Vec<LogRecord>> {
        let contexts = self.contexts.read().await;
        let records = &contexts
            .get(context_id)
            .and_then(|tasks| tasks.get(task_id))
            .ok_or_else(|| Self::missing_task(context_id, task_id))?
            .records;
        if first > last || first >= records.len() {
            return Ok(Vec::new());
        }
        let end = last.min(records.len() - 1);
        Ok(records[first..=end].to_vec())
    }
}
