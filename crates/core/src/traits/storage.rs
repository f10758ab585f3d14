use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::OrchestratorResult;

/// 任务日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for TaskLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskLogLevel::Trace => "TRACE",
            TaskLogLevel::Debug => "DEBUG",
            TaskLogLevel::Info => "INFO",
            TaskLogLevel::Warn => "WARN",
            TaskLogLevel::Error => "ERROR",
            TaskLogLevel::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// 日志存储中的一行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: TaskLogLevel,
    pub line: String,
}

impl LogRecord {
    pub fn new(level: TaskLogLevel, line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            line: line.into(),
        }
    }
}

/// 按上下文/任务寻址的追加日志
#[async_trait]
pub trait LogStorage: Send + Sync {
    async fn add_context(&self, context_id: &str) -> OrchestratorResult<()>;

    async fn remove_context(&self, context_id: &str) -> OrchestratorResult<()>;

    async fn add_task(&self, context_id: &str, task_id: &str) -> OrchestratorResult<()>;

    async fn remove_task(&self, context_id: &str, task_id: &str) -> OrchestratorResult<()>;

    async fn set_task_hostname(
        &self,
        context_id: &str,
        task_id: &str,
        host_name: &str,
    ) -> OrchestratorResult<()>;

    async fn append_record(
        &self,
        context_id: &str,
        task_id: &str,
        record: LogRecord,
    ) -> OrchestratorResult<()>;

    /// 以当前时间追加一行 INFO 日志
    async fn append(&self, context_id: &str, task_id: &str, line: &str) -> OrchestratorResult<()> {
        self.append_record(context_id, task_id, LogRecord::new(TaskLogLevel::Info, line))
            .await
    }

    async fn read(&self, context_id: &str, task_id: &str) -> OrchestratorResult<Vec<LogRecord>>;

    async fn count(&self, context_id: &str, task_id: &str) -> OrchestratorResult<usize> {
        Ok(self.read(context_id, task_id).await?.len())
    }

    /// 读取下标在 `first..=last` 内的记录（从0开始），超出末尾的部分被截断
    async fn read_range(
        &self,
        context_id: &str,
        task_id: &str,
        first: usize,
        last: usize,
    ) -> OrchestratorResult<Vec<LogRecord>> {
        if first > last {
            return Ok(Vec::new());
        }
        Ok(self
            .read(context_id, task_id)
            .await?
            .into_iter()
            .skip(first)
            .take((last - first).saturating_add(1))
            .collect())
    }
}

/// 软件仓库查询
#[async_trait]
pub trait PackageRepository: Send + Sync {
    /// 返回第一个匹配软件包的文件名
    async fn resolve(&self, query: &str) -> OrchestratorResult<Option<String>>;
}

/// 运行时修改的配置项持久化
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn persist(&self, key: &str, value: &str) -> OrchestratorResult<()>;
}
