use thiserror::Error;

use crate::models::TaskState;

/// 编排器错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("无效的任务描述: {0}")]
    InvalidDescriptor(String),

    #[error("任务已存在且尚未结束: {task_id} (上下文: {context_id})")]
    TaskConflict { task_id: String, context_id: String },

    #[error("任务ID为系统保留: {task_id}")]
    ReservedTaskId { task_id: String },

    #[error("任务未找到: {task_id} (上下文: {context_id})")]
    TaskNotFound { task_id: String, context_id: String },

    #[error("上下文未找到: {id}")]
    ContextNotFound { id: String },

    #[error("上下文已存在: {id}")]
    ContextExists { id: String },

    #[error("主机运行时未找到: {host}")]
    HostRuntimeNotFound { host: String },

    #[error("无效的主机名: {host} - {message}")]
    InvalidHostName { host: String, message: String },

    #[error("无效的主机查询: {query} - {message}")]
    InvalidHostQuery { query: String, message: String },

    #[error("无效的树地址: {0}")]
    InvalidTreeAddress(String),

    #[error("检查点未找到: {name}")]
    CheckpointNotFound { name: String },

    #[error("所需的检查点已无法到达: {name} (任务: {task_id:?}, 上下文: {context_id:?})")]
    CheckpointUnreachable {
        name: String,
        task_id: Option<String>,
        context_id: Option<String>,
    },

    #[error("无效的状态转换: {from:?} -> {to:?}")]
    InvalidStateTransition { from: TaskState, to: TaskState },

    #[error("无效的服务条目: {0}")]
    InvalidServiceEntry(String),

    #[error("无效的正则表达式: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("主机运行时调用失败: {host} - {message}")]
    HostRuntime { host: String, message: String },

    #[error("主机管理器不可用: {0}")]
    HostManager(String),

    #[error("软件仓库错误: {0}")]
    PackageRepository(String),

    #[error("日志存储错误: {0}")]
    LogStorage(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// 暂时不可用，下一轮调度会自动重试
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchestratorError::HostManager(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OrchestratorError::TaskNotFound { .. }
                | OrchestratorError::ContextNotFound { .. }
                | OrchestratorError::HostRuntimeNotFound { .. }
                | OrchestratorError::CheckpointNotFound { .. }
        )
    }

    pub fn task_not_found(task_id: &str, context_id: &str) -> Self {
        OrchestratorError::TaskNotFound {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
        }
    }

    pub fn context_not_found(id: &str) -> Self {
        OrchestratorError::ContextNotFound { id: id.to_string() }
    }

    pub fn host_runtime(host: &str, message: impl Into<String>) -> Self {
        OrchestratorError::HostRuntime {
            host: host.to_string(),
            message: message.into(),
        }
    }
}

/// 统一的Result类型
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
