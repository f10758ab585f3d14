pub mod errors;
pub mod ids;
pub mod models;
pub mod traits;

pub use errors::{OrchestratorError, OrchestratorResult};
pub use ids::{IdGenerator, SequentialIdGenerator};

/// 系统上下文ID，永远存在且不会被删除
pub const SYSTEM_CONTEXT_ID: &str = "system";

/// 系统上下文中编排器自身的任务ID，用于保存审计日志
pub const TASK_MANAGER_TASK_ID: &str = "taskmanager";
