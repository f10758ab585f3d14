use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务被分发到主机时记录的检查点
pub const CHECKPOINT_TASK_STARTED: &str = "task started";

/// 任务结束时记录的检查点
pub const CHECKPOINT_TASK_FINISHED: &str = "task finished";

/// 任务被中止时合成的结束检查点的值
pub const EXIT_CODE_ERROR: &str = "1";

/// 检查点：一条不可变的事实记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub name: String,
    pub task_id: String,
    pub context_id: String,
    /// 由编排器合成的检查点没有主机
    pub host_name: Option<String>,
    pub value: Option<String>,
    pub reached_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        name: impl Into<String>,
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        host_name: Option<String>,
        value: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            task_id: task_id.into(),
            context_id: context_id.into(),
            host_name,
            value,
            reached_at: Utc::now(),
        }
    }
}

/// 检查点查询模板，为空的字段匹配任意值
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointTemplate {
    pub name: Option<String>,
    pub value: Option<String>,
    pub task_id: Option<String>,
    pub context_id: Option<String>,
}

impl CheckpointTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_context(mut self, context_id: &str) -> Self {
        self.context_id = Some(context_id.to_string());
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn with_value_opt(mut self, value: Option<String>) -> Self {
        self.value = value;
        self
    }

    pub fn matches(&self, checkpoint: &Checkpoint) -> bool {
        fn field_matches(pattern: &Option<String>, actual: &str) -> bool {
            pattern.as_deref().map_or(true, |p| p == actual)
        }

        field_matches(&self.name, &checkpoint.name)
            && field_matches(&self.task_id, &checkpoint.task_id)
            && field_matches(&self.context_id, &checkpoint.context_id)
            && match &self.value {
                None => true,
                Some(value) => checkpoint.value.as_deref() == Some(value.as_str()),
            }
    }

    /// 用于错误信息的检查点名
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "*".to_string())
    }
}
