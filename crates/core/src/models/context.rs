use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SYSTEM_CONTEXT_ID;

/// 上下文：一组共享生命周期与保留策略的任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub open: bool,
    /// 调用方提供的不透明数据
    pub payload: serde_json::Value,
    /// 保留的已完成任务数量上限，None 表示不限制（非自清理上下文）
    pub finished_tasks_kept: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl ContextEntry {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        payload: serde_json::Value,
        finished_tasks_kept: Option<usize>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            open: true,
            payload,
            finished_tasks_kept,
            created_at: Utc::now(),
        }
    }

    /// 系统上下文
    pub fn system() -> Self {
        Self::new(
            SYSTEM_CONTEXT_ID,
            "System",
            "编排器内部上下文",
            serde_json::Value::Null,
            None,
        )
    }

    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_CONTEXT_ID
    }

    pub fn is_self_cleaning(&self) -> bool {
        self.finished_tasks_kept.is_some()
    }

    pub fn close(&mut self) {
        self.open = false;
    }
}
