use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// 可注入的ID生成器，测试中可以生成确定的ID
pub trait IdGenerator: Send + Sync {
    /// 形如 `<序号>_<毫秒时间戳>` 的上下文ID
    fn next_context_id(&self) -> String;

    /// 以给定前缀开头的唯一任务ID
    fn next_task_id(&self, prefix: &str) -> String;
}

/// 基于计数器的ID生成器
#[derive(Debug)]
pub struct SequentialIdGenerator {
    context_counter: AtomicU64,
    task_counter: AtomicU64,
    fixed_millis: Option<i64>,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self {
            context_counter: AtomicU64::new(0),
            task_counter: AtomicU64::new(0),
            fixed_millis: None,
        }
    }

    /// 时间戳固定为0，生成的ID完全确定
    pub fn deterministic() -> Self {
        Self {
            fixed_millis: Some(0),
            ..Self::new()
        }
    }

    fn millis(&self) -> i64 {
        self.fixed_millis
            .unwrap_or_else(|| Utc::now().timestamp_millis())
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_context_id(&self) -> String {
        let index = self.context_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}", index, self.millis())
    }

    fn next_task_id(&self, prefix: &str) -> String {
        let index = self.task_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", prefix, self.millis(), index)
    }
}
