use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{TaskDescriptor, TaskExclusivity};
use crate::{OrchestratorError, OrchestratorResult};

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Submitted,
    Scheduled,
    Running,
    Sleeping,
    Finished,
    Aborted,
}

impl TaskState {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Aborted)
    }

    /// 是否正在占用主机
    pub fn occupies_host(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::Sleeping)
    }

    /// 状态转换表
    ///
    /// SCHEDULED -> FINISHED 对应分发尚未提交时worker已经报告完成的情况。
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        match (self, to) {
            (TaskState::Submitted, TaskState::Scheduled) => true,
            (TaskState::Scheduled, TaskState::Running) => true,
            (TaskState::Sleeping, TaskState::Running) => true,
            (TaskState::Running, TaskState::Sleeping) => true,
            (TaskState::Scheduled, TaskState::Finished) => true,
            (TaskState::Running, TaskState::Finished) => true,
            (TaskState::Sleeping, TaskState::Finished) => true,
            (TaskState::Finished, TaskState::Finished) => true,
            (from, TaskState::Aborted) => *from != TaskState::Finished,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "SUBMITTED",
            TaskState::Scheduled => "SCHEDULED",
            TaskState::Running => "RUNNING",
            TaskState::Sleeping => "SLEEPING",
            TaskState::Finished => "FINISHED",
            TaskState::Aborted => "ABORTED",
        };
        write!(f, "{s}")
    }
}

/// 任务的唯一标识 (taskId, contextId)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub task_id: String,
    pub context_id: String,
}

impl TaskKey {
    pub fn new(task_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.task_id, self.context_id)
    }
}

/// worker为任务分配的目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDirectories {
    pub task: String,
    pub working: String,
    pub temporary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTimestamps {
    pub submitted: DateTime<Utc>,
    pub scheduled: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
}

/// 注册表中的任务条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    pub task_id: String,
    pub context_id: String,
    pub tree_address: String,
    pub name: Option<String>,
    pub state: TaskState,
    pub exclusivity: TaskExclusivity,
    /// 调度之前为空
    pub host_name: Option<String>,
    pub load_units: u32,
    /// 提交时的原始描述
    pub original: TaskDescriptor,
    /// 调度过程中被修改的描述（主机列表、依赖、软件包）
    pub resolved: TaskDescriptor,
    pub directories: Option<TaskDirectories>,
    pub restart_count: u32,
    /// 准入顺序，用于保留策略中“最早准入优先淘汰”
    pub admission_seq: u64,
    pub timestamps: TaskTimestamps,
}

impl TaskEntry {
    pub fn new(
        original: TaskDescriptor,
        resolved: TaskDescriptor,
        load_units: u32,
        admission_seq: u64,
    ) -> Self {
        Self {
            task_id: resolved.task_id.clone(),
            context_id: resolved.context_id.clone(),
            tree_address: resolved.tree_address.clone(),
            name: resolved.name.clone(),
            state: TaskState::Submitted,
            exclusivity: resolved.exclusivity,
            host_name: None,
            load_units,
            original,
            resolved,
            directories: None,
            restart_count: 0,
            admission_seq,
            timestamps: TaskTimestamps {
                submitted: Utc::now(),
                scheduled: None,
                started: None,
                finished: None,
            },
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.task_id.clone(), self.context_id.clone())
    }

    pub fn is_on_host(&self, host: &str) -> bool {
        self.host_name.as_deref() == Some(host)
    }

    /// 修改任务状态，返回旧状态
    pub fn set_state(&mut self, to: TaskState) -> OrchestratorResult<TaskState> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(OrchestratorError::InvalidStateTransition { from, to });
        }
        let now = Utc::now();
        match to {
            TaskState::Scheduled => self.timestamps.scheduled = Some(now),
            TaskState::Running if from == TaskState::Scheduled => {
                self.timestamps.started = Some(now)
            }
            TaskState::Finished | TaskState::Aborted if !from.is_terminal() => {
                self.timestamps.finished = Some(now)
            }
            _ => {}
        }
        self.state = to;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostSelection, PackageReference};

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor {
            task_id: "build".to_string(),
            context_id: "ctx".to_string(),
            tree_address: "/bench/build".to_string(),
            name: None,
            description: None,
            exclusivity: TaskExclusivity::NonExclusive,
            host_runtimes: HostSelection::Any,
            dependencies: vec![],
            load_units: None,
            package: PackageReference::Name("build.bpkg".to_string()),
            parameters: Default::default(),
        }
    }

    #[test]
    fn test_state_transitions() {
        use TaskState::*;
        assert!(Submitted.can_transition_to(Scheduled));
        assert!(!Submitted.can_transition_to(Running));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Sleeping));
        assert!(Sleeping.can_transition_to(Running));
        assert!(!Sleeping.can_transition_to(Sleeping));
        assert!(Running.can_transition_to(Finished));
        assert!(Submitted.can_transition_to(Aborted));
        assert!(Aborted.can_transition_to(Aborted));
        assert!(!Finished.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Running));
        assert!(!Finished.can_transition_to(Running));
    }

    #[test]
    fn test_set_state_records_timestamps() {
        let mut task = TaskEntry::new(descriptor(), descriptor(), 1, 0);
        assert_eq!(task.state, TaskState::Submitted);
        assert!(task.set_state(TaskState::Running).is_err());

        assert_eq!(task.set_state(TaskState::Scheduled).unwrap(), TaskState::Submitted);
        assert!(task.timestamps.scheduled.is_some());
        task.set_state(TaskState::Running).unwrap();
        assert!(task.timestamps.started.is_some());
        task.set_state(TaskState::Finished).unwrap();
        assert!(task.timestamps.finished.is_some());
        assert!(task.state.is_terminal());
    }

    #[test]
    fn test_task_key_display() {
        assert_eq!(TaskKey::new("a", "ctx").to_string(), "a@ctx");
    }
}
