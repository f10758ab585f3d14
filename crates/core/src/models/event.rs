use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{TaskKey, TaskState};
use crate::traits::TaskLogLevel;

/// worker上报的事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerEvent {
    CheckpointReached {
        name: String,
        value: Option<String>,
        task_id: String,
        context_id: String,
        host_name: String,
    },
    TaskReachedEnd {
        task_id: String,
        context_id: String,
        state: TaskState,
    },
    TaskRestarted {
        task_id: String,
        context_id: String,
    },
    TaskSleeping {
        task_id: String,
        context_id: String,
    },
    TaskWoke {
        task_id: String,
        context_id: String,
    },
    Log {
        task_id: String,
        context_id: String,
        level: TaskLogLevel,
        timestamp: DateTime<Utc>,
        message: String,
    },
}

impl WorkerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::CheckpointReached { .. } => "checkpoint_reached",
            WorkerEvent::TaskReachedEnd { .. } => "task_reached_end",
            WorkerEvent::TaskRestarted { .. } => "task_restarted",
            WorkerEvent::TaskSleeping { .. } => "task_sleeping",
            WorkerEvent::TaskWoke { .. } => "task_woke",
            WorkerEvent::Log { .. } => "log",
        }
    }
}

/// 编排器对外广播的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    TaskFinished { key: TaskKey, state: TaskState },
    HostRuntimeRegistered { host_name: String },
    HostRuntimeUnregistered { host_name: String },
}
