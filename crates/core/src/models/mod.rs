pub mod checkpoint;
pub mod context;
pub mod descriptor;
pub mod event;
pub mod host_runtime;
pub mod service;
pub mod task;

pub use checkpoint::{
    Checkpoint, CheckpointTemplate, CHECKPOINT_TASK_FINISHED, CHECKPOINT_TASK_STARTED,
    EXIT_CODE_ERROR,
};
pub use context::ContextEntry;
pub use descriptor::{
    is_valid_checkpoint_name, is_valid_identifier, is_valid_package_name, DependencyCheckpoint,
    HostSelection, PackageReference, TaskDescriptor, TaskExclusivity,
};
pub use event::{OrchestratorEvent, WorkerEvent};
pub use host_runtime::{HostLoadLimits, HostReservation, HostRuntimeEntry, HostStatus};
pub use service::{ServiceEntry, ServiceTemplate};
pub use task::{TaskDirectories, TaskEntry, TaskKey, TaskState, TaskTimestamps};
