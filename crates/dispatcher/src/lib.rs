//! Orchestrator dispatcher
//!
//! Owns the authoritative registry and everything that mutates it: host
//! selection, the scheduler loop, the lifecycle manager, checkpoint waits
//! and the service directory. `Orchestrator` is the entry point.

pub mod checkpoint_waiter;
pub mod dependency_checker;
pub mod host_selector;
pub mod lifecycle;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod service_registry;
pub mod state_listener;
pub mod task_tree;

pub use checkpoint_waiter::{WaitTimeout, INFINITE_TIMEOUT_MILLIS};
pub use lifecycle::Completion;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorSettings};
pub use registry::RuntimeSettings;
pub use service_registry::ServiceRegistry;
pub use state_listener::WorkerEventListener;
