pub mod local_runtime;
pub mod log_storage;
pub mod observability;

pub use local_runtime::{LocalHostRuntime, LocalHostRuntimeConfig};
pub use log_storage::{InMemoryLogStorage, InMemoryLogStorageConfig};
pub use observability::{MetricsCollector, StructuredLogger};
