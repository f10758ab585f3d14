pub mod host_runtime;
pub mod storage;

pub use host_runtime::{
    CanonicalHostNameResolver, HostManager, HostNameResolver, HostRuntimeTransport,
};
pub use storage::{ConfigStore, LogRecord, LogStorage, PackageRepository, TaskLogLevel};
