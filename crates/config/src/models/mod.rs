pub mod app_config;
pub mod logging;
pub mod runtime;
pub mod scheduler;

pub use app_config::OrchestratorConfig;
pub use logging::{LogLevel, LoggingConfig, OutputFormat};
pub use runtime::{LocalRuntimeConfig, MetricsConfig};
pub use scheduler::SchedulerConfig;
