use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    logging::LoggingConfig,
    runtime::{LocalRuntimeConfig, MetricsConfig},
    scheduler::{
        SchedulerConfig, DEFAULT_FINISHED_TASKS_KEPT, DEFAULT_HOST_MEMORY_MIB,
        DEFAULT_KEPT_CLOSED_CONTEXT_COUNT, DEFAULT_LOAD_UNITS, DEFAULT_MAX_PACKAGE_CACHE_SIZE,
    },
};
use crate::validation::ConfigValidator;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub local_runtime: LocalRuntimeConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl OrchestratorConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/orchestrator.toml",
                "orchestrator.toml",
                "/etc/orchestrator/config.toml",
            ];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        let local = LocalRuntimeConfig::default();
        let metrics = MetricsConfig::default();
        builder = builder
            .set_default(
                "scheduler.max_package_cache_size",
                DEFAULT_MAX_PACKAGE_CACHE_SIZE as i64,
            )?
            .set_default(
                "scheduler.kept_closed_context_count",
                DEFAULT_KEPT_CLOSED_CONTEXT_COUNT as i64,
            )?
            .set_default(
                "scheduler.default_finished_tasks_kept",
                DEFAULT_FINISHED_TASKS_KEPT as i64,
            )?
            .set_default("scheduler.default_load_units", DEFAULT_LOAD_UNITS as i64)?
            .set_default("scheduler.host_memory_mib", DEFAULT_HOST_MEMORY_MIB as i64)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .set_default("local_runtime.enabled", local.enabled)?
            .set_default("local_runtime.hosts", Vec::<String>::new())?
            .set_default(
                "local_runtime.simulated_run_millis",
                local.simulated_run_millis as i64,
            )?
            .set_default("local_runtime.work_root", local.work_root)?
            .set_default("metrics.enabled", metrics.enabled)?
            .set_default("metrics.listen_address", metrics.listen_address)?;

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .separator("__")
                .try_parsing(true),
        );

        let config: OrchestratorConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: OrchestratorConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("写入配置文件失败: {}", path.as_ref().display()))
    }
}

impl ConfigValidator for OrchestratorConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.scheduler.validate()?;
        self.logging.validate()?;
        self.local_runtime.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogLevel, OutputFormat};

    #[test]
    fn test_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.scheduler.max_package_cache_size, 1024 * 1024 * 1024);
        assert_eq!(config.scheduler.kept_closed_context_count, 3);
        assert_eq!(config.scheduler.default_finished_tasks_kept, 10);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[scheduler]
max_package_cache_size = 2048
kept_closed_context_count = 5
default_finished_tasks_kept = 2
default_load_units = 3
host_memory_mib = 512
default_host_load_limit = 10
rng_seed = 7

[logging]
level = "debug"
format = "json"

[local_runtime]
enabled = false
hosts = ["h1", "h2"]
simulated_run_millis = 10
work_root = "/var/tmp/orch"
"#;
        let config = OrchestratorConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.scheduler.max_package_cache_size, 2048);
        assert_eq!(config.scheduler.kept_closed_context_count, 5);
        assert_eq!(config.scheduler.default_host_load_limit, Some(10));
        assert_eq!(config.scheduler.rng_seed, Some(7));
        assert_eq!(config.logging.format, OutputFormat::Json);
        assert_eq!(config.local_runtime.hosts, vec!["h1", "h2"]);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_config_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.toml");

        let mut config = OrchestratorConfig::default();
        config.scheduler.kept_closed_context_count = 9;
        config.save(&path).unwrap();

        let loaded = OrchestratorConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(loaded.scheduler.kept_closed_context_count, 9);
        assert_eq!(loaded.scheduler.max_package_cache_size, 1024 * 1024 * 1024);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(OrchestratorConfig::load(Some("/nonexistent/orchestrator.toml")).is_err());
    }

    #[test]
    fn test_invalid_metrics_address_rejected() {
        let toml_str = r#"
[scheduler]
max_package_cache_size = 1
kept_closed_context_count = 1
default_finished_tasks_kept = 1
default_load_units = 1
host_memory_mib = 1

[metrics]
enabled = true
listen_address = "nowhere"
"#;
        assert!(OrchestratorConfig::from_toml(toml_str).is_err());
    }
}
