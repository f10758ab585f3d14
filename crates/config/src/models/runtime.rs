use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigResult;

/// 进程内主机运行时（单机模式）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalRuntimeConfig {
    pub enabled: bool,
    /// 启动时注册的主机名，为空时使用本机主机名
    #[serde(default)]
    pub hosts: Vec<String>,
    /// 模拟任务运行时长（毫秒）
    pub simulated_run_millis: u64,
    /// 任务目录的根路径
    pub work_root: String,
}

impl Default for LocalRuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hosts: Vec::new(),
            simulated_run_millis: 1000,
            work_root: "/tmp/orchestrator".to_string(),
        }
    }
}

impl ConfigValidator for LocalRuntimeConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.enabled {
            ValidationUtils::validate_not_empty(&self.work_root, "local_runtime.work_root")?;
        }
        for host in &self.hosts {
            ValidationUtils::validate_not_empty(host, "local_runtime.hosts")?;
        }
        Ok(())
    }
}

/// Prometheus 指标导出
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: "127.0.0.1:9000".to_string(),
        }
    }
}

impl ConfigValidator for MetricsConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.enabled {
            ValidationUtils::validate_socket_address(
                &self.listen_address,
                "metrics.listen_address",
            )?;
        }
        Ok(())
    }
}
