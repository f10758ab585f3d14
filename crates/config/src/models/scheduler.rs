use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigResult;

/// 1 GiB
pub const DEFAULT_MAX_PACKAGE_CACHE_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_KEPT_CLOSED_CONTEXT_COUNT: usize = 3;
pub const DEFAULT_FINISHED_TASKS_KEPT: usize = 10;
pub const DEFAULT_LOAD_UNITS: u32 = 1;
/// 内存启发式：每MiB内存对应一个负载单位
pub const DEFAULT_HOST_MEMORY_MIB: u32 = 1024;

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// 主机上软件包缓存的上限（字节）
    pub max_package_cache_size: u64,
    /// 全局保留的已关闭上下文数量
    pub kept_closed_context_count: usize,
    /// 自清理上下文默认保留的已完成任务数量
    pub default_finished_tasks_kept: usize,
    /// 任务未声明负载时使用的负载单位
    pub default_load_units: u32,
    /// 未单独配置的主机的负载上限
    #[serde(default)]
    pub default_host_load_limit: Option<u32>,
    /// 负载上限未配置时用于推导上限的主机内存（MiB）
    pub host_memory_mib: u32,
    /// 固定主机随机排序的种子
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_package_cache_size: DEFAULT_MAX_PACKAGE_CACHE_SIZE,
            kept_closed_context_count: DEFAULT_KEPT_CLOSED_CONTEXT_COUNT,
            default_finished_tasks_kept: DEFAULT_FINISHED_TASKS_KEPT,
            default_load_units: DEFAULT_LOAD_UNITS,
            default_host_load_limit: None,
            host_memory_mib: DEFAULT_HOST_MEMORY_MIB,
            rng_seed: None,
        }
    }
}

impl SchedulerConfig {
    /// 未配置默认上限时按内存推导
    pub fn effective_default_load_limit(&self) -> u32 {
        self.default_host_load_limit.unwrap_or(self.host_memory_mib)
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_positive(self.max_package_cache_size, "max_package_cache_size")?;
        ValidationUtils::validate_max_count(
            self.kept_closed_context_count,
            10_000,
            "kept_closed_context_count",
        )?;
        ValidationUtils::validate_max_count(
            self.default_finished_tasks_kept,
            100_000,
            "default_finished_tasks_kept",
        )?;
        ValidationUtils::validate_positive(self.host_memory_mib as u64, "host_memory_mib")?;
        Ok(())
    }
}
