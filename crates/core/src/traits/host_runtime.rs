use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::models::{HostLoadLimits, HostStatus, TaskDescriptor, TaskDirectories};
use crate::{OrchestratorError, OrchestratorResult};

/// 远程worker传输接口
#[async_trait]
pub trait HostRuntimeTransport: Send + Sync {
    /// 在分发任务前初始化主机（软件包缓存上限）
    async fn initialize(&self, host: &str, max_package_cache_size: u64) -> OrchestratorResult<()>;

    /// 在主机上创建任务，返回worker分配的目录
    async fn create_task(
        &self,
        host: &str,
        descriptor: &TaskDescriptor,
    ) -> OrchestratorResult<TaskDirectories>;

    /// 终止正在运行的任务
    async fn terminate_task(
        &self,
        host: &str,
        task_id: &str,
        context_id: &str,
    ) -> OrchestratorResult<()>;

    /// 丢弃任务在主机上的产物
    async fn destroy_task(&self, host: &str, task_id: &str, context_id: &str)
        -> OrchestratorResult<()>;

    /// 丢弃上下文在主机上的状态
    async fn delete_context(&self, host: &str, context_id: &str) -> OrchestratorResult<()>;

    async fn set_max_package_cache_size(&self, host: &str, bytes: u64) -> OrchestratorResult<()>;
}

/// 集群协调器（主机状态、负载服务与主机查询）
///
/// 返回 `OrchestratorError::HostManager` 表示暂时不可用，
/// 返回 `OrchestratorError::InvalidHostQuery` 表示查询本身无效。
#[async_trait]
pub trait HostManager: Send + Sync {
    async fn host_statuses(&self, hosts: &[String])
        -> OrchestratorResult<HashMap<String, HostStatus>>;

    async fn load_limits(&self) -> OrchestratorResult<HostLoadLimits>;

    async fn query_hosts(&self, query: &str) -> OrchestratorResult<Vec<String>>;
}

/// 主机名规范化
pub trait HostNameResolver: Send + Sync {
    fn canonical_name(&self, host: &str) -> OrchestratorResult<String>;
}

static HOST_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$")
        .expect("valid host name regex")
});

/// 去除空白、转为小写并校验主机名语法
#[derive(Debug, Default, Clone)]
pub struct CanonicalHostNameResolver;

impl HostNameResolver for CanonicalHostNameResolver {
    fn canonical_name(&self, host: &str) -> OrchestratorResult<String> {
        let canonical = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if canonical.is_empty() || !HOST_NAME_REGEX.is_match(&canonical) {
            return Err(OrchestratorError::InvalidHostName {
                host: host.to_string(),
                message: "主机名语法无效".to_string(),
            });
        }
        Ok(canonical)
    }
}
