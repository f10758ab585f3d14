//! Mock implementations of the orchestrator's collaborator traits
//!
//! Every mock keeps its state behind `Arc<Mutex<..>>` so a test can hold a
//! clone, hand another clone to the orchestrator and inspect what happened.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::{
    models::{HostLoadLimits, HostStatus, TaskDescriptor, TaskDirectories, TaskKey},
    traits::{ConfigStore, HostManager, HostRuntimeTransport, PackageRepository},
    OrchestratorError, OrchestratorResult,
};

/// A call recorded by `MockHostRuntimeTransport`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Initialize { host: String, max_package_cache_size: u64 },
    CreateTask { host: String, key: TaskKey },
    TerminateTask { host: String, key: TaskKey },
    DestroyTask { host: String, key: TaskKey },
    DeleteContext { host: String, context_id: String },
    SetMaxPackageCacheSize { host: String, bytes: u64 },
}

/// Mock implementation of HostRuntimeTransport for testing
#[derive(Debug, Clone, Default)]
pub struct MockHostRuntimeTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    failing_create_hosts: Arc<Mutex<HashSet<String>>>,
    failing_cleanup_hosts: Arc<Mutex<HashSet<String>>>,
    destroy_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockHostRuntimeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `destroy_task` sleeps this long before the call is recorded
    pub fn delay_destroy(&self, delay: Duration) {
        *self.destroy_delay.lock().unwrap() = Some(delay);
    }

    /// `create_task` on this host fails
    pub fn fail_create_on(&self, host: &str) {
        self.failing_create_hosts
            .lock()
            .unwrap()
            .insert(host.to_string());
    }

    /// `terminate_task`, `destroy_task` and `delete_context` on this host fail
    pub fn fail_cleanup_on(&self, host: &str) {
        self.failing_cleanup_hosts
            .lock()
            .unwrap()
            .insert(host.to_string());
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn created_tasks(&self) -> Vec<(String, TaskKey)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::CreateTask { host, key } => Some((host, key)),
                _ => None,
            })
            .collect()
    }

    pub fn terminated_tasks(&self) -> Vec<(String, TaskKey)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::TerminateTask { host, key } => Some((host, key)),
                _ => None,
            })
            .collect()
    }

    pub fn destroyed_tasks(&self) -> Vec<(String, TaskKey)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::DestroyTask { host, key } => Some((host, key)),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_contexts(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::DeleteContext { host, context_id } => Some((host, context_id)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_cleanup(&self, host: &str) -> OrchestratorResult<()> {
        if self.failing_cleanup_hosts.lock().unwrap().contains(host) {
            return Err(OrchestratorError::host_runtime(host, "模拟的清理失败"));
        }
        Ok(())
    }
}

#[async_trait]
impl HostRuntimeTransport for MockHostRuntimeTransport {
    async fn initialize(&self, host: &str, max_package_cache_size: u64) -> OrchestratorResult<()> {
        self.record(TransportCall::Initialize {
            host: host.to_string(),
            max_package_cache_size,
        });
        Ok(())
    }

    async fn create_task(
        &self,
        host: &str,
        descriptor: &TaskDescriptor,
    ) -> OrchestratorResult<TaskDirectories> {
        let key = TaskKey::new(descriptor.task_id.clone(), descriptor.context_id.clone());
        self.record(TransportCall::CreateTask {
            host: host.to_string(),
            key: key.clone(),
        });
        if self.failing_create_hosts.lock().unwrap().contains(host) {
            return Err(OrchestratorError::host_runtime(host, "模拟的创建失败"));
        }
        let task = format!("/work/{}/{}/{}", host, key.context_id, key.task_id);
        Ok(TaskDirectories {
            working: format!("{task}/work"),
            temporary: format!("{task}/tmp"),
            task,
        })
    }

    async fn terminate_task(
        &self,
        host: &str,
        task_id: &str,
        context_id: &str,
    ) -> OrchestratorResult<()> {
        self.record(TransportCall::TerminateTask {
            host: host.to_string(),
            key: TaskKey::new(task_id, context_id),
        });
        self.check_cleanup(host)
    }

    async fn destroy_task(
        &self,
        host: &str,
        task_id: &str,
        context_id: &str,
    ) -> OrchestratorResult<()> {
        let delay = *self.destroy_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(TransportCall::DestroyTask {
            host: host.to_string(),
            key: TaskKey::new(task_id, context_id),
        });
        self.check_cleanup(host)
    }

    async fn delete_context(&self, host: &str, context_id: &str) -> OrchestratorResult<()> {
        self.record(TransportCall::DeleteContext {
            host: host.to_string(),
            context_id: context_id.to_string(),
        });
        self.check_cleanup(host)
    }

    async fn set_max_package_cache_size(&self, host: &str, bytes: u64) -> OrchestratorResult<()> {
        self.record(TransportCall::SetMaxPackageCacheSize {
            host: host.to_string(),
            bytes,
        });
        Ok(())
    }
}

/// Mock implementation of HostManager for testing
///
/// Hosts without an explicit status are reported online.
#[derive(Debug, Clone, Default)]
pub struct MockHostManager {
    statuses: Arc<Mutex<HashMap<String, HostStatus>>>,
    limits: Arc<Mutex<HostLoadLimits>>,
    queries: Arc<Mutex<HashMap<String, Option<Vec<String>>>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl MockHostManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(self, host: &str, limit: u32) -> Self {
        self.limits
            .lock()
            .unwrap()
            .per_host
            .insert(host.to_string(), limit);
        self
    }

    pub fn with_default_limit(self, limit: u32) -> Self {
        self.limits.lock().unwrap().default_limit = Some(limit);
        self
    }

    pub fn with_query(self, query: &str, hosts: &[&str]) -> Self {
        self.queries.lock().unwrap().insert(
            query.to_string(),
            Some(hosts.iter().map(|h| h.to_string()).collect()),
        );
        self
    }

    /// The query is rejected as invalid
    pub fn with_invalid_query(self, query: &str) -> Self {
        self.queries.lock().unwrap().insert(query.to_string(), None);
        self
    }

    pub fn set_status(&self, host: &str, status: HostStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(host.to_string(), status);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check_available(&self) -> OrchestratorResult<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(OrchestratorError::HostManager("模拟的协调器不可用".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HostManager for MockHostManager {
    async fn host_statuses(
        &self,
        hosts: &[String],
    ) -> OrchestratorResult<HashMap<String, HostStatus>> {
        self.check_available()?;
        let statuses = self.statuses.lock().unwrap();
        Ok(hosts
            .iter()
            .map(|host| {
                let status = statuses.get(host).copied().unwrap_or(HostStatus::Online);
                (host.clone(), status)
            })
            .collect())
    }

    async fn load_limits(&self) -> OrchestratorResult<HostLoadLimits> {
        self.check_available()?;
        Ok(self.limits.lock().unwrap().clone())
    }

    async fn query_hosts(&self, query: &str) -> OrchestratorResult<Vec<String>> {
        self.check_available()?;
        match self.queries.lock().unwrap().get(query) {
            Some(Some(hosts)) => Ok(hosts.clone()),
            Some(None) => Err(OrchestratorError::InvalidHostQuery {
                query: query.to_string(),
                message: "模拟的无效查询".to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

/// Mock implementation of PackageRepository for testing
#[derive(Debug, Clone, Default)]
pub struct MockPackageRepository {
    packages: Arc<Mutex<HashMap<String, String>>>,
}

impl MockPackageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(self, query: &str, file_name: &str) -> Self {
        self.packages
            .lock()
            .unwrap()
            .insert(query.to_string(), file_name.to_string());
        self
    }
}

#[async_trait]
impl PackageRepository for MockPackageRepository {
    async fn resolve(&self, query: &str) -> OrchestratorResult<Option<String>> {
        Ok(self.packages.lock().unwrap().get(query).cloned())
    }
}

/// Mock implementation of ConfigStore for testing
#[derive(Debug, Clone, Default)]
pub struct MockConfigStore {
    persisted: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last value persisted for a key
    pub fn get(&self, key: &str) -> Option<String> {
        self.persisted
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn count(&self) -> usize {
        self.persisted.lock().unwrap().len()
    }
}

#[async_trait]
impl ConfigStore for MockConfigStore {
    async fn persist(&self, key: &str, value: &str) -> OrchestratorResult<()> {
        self.persisted
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}
