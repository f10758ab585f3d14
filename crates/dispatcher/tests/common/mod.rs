//! Shared harness for dispatcher integration tests

#![allow(dead_code)]

use std::sync::Arc;

use orchestrator_core::{models::TaskState, SequentialIdGenerator};
use orchestrator_dispatcher::{Orchestrator, OrchestratorSettings};
use orchestrator_infrastructure::InMemoryLogStorage;
use orchestrator_testing_utils::{MockConfigStore, MockHostManager, MockHostRuntimeTransport};

/// 使用mock协作者装配的编排器，随机种子与ID都是确定的
pub struct OrchestratorHarness {
    pub orchestrator: Orchestrator,
    pub transport: MockHostRuntimeTransport,
    pub host_manager: Option<MockHostManager>,
    pub config_store: MockConfigStore,
    pub log_storage: Arc<InMemoryLogStorage>,
}

impl OrchestratorHarness {
    /// 没有主机管理器：所有主机在线且不限制负载
    pub fn new() -> Self {
        Self::build(None, Self::settings())
    }

    pub fn with_host_manager(host_manager: MockHostManager) -> Self {
        Self::build(Some(host_manager), Self::settings())
    }

    pub fn with_settings(settings: OrchestratorSettings) -> Self {
        Self::build(None, settings)
    }

    pub fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            rng_seed: Some(7),
            ..OrchestratorSettings::default()
        }
    }

    pub fn build(host_manager: Option<MockHostManager>, settings: OrchestratorSettings) -> Self {
        let transport = MockHostRuntimeTransport::new();
        let config_store = MockConfigStore::new();
        let log_storage = Arc::new(InMemoryLogStorage::new());

        let mut builder = Orchestrator::builder(Arc::new(transport.clone()), log_storage.clone())
            .with_id_generator(Arc::new(SequentialIdGenerator::deterministic()))
            .with_config_store(Arc::new(config_store.clone()))
            .with_settings(settings);
        if let Some(manager) = &host_manager {
            builder = builder.with_host_manager(Arc::new(manager.clone()));
        }

        Self {
            orchestrator: builder.build(),
            transport,
            host_manager,
            config_store,
            log_storage,
        }
    }

    pub async fn add_hosts(&self, hosts: &[&str]) {
        for host in hosts {
            self.orchestrator.register_host_runtime(host).await.unwrap();
        }
    }

    pub async fn add_context(&self, id: &str) -> String {
        self.orchestrator
            .new_context(Some(id), id, "", serde_json::Value::Null, false)
            .await
            .unwrap()
    }

    pub async fn add_self_cleaning_context(&self, id: &str) -> String {
        self.orchestrator
            .new_context(Some(id), id, "", serde_json::Value::Null, true)
            .await
            .unwrap()
    }

    pub async fn state(&self, task_id: &str, context_id: &str) -> TaskState {
        self.orchestrator
            .get_task(task_id, context_id)
            .await
            .unwrap()
            .state
    }

    pub async fn host_of(&self, task_id: &str, context_id: &str) -> Option<String> {
        self.orchestrator
            .get_task(task_id, context_id)
            .await
            .unwrap()
            .host_name
    }

    pub async fn load_of(&self, host: &str) -> u32 {
        self.orchestrator
            .get_host_runtimes()
            .await
            .into_iter()
            .find(|h| h.host_name == host)
            .map(|h| h.load)
            .unwrap_or_default()
    }

    /// 模拟worker上报成功结束
    pub async fn finish(&self, task_id: &str, context_id: &str) {
        let host = self.host_of(task_id, context_id).await.unwrap();
        self.orchestrator
            .checkpoint_reached("task finished", Some("0"), task_id, context_id, &host)
            .await
            .unwrap();
        self.orchestrator
            .task_reached_end(task_id, context_id, TaskState::Finished)
            .await
            .unwrap();
    }
}
