use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info, warn};

use orchestrator_core::{
    models::{
        is_valid_checkpoint_name, is_valid_identifier, Checkpoint, CheckpointTemplate,
        ContextEntry, DependencyCheckpoint, HostRuntimeEntry, HostSelection, OrchestratorEvent,
        PackageReference, ServiceEntry, ServiceTemplate, TaskDescriptor, TaskEntry, TaskKey,
        TaskState, CHECKPOINT_TASK_STARTED,
    },
    traits::{
        CanonicalHostNameResolver, ConfigStore, HostManager, HostNameResolver,
        HostRuntimeTransport, LogRecord, LogStorage, PackageRepository, TaskLogLevel,
    },
    IdGenerator, OrchestratorError, OrchestratorResult, SequentialIdGenerator,
    SYSTEM_CONTEXT_ID, TASK_MANAGER_TASK_ID,
};
use orchestrator_infrastructure::{MetricsCollector, StructuredLogger};

use crate::checkpoint_waiter::{CheckpointWaiter, WaitTimeout};
use crate::lifecycle::{Completion, LifecycleManager};
use crate::registry::{Registry, RuntimeSettings};
use crate::scheduler::Scheduler;
use crate::service_registry::ServiceRegistry;

/// 持久化配置中运行时可修改的键
pub const MAX_PACKAGE_CACHE_SIZE_KEY: &str = "max_package_cache_size";
pub const KEPT_CLOSED_CONTEXT_COUNT_KEY: &str = "kept_closed_context_count";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 编排器设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_package_cache_size: u64,
    pub kept_closed_context_count: usize,
    /// 自清理上下文保留的已完成任务数量
    pub default_finished_tasks_kept: usize,
    pub default_load_units: u32,
    pub default_host_load_limit: Option<u32>,
    /// 负载服务与配置都没有给出上限时使用（内存启发式）
    pub fallback_load_limit: u32,
    /// 固定随机种子使主机选择可重现
    pub rng_seed: Option<u64>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_package_cache_size: 1024 * 1024 * 1024,
            kept_closed_context_count: 3,
            default_finished_tasks_kept: 10,
            default_load_units: 1,
            default_host_load_limit: None,
            fallback_load_limit: 1024,
            rng_seed: None,
        }
    }
}

/// 编排器各组件共享的状态
pub(crate) struct Shared {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) waiter: CheckpointWaiter,
    pub(crate) services: ServiceRegistry,
    pub(crate) scheduler: Scheduler,
    pub(crate) lifecycle: LifecycleManager,
    pub(crate) transport: Arc<dyn HostRuntimeTransport>,
    pub(crate) host_manager: Option<Arc<dyn HostManager>>,
    pub(crate) packages: Option<Arc<dyn PackageRepository>>,
    pub(crate) log_storage: Arc<dyn LogStorage>,
    pub(crate) resolver: Arc<dyn HostNameResolver>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) config_store: Option<Arc<dyn ConfigStore>>,
    pub(crate) logger: StructuredLogger,
    pub(crate) metrics: MetricsCollector,
    pub(crate) events: broadcast::Sender<OrchestratorEvent>,
    pub(crate) settings: OrchestratorSettings,
    /// 任意任务的暂停被释放时唤醒等待者
    pub(crate) released: Notify,
}

impl Shared {
    pub(crate) async fn release_hold(&self, key: &TaskKey) {
        self.registry.lock().await.release_hold(key);
        self.released.notify_waiters();
    }
}

pub struct OrchestratorBuilder {
    transport: Arc<dyn HostRuntimeTransport>,
    log_storage: Arc<dyn LogStorage>,
    host_manager: Option<Arc<dyn HostManager>>,
    packages: Option<Arc<dyn PackageRepository>>,
    resolver: Arc<dyn HostNameResolver>,
    ids: Arc<dyn IdGenerator>,
    config_store: Option<Arc<dyn ConfigStore>>,
    settings: OrchestratorSettings,
}

impl OrchestratorBuilder {
    pub fn new(transport: Arc<dyn HostRuntimeTransport>, log_storage: Arc<dyn LogStorage>) -> Self {
        Self {
            transport,
            log_storage,
            host_manager: None,
            packages: None,
            resolver: Arc::new(CanonicalHostNameResolver),
            ids: Arc::new(SequentialIdGenerator::new()),
            config_store: None,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_host_manager(mut self, host_manager: Arc<dyn HostManager>) -> Self {
        self.host_manager = Some(host_manager);
        self
    }

    pub fn with_package_repository(mut self, packages: Arc<dyn PackageRepository>) -> Self {
        self.packages = Some(packages);
        self
    }

    pub fn with_host_name_resolver(mut self, resolver: Arc<dyn HostNameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_config_store(mut self, config_store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(config_store);
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Orchestrator {
        let rng = match self.settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let registry = Registry::new(
            RuntimeSettings {
                max_package_cache_size: self.settings.max_package_cache_size,
                kept_closed_context_count: self.settings.kept_closed_context_count,
            },
            rng,
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Orchestrator {
            shared: Arc::new(Shared {
                registry: Mutex::new(registry),
                waiter: CheckpointWaiter::new(),
                services: ServiceRegistry::new(),
                scheduler: Scheduler::new(),
                lifecycle: LifecycleManager::new(),
                logger: StructuredLogger::new(self.log_storage.clone()),
                transport: self.transport,
                host_manager: self.host_manager,
                packages: self.packages,
                log_storage: self.log_storage,
                resolver: self.resolver,
                ids: self.ids,
                config_store: self.config_store,
                metrics: MetricsCollector::new(),
                events,
                settings: self.settings,
                released: Notify::new(),
            }),
        }
    }
}

/// 编排器：任务准入、调度、检查点与生命周期的统一入口
///
/// 可以廉价地克隆并在多个并发调用者之间共享。
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn builder(
        transport: Arc<dyn HostRuntimeTransport>,
        log_storage: Arc<dyn LogStorage>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder::new(transport, log_storage)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.shared.events.subscribe()
    }

    /// 执行调度轮次并处理由此产生的完成事件
    async fn schedule(&self) {
        let completions = self.shared.scheduler.run(&self.shared).await;
        self.shared.lifecycle.settle(&self.shared, completions).await;
    }

    // ---- 任务准入 ----

    /// 提交任务：校验、解析、插入为 SUBMITTED 并立即尝试调度
    pub async fn submit_task(&self, descriptor: TaskDescriptor) -> OrchestratorResult<()> {
        let shared = &self.shared;
        descriptor.validate()?;
        if descriptor.context_id == SYSTEM_CONTEXT_ID && descriptor.task_id == TASK_MANAGER_TASK_ID
        {
            return Err(OrchestratorError::ReservedTaskId {
                task_id: descriptor.task_id,
            });
        }

        let original = descriptor.clone();
        let mut resolved = descriptor;
        self.resolve_package(&mut resolved).await?;
        match &mut resolved.host_runtimes {
            HostSelection::Names(names) => {
                let canonical = names
                    .iter()
                    .map(|name| shared.resolver.canonical_name(name))
                    .collect::<OrchestratorResult<Vec<_>>>()?;
                *names = canonical;
            }
            HostSelection::AsTask(other) => {
                if *other == resolved.task_id {
                    return Err(OrchestratorError::InvalidDescriptor(
                        "任务不能绑定到自身的主机".to_string(),
                    ));
                }
                let implicit = DependencyCheckpoint {
                    name: CHECKPOINT_TASK_STARTED.to_string(),
                    task_id: other.clone(),
                    value: None,
                };
                if !resolved.dependencies.contains(&implicit) {
                    resolved.dependencies.push(implicit);
                }
            }
            HostSelection::Any | HostSelection::Query(_) => {}
        }
        let load_units = resolved
            .load_units
            .unwrap_or(shared.settings.default_load_units);
        resolved.load_units = Some(load_units);

        let key = TaskKey::new(resolved.task_id.clone(), resolved.context_id.clone());
        let tree_address = resolved.tree_address.clone();
        let replaced = {
            let mut registry = loop {
                let registry = shared.registry.lock().await;
                if !registry.is_held(&key) {
                    break registry;
                }
                // 等待上一次运行的远程清理完成，避免清理波及新的运行
                let released = shared.released.notified();
                tokio::pin!(released);
                released.as_mut().enable();
                drop(registry);
                debug!("任务 {} 的上一次运行仍在清理，等待后再准入", key);
                released.await;
            };
            Self::admit(&mut registry, &key, original, resolved, load_units)?
        };

        if let Some(previous) = replaced {
            debug!("已替换终止状态的任务 {}", key);
            if let Some(host) = &previous.host_name {
                if let Err(e) = shared
                    .transport
                    .destroy_task(host, &previous.task_id, &previous.context_id)
                    .await
                {
                    warn!("主机 {} 清理被替换的任务 {} 失败: {}", host, key, e);
                }
            }
        }
        if let Err(e) = shared
            .log_storage
            .add_task(&key.context_id, &key.task_id)
            .await
        {
            warn!("为任务 {} 创建日志失败: {}", key, e);
        }
        shared.release_hold(&key).await;
        shared.logger.log_task_submitted(&key, &tree_address).await;
        shared.metrics.record_task_submitted();

        self.schedule().await;
        Ok(())
    }

    /// 持锁完成准入检查并插入任务，返回被替换的终止状态任务
    ///
    /// 新任务处于暂停状态，调用方清理旧运行并创建日志后释放。
    fn admit(
        registry: &mut Registry,
        key: &TaskKey,
        original: TaskDescriptor,
        resolved: TaskDescriptor,
        load_units: u32,
    ) -> OrchestratorResult<Option<TaskEntry>> {
        let context = registry.context(&key.context_id)?;
        if !context.open {
            return Err(OrchestratorError::InvalidDescriptor(format!(
                "上下文 {} 已关闭，不再接受任务",
                key.context_id
            )));
        }
        if let HostSelection::Names(names) = &resolved.host_runtimes {
            if let Some(missing) = names.iter().find(|name| !registry.has_host(name)) {
                return Err(OrchestratorError::HostRuntimeNotFound {
                    host: missing.clone(),
                });
            }
        }
        if let Some(existing) = registry.find_task(key) {
            if !existing.state.is_terminal() {
                return Err(OrchestratorError::TaskConflict {
                    task_id: key.task_id.clone(),
                    context_id: key.context_id.clone(),
                });
            }
        }

        let replaced = registry.remove_task(key, false);
        let seq = registry.next_admission_seq();
        if let Err(e) = registry.insert_task(TaskEntry::new(original, resolved, load_units, seq)) {
            if let Some(previous) = replaced {
                if let Err(restore) = registry.insert_task(previous) {
                    warn!("恢复被替换的任务 {} 失败: {}", key, restore);
                }
            }
            return Err(e);
        }
        if replaced.is_some() {
            registry.drop_checkpoints(key);
        }
        registry.hold(key);
        Ok(replaced)
    }

    async fn resolve_package(&self, descriptor: &mut TaskDescriptor) -> OrchestratorResult<()> {
        let PackageReference::Query(query) = &descriptor.package else {
            return Ok(());
        };
        let repository = self.shared.packages.as_ref().ok_or_else(|| {
            OrchestratorError::PackageRepository("没有配置软件仓库，无法解析软件包查询".to_string())
        })?;
        let name = repository.resolve(query).await?.ok_or_else(|| {
            OrchestratorError::PackageRepository(format!("没有匹配查询 {query} 的软件包"))
        })?;
        debug!("软件包查询 {} 解析为 {}", query, name);
        descriptor.package = PackageReference::Name(name);
        Ok(())
    }

    pub fn unique_task_id(&self, prefix: &str) -> String {
        self.shared.ids.next_task_id(prefix)
    }

    // ---- 终止 ----

    /// 远程终止（尽力而为）后强制中止；已结束的任务不受影响
    async fn abort_tasks(&self, targets: Vec<(TaskKey, Option<String>)>) {
        let shared = &self.shared;
        let terminations = targets.iter().filter_map(|(key, host)| {
            let host = host.as_deref()?;
            Some(async move {
                if let Err(e) = shared
                    .transport
                    .terminate_task(host, &key.task_id, &key.context_id)
                    .await
                {
                    warn!("主机 {} 终止任务 {} 失败: {}", host, key, e);
                }
            })
        });
        join_all(terminations).await;

        shared
            .lifecycle
            .settle(
                shared,
                targets.into_iter().map(|(key, _)| Completion::aborted(key)),
            )
            .await;
    }

    fn live_target(task: &TaskEntry) -> Option<(TaskKey, Option<String>)> {
        if task.state.is_terminal() {
            return None;
        }
        let host = match task.state {
            TaskState::Scheduled | TaskState::Running | TaskState::Sleeping => {
                task.host_name.clone()
            }
            _ => None,
        };
        Some((task.key(), host))
    }

    pub async fn kill_task(&self, task_id: &str, context_id: &str) -> OrchestratorResult<()> {
        let target = {
            let registry = self.shared.registry.lock().await;
            let task = registry.task(&TaskKey::new(task_id, context_id))?;
            Self::live_target(task)
        };
        match target {
            Some(target) => {
                info!("终止任务 {}", target.0);
                self.abort_tasks(vec![target]).await;
            }
            None => debug!("任务 {}@{} 已结束，无需终止", task_id, context_id),
        }
        Ok(())
    }

    pub async fn kill_context(&self, context_id: &str) -> OrchestratorResult<()> {
        let targets: Vec<_> = {
            let registry = self.shared.registry.lock().await;
            registry.context(context_id)?;
            registry
                .tasks_in_context(context_id)
                .iter()
                .filter_map(Self::live_target)
                .collect()
        };
        info!("终止上下文 {} 中的 {} 个任务", context_id, targets.len());
        self.abort_tasks(targets).await;
        Ok(())
    }

    /// 中止上下文中的所有任务并删除上下文；系统上下文不受影响
    pub async fn kill_and_delete_context(&self, context_id: &str) -> OrchestratorResult<()> {
        if context_id == SYSTEM_CONTEXT_ID {
            debug!("忽略删除系统上下文的请求");
            return Ok(());
        }
        {
            let mut registry = self.shared.registry.lock().await;
            registry.context_mut(context_id)?.close();
        }
        self.kill_context(context_id).await?;
        self.shared
            .lifecycle
            .delete_inactive_context(&self.shared, context_id)
            .await;
        Ok(())
    }

    /// 树地址上的任务
    pub async fn find_task_by_address(&self, tree_address: &str) -> OrchestratorResult<TaskKey> {
        let registry = self.shared.registry.lock().await;
        registry.tree.find(tree_address).cloned().ok_or_else(|| {
            OrchestratorError::InvalidTreeAddress(format!("地址 {tree_address} 上没有任务"))
        })
    }

    pub async fn kill_task_by_address(&self, tree_address: &str) -> OrchestratorResult<()> {
        let key = self.find_task_by_address(tree_address).await?;
        self.kill_task(&key.task_id, &key.context_id).await
    }

    /// 终止树地址节点下的所有任务，返回被终止的数量
    pub async fn kill_node_by_address(&self, prefix: &str) -> OrchestratorResult<usize> {
        let targets = self.live_targets_under(prefix).await?;
        let count = targets.len();
        self.abort_tasks(targets).await;
        Ok(count)
    }

    async fn live_targets_under(
        &self,
        prefix: &str,
    ) -> OrchestratorResult<Vec<(TaskKey, Option<String>)>> {
        let registry = self.shared.registry.lock().await;
        let keys = registry.tree.keys_under(prefix);
        if keys.is_empty() {
            return Err(OrchestratorError::InvalidTreeAddress(format!(
                "节点 {prefix} 下没有任务"
            )));
        }
        Ok(keys
            .iter()
            .filter_map(|key| registry.find_task(key))
            .filter_map(Self::live_target)
            .collect())
    }

    // ---- 删除 ----

    /// 终止树地址上的任务并将其从注册表、主机与日志存储中删除
    ///
    /// 已到达的检查点保留，依赖它们的任务仍可启动。
    pub async fn delete_task_by_address(&self, tree_address: &str) -> OrchestratorResult<()> {
        let key = self.find_task_by_address(tree_address).await?;
        self.kill_task(&key.task_id, &key.context_id).await?;
        if self.forget_tasks(vec![key.clone()]).await == 0 {
            debug!("任务 {} 已不在注册表中或尚未结束", key);
        }
        Ok(())
    }

    /// 终止并删除树地址节点下的所有任务，返回删除的数量
    pub async fn delete_node_by_address(&self, prefix: &str) -> OrchestratorResult<usize> {
        let targets = self.live_targets_under(prefix).await?;
        self.abort_tasks(targets).await;
        let keys = self.shared.registry.lock().await.tree.keys_under(prefix);
        Ok(self.forget_tasks(keys).await)
    }

    /// 删除已结束的任务，返回删除的数量；未结束的任务保持不变
    async fn forget_tasks(&self, keys: Vec<TaskKey>) -> usize {
        let shared = &self.shared;
        let removed: Vec<TaskEntry> = {
            let mut registry = shared.registry.lock().await;
            let mut removed = Vec::new();
            for key in &keys {
                if !registry.find_task(key).is_some_and(|t| t.state.is_terminal()) {
                    continue;
                }
                if let Some(task) = registry.remove_task(key, false) {
                    registry.hold(key);
                    removed.push(task);
                }
            }
            removed
        };
        if removed.is_empty() {
            return 0;
        }

        for task in &removed {
            let key = task.key();
            if let Some(host) = &task.host_name {
                if let Err(e) = shared
                    .transport
                    .destroy_task(host, &task.task_id, &task.context_id)
                    .await
                {
                    warn!("主机 {} 清理被删除的任务 {} 失败: {}", host, key, e);
                }
            }
            if let Err(e) = shared
                .log_storage
                .remove_task(&task.context_id, &task.task_id)
                .await
            {
                warn!("删除任务 {} 的日志失败: {}", key, e);
            }
            shared.release_hold(&key).await;
            info!("已删除任务 {} ({})", key, task.tree_address);
        }
        // 删除会改变检查点的可达性
        shared.waiter.notify_all();
        self.schedule().await;
        removed.len()
    }

    // ---- 任务日志 ----

    /// worker上报的一行任务日志
    pub async fn log(
        &self,
        context_id: &str,
        task_id: &str,
        level: TaskLogLevel,
        timestamp: DateTime<Utc>,
        message: &str,
    ) -> OrchestratorResult<()> {
        self.shared
            .log_storage
            .append_record(
                context_id,
                task_id,
                LogRecord {
                    timestamp,
                    level,
                    line: message.to_string(),
                },
            )
            .await
    }

    /// 读取任务日志；`range` 为从0开始的闭区间
    pub async fn get_logs_for_task(
        &self,
        task_id: &str,
        context_id: &str,
        range: Option<(usize, usize)>,
    ) -> OrchestratorResult<Vec<LogRecord>> {
        let storage = &self.shared.log_storage;
        match range {
            Some((first, last)) => storage.read_range(context_id, task_id, first, last).await,
            None => storage.read(context_id, task_id).await,
        }
    }

    pub async fn get_log_count_for_task(
        &self,
        task_id: &str,
        context_id: &str,
    ) -> OrchestratorResult<usize> {
        self.shared.log_storage.count(context_id, task_id).await
    }

    pub async fn get_logs_by_address(
        &self,
        tree_address: &str,
        range: Option<(usize, usize)>,
    ) -> OrchestratorResult<Vec<LogRecord>> {
        let key = self.find_task_by_address(tree_address).await?;
        self.get_logs_for_task(&key.task_id, &key.context_id, range)
            .await
    }

    pub async fn get_log_count_by_address(&self, tree_address: &str) -> OrchestratorResult<usize> {
        let key = self.find_task_by_address(tree_address).await?;
        self.get_log_count_for_task(&key.task_id, &key.context_id)
            .await
    }

    // ---- worker回调 ----

    pub async fn checkpoint_reached(
        &self,
        name: &str,
        value: Option<&str>,
        task_id: &str,
        context_id: &str,
        host_name: &str,
    ) -> OrchestratorResult<()> {
        let shared = &self.shared;
        if !is_valid_checkpoint_name(name) {
            return Err(OrchestratorError::InvalidDescriptor(format!(
                "非法的检查点名 \"{name}\""
            )));
        }
        let host = shared.resolver.canonical_name(host_name)?;
        let key = TaskKey::new(task_id, context_id);
        {
            let mut registry = shared.registry.lock().await;
            // 任务可能已被淘汰或删除，检查点照常记录
            registry.context(context_id)?;
            if registry.find_task(&key).is_none() {
                debug!("记录未知任务 {} 的检查点 {}", key, name);
            }
            registry.append_checkpoint(Checkpoint::new(
                name,
                task_id,
                context_id,
                Some(host),
                value.map(str::to_string),
            ));
        }
        shared.logger.log_checkpoint_reached(&key, name, value).await;
        shared.metrics.record_checkpoint_reached();

        self.schedule().await;
        shared.waiter.notify_all();
        Ok(())
    }

    /// worker上报任务结束，只接受 FINISHED 与 ABORTED
    pub async fn task_reached_end(
        &self,
        task_id: &str,
        context_id: &str,
        state: TaskState,
    ) -> OrchestratorResult<()> {
        let key = TaskKey::new(task_id, context_id);
        {
            let registry = self.shared.registry.lock().await;
            let task = registry.task(&key)?;
            if !state.is_terminal() {
                return Err(OrchestratorError::InvalidStateTransition {
                    from: task.state,
                    to: state,
                });
            }
        }
        self.shared
            .lifecycle
            .settle(&self.shared, [Completion::new(key, state)])
            .await;
        Ok(())
    }

    pub async fn task_restarted(&self, task_id: &str, context_id: &str) -> OrchestratorResult<()> {
        let mut registry = self.shared.registry.lock().await;
        let task = registry.task_mut(&TaskKey::new(task_id, context_id))?;
        task.restart_count += 1;
        info!(
            "任务 {}@{} 已重启 (第 {} 次)",
            task_id, context_id, task.restart_count
        );
        Ok(())
    }

    pub async fn task_sleeping(&self, task_id: &str, context_id: &str) -> OrchestratorResult<()> {
        self.set_running_state(task_id, context_id, TaskState::Sleeping)
            .await
    }

    pub async fn task_woke(&self, task_id: &str, context_id: &str) -> OrchestratorResult<()> {
        self.set_running_state(task_id, context_id, TaskState::Running)
            .await
    }

    async fn set_running_state(
        &self,
        task_id: &str,
        context_id: &str,
        state: TaskState,
    ) -> OrchestratorResult<()> {
        let mut registry = self.shared.registry.lock().await;
        let task = registry.task_mut(&TaskKey::new(task_id, context_id))?;
        let from = task.set_state(state)?;
        debug!("任务 {}@{}: {} -> {}", task_id, context_id, from, state);
        Ok(())
    }

    // ---- 检查点查询 ----

    /// 查询检查点；超时返回空结果，检查点已不可能到达时返回错误
    pub async fn look_checkpoint(
        &self,
        template: &CheckpointTemplate,
        timeout: WaitTimeout,
    ) -> OrchestratorResult<Vec<Checkpoint>> {
        if let Some(context_id) = &template.context_id {
            self.shared.registry.lock().await.context(context_id)?;
        }
        self.shared
            .waiter
            .look(&self.shared.registry, template, timeout)
            .await
    }

    /// 第一个匹配检查点的值
    pub async fn look_checkpoint_value(
        &self,
        name: &str,
        task_id: &str,
        context_id: &str,
        timeout: WaitTimeout,
    ) -> OrchestratorResult<Option<String>> {
        let template = CheckpointTemplate::named(name)
            .with_task(task_id)
            .with_context(context_id);
        self.look_checkpoint(&template, timeout)
            .await?
            .into_iter()
            .next()
            .map(|checkpoint| checkpoint.value)
            .ok_or_else(|| OrchestratorError::CheckpointNotFound {
                name: name.to_string(),
            })
    }

    pub async fn get_checkpoints(&self, context_id: &str) -> OrchestratorResult<Vec<Checkpoint>> {
        let registry = self.shared.registry.lock().await;
        registry.context(context_id)?;
        Ok(registry.find_checkpoints(&CheckpointTemplate::new().with_context(context_id)))
    }

    // ---- 上下文 ----

    /// 创建上下文并返回其ID；未指定ID时自动生成
    pub async fn new_context(
        &self,
        id: Option<&str>,
        name: &str,
        description: &str,
        payload: serde_json::Value,
        self_cleaning: bool,
    ) -> OrchestratorResult<String> {
        let shared = &self.shared;
        let id = match id {
            Some(id) => id.to_string(),
            None => shared.ids.next_context_id(),
        };
        if !is_valid_identifier(&id) {
            return Err(OrchestratorError::InvalidDescriptor(format!(
                "非法的上下文ID \"{id}\""
            )));
        }
        let finished_tasks_kept =
            self_cleaning.then_some(shared.settings.default_finished_tasks_kept);
        shared
            .registry
            .lock()
            .await
            .insert_context(ContextEntry::new(
                id.clone(),
                name,
                description,
                payload,
                finished_tasks_kept,
            ))?;

        if let Err(e) = shared.log_storage.add_context(&id).await {
            warn!("为上下文 {} 创建日志失败: {}", id, e);
        }
        shared.logger.log_context_created(&id, name).await;
        Ok(id)
    }

    /// 关闭上下文：不再接受新任务，任务全部结束后进入关闭上下文保留队列
    pub async fn close_context(&self, context_id: &str) -> OrchestratorResult<()> {
        if context_id == SYSTEM_CONTEXT_ID {
            debug!("系统上下文始终保持打开");
            return Ok(());
        }
        let expired = {
            let mut registry = self.shared.registry.lock().await;
            registry.context_mut(context_id)?.close();
            registry.note_finished_context(context_id)
        };
        self.shared.logger.log_context_closed(context_id).await;
        // 关闭会改变检查点的可达性
        self.shared.waiter.notify_all();
        for id in expired {
            self.shared
                .lifecycle
                .delete_inactive_context(&self.shared, &id)
                .await;
        }
        Ok(())
    }

    // ---- 主机运行时 ----

    pub async fn register_host_runtime(&self, host_name: &str) -> OrchestratorResult<()> {
        let shared = &self.shared;
        let host = shared.resolver.canonical_name(host_name)?;
        let (added, count) = {
            let mut registry = shared.registry.lock().await;
            let added = registry.add_host(HostRuntimeEntry::new(host.clone()));
            (added, registry.hosts.len())
        };
        if !added {
            warn!("主机运行时 {} 已注册", host);
            return Ok(());
        }
        shared.metrics.set_registered_hosts(count);
        shared.logger.log_host_registered(&host).await;
        let _ = shared.events.send(OrchestratorEvent::HostRuntimeRegistered {
            host_name: host.clone(),
        });

        self.schedule().await;
        Ok(())
    }

    /// 注销主机运行时：先中止其上所有未结束的任务
    pub async fn unregister_host_runtime(&self, host_name: &str) -> OrchestratorResult<()> {
        let shared = &self.shared;
        let host = shared.resolver.canonical_name(host_name)?;
        let (occupants, count) = {
            let mut registry = shared.registry.lock().await;
            registry.host(&host)?;
            let occupants: Vec<TaskKey> = registry.occupants(&host).map(TaskEntry::key).collect();
            registry.remove_host(&host)?;
            (occupants, registry.hosts.len())
        };
        let aborted = occupants.len();
        shared
            .lifecycle
            .settle(shared, occupants.into_iter().map(Completion::aborted))
            .await;

        shared.metrics.set_registered_hosts(count);
        shared.logger.log_host_unregistered(&host, aborted).await;
        let _ = shared.events.send(OrchestratorEvent::HostRuntimeUnregistered {
            host_name: host,
        });
        Ok(())
    }

    pub async fn get_host_runtimes(&self) -> Vec<HostRuntimeEntry> {
        self.shared.registry.lock().await.hosts()
    }

    // ---- 运行时设置 ----

    pub async fn settings(&self) -> RuntimeSettings {
        self.shared.registry.lock().await.settings().clone()
    }

    /// 修改软件包缓存上限：下发到所有主机并持久化
    pub async fn set_max_package_cache_size(&self, bytes: u64) -> OrchestratorResult<()> {
        let shared = &self.shared;
        let hosts = {
            let mut registry = shared.registry.lock().await;
            registry.settings_mut().max_package_cache_size = bytes;
            registry.host_names()
        };
        join_all(hosts.iter().map(|host| async move {
            if let Err(e) = shared.transport.set_max_package_cache_size(host, bytes).await {
                warn!("主机 {} 更新软件包缓存上限失败: {}", host, e);
            }
        }))
        .await;
        self.persist(MAX_PACKAGE_CACHE_SIZE_KEY, &bytes.to_string())
            .await
    }

    /// 修改关闭上下文的保留数量，超出部分立即删除
    pub async fn set_kept_closed_context_count(&self, count: usize) -> OrchestratorResult<()> {
        let expired = {
            let mut registry = self.shared.registry.lock().await;
            registry.settings_mut().kept_closed_context_count = count;
            registry.trim_closed_contexts()
        };
        for id in expired {
            self.shared
                .lifecycle
                .delete_inactive_context(&self.shared, &id)
                .await;
        }
        self.persist(KEPT_CLOSED_CONTEXT_COUNT_KEY, &count.to_string())
            .await
    }

    async fn persist(&self, key: &str, value: &str) -> OrchestratorResult<()> {
        match &self.shared.config_store {
            Some(store) => store.persist(key, value).await,
            None => {
                debug!("没有配置存储，{} = {} 不会被持久化", key, value);
                Ok(())
            }
        }
    }

    // ---- 服务目录 ----

    /// 注册服务；所属任务必须存在且尚未结束
    ///
    /// 注册期间持有注册表锁，任务不会在检查与写入之间结束。
    /// 锁顺序：注册表先于服务目录。
    pub async fn register_service(&self, entry: &ServiceEntry) -> OrchestratorResult<()> {
        let registry = self.shared.registry.lock().await;
        let key = TaskKey::new(entry.task_id.as_str(), entry.context_id.as_str());
        let task = registry.task(&key)?;
        if task.state.is_terminal() {
            return Err(OrchestratorError::InvalidServiceEntry(format!(
                "任务 {} 已结束",
                task.key()
            )));
        }
        self.shared.services.register(entry).await
    }

    pub async fn unregister_services(&self, template: &ServiceTemplate) -> OrchestratorResult<usize> {
        self.shared.services.unregister(template).await
    }

    pub async fn look_services(
        &self,
        template: &ServiceTemplate,
    ) -> OrchestratorResult<Vec<ServiceEntry>> {
        self.shared.services.look(template).await
    }

    pub async fn find_service(&self, service_name: &str, interface_name: &str) -> Option<ServiceEntry> {
        self.shared.services.find(service_name, interface_name).await
    }

    // ---- 只读投影 ----

    pub async fn get_tasks(&self) -> Vec<TaskEntry> {
        self.shared.registry.lock().await.tasks()
    }

    pub async fn get_task(&self, task_id: &str, context_id: &str) -> OrchestratorResult<TaskEntry> {
        self.shared
            .registry
            .lock()
            .await
            .task(&TaskKey::new(task_id, context_id))
            .cloned()
    }

    pub async fn get_tasks_in_context(&self, context_id: &str) -> OrchestratorResult<Vec<TaskEntry>> {
        let registry = self.shared.registry.lock().await;
        registry.context(context_id)?;
        Ok(registry.tasks_in_context(context_id))
    }

    pub async fn get_tasks_on_host(&self, host_name: &str) -> OrchestratorResult<Vec<TaskEntry>> {
        let host = self.shared.resolver.canonical_name(host_name)?;
        Ok(self.shared.registry.lock().await.tasks_on_host(&host))
    }

    pub async fn get_contexts(&self) -> Vec<ContextEntry> {
        self.shared.registry.lock().await.contexts()
    }

    pub async fn get_context(&self, context_id: &str) -> OrchestratorResult<ContextEntry> {
        self.shared
            .registry
            .lock()
            .await
            .context(context_id)
            .cloned()
    }

    /// 编排器自身的审计日志
    pub async fn read_audit_log(&self) -> OrchestratorResult<Vec<String>> {
        Ok(self
            .shared
            .log_storage
            .read(SYSTEM_CONTEXT_ID, TASK_MANAGER_TASK_ID)
            .await?
            .into_iter()
            .map(|record| record.line)
            .collect())
    }
}
