use std::collections::{HashMap, HashSet};
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use orchestrator_core::{
    models::{
        Checkpoint, HostLoadLimits, HostReservation, HostSelection, TaskDescriptor,
        TaskDirectories, TaskExclusivity, TaskKey, TaskState, CHECKPOINT_TASK_STARTED,
    },
    OrchestratorError, OrchestratorResult,
};

use crate::dependency_checker::DependencyChecker;
use crate::host_selector::{FleetSnapshot, HostSelector, LimitLoadHandler, SelectionRequest};
use crate::lifecycle::Completion;
use crate::orchestrator::Shared;
use crate::registry::Registry;

/// 一次主机查询的结果
enum QueryOutcome {
    Hosts(Vec<String>),
    /// 查询无效，任务必须中止
    Invalid(String),
}

/// 已选中主机、等待远程创建的任务
struct Dispatch {
    key: TaskKey,
    host: String,
    descriptor: TaskDescriptor,
}

/// 单次调度轮次的结果
#[derive(Default)]
struct PassOutcome {
    /// 本轮记录了 "task started" 检查点，可能让其他任务就绪
    started: usize,
    completions: Vec<Completion>,
}

/// 调度循环
///
/// 每一轮分四个阶段：持锁收集待调度任务，释放锁获取集群快照，
/// 持锁完成依赖检查与主机选择，释放锁分发到远程worker，最后再次持锁提交结果。
#[derive(Debug, Default)]
pub struct Scheduler {
    selector: HostSelector,
    dependencies: DependencyChecker,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 反复执行调度轮次直到没有新任务启动，返回需要中止的任务
    pub(crate) async fn run(&self, shared: &Shared) -> Vec<Completion> {
        let start_time = Instant::now();
        let mut completions: Vec<Completion> = Vec::new();
        let mut aborted: HashSet<TaskKey> = HashSet::new();

        loop {
            let outcome = self.pass(shared, &aborted).await;
            for completion in outcome.completions {
                if aborted.insert(completion.key.clone()) {
                    completions.push(completion);
                }
            }
            if outcome.started == 0 {
                break;
            }
            // 新的 "task started" 检查点可能满足依赖或阻塞查询
            shared.waiter.notify_all();
        }

        shared
            .metrics
            .record_scheduler_pass(start_time.elapsed().as_secs_f64());
        completions
    }

    async fn pass(&self, shared: &Shared, skip: &HashSet<TaskKey>) -> PassOutcome {
        // 阶段一：收集待调度任务
        let (pending, hosts) = {
            let registry = shared.registry.lock().await;
            let pending: Vec<(TaskKey, HostSelection)> = registry
                .keys_in_state(TaskState::Submitted)
                .into_iter()
                .filter(|key| !skip.contains(key))
                .filter_map(|key| {
                    let selection = registry.find_task(&key)?.resolved.host_runtimes.clone();
                    Some((key, selection))
                })
                .collect();
            (pending, registry.host_names())
        };
        if pending.is_empty() {
            return PassOutcome::default();
        }

        let fleet = match self.fleet_snapshot(shared, &hosts).await {
            Ok(fleet) => fleet,
            Err(e) => {
                warn!("集群协调器不可用，本轮不调度: {}", e);
                return PassOutcome::default();
            }
        };
        let queries = self.resolve_queries(shared, &pending).await;

        // 阶段二：依赖检查与主机选择
        let mut outcome = PassOutcome::default();
        let (dispatches, max_package_cache_size) = {
            let mut registry = shared.registry.lock().await;
            let mut dispatches = Vec::new();
            for (key, _) in &pending {
                match self.try_schedule(&mut registry, key, &fleet, &queries) {
                    Ok(Some(dispatch)) => dispatches.push(dispatch),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("任务 {} 无法准备调度，将被中止: {}", key, e);
                        outcome.completions.push(Completion::aborted(key.clone()));
                    }
                }
            }
            (dispatches, registry.settings().max_package_cache_size)
        };
        if dispatches.is_empty() {
            return outcome;
        }

        // 阶段三：不持锁分发
        let results = join_all(
            dispatches
                .iter()
                .map(|dispatch| self.dispatch(shared, dispatch, max_package_cache_size)),
        )
        .await;

        // 阶段四：提交
        let mut started = Vec::new();
        let mut orphaned = Vec::new();
        {
            let mut registry = shared.registry.lock().await;
            for (dispatch, result) in dispatches.into_iter().zip(results) {
                match result {
                    Ok(directories) => {
                        match Self::commit_started(&mut registry, &dispatch, directories) {
                            Some(true) => started.push(dispatch),
                            Some(false) => orphaned.push(dispatch),
                            None => {}
                        }
                    }
                    Err(e) => {
                        warn!(
                            "任务 {} 分发到主机 {} 失败: {}",
                            dispatch.key, dispatch.host, e
                        );
                        shared.metrics.record_dispatch_failure();
                        outcome.completions.push(Completion::aborted(dispatch.key));
                    }
                }
            }
        }

        for dispatch in &orphaned {
            // 分发期间任务已被中止或删除
            debug!("终止已失效的任务 {} (主机 {})", dispatch.key, dispatch.host);
            if let Err(e) = shared
                .transport
                .terminate_task(&dispatch.host, &dispatch.key.task_id, &dispatch.key.context_id)
                .await
            {
                warn!("终止任务 {} 失败: {}", dispatch.key, e);
            }
        }
        for dispatch in &started {
            shared.logger.log_task_started(&dispatch.key, &dispatch.host).await;
        }
        outcome.started = started.len();
        outcome
    }

    async fn fleet_snapshot(
        &self,
        shared: &Shared,
        hosts: &[String],
    ) -> OrchestratorResult<FleetSnapshot> {
        let settings = &shared.settings;
        let Some(manager) = &shared.host_manager else {
            return Ok(match settings.default_host_load_limit {
                Some(limit) => FleetSnapshot {
                    statuses: None,
                    load_handler: Box::new(LimitLoadHandler::new(
                        HostLoadLimits {
                            per_host: HashMap::new(),
                            default_limit: Some(limit),
                        },
                        settings.fallback_load_limit,
                    )),
                },
                None => FleetSnapshot::unmanaged(),
            });
        };

        let statuses = manager.host_statuses(hosts).await?;
        let mut limits = manager.load_limits().await?;
        if limits.default_limit.is_none() {
            limits.default_limit = settings.default_host_load_limit;
        }
        Ok(FleetSnapshot {
            statuses: Some(statuses),
            load_handler: Box::new(LimitLoadHandler::new(limits, settings.fallback_load_limit)),
        })
    }

    /// 求值本轮所有的主机查询；暂时失败的查询不出现在结果中
    async fn resolve_queries(
        &self,
        shared: &Shared,
        pending: &[(TaskKey, HostSelection)],
    ) -> HashMap<String, QueryOutcome> {
        let mut outcomes = HashMap::new();
        for (_, selection) in pending {
            let HostSelection::Query(query) = selection else {
                continue;
            };
            if outcomes.contains_key(query) {
                continue;
            }
            let Some(manager) = &shared.host_manager else {
                outcomes.insert(
                    query.clone(),
                    QueryOutcome::Invalid("没有可用的主机管理器来求值查询".to_string()),
                );
                continue;
            };
            match manager.query_hosts(query).await {
                Ok(hosts) => {
                    let canonical = hosts
                        .iter()
                        .filter_map(|host| match shared.resolver.canonical_name(host) {
                            Ok(name) => Some(name),
                            Err(e) => {
                                warn!("忽略查询 {} 返回的非法主机名: {}", query, e);
                                None
                            }
                        })
                        .collect();
                    outcomes.insert(query.clone(), QueryOutcome::Hosts(canonical));
                }
                Err(e @ OrchestratorError::InvalidHostQuery { .. }) => {
                    outcomes.insert(query.clone(), QueryOutcome::Invalid(e.to_string()));
                }
                Err(e) => {
                    debug!("主机查询 {} 暂时失败: {}", query, e);
                }
            }
        }
        outcomes
    }

    /// 持锁评估单个任务：Ok(None) 表示本轮保持 SUBMITTED
    fn try_schedule(
        &self,
        registry: &mut Registry,
        key: &TaskKey,
        fleet: &FleetSnapshot,
        queries: &HashMap<String, QueryOutcome>,
    ) -> OrchestratorResult<Option<Dispatch>> {
        let Some(task) = registry.find_task(key) else {
            return Ok(None);
        };
        if task.state != TaskState::Submitted || registry.is_held(key) {
            return Ok(None);
        }

        let mut candidates = match &task.resolved.host_runtimes {
            HostSelection::Any => registry.host_names(),
            HostSelection::Names(names) => names.clone(),
            HostSelection::Query(query) => match queries.get(query) {
                Some(QueryOutcome::Hosts(hosts)) => hosts.clone(),
                Some(QueryOutcome::Invalid(message)) => {
                    return Err(OrchestratorError::InvalidHostQuery {
                        query: query.clone(),
                        message: message.clone(),
                    });
                }
                None => return Ok(None),
            },
            HostSelection::AsTask(other_id) => {
                let other_key = TaskKey::new(other_id.clone(), key.context_id.clone());
                match registry.find_task(&other_key) {
                    None => {
                        return Err(OrchestratorError::task_not_found(
                            &other_key.task_id,
                            &other_key.context_id,
                        ));
                    }
                    Some(other) => match &other.host_name {
                        Some(host) => vec![host.clone()],
                        None if other.state.is_terminal() => {
                            return Err(OrchestratorError::InvalidDescriptor(format!(
                                "绑定的任务 {other_key} 已结束且从未获得主机"
                            )));
                        }
                        None => return Ok(None),
                    },
                }
            }
        };

        if !self.dependencies.is_ready(registry, task) {
            return Ok(None);
        }

        let request = SelectionRequest {
            context_id: &key.context_id,
            exclusivity: task.exclusivity,
            load_units: task.load_units,
        };
        let exclusivity = task.exclusivity;
        let Some(host) = self
            .selector
            .select(registry, request, &mut candidates, fleet)
        else {
            debug!("任务 {} 暂时没有可用主机", key);
            return Ok(None);
        };

        if let Some(entry) = registry.hosts.get_mut(&host) {
            match exclusivity {
                TaskExclusivity::ContextExclusive => {
                    entry.reservation = HostReservation::Context(key.context_id.clone());
                }
                TaskExclusivity::Exclusive => entry.reservation = HostReservation::Exclusive,
                TaskExclusivity::NonExclusive => {}
            }
        }

        let task = registry.task_mut(key)?;
        task.resolved.host_runtimes = HostSelection::Names(candidates);
        task.host_name = Some(host.clone());
        task.set_state(TaskState::Scheduled)?;
        info!("任务 {} 已调度到主机 {}", key, host);

        Ok(Some(Dispatch {
            key: key.clone(),
            host,
            descriptor: task.resolved.clone(),
        }))
    }

    async fn dispatch(
        &self,
        shared: &Shared,
        dispatch: &Dispatch,
        max_package_cache_size: u64,
    ) -> OrchestratorResult<TaskDirectories> {
        let key = &dispatch.key;
        if let Err(e) = shared
            .log_storage
            .set_task_hostname(&key.context_id, &key.task_id, &dispatch.host)
            .await
        {
            warn!("记录任务 {} 的主机名失败: {}", key, e);
        }
        shared.logger.log_task_scheduled(key, &dispatch.host).await;

        shared
            .transport
            .initialize(&dispatch.host, max_package_cache_size)
            .await?;
        shared
            .transport
            .create_task(&dispatch.host, &dispatch.descriptor)
            .await
    }

    /// 提交远程创建成功的任务
    ///
    /// 返回 Some(true) 表示已启动，Some(false) 表示任务已失效需要远程终止。
    fn commit_started(
        registry: &mut Registry,
        dispatch: &Dispatch,
        directories: TaskDirectories,
    ) -> Option<bool> {
        let Some(task) = registry.tasks.get_mut(&dispatch.key) else {
            return Some(false);
        };
        if !task.is_on_host(&dispatch.host) {
            return Some(false);
        }
        match task.state {
            TaskState::Scheduled => {
                if let Err(e) = task.set_state(TaskState::Running) {
                    warn!("任务 {} 无法进入 RUNNING: {}", dispatch.key, e);
                    return None;
                }
            }
            // worker在提交之前已经上报结束
            TaskState::Finished => {}
            TaskState::Aborted => return Some(false),
            _ => return None,
        }
        task.directories = Some(directories);
        registry.append_checkpoint(Checkpoint::new(
            CHECKPOINT_TASK_STARTED,
            dispatch.key.task_id.clone(),
            dispatch.key.context_id.clone(),
            Some(dispatch.host.clone()),
            None,
        ));
        Some(true)
    }
}
