use std::collections::{BTreeMap, HashMap, VecDeque};

use rand::rngs::StdRng;
use tracing::debug;

use orchestrator_core::{
    models::{
        Checkpoint, CheckpointTemplate, ContextEntry, HostRuntimeEntry, TaskEntry, TaskKey,
        TaskState,
    },
    OrchestratorError, OrchestratorResult, SYSTEM_CONTEXT_ID,
};

use crate::task_tree::TaskTree;

/// 运行时可修改的设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_package_cache_size: u64,
    pub kept_closed_context_count: usize,
}

/// 从注册表中强制删除的上下文
#[derive(Debug, Default)]
pub struct RemovedContext {
    pub context: Option<ContextEntry>,
    pub tasks: Vec<TaskEntry>,
}

/// 权威的内存表：任务、上下文、检查点与主机运行时
///
/// 所有方法都是同步的，调用方必须持有注册表锁。
pub struct Registry {
    pub(crate) tasks: HashMap<TaskKey, TaskEntry>,
    pub(crate) contexts: HashMap<String, ContextEntry>,
    pub(crate) checkpoints: Vec<Checkpoint>,
    pub(crate) hosts: BTreeMap<String, HostRuntimeEntry>,
    pub(crate) tree: TaskTree,
    /// 已关闭且所有任务都已结束的上下文，按关闭顺序
    pub(crate) closed_contexts: VecDeque<String>,
    pub(crate) rng: StdRng,
    pub(crate) settings: RuntimeSettings,
    /// 日志或远程产物正在准备、清理中的任务；释放前同名任务不会被准入或派发
    held: HashMap<TaskKey, usize>,
    next_admission_seq: u64,
}

impl Registry {
    pub fn new(settings: RuntimeSettings, rng: StdRng) -> Self {
        let mut contexts = HashMap::new();
        contexts.insert(SYSTEM_CONTEXT_ID.to_string(), ContextEntry::system());
        Self {
            tasks: HashMap::new(),
            contexts,
            checkpoints: Vec::new(),
            hosts: BTreeMap::new(),
            tree: TaskTree::new(),
            closed_contexts: VecDeque::new(),
            rng,
            settings,
            held: HashMap::new(),
            next_admission_seq: 0,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RuntimeSettings {
        &mut self.settings
    }

    // ---- 上下文 ----

    pub fn insert_context(&mut self, context: ContextEntry) -> OrchestratorResult<()> {
        if self.contexts.contains_key(&context.id) {
            return Err(OrchestratorError::ContextExists { id: context.id });
        }
        self.contexts.insert(context.id.clone(), context);
        Ok(())
    }

    pub fn context(&self, context_id: &str) -> OrchestratorResult<&ContextEntry> {
        self.contexts
            .get(context_id)
            .ok_or_else(|| OrchestratorError::context_not_found(context_id))
    }

    pub fn context_mut(&mut self, context_id: &str) -> OrchestratorResult<&mut ContextEntry> {
        self.contexts
            .get_mut(context_id)
            .ok_or_else(|| OrchestratorError::context_not_found(context_id))
    }

    pub fn contexts(&self) -> Vec<ContextEntry> {
        let mut contexts: Vec<_> = self.contexts.values().cloned().collect();
        contexts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        contexts
    }

    /// 系统上下文以外、已关闭且所有任务都已结束
    pub fn is_context_finished(&self, context_id: &str) -> bool {
        match self.contexts.get(context_id) {
            Some(context) if !context.is_system() && !context.open => self
                .tasks
                .values()
                .filter(|t| t.context_id == context_id)
                .all(|t| t.state.is_terminal()),
            _ => false,
        }
    }

    /// 记录已结束的关闭上下文，返回超出保留数量、需要删除的最旧上下文
    pub fn note_finished_context(&mut self, context_id: &str) -> Vec<String> {
        if self.is_context_finished(context_id)
            && !self.closed_contexts.iter().any(|id| id == context_id)
        {
            self.closed_contexts.push_back(context_id.to_string());
        }
        self.trim_closed_contexts()
    }

    pub fn trim_closed_contexts(&mut self) -> Vec<String> {
        let mut expired = Vec::new();
        while self.closed_contexts.len() > self.settings.kept_closed_context_count {
            if let Some(id) = self.closed_contexts.pop_front() {
                expired.push(id);
            }
        }
        expired
    }

    /// 强制删除上下文及其所有任务和检查点，系统上下文除外
    pub fn remove_context_by_force(&mut self, context_id: &str) -> OrchestratorResult<RemovedContext> {
        if context_id == SYSTEM_CONTEXT_ID {
            return Ok(RemovedContext::default());
        }
        let context = self
            .contexts
            .remove(context_id)
            .ok_or_else(|| OrchestratorError::context_not_found(context_id))?;

        let keys: Vec<TaskKey> = self
            .tasks
            .keys()
            .filter(|key| key.context_id == context_id)
            .cloned()
            .collect();
        let mut tasks: Vec<TaskEntry> = keys
            .iter()
            .filter_map(|key| self.remove_task(key, false))
            .collect();
        tasks.sort_by_key(|t| t.admission_seq);

        self.checkpoints.retain(|cp| cp.context_id != context_id);
        self.closed_contexts.retain(|id| id != context_id);
        debug!("注册表已删除上下文 {} 及其 {} 个任务", context_id, tasks.len());

        Ok(RemovedContext {
            context: Some(context),
            tasks,
        })
    }

    // ---- 任务 ----

    pub fn next_admission_seq(&mut self) -> u64 {
        let seq = self.next_admission_seq;
        self.next_admission_seq += 1;
        seq
    }

    /// 插入新任务并注册树地址
    pub fn insert_task(&mut self, task: TaskEntry) -> OrchestratorResult<()> {
        let key = task.key();
        if self.tasks.contains_key(&key) {
            return Err(OrchestratorError::TaskConflict {
                task_id: key.task_id,
                context_id: key.context_id,
            });
        }
        self.tree.add_leaf(&task.tree_address, key.clone())?;
        self.tasks.insert(key, task);
        Ok(())
    }

    /// 删除任务并清除其树地址
    pub fn remove_task(&mut self, key: &TaskKey, drop_checkpoints: bool) -> Option<TaskEntry> {
        let task = self.tasks.remove(key)?;
        if self.tree.find(&task.tree_address) == Some(key) {
            self.tree.clear(&task.tree_address);
        }
        if drop_checkpoints {
            self.drop_checkpoints(key);
        }
        Some(task)
    }

    /// 暂停同名任务的准入与派发，可嵌套
    pub fn hold(&mut self, key: &TaskKey) {
        *self.held.entry(key.clone()).or_insert(0) += 1;
    }

    pub fn release_hold(&mut self, key: &TaskKey) {
        if let Some(pending) = self.held.get_mut(key) {
            *pending -= 1;
            if *pending == 0 {
                self.held.remove(key);
            }
        }
    }

    pub fn is_held(&self, key: &TaskKey) -> bool {
        self.held.contains_key(key)
    }

    /// 删除任务的所有检查点，返回删除数量
    pub fn drop_checkpoints(&mut self, key: &TaskKey) -> usize {
        let before = self.checkpoints.len();
        self.checkpoints
            .retain(|cp| !(cp.task_id == key.task_id && cp.context_id == key.context_id));
        before - self.checkpoints.len()
    }

    pub fn task(&self, key: &TaskKey) -> OrchestratorResult<&TaskEntry> {
        self.tasks
            .get(key)
            .ok_or_else(|| OrchestratorError::task_not_found(&key.task_id, &key.context_id))
    }

    pub fn task_mut(&mut self, key: &TaskKey) -> OrchestratorResult<&mut TaskEntry> {
        self.tasks
            .get_mut(key)
            .ok_or_else(|| OrchestratorError::task_not_found(&key.task_id, &key.context_id))
    }

    pub fn find_task(&self, key: &TaskKey) -> Option<&TaskEntry> {
        self.tasks.get(key)
    }

    fn sorted<'a>(tasks: impl Iterator<Item = &'a TaskEntry>) -> Vec<TaskEntry> {
        let mut tasks: Vec<TaskEntry> = tasks.cloned().collect();
        tasks.sort_by_key(|t| t.admission_seq);
        tasks
    }

    /// 按准入顺序返回所有任务的副本
    pub fn tasks(&self) -> Vec<TaskEntry> {
        Self::sorted(self.tasks.values())
    }

    pub fn tasks_in_context(&self, context_id: &str) -> Vec<TaskEntry> {
        Self::sorted(self.tasks.values().filter(|t| t.context_id == context_id))
    }

    pub fn tasks_on_host(&self, host: &str) -> Vec<TaskEntry> {
        Self::sorted(self.tasks.values().filter(|t| t.is_on_host(host)))
    }

    /// 指定状态的任务键，按准入顺序
    pub fn keys_in_state(&self, state: TaskState) -> Vec<TaskKey> {
        let mut tasks: Vec<&TaskEntry> =
            self.tasks.values().filter(|t| t.state == state).collect();
        tasks.sort_by_key(|t| t.admission_seq);
        tasks.into_iter().map(TaskEntry::key).collect()
    }

    /// 占用主机的任务：已分配到该主机且处于 SCHEDULED/RUNNING/SLEEPING
    pub fn occupants<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a TaskEntry> + 'a {
        self.tasks.values().filter(move |t| {
            t.is_on_host(host)
                && (t.state.occupies_host() || t.state == TaskState::Scheduled)
        })
    }

    // ---- 检查点 ----

    pub fn append_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.checkpoints.push(checkpoint);
    }

    /// 非阻塞查询，按追加顺序返回副本
    pub fn find_checkpoints(&self, template: &CheckpointTemplate) -> Vec<Checkpoint> {
        self.checkpoints
            .iter()
            .filter(|cp| template.matches(cp))
            .cloned()
            .collect()
    }

    pub fn has_checkpoint(&self, template: &CheckpointTemplate) -> bool {
        self.checkpoints.iter().any(|cp| template.matches(cp))
    }

    /// 检查点是否仍可能到达：上下文打开，或所属任务尚未结束
    pub fn is_checkpoint_reachable(&self, template: &CheckpointTemplate) -> bool {
        let Some(context_id) = template.context_id.as_deref() else {
            return true;
        };
        let Some(context) = self.contexts.get(context_id) else {
            return false;
        };
        if context.open {
            return true;
        }
        template.task_id.as_deref().is_some_and(|task_id| {
            self.tasks
                .get(&TaskKey::new(task_id, context_id))
                .is_some_and(|t| !t.state.is_terminal())
        })
    }

    // ---- 主机运行时 ----

    pub fn add_host(&mut self, host: HostRuntimeEntry) -> bool {
        if self.hosts.contains_key(&host.host_name) {
            return false;
        }
        self.hosts.insert(host.host_name.clone(), host);
        true
    }

    pub fn remove_host(&mut self, host: &str) -> OrchestratorResult<HostRuntimeEntry> {
        self.hosts
            .remove(host)
            .ok_or_else(|| OrchestratorError::HostRuntimeNotFound {
                host: host.to_string(),
            })
    }

    pub fn host(&self, host: &str) -> OrchestratorResult<&HostRuntimeEntry> {
        self.hosts
            .get(host)
            .ok_or_else(|| OrchestratorError::HostRuntimeNotFound {
                host: host.to_string(),
            })
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    pub fn host_names(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    pub fn hosts(&self) -> Vec<HostRuntimeEntry> {
        self.hosts.values().cloned().collect()
    }
}
