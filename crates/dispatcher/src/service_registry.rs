use regex::Regex;
use tokio::sync::RwLock;
use tracing::debug;

use orchestrator_core::{
    models::{ServiceEntry, ServiceTemplate, TaskKey},
    OrchestratorError, OrchestratorResult,
};

/// 编译后的服务模板，正则表达式必须完整匹配
struct CompiledTemplate<'a> {
    service_name: Option<Regex>,
    interface_name: Option<Regex>,
    address: Option<Regex>,
    task_id: Option<&'a str>,
    context_id: Option<&'a str>,
}

impl<'a> CompiledTemplate<'a> {
    fn compile(template: &'a ServiceTemplate) -> OrchestratorResult<Self> {
        fn full_match(pattern: &Option<String>) -> OrchestratorResult<Option<Regex>> {
            pattern
                .as_deref()
                .map(|p| Regex::new(&format!("^(?:{p})$")))
                .transpose()
                .map_err(OrchestratorError::from)
        }

        Ok(Self {
            service_name: full_match(&template.service_name)?,
            interface_name: full_match(&template.interface_name)?,
            address: full_match(&template.address)?,
            task_id: template.task_id.as_deref(),
            context_id: template.context_id.as_deref(),
        })
    }

    fn matches(&self, entry: &ServiceEntry) -> bool {
        fn pattern_matches(pattern: &Option<Regex>, value: &str) -> bool {
            pattern.as_ref().map_or(true, |re| re.is_match(value))
        }

        pattern_matches(&self.service_name, &entry.service_name)
            && pattern_matches(&self.interface_name, &entry.interface_name)
            && pattern_matches(&self.address, &entry.address)
            && self.task_id.map_or(true, |id| id == entry.task_id)
            && self.context_id.map_or(true, |id| id == entry.context_id)
    }
}

/// 服务目录
///
/// 所有条目在插入与返回时都会被复制，调用方无法通过返回值修改目录。
#[derive(Default)]
pub struct ServiceRegistry {
    entries: RwLock<Vec<ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, entry: &ServiceEntry) -> OrchestratorResult<()> {
        let missing = [
            ("service_name", &entry.service_name),
            ("interface_name", &entry.interface_name),
            ("address", &entry.address),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(OrchestratorError::InvalidServiceEntry(format!(
                "缺少字段: {}",
                missing.join(", ")
            )));
        }

        self.entries.write().await.push(entry.clone());
        debug!(
            "注册服务 {}/{} -> {} (任务 {}@{})",
            entry.service_name, entry.interface_name, entry.address, entry.task_id, entry.context_id
        );
        Ok(())
    }

    /// 按模板删除，返回删除的数量
    pub async fn unregister(&self, template: &ServiceTemplate) -> OrchestratorResult<usize> {
        let compiled = CompiledTemplate::compile(template)?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| !compiled.matches(entry));
        Ok(before - entries.len())
    }

    /// 删除任务拥有的所有服务
    pub async fn unregister_task(&self, key: &TaskKey) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !(e.task_id == key.task_id && e.context_id == key.context_id));
        before - entries.len()
    }

    pub async fn unregister_context(&self, context_id: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.context_id != context_id);
        before - entries.len()
    }

    pub async fn look(&self, template: &ServiceTemplate) -> OrchestratorResult<Vec<ServiceEntry>> {
        let compiled = CompiledTemplate::compile(template)?;
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| compiled.matches(entry))
            .cloned()
            .collect())
    }

    /// 按名称精确匹配，返回第一个结果
    pub async fn find(&self, service_name: &str, interface_name: &str) -> Option<ServiceEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.service_name == service_name && e.interface_name == interface_name)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
