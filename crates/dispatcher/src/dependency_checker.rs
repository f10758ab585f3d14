use tracing::debug;

use orchestrator_core::models::{CheckpointTemplate, TaskEntry};

use crate::registry::Registry;

/// 依赖检查器
///
/// 只使用非阻塞查询，调度轮次中从不等待。
#[derive(Debug, Default)]
pub struct DependencyChecker;

impl DependencyChecker {
    pub fn new() -> Self {
        Self
    }

    /// 每个依赖模板都至少有一个匹配的检查点时任务才就绪
    pub fn is_ready(&self, registry: &Registry, task: &TaskEntry) -> bool {
        self.first_unmet(registry, task)
            .map(|template| {
                debug!(
                    "任务 {} 等待检查点 {} (任务 {:?})",
                    task.key(),
                    template.display_name(),
                    template.task_id
                );
            })
            .is_none()
    }

    pub fn first_unmet(&self, registry: &Registry, task: &TaskEntry) -> Option<CheckpointTemplate> {
        task.resolved
            .dependency_templates()
            .into_iter()
            .find(|template| !registry.has_checkpoint(template))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RuntimeSettings;
    use orchestrator_core::models::{
        Checkpoint, ContextEntry, DependencyCheckpoint, HostSelection, PackageReference,
        TaskDescriptor, TaskExclusivity,
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn setup() -> (Registry, TaskEntry) {
        let mut registry = Registry::new(
            RuntimeSettings {
                max_package_cache_size: 1,
                kept_closed_context_count: 1,
            },
            StdRng::seed_from_u64(0),
        );
        registry
            .insert_context(ContextEntry::new("ctx", "ctx", "", serde_json::Value::Null, None))
            .unwrap();
        let descriptor = TaskDescriptor {
            task_id: "c".to_string(),
            context_id: "ctx".to_string(),
            tree_address: "/c".to_string(),
            name: None,
            description: None,
            exclusivity: TaskExclusivity::NonExclusive,
            host_runtimes: HostSelection::Any,
            dependencies: vec![
                DependencyCheckpoint {
                    name: "built".to_string(),
                    task_id: "a".to_string(),
                    value: Some("true".to_string()),
                },
                DependencyCheckpoint {
                    name: "deployed".to_string(),
                    task_id: "b".to_string(),
                    value: None,
                },
            ],
            load_units: None,
            package: PackageReference::Name("p".to_string()),
            parameters: Default::default(),
        };
        let task = TaskEntry::new(descriptor.clone(), descriptor, 1, 0);
        (registry, task)
    }

    #[test]
    fn test_all_dependencies_must_match() {
        let (mut registry, task) = setup();
        let checker = DependencyChecker::new();
        assert!(!checker.is_ready(&registry, &task));

        registry.append_checkpoint(Checkpoint::new("built", "a", "ctx", None, Some("false".into())));
        assert_eq!(
            checker.first_unmet(&registry, &task).and_then(|t| t.name),
            Some("built".to_string())
        );

        registry.append_checkpoint(Checkpoint::new("built", "a", "ctx", None, Some("true".into())));
        assert!(!checker.is_ready(&registry, &task));

        // 其他上下文中的检查点不满足依赖
        registry.append_checkpoint(Checkpoint::new("deployed", "b", "other", None, None));
        assert!(!checker.is_ready(&registry, &task));

        registry.append_checkpoint(Checkpoint::new("deployed", "b", "ctx", None, Some("x".into())));
        assert!(checker.is_ready(&registry, &task));
    }
}
