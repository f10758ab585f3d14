//! Test data builders for creating task descriptors
//!
//! Descriptors start from sensible defaults: any host, non-exclusive, no
//! dependencies and a named package.

use orchestrator_core::models::{
    DependencyCheckpoint, HostSelection, PackageReference, TaskDescriptor, TaskExclusivity,
};

/// Builder for creating test TaskDescriptor values
pub struct TaskDescriptorBuilder {
    descriptor: TaskDescriptor,
}

impl TaskDescriptorBuilder {
    pub fn new(task_id: &str, context_id: &str) -> Self {
        Self {
            descriptor: TaskDescriptor {
                task_id: task_id.to_string(),
                context_id: context_id.to_string(),
                tree_address: format!("/{context_id}/{task_id}"),
                name: Some(task_id.to_string()),
                description: None,
                exclusivity: TaskExclusivity::NonExclusive,
                host_runtimes: HostSelection::Any,
                dependencies: vec![],
                load_units: None,
                package: PackageReference::Name("benchmark.bpkg".to_string()),
                parameters: Default::default(),
            },
        }
    }

    pub fn with_tree_address(mut self, tree_address: &str) -> Self {
        self.descriptor.tree_address = tree_address.to_string();
        self
    }

    pub fn with_exclusivity(mut self, exclusivity: TaskExclusivity) -> Self {
        self.descriptor.exclusivity = exclusivity;
        self
    }

    pub fn exclusive(self) -> Self {
        self.with_exclusivity(TaskExclusivity::Exclusive)
    }

    pub fn context_exclusive(self) -> Self {
        self.with_exclusivity(TaskExclusivity::ContextExclusive)
    }

    pub fn on_hosts(mut self, hosts: &[&str]) -> Self {
        self.descriptor.host_runtimes =
            HostSelection::Names(hosts.iter().map(|h| h.to_string()).collect());
        self
    }

    pub fn with_host_query(mut self, query: &str) -> Self {
        self.descriptor.host_runtimes = HostSelection::Query(query.to_string());
        self
    }

    pub fn as_task(mut self, task_id: &str) -> Self {
        self.descriptor.host_runtimes = HostSelection::AsTask(task_id.to_string());
        self
    }

    pub fn depends_on(mut self, name: &str, task_id: &str, value: Option<&str>) -> Self {
        self.descriptor.dependencies.push(DependencyCheckpoint {
            name: name.to_string(),
            task_id: task_id.to_string(),
            value: value.map(str::to_string),
        });
        self
    }

    pub fn with_load_units(mut self, load_units: u32) -> Self {
        self.descriptor.load_units = Some(load_units);
        self
    }

    pub fn with_package_query(mut self, query: &str) -> Self {
        self.descriptor.package = PackageReference::Query(query.to_string());
        self
    }

    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.descriptor
            .parameters
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> TaskDescriptor {
        self.descriptor
    }
}
