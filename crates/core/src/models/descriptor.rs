use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::CheckpointTemplate;
use crate::{OrchestratorError, OrchestratorResult};

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_0-9-]+$").expect("valid identifier regex"));
static CHECKPOINT_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_0-9. -]+$").expect("valid checkpoint regex"));
static PACKAGE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_0-9.+-]+$").expect("valid package regex"));

/// 任务ID与上下文ID的语法
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_REGEX.is_match(value)
}

pub fn is_valid_checkpoint_name(value: &str) -> bool {
    CHECKPOINT_NAME_REGEX.is_match(value)
}

pub fn is_valid_package_name(value: &str) -> bool {
    PACKAGE_NAME_REGEX.is_match(value)
}

/// 任务独占模式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskExclusivity {
    /// 与其他任务自由共享主机
    #[default]
    NonExclusive,
    /// 为一个上下文保留主机
    ContextExclusive,
    /// 为一个任务保留主机
    Exclusive,
}

/// 主机选择方式
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostSelection {
    /// 任意已注册的主机运行时
    #[default]
    Any,
    /// 显式主机名列表
    Names(Vec<String>),
    /// 交给主机管理器求值的查询表达式
    Query(String),
    /// 与指定任务（同一上下文）运行在同一台主机上
    AsTask(String),
}

/// 软件包引用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PackageReference {
    Name(String),
    Query(String),
}

/// 依赖检查点模板，在任务自身的上下文中求值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyCheckpoint {
    pub name: String,
    pub task_id: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// 已解析并校验过的任务描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub task_id: String,
    pub context_id: String,
    pub tree_address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub exclusivity: TaskExclusivity,
    #[serde(default)]
    pub host_runtimes: HostSelection,
    #[serde(default)]
    pub dependencies: Vec<DependencyCheckpoint>,
    #[serde(default)]
    pub load_units: Option<u32>,
    pub package: PackageReference,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl TaskDescriptor {
    /// 校验描述的必填字段与标识符语法
    pub fn validate(&self) -> OrchestratorResult<()> {
        let mut problems = Vec::new();

        if !is_valid_identifier(&self.task_id) {
            problems.push(format!("非法的任务ID \"{}\"", self.task_id));
        }
        if !is_valid_identifier(&self.context_id) {
            problems.push(format!("非法的上下文ID \"{}\"", self.context_id));
        }
        if !self.tree_address.starts_with('/')
            || self.tree_address.len() < 2
            || self.tree_address[1..].split('/').any(str::is_empty)
        {
            problems.push(format!("非法的树地址 \"{}\"", self.tree_address));
        }
        match &self.package {
            PackageReference::Name(name) if !is_valid_package_name(name) => {
                problems.push(format!("非法的软件包名 \"{name}\""));
            }
            PackageReference::Query(query) if query.trim().is_empty() => {
                problems.push("软件包查询为空".to_string());
            }
            _ => {}
        }
        match &self.host_runtimes {
            HostSelection::Names(names) if names.iter().any(|n| n.trim().is_empty()) => {
                problems.push("主机名列表包含空名称".to_string());
            }
            HostSelection::Query(query) if query.trim().is_empty() => {
                problems.push("主机查询为空".to_string());
            }
            HostSelection::AsTask(task_id) if !is_valid_identifier(task_id) => {
                problems.push(format!("非法的绑定任务ID \"{task_id}\""));
            }
            _ => {}
        }
        for dependency in &self.dependencies {
            if !is_valid_checkpoint_name(&dependency.name) {
                problems.push(format!("非法的依赖检查点名 \"{}\"", dependency.name));
            }
            if !is_valid_identifier(&dependency.task_id) {
                problems.push(format!("非法的依赖任务ID \"{}\"", dependency.task_id));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidDescriptor(problems.join("; ")))
        }
    }

    /// 依赖检查点模板，绑定到任务自身的上下文
    pub fn dependency_templates(&self) -> Vec<CheckpointTemplate> {
        self.dependencies
            .iter()
            .map(|dependency| {
                CheckpointTemplate::named(&dependency.name)
                    .with_task(&dependency.task_id)
                    .with_context(&self.context_id)
                    .with_value_opt(dependency.value.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor {
            task_id: "compile-1".to_string(),
            context_id: "ctx_1".to_string(),
            tree_address: "/suite/compile".to_string(),
            name: Some("compile".to_string()),
            description: None,
            exclusivity: TaskExclusivity::NonExclusive,
            host_runtimes: HostSelection::Names(vec!["h1".to_string()]),
            dependencies: vec![DependencyCheckpoint {
                name: "task finished".to_string(),
                task_id: "fetch".to_string(),
                value: Some("0".to_string()),
            }],
            load_units: Some(3),
            package: PackageReference::Name("compiler-1.0+x86.bpkg".to_string()),
            parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn test_identifier_grammar() {
        assert!(is_valid_identifier("task_1-a"));
        assert!(!is_valid_identifier("task 1"));
        assert!(!is_valid_identifier(""));
        assert!(is_valid_checkpoint_name("task finished"));
        assert!(is_valid_checkpoint_name("v1.2"));
        assert!(!is_valid_checkpoint_name("a/b"));
        assert!(is_valid_package_name("gcc-4.1+patch"));
        assert!(!is_valid_package_name("gcc 4"));
    }

    #[test]
    fn test_valid_descriptor() {
        assert!(descriptor().validate().is_ok());
    }

    #[test]
    fn test_invalid_descriptor_collects_problems() {
        let mut d = descriptor();
        d.task_id = "bad id".to_string();
        d.tree_address = "suite//x".to_string();
        let err = d.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bad id"));
        assert!(message.contains("suite//x"));
    }

    #[test]
    fn test_tree_address_rules() {
        let mut d = descriptor();
        d.tree_address = "/".to_string();
        assert!(d.validate().is_err());
        d.tree_address = "/a//b".to_string();
        assert!(d.validate().is_err());
        d.tree_address = "/a/b".to_string();
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_dependency_templates_bind_context() {
        let templates = descriptor().dependency_templates();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].context_id.as_deref(), Some("ctx_1"));
        assert_eq!(templates[0].task_id.as_deref(), Some("fetch"));
        assert_eq!(templates[0].value.as_deref(), Some("0"));
    }

    #[test]
    fn test_descriptor_from_json_defaults() {
        let json = r#"{
            "task_id": "t1",
            "context_id": "c1",
            "tree_address": "/t1",
            "package": {"name": "p.bpkg"}
        }"#;
        let d: TaskDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.exclusivity, TaskExclusivity::NonExclusive);
        assert_eq!(d.host_runtimes, HostSelection::Any);
        assert!(d.dependencies.is_empty());
        assert!(d.validate().is_ok());
    }
}
