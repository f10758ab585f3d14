use serde::{Deserialize, Serialize};

/// 服务目录条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceEntry {
    pub service_name: String,
    pub interface_name: String,
    /// 远程端点地址
    pub address: String,
    pub task_id: String,
    pub context_id: String,
}

impl ServiceEntry {
    pub fn new(
        service_name: impl Into<String>,
        interface_name: impl Into<String>,
        address: impl Into<String>,
        task_id: impl Into<String>,
        context_id: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            interface_name: interface_name.into(),
            address: address.into(),
            task_id: task_id.into(),
            context_id: context_id.into(),
        }
    }
}

/// 服务查询模板
///
/// 名称、接口与地址是正则表达式（完整匹配），任务与上下文是精确过滤条件。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceTemplate {
    pub service_name: Option<String>,
    pub interface_name: Option<String>,
    pub address: Option<String>,
    pub task_id: Option<String>,
    pub context_id: Option<String>,
}

impl ServiceTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_name(mut self, pattern: &str) -> Self {
        self.service_name = Some(pattern.to_string());
        self
    }

    pub fn with_interface_name(mut self, pattern: &str) -> Self {
        self.interface_name = Some(pattern.to_string());
        self
    }

    pub fn with_address(mut self, pattern: &str) -> Self {
        self.address = Some(pattern.to_string());
        self
    }

    pub fn with_task(mut self, task_id: &str, context_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self.context_id = Some(context_id.to_string());
        self
    }

    pub fn with_context(mut self, context_id: &str) -> Self {
        self.context_id = Some(context_id.to_string());
        self
    }
}
