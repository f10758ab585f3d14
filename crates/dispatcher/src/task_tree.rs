use std::collections::BTreeMap;

use orchestrator_core::{models::TaskKey, OrchestratorError, OrchestratorResult};

/// 任务树：按斜杠分隔的层级地址索引任务
///
/// 每个地址要么是叶子（对应一个任务），要么是节点（前缀），二者不能重叠。
#[derive(Debug, Default)]
pub struct TaskTree {
    leaves: BTreeMap<String, TaskKey>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_under(address: &str, prefix: &str) -> bool {
        let prefix = prefix.trim_end_matches('/');
        address == prefix
            || (address.starts_with(prefix) && address[prefix.len()..].starts_with('/'))
    }

    pub fn add_leaf(&mut self, address: &str, key: TaskKey) -> OrchestratorResult<()> {
        if let Some(existing) = self.leaves.get(address) {
            if *existing != key {
                return Err(OrchestratorError::InvalidTreeAddress(format!(
                    "地址 {address} 已被任务 {existing} 占用"
                )));
            }
            return Ok(());
        }
        if let Some((leaf, _)) = self
            .leaves
            .iter()
            .find(|(leaf, _)| Self::is_under(address, leaf) || Self::is_under(leaf, address))
        {
            return Err(OrchestratorError::InvalidTreeAddress(format!(
                "地址 {address} 与已有叶子 {leaf} 冲突"
            )));
        }
        self.leaves.insert(address.to_string(), key);
        Ok(())
    }

    /// 删除叶子；不存在时返回 None
    pub fn clear(&mut self, address: &str) -> Option<TaskKey> {
        self.leaves.remove(address)
    }

    pub fn find(&self, address: &str) -> Option<&TaskKey> {
        self.leaves.get(address)
    }

    /// 地址本身或其下所有叶子对应的任务
    pub fn keys_under(&self, prefix: &str) -> Vec<TaskKey> {
        self.leaves
            .iter()
            .filter(|(address, _)| Self::is_under(address, prefix))
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}
