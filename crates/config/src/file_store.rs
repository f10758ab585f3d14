use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orchestrator_core::{traits::ConfigStore, OrchestratorError, OrchestratorResult};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{ConfigError, ConfigResult};

/// 把运行时修改的 `[scheduler]` 配置项写回TOML文件
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_key(&self, key: &str, value: &str) -> ConfigResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut document: toml::Table = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(e.into()),
        };

        let section = document
            .entry("scheduler")
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let toml::Value::Table(section) = section else {
            return Err(ConfigError::Parse("scheduler 不是一个表".to_string()));
        };
        // 运行时可修改的数值配置都是无符号的
        let parsed = match value.parse::<u64>() {
            Ok(number) => toml::Value::Integer(i64::try_from(number).map_err(|_| {
                ConfigError::Parse(format!("scheduler.{key} = {value} 超出TOML整数范围"))
            })?),
            Err(_) if value.parse::<i64>().is_ok() => {
                return Err(ConfigError::Parse(format!(
                    "scheduler.{key} 不能为负数: {value}"
                )));
            }
            Err(_) => toml::Value::String(value.to_string()),
        };
        section.insert(key.to_string(), parsed);

        let content = toml::to_string_pretty(&document)?;
        tokio::fs::write(&self.path, content).await?;
        debug!("配置项已持久化: scheduler.{} = {}", key, value);
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn persist(&self, key: &str, value: &str) -> OrchestratorResult<()> {
        self.write_key(key, value)
            .await
            .map_err(|e| OrchestratorError::Configuration(e.to_string()))
    }
}
