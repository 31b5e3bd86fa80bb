//! SDK 配置

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FieldSyncError, Result};
use crate::storage::db_actor::DbLocation;
use crate::storage::queue::{RetryPolicy, RETRY_LIMIT};

/// 远端 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteApiConfig {
    /// REST 根地址，例如 https://api.example.com/v1
    pub base_url: String,
    /// 宿主提供的访问令牌（令牌签发不在 SDK 范围内）
    pub bearer_token: Option<String>,
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            bearer_token: None,
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// FieldSync SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 数据库文件名（位于 data_dir 下）
    pub database_file: String,
    /// 使用内存数据库（测试、演示；进程退出即丢失）
    #[serde(default)]
    pub in_memory: bool,
    /// 远端 API 配置
    pub remote: RemoteApiConfig,
    /// 在线写入/读取时单次远端调用的超时（毫秒），超时按网络失败处理
    pub remote_timeout_ms: u64,
    /// 队列项最大失败次数
    pub retry_limit: u32,
    /// 事件广播缓冲区大小
    pub event_buffer_size: usize,
    /// 网络恢复时自动排空队列
    pub auto_sync_on_reconnect: bool,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            database_file: "fieldsync.db".to_string(),
            in_memory: false,
            remote: RemoteApiConfig::default(),
            remote_timeout_ms: 10_000,
            retry_limit: RETRY_LIMIT,
            event_buffer_size: 256,
            auto_sync_on_reconnect: true,
            debug_mode: false,
        }
    }
}

/// 获取默认数据目录 ~/.fieldsync/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".fieldsync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        home_dir.join(".fieldsync")
    } else {
        PathBuf::from("./fieldsync_data")
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// 从 JSON 文件加载配置，加载后自动校验
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FieldSyncError::Config(format!("读取配置文件失败 {}: {}", path.display(), e)))?;
        let config: SyncConfig = serde_json::from_str(&content)
            .map_err(|e| FieldSyncError::Config(format!("解析配置文件失败 {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_limit == 0 {
            return Err(FieldSyncError::Config("retry_limit 必须大于 0".to_string()));
        }
        if self.remote_timeout_ms == 0 {
            return Err(FieldSyncError::Config("remote_timeout_ms 必须大于 0".to_string()));
        }
        if self.remote.base_url.trim().is_empty() {
            return Err(FieldSyncError::Config("remote.base_url 不能为空".to_string()));
        }
        if self.event_buffer_size == 0 {
            return Err(FieldSyncError::Config("event_buffer_size 必须大于 0".to_string()));
        }
        if !self.in_memory && self.database_file.trim().is_empty() {
            return Err(FieldSyncError::Config("database_file 不能为空".to_string()));
        }
        Ok(())
    }

    pub fn database_location(&self) -> DbLocation {
        if self.in_memory {
            DbLocation::Memory
        } else {
            DbLocation::File(self.data_dir.join(&self.database_file))
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_limit)
    }
}

/// FieldSync SDK 配置构建器
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn database_file<S: Into<String>>(mut self, name: S) -> Self {
        self.config.database_file = name.into();
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.config.in_memory = true;
        self
    }

    pub fn remote_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn bearer_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.remote.bearer_token = Some(token.into());
        self
    }

    pub fn remote_config(mut self, config: RemoteApiConfig) -> Self {
        self.config.remote = config;
        self
    }

    pub fn remote_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.remote_timeout_ms = timeout_ms;
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.config.retry_limit = limit;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn auto_sync_on_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_sync_on_reconnect = enabled;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
