use thiserror::Error;

/// SDK 统一错误类型
///
/// 分为三类：
/// - 结构性错误（`StorageUnavailable`、`NotFound`）：向调用方传播
/// - 瞬时网络错误（`Network`、`Timeout`、`Remote`）：由离线回退路径或队列重试吸收
/// - 明确的数据丢失（`RetryBudgetExhausted`）：单独记录并上报
#[derive(Debug, Error)]
pub enum FieldSyncError {
    /// 本地存储无法打开（本次会话致命）
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// 引用了不存在的 local_id / server_id
    #[error("Not found: {0}")]
    NotFound(String),

    /// 网络失败（连接错误、DNS、连接被重置等）
    #[error("Network failure: {0}")]
    Network(String),

    /// 远端调用超时
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 远端返回非 2xx
    #[error("Remote error [{status}]: {message}")]
    Remote { status: u16, message: String },

    /// 离线状态下手动触发同步
    #[error("No connection")]
    NoConnection,

    /// 队列项超过重试上限被丢弃
    #[error("Retry budget exhausted for queue item {queue_id} ({action}) after {retries} attempts: {last_error}")]
    RetryBudgetExhausted {
        queue_id: i64,
        action: String,
        retries: u32,
        last_error: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IO(String),
}

impl From<rusqlite::Error> for FieldSyncError {
    fn from(error: rusqlite::Error) -> Self {
        FieldSyncError::Database(error.to_string())
    }
}

impl From<serde_json::Error> for FieldSyncError {
    fn from(error: serde_json::Error) -> Self {
        FieldSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for FieldSyncError {
    fn from(error: std::io::Error) -> Self {
        FieldSyncError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for FieldSyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FieldSyncError::Timeout(error.to_string())
        } else if let Some(status) = error.status() {
            FieldSyncError::Remote {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else if error.is_decode() {
            FieldSyncError::InvalidData(error.to_string())
        } else {
            FieldSyncError::Network(error.to_string())
        }
    }
}

impl FieldSyncError {
    /// 是否为瞬时错误（触发离线回退或队列重试，不向 UI 抛出）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FieldSyncError::Network(_) | FieldSyncError::Timeout(_) | FieldSyncError::Remote { .. }
        )
    }

    /// 是否为结构性错误（必须传播给调用方）
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FieldSyncError::StorageUnavailable(_) | FieldSyncError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FieldSyncError>;
