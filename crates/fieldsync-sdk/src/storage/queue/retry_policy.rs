use serde::{Deserialize, Serialize};

use crate::error::FieldSyncError;

/// 默认重试上限：同一队列项连续失败 3 次后放弃
pub const RETRY_LIMIT: u32 = 3;

/// 同步失败原因分类（用于日志与事件上报）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FailureReason {
    /// 网络超时
    NetworkTimeout,
    /// 网络不可用
    NetworkUnavailable,
    /// 服务端返回错误状态码
    ServerError(u16),
    /// 本地数据无法重放（记录已丢失、数据损坏）
    LocalData(String),
    /// 未知错误
    Unknown(String),
}

impl From<&FieldSyncError> for FailureReason {
    fn from(error: &FieldSyncError) -> Self {
        match error {
            FieldSyncError::Timeout(_) => FailureReason::NetworkTimeout,
            FieldSyncError::Network(_) | FieldSyncError::NoConnection => FailureReason::NetworkUnavailable,
            FieldSyncError::Remote { status, .. } => FailureReason::ServerError(*status),
            FieldSyncError::NotFound(msg) | FieldSyncError::InvalidData(msg) | FieldSyncError::Serialization(msg) => {
                FailureReason::LocalData(msg.clone())
            }
            other => FailureReason::Unknown(other.to_string()),
        }
    }
}

/// 队列项的重试状态
///
/// `Exhausted` 是终态：队列项不会再被自动重试，而是被移除并上报。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryState {
    Eligible { retries: u32 },
    Exhausted { retries: u32 },
}

impl RetryState {
    pub fn retries(&self) -> u32 {
        match self {
            RetryState::Eligible { retries } | RetryState::Exhausted { retries } => *retries,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryState::Exhausted { .. })
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大失败次数
    pub retry_limit: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retry_limit: RETRY_LIMIT }
    }
}

impl RetryPolicy {
    pub fn new(retry_limit: u32) -> Self {
        Self { retry_limit }
    }

    /// 根据已失败次数得到重试状态
    pub fn evaluate(&self, retries: u32) -> RetryState {
        if retries < self.retry_limit {
            RetryState::Eligible { retries }
        } else {
            RetryState::Exhausted { retries }
        }
    }

    /// 剩余可用次数
    pub fn remaining(&self, retries: u32) -> u32 {
        self.retry_limit.saturating_sub(retries)
    }
}
