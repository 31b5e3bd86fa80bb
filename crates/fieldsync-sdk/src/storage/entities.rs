//! 存储层实体定义 - 与具体记录类型无关的原始行结构

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FieldSyncError, Result};

/// 记录同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// 仅存在于本地，尚未被服务端确认
    Pending,
    /// 已在服务端确认，必有 server_id
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            other => Err(FieldSyncError::InvalidData(format!("未知的同步状态: {}", other))),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// records 表中的一行（payload 保持为 JSON，由仓库层反序列化为具体类型）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub local_id: i64,
    pub collection: String,
    pub server_id: Option<String>,
    pub owner_id: String,
    pub payload: serde_json::Value,
    pub sync_status: SyncStatus,
    pub deleted: bool,
    pub deleted_at: Option<i64>,
    pub local_timestamp: i64,
}

impl StoredRecord {
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }
}

/// 待插入的新记录；local_id 由存储分配
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub server_id: Option<String>,
    pub owner_id: String,
    pub payload: serde_json::Value,
    pub sync_status: SyncStatus,
}

impl NewRecord {
    /// 本地待同步记录
    pub fn pending(owner_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            server_id: None,
            owner_id: owner_id.into(),
            payload,
            sync_status: SyncStatus::Pending,
        }
    }

    /// 已被服务端确认的记录
    pub fn synced(
        owner_id: impl Into<String>,
        server_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            server_id: Some(server_id.into()),
            owner_id: owner_id.into(),
            payload,
            sync_status: SyncStatus::Synced,
        }
    }
}

/// 局部更新
///
/// `Synced` 状态只能通过 [`RecordPatch::mark_synced`] 设置，保证同时写入 server_id。
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub(crate) payload: Option<serde_json::Value>,
    pub(crate) synced_with: Option<String>,
    pub(crate) mark_pending: bool,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn mark_synced(mut self, server_id: impl Into<String>) -> Self {
        self.synced_with = Some(server_id.into());
        self.mark_pending = false;
        self
    }

    pub fn mark_pending(mut self) -> Self {
        self.mark_pending = true;
        self.synced_with = None;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none() && self.synced_with.is_none() && !self.mark_pending
    }
}

/// 二级索引查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    /// by-owner
    ByOwner(String),
    /// by-sync-status
    BySyncStatus(SyncStatus),
    /// by-server-id
    ByServerId(String),
}

impl IndexQuery {
    pub fn index_name(&self) -> &'static str {
        match self {
            IndexQuery::ByOwner(_) => "by-owner",
            IndexQuery::BySyncStatus(_) => "by-sync-status",
            IndexQuery::ByServerId(_) => "by-server-id",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_round_trip_names() {
        assert_eq!(SyncStatus::parse("pending").unwrap(), SyncStatus::Pending);
        assert_eq!(SyncStatus::Synced.to_string(), "synced");
        assert!(SyncStatus::parse("SYNCED").is_err());
    }

    #[test]
    fn test_patch_synced_and_pending_are_exclusive() {
        let patch = RecordPatch::new().mark_pending().mark_synced("srv-1");
        assert_eq!(patch.synced_with.as_deref(), Some("srv-1"));
        assert!(!patch.mark_pending);

        let patch = RecordPatch::new().mark_synced("srv-1").mark_pending();
        assert!(patch.synced_with.is_none());
        assert!(patch.mark_pending);
        assert!(RecordPatch::new().is_empty());
    }
}
