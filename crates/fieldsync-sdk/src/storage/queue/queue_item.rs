use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::queue::priority::QueuePriority;
use crate::storage::queue::retry_policy::RetryState;

/// 待重放到远端的操作
///
/// 持久化格式：`{"action": "CREATE_RECORD", "data": {...}}`，新增动作只需追加变体。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueAction {
    /// 创建记录；携带完整的记录快照及 local_id 反向引用
    CreateRecord {
        collection: String,
        local_id: i64,
        owner_id: String,
        payload: serde_json::Value,
        local_timestamp: i64,
    },
    /// 更新已同步的记录
    UpdateRecord {
        collection: String,
        local_id: i64,
        server_id: String,
        payload: serde_json::Value,
    },
    /// 删除已同步的记录；local_id 指向本地墓碑（本地未缓存时为空）
    DeleteRecord {
        collection: String,
        local_id: Option<i64>,
        server_id: String,
    },
}

impl QueueAction {
    /// 动作名（写入 sync_queue.action 列，供索引使用）
    pub fn name(&self) -> &'static str {
        match self {
            QueueAction::CreateRecord { .. } => "CREATE_RECORD",
            QueueAction::UpdateRecord { .. } => "UPDATE_RECORD",
            QueueAction::DeleteRecord { .. } => "DELETE_RECORD",
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            QueueAction::CreateRecord { collection, .. }
            | QueueAction::UpdateRecord { collection, .. }
            | QueueAction::DeleteRecord { collection, .. } => collection,
        }
    }

    /// 目标记录的 local_id
    pub fn record_local_id(&self) -> Option<i64> {
        match self {
            QueueAction::CreateRecord { local_id, .. } | QueueAction::UpdateRecord { local_id, .. } => {
                Some(*local_id)
            }
            QueueAction::DeleteRecord { local_id, .. } => *local_id,
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record_local_id() {
            Some(local_id) => write!(f, "{}({}#{})", self.name(), self.collection(), local_id),
            None => write!(f, "{}({})", self.name(), self.collection()),
        }
    }
}

/// 队列项（sync_queue 表中的一行）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// 自增 ID，出队句柄
    pub local_id: i64,
    pub action: QueueAction,
    pub priority: QueuePriority,
    /// 入队时间（毫秒），次级排序键
    pub timestamp: i64,
    pub state: RetryState,
    pub last_attempt: Option<i64>,
    pub error: Option<String>,
}

impl QueueItem {
    pub fn retries(&self) -> u32 {
        self.state.retries()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.is_exhausted()
    }

    /// 获取队列项的详细信息字符串
    pub fn details(&self) -> String {
        format!(
            "QueueItem(id={}, action={}, priority={}, retries={}, last_error={:?})",
            self.local_id,
            self.action,
            self.priority,
            self.retries(),
            self.error
        )
    }
}

/// 排序规则：
/// 1. 优先级高的先处理
/// 2. 相同优先级下，入队早的先处理
/// 3. 时间戳相同时按 local_id，保证确定性
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.timestamp.cmp(&other.timestamp))
            .then(self.local_id.cmp(&other.local_id))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.local_id == other.local_id
    }
}

impl Eq for QueueItem {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(local_id: i64, priority: QueuePriority, timestamp: i64) -> QueueItem {
        QueueItem {
            local_id,
            action: QueueAction::DeleteRecord {
                collection: "attendance_events".into(),
                local_id: None,
                server_id: format!("srv-{}", local_id),
            },
            priority,
            timestamp,
            state: RetryState::Eligible { retries: 0 },
            last_attempt: None,
            error: None,
        }
    }

    #[test]
    fn test_action_wire_format() {
        let action = QueueAction::CreateRecord {
            collection: "attendance_events".into(),
            local_id: 12,
            owner_id: "u1".into(),
            payload: json!({"type": "ingreso"}),
            local_timestamp: 1_700_000_000_000,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["action"], "CREATE_RECORD");
        assert_eq!(value["data"]["collection"], "attendance_events");
        assert_eq!(value["data"]["local_id"], 12);
        assert_eq!(action.name(), "CREATE_RECORD");
        assert_eq!(action.to_string(), "CREATE_RECORD(attendance_events#12)");
    }

    #[test]
    fn test_item_ordering() {
        let mut items = vec![
            item(1, QueuePriority::Normal, 10),
            item(2, QueuePriority::High, 30),
            item(3, QueuePriority::High, 20),
            item(4, QueuePriority::High, 20),
        ];
        items.sort();
        let order: Vec<i64> = items.iter().map(|i| i.local_id).collect();
        assert_eq!(order, vec![3, 4, 2, 1]);
    }
}
