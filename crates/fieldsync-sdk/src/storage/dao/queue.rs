//! 同步队列 DAO - sync_queue 表

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use crate::error::{FieldSyncError, Result};
use crate::storage::queue::{QueueAction, QueueItem, QueuePriority, RetryPolicy};

const QUEUE_COLUMNS: &str = "local_id, data, priority, timestamp, retries, last_attempt, error";

/// 一次全表读取的结果
#[derive(Debug, Clone, Default)]
pub struct QueueScan {
    pub items: Vec<QueueItem>,
    /// `data` 列无法解析的行
    pub unreadable: Vec<UnreadableRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableRow {
    pub local_id: i64,
    pub error: String,
}

/// 队列持久化格式只依赖 `data` 列（完整的 `{"action", "data"}` JSON）；
/// `action`、`collection`、`record_local_id` 列是冗余的索引列。
pub struct QueueDao<'a> {
    conn: &'a Connection,
    policy: RetryPolicy,
}

impl<'a> QueueDao<'a> {
    pub fn new(conn: &'a Connection, policy: RetryPolicy) -> Self {
        Self { conn, policy }
    }

    /// 入队，返回队列项 ID
    pub fn insert(&self, action: &QueueAction, priority: QueuePriority, now: i64) -> Result<i64> {
        let data = serde_json::to_string(action)?;
        self.conn.execute(
            r#"
            INSERT INTO sync_queue (action, data, priority, timestamp, retries, last_attempt, error, collection, record_local_id)
            VALUES (?1, ?2, ?3, ?4, 0, NULL, NULL, ?5, ?6)
            "#,
            params![
                action.name(),
                data,
                priority.value() as i64,
                now,
                action.collection(),
                action.record_local_id(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<QueueItem>> {
        let sql = format!("SELECT {} FROM sync_queue WHERE local_id = ?1", QUEUE_COLUMNS);
        let raw = self.conn.query_row(&sql, params![id], row_to_raw).optional()?;
        raw.map(|raw| raw.into_item(&self.policy)).transpose()
    }

    /// 按处理顺序列出全部队列项：优先级 → 入队时间 → ID；无法解析的行跳过
    pub fn list_ordered(&self) -> Result<Vec<QueueItem>> {
        let scan = self.scan()?;
        for row in &scan.unreadable {
            warn!("⚠️ 跳过损坏的队列项 {}: {}", row.local_id, row.error);
        }
        Ok(scan.items)
    }

    /// 按处理顺序读取全部行，能解析的与不能解析的分开返回
    pub fn scan(&self) -> Result<QueueScan> {
        let sql = format!(
            "SELECT {} FROM sync_queue ORDER BY priority ASC, timestamp ASC, local_id ASC",
            QUEUE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_raw)?;
        let scan = self.partition(rows)?;
        Ok(scan)
    }

    /// 目标为指定记录的全部队列项（按处理顺序）；损坏的行不影响该记录的读写
    pub fn find_by_target(&self, collection: &str, record_local_id: i64) -> Result<Vec<QueueItem>> {
        let sql = format!(
            r#"
            SELECT {} FROM sync_queue
            WHERE collection = ?1 AND record_local_id = ?2
            ORDER BY priority ASC, timestamp ASC, local_id ASC
            "#,
            QUEUE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![collection, record_local_id], row_to_raw)?;
        let scan = self.partition(rows)?;
        for row in &scan.unreadable {
            warn!("⚠️ 跳过损坏的队列项 {}: {}", row.local_id, row.error);
        }
        Ok(scan.items)
    }

    fn partition(&self, rows: impl Iterator<Item = rusqlite::Result<RawQueueItem>>) -> Result<QueueScan> {
        let mut scan = QueueScan::default();
        for raw in rows {
            let raw = raw?;
            let local_id = raw.local_id;
            match raw.into_item(&self.policy) {
                Ok(item) => scan.items.push(item),
                Err(e) => scan.unreadable.push(UnreadableRow {
                    local_id,
                    error: e.to_string(),
                }),
            }
        }
        Ok(scan)
    }

    /// 出队；ID 不存在时返回 false
    pub fn remove(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM sync_queue WHERE local_id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// 记录一次失败：retries + 1，写入错误与尝试时间，返回更新后的队列项
    pub fn record_failure(&self, id: i64, error: &str, now: i64) -> Result<Option<QueueItem>> {
        let changed = self.conn.execute(
            "UPDATE sync_queue SET retries = retries + 1, last_attempt = ?2, error = ?3 WHERE local_id = ?1",
            params![id, now, error],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get(id)
    }

    /// 替换队列项携带的动作（用于刷新创建快照），重试计数与排序键不变
    pub fn replace_action(&self, id: i64, action: &QueueAction) -> Result<bool> {
        let data = serde_json::to_string(action)?;
        let changed = self.conn.execute(
            r#"
            UPDATE sync_queue SET action = ?2, data = ?3, collection = ?4, record_local_id = ?5
            WHERE local_id = ?1
            "#,
            params![id, action.name(), data, action.collection(), action.record_local_id()],
        )?;
        Ok(changed > 0)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

struct RawQueueItem {
    local_id: i64,
    data: String,
    priority: i64,
    timestamp: i64,
    retries: i64,
    last_attempt: Option<i64>,
    error: Option<String>,
}

impl RawQueueItem {
    fn into_item(self, policy: &RetryPolicy) -> Result<QueueItem> {
        let action: QueueAction = serde_json::from_str(&self.data).map_err(|e| {
            FieldSyncError::InvalidData(format!("队列项 {} 数据损坏: {}", self.local_id, e))
        })?;
        let priority = u8::try_from(self.priority)
            .ok()
            .and_then(QueuePriority::from_value)
            .unwrap_or_default();
        Ok(QueueItem {
            local_id: self.local_id,
            action,
            priority,
            timestamp: self.timestamp,
            state: policy.evaluate(self.retries.max(0) as u32),
            last_attempt: self.last_attempt,
            error: self.error,
        })
    }
}

fn row_to_raw(row: &Row) -> rusqlite::Result<RawQueueItem> {
    Ok(RawQueueItem {
        local_id: row.get(0)?,
        data: row.get(1)?,
        priority: row.get(2)?,
        timestamp: row.get(3)?,
        retries: row.get(4)?,
        last_attempt: row.get(5)?,
        error: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrate::init_db;
    use crate::storage::queue::RetryState;
    use serde_json::json;

    fn create_test_db() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&mut conn).unwrap();
        conn
    }

    fn create(local_id: i64) -> QueueAction {
        QueueAction::CreateRecord {
            collection: "attendance_events".into(),
            local_id,
            owner_id: "u1".into(),
            payload: json!({"type": "ingreso"}),
            local_timestamp: 1,
        }
    }

    fn update(local_id: i64) -> QueueAction {
        QueueAction::UpdateRecord {
            collection: "attendance_events".into(),
            local_id,
            server_id: format!("srv-{}", local_id),
            payload: json!({"type": "egreso"}),
        }
    }

    #[test]
    fn test_list_ordered_by_priority_then_time() {
        let conn = create_test_db();
        let dao = QueueDao::new(&conn, RetryPolicy::default());

        let u = dao.insert(&update(1), QueuePriority::Normal, 10).unwrap();
        let c2 = dao.insert(&create(3), QueuePriority::High, 30).unwrap();
        let c1 = dao.insert(&create(2), QueuePriority::High, 20).unwrap();

        let order: Vec<i64> = dao.list_ordered().unwrap().iter().map(|i| i.local_id).collect();
        assert_eq!(order, vec![c1, c2, u]);
        assert_eq!(dao.count().unwrap(), 3);
    }

    #[test]
    fn test_record_failure_until_exhausted() {
        let conn = create_test_db();
        let dao = QueueDao::new(&conn, RetryPolicy::default());
        let id = dao.insert(&create(1), QueuePriority::High, 1).unwrap();

        let item = dao.record_failure(id, "timeout", 5).unwrap().unwrap();
        assert_eq!(item.state, RetryState::Eligible { retries: 1 });
        assert_eq!(item.error.as_deref(), Some("timeout"));
        assert_eq!(item.last_attempt, Some(5));

        dao.record_failure(id, "timeout", 6).unwrap();
        let item = dao.record_failure(id, "503", 7).unwrap().unwrap();
        assert_eq!(item.state, RetryState::Exhausted { retries: 3 });

        assert!(dao.record_failure(999, "x", 1).unwrap().is_none());
    }

    #[test]
    fn test_find_by_target_and_remove() {
        let conn = create_test_db();
        let dao = QueueDao::new(&conn, RetryPolicy::default());
        let c = dao.insert(&create(7), QueuePriority::High, 1).unwrap();
        let u = dao.insert(&update(7), QueuePriority::Normal, 2).unwrap();
        dao.insert(&create(8), QueuePriority::High, 3).unwrap();

        let targeted: Vec<i64> = dao
            .find_by_target("attendance_events", 7)
            .unwrap()
            .iter()
            .map(|i| i.local_id)
            .collect();
        assert_eq!(targeted, vec![c, u]);

        assert!(dao.remove(c).unwrap());
        assert!(!dao.remove(c).unwrap());
        assert_eq!(dao.count().unwrap(), 2);
    }

    #[test]
    fn test_replace_action_keeps_retries() {
        let conn = create_test_db();
        let dao = QueueDao::new(&conn, RetryPolicy::default());
        let id = dao.insert(&create(1), QueuePriority::High, 1).unwrap();
        dao.record_failure(id, "timeout", 2).unwrap();

        let refreshed = QueueAction::CreateRecord {
            collection: "attendance_events".into(),
            local_id: 1,
            owner_id: "u1".into(),
            payload: json!({"type": "egreso"}),
            local_timestamp: 9,
        };
        assert!(dao.replace_action(id, &refreshed).unwrap());

        let item = dao.get(id).unwrap().unwrap();
        assert_eq!(item.action, refreshed);
        assert_eq!(item.retries(), 1);
        assert_eq!(item.timestamp, 1);
    }

    #[test]
    fn test_corrupt_row_is_skipped() {
        let conn = create_test_db();
        conn.execute(
            r#"
            INSERT INTO sync_queue (action, data, priority, timestamp, collection, record_local_id)
            VALUES ('CREATE_RECORD', 'not json', 0, 1, 'attendance_events', 1)
            "#,
            [],
        )
        .unwrap();
        let dao = QueueDao::new(&conn, RetryPolicy::default());
        let id = dao.insert(&create(1), QueuePriority::High, 2).unwrap();

        let listed: Vec<i64> = dao.list_ordered().unwrap().iter().map(|i| i.local_id).collect();
        assert_eq!(listed, vec![id]);
        assert!(matches!(dao.get(1), Err(FieldSyncError::InvalidData(_))));

        // 同一目标上的损坏行不阻塞按目标查询
        let targeted: Vec<i64> = dao
            .find_by_target("attendance_events", 1)
            .unwrap()
            .iter()
            .map(|i| i.local_id)
            .collect();
        assert_eq!(targeted, vec![id]);

        // 损坏行仍在表中并计入总数，直到被清理
        assert_eq!(dao.count().unwrap(), 2);
        let scan = dao.scan().unwrap();
        assert_eq!(scan.items.len(), 1);
        assert_eq!(scan.unreadable.len(), 1);
        assert_eq!(scan.unreadable[0].local_id, 1);

        assert!(dao.remove(1).unwrap());
        assert_eq!(dao.count().unwrap(), 1);
        assert!(dao.scan().unwrap().unreadable.is_empty());
    }
}
