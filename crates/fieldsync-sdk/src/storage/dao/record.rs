//! 记录 DAO - records 表（所有记录类型共用，按 collection 分区）

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

use crate::error::{FieldSyncError, Result};
use crate::storage::entities::{IndexQuery, NewRecord, RecordPatch, StoredRecord, SyncStatus};

const RECORD_COLUMNS: &str =
    "local_id, collection, server_id, owner_id, payload, sync_status, deleted, deleted_at, local_timestamp";

pub struct RecordDao<'a> {
    conn: &'a Connection,
}

impl<'a> RecordDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 插入记录，返回新分配的 local_id（AUTOINCREMENT 保证不会复用已删除的 ID）
    pub fn insert(&self, collection: &str, record: &NewRecord, now: i64) -> Result<i64> {
        let payload = serde_json::to_string(&record.payload)?;
        self.conn.execute(
            r#"
            INSERT INTO records (collection, server_id, owner_id, payload, sync_status, deleted, deleted_at, local_timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, ?6)
            "#,
            params![
                collection,
                record.server_id,
                record.owner_id,
                payload,
                record.sync_status.as_str(),
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// 按 local_id 读取（包含墓碑）
    pub fn get(&self, collection: &str, local_id: i64) -> Result<Option<StoredRecord>> {
        let sql = format!(
            "SELECT {} FROM records WHERE collection = ?1 AND local_id = ?2",
            RECORD_COLUMNS
        );
        let raw = self
            .conn
            .query_row(&sql, params![collection, local_id], row_to_raw)
            .optional()?;
        raw.map(RawRecord::into_stored).transpose()
    }

    /// 按 server_id 读取（包含墓碑，用于合并时判断是否已存在）
    pub fn find_by_server_id(&self, collection: &str, server_id: &str) -> Result<Option<StoredRecord>> {
        let sql = format!(
            "SELECT {} FROM records WHERE collection = ?1 AND server_id = ?2",
            RECORD_COLUMNS
        );
        let raw = self
            .conn
            .query_row(&sql, params![collection, server_id], row_to_raw)
            .optional()?;
        raw.map(RawRecord::into_stored).transpose()
    }

    /// 局部更新；记录不存在时返回 NotFound
    pub fn update(&self, collection: &str, local_id: i64, patch: &RecordPatch, now: i64) -> Result<StoredRecord> {
        let mut sets = vec!["local_timestamp = ?3".to_string()];
        let mut values: Vec<Value> = vec![
            collection.to_string().into(),
            local_id.into(),
            now.into(),
        ];

        if let Some(payload) = &patch.payload {
            values.push(serde_json::to_string(payload)?.into());
            sets.push(format!("payload = ?{}", values.len()));
        }
        if let Some(server_id) = &patch.synced_with {
            values.push(server_id.clone().into());
            sets.push(format!("server_id = ?{}, sync_status = 'synced'", values.len()));
        } else if patch.mark_pending {
            sets.push("sync_status = 'pending'".to_string());
        }

        let sql = format!(
            "UPDATE records SET {} WHERE collection = ?1 AND local_id = ?2",
            sets.join(", ")
        );
        let changed = self.conn.execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            return Err(FieldSyncError::NotFound(format!("{}#{}", collection, local_id)));
        }

        self.get(collection, local_id)?
            .ok_or_else(|| FieldSyncError::NotFound(format!("{}#{}", collection, local_id)))
    }

    /// 二级索引查询，墓碑不参与任何读路径
    pub fn query(&self, collection: &str, query: &IndexQuery) -> Result<Vec<StoredRecord>> {
        let (filter, value): (&str, String) = match query {
            IndexQuery::ByOwner(owner_id) => ("owner_id = ?2", owner_id.clone()),
            IndexQuery::BySyncStatus(status) => ("sync_status = ?2", status.as_str().to_string()),
            IndexQuery::ByServerId(server_id) => ("server_id = ?2", server_id.clone()),
        };
        let sql = format!(
            "SELECT {} FROM records WHERE collection = ?1 AND {} AND deleted = 0 ORDER BY local_id ASC",
            RECORD_COLUMNS, filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![collection, value], row_to_raw)?;

        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.into_stored()?);
        }
        Ok(out)
    }

    /// 软删除：只打墓碑，不物理删除
    pub fn soft_delete(&self, collection: &str, local_id: i64, now: i64) -> Result<StoredRecord> {
        let changed = self.conn.execute(
            r#"
            UPDATE records SET deleted = 1, deleted_at = COALESCE(deleted_at, ?3), local_timestamp = ?3
            WHERE collection = ?1 AND local_id = ?2
            "#,
            params![collection, local_id, now],
        )?;
        if changed == 0 {
            return Err(FieldSyncError::NotFound(format!("{}#{}", collection, local_id)));
        }
        self.get(collection, local_id)?
            .ok_or_else(|| FieldSyncError::NotFound(format!("{}#{}", collection, local_id)))
    }

    /// 撤销墓碑：删除未能在远端生效时，记录以服务端版本重新可见
    pub fn restore(&self, collection: &str, local_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            r#"
            UPDATE records
            SET deleted = 0, deleted_at = NULL,
                sync_status = CASE WHEN server_id IS NULL THEN sync_status ELSE 'synced' END
            WHERE collection = ?1 AND local_id = ?2 AND deleted = 1
            "#,
            params![collection, local_id],
        )?;
        Ok(changed > 0)
    }

    /// 物理删除（仅在远端确认删除后调用）
    pub fn purge(&self, collection: &str, local_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND local_id = ?2",
            params![collection, local_id],
        )?;
        Ok(changed > 0)
    }

    /// 每个集合的可见记录数
    pub fn counts(&self) -> Result<BTreeMap<String, usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT collection, COUNT(*) FROM records WHERE deleted = 0 GROUP BY collection")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (collection, count) = row?;
            out.insert(collection, count as usize);
        }
        Ok(out)
    }
}

/// 行的原始形态；payload / sync_status 解析失败属于数据错误而非 SQLite 错误
struct RawRecord {
    local_id: i64,
    collection: String,
    server_id: Option<String>,
    owner_id: String,
    payload: String,
    sync_status: String,
    deleted: bool,
    deleted_at: Option<i64>,
    local_timestamp: i64,
}

impl RawRecord {
    fn into_stored(self) -> Result<StoredRecord> {
        Ok(StoredRecord {
            local_id: self.local_id,
            collection: self.collection,
            server_id: self.server_id,
            owner_id: self.owner_id,
            payload: serde_json::from_str(&self.payload)?,
            sync_status: SyncStatus::parse(&self.sync_status)?,
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            local_timestamp: self.local_timestamp,
        })
    }
}

fn row_to_raw(row: &Row) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        local_id: row.get(0)?,
        collection: row.get(1)?,
        server_id: row.get(2)?,
        owner_id: row.get(3)?,
        payload: row.get(4)?,
        sync_status: row.get(5)?,
        deleted: row.get::<_, i32>(6)? != 0,
        deleted_at: row.get(7)?,
        local_timestamp: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrate::init_db;
    use serde_json::json;

    const COLLECTION: &str = "attendance_events";

    fn create_test_db() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        init_db(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_get() {
        let conn = create_test_db();
        let dao = RecordDao::new(&conn);

        let id1 = dao.insert(COLLECTION, &NewRecord::pending("u1", json!({"type": "ingreso"})), 100).unwrap();
        let id2 = dao.insert(COLLECTION, &NewRecord::pending("u1", json!({"type": "egreso"})), 101).unwrap();
        assert_ne!(id1, id2);

        let record = dao.get(COLLECTION, id1).unwrap().unwrap();
        assert_eq!(record.owner_id, "u1");
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.payload["type"], "ingreso");
        assert!(!record.deleted);

        assert!(dao.get("work_orders", id1).unwrap().is_none());
    }

    #[test]
    fn test_update_patch() {
        let conn = create_test_db();
        let dao = RecordDao::new(&conn);
        let id = dao.insert(COLLECTION, &NewRecord::pending("u1", json!({"n": 1})), 100).unwrap();

        let updated = dao
            .update(COLLECTION, id, &RecordPatch::new().payload(json!({"n": 2})).mark_synced("srv-9"), 200)
            .unwrap();
        assert_eq!(updated.payload["n"], 2);
        assert_eq!(updated.server_id.as_deref(), Some("srv-9"));
        assert_eq!(updated.sync_status, SyncStatus::Synced);
        assert_eq!(updated.local_timestamp, 200);

        let updated = dao.update(COLLECTION, id, &RecordPatch::new().mark_pending(), 300).unwrap();
        assert_eq!(updated.sync_status, SyncStatus::Pending);
        assert_eq!(updated.server_id.as_deref(), Some("srv-9"));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let conn = create_test_db();
        let dao = RecordDao::new(&conn);
        let err = dao.update(COLLECTION, 42, &RecordPatch::new().mark_pending(), 1).unwrap_err();
        assert!(matches!(err, FieldSyncError::NotFound(_)));
    }

    #[test]
    fn test_synced_requires_server_id() {
        let conn = create_test_db();
        let result = conn.execute(
            "INSERT INTO records (collection, owner_id, payload, sync_status, local_timestamp) VALUES ('x', 'u1', '{}', 'synced', 1)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_query_excludes_tombstones() {
        let conn = create_test_db();
        let dao = RecordDao::new(&conn);
        let keep = dao.insert(COLLECTION, &NewRecord::pending("u1", json!({})), 1).unwrap();
        let gone = dao.insert(COLLECTION, &NewRecord::synced("u1", "srv-1", json!({})), 2).unwrap();
        dao.insert(COLLECTION, &NewRecord::pending("u2", json!({})), 3).unwrap();

        dao.soft_delete(COLLECTION, gone, 10).unwrap();

        let owned = dao.query(COLLECTION, &IndexQuery::ByOwner("u1".into())).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].local_id, keep);

        assert!(dao.query(COLLECTION, &IndexQuery::ByServerId("srv-1".into())).unwrap().is_empty());
        let tombstone = dao.find_by_server_id(COLLECTION, "srv-1").unwrap().unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.deleted_at, Some(10));

        let pending = dao.query(COLLECTION, &IndexQuery::BySyncStatus(SyncStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 2);

        let counts = dao.counts().unwrap();
        assert_eq!(counts.get(COLLECTION), Some(&2));
    }

    #[test]
    fn test_purge() {
        let conn = create_test_db();
        let dao = RecordDao::new(&conn);
        let id = dao.insert(COLLECTION, &NewRecord::synced("u1", "srv-1", json!({})), 1).unwrap();
        assert!(dao.purge(COLLECTION, id).unwrap());
        assert!(!dao.purge(COLLECTION, id).unwrap());
        assert!(dao.get(COLLECTION, id).unwrap().is_none());
    }

    #[test]
    fn test_restore_tombstone() {
        let conn = create_test_db();
        let dao = RecordDao::new(&conn);
        let id = dao.insert(COLLECTION, &NewRecord::synced("u1", "srv-1", json!({})), 1).unwrap();
        dao.update(COLLECTION, id, &RecordPatch::new().mark_pending(), 2).unwrap();
        dao.soft_delete(COLLECTION, id, 3).unwrap();

        assert!(dao.restore(COLLECTION, id).unwrap());
        assert!(!dao.restore(COLLECTION, id).unwrap());

        let restored = dao.get(COLLECTION, id).unwrap().unwrap();
        assert!(!restored.deleted);
        assert_eq!(restored.deleted_at, None);
        assert_eq!(restored.sync_status, SyncStatus::Synced);
        assert_eq!(dao.query(COLLECTION, &IndexQuery::ByOwner("u1".into())).unwrap().len(), 1);
    }
}
