//! 存储模块 - 本地持久化层
//!
//! 分层：
//! - LocalStore: 对外的异步存储 API
//! - DbActor: 独占 SQLite 连接的专用线程
//! - DAO Layer: 每张表一个操作模块，只在 Actor 线程内使用
//! - Entities: 与记录类型无关的行结构

use std::collections::BTreeMap;

use tracing::{debug, info, instrument};

use crate::config::SyncConfig;
use crate::error::{FieldSyncError, Result};
use crate::utils::time::now_millis;

pub mod dao;
pub mod db_actor;
pub mod entities;
pub mod migrate;
pub mod queue;

pub use dao::DaoFactory;
pub use db_actor::{DbActorHandle, DbLocation};
pub use entities::*;

use dao::QueueScan;
use queue::{QueueAction, QueueItem, QueuePriority, RetryPolicy};

/// 本地持久化存储
///
/// 所有记录集合与同步队列共用一个数据库；每个方法都是一次 Actor 往返，
/// 单条命令内的读写在同一线程上串行完成。
#[derive(Debug, Clone)]
pub struct LocalStore {
    db: DbActorHandle,
    retry_policy: RetryPolicy,
}

impl LocalStore {
    /// 按配置打开存储（建表、迁移、版本校验）；失败统一为 `StorageUnavailable`
    pub async fn open(config: &SyncConfig) -> Result<Self> {
        Self::open_at(config.database_location(), config.retry_policy()).await
    }

    pub async fn open_at(location: DbLocation, retry_policy: RetryPolicy) -> Result<Self> {
        info!("💾 打开本地存储: {:?}", location);
        let db = DbActorHandle::spawn(location).await?;
        Ok(Self { db, retry_policy })
    }

    /// 内存存储（测试、演示）
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_at(DbLocation::Memory, RetryPolicy::default()).await
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// 关闭存储；之后的调用返回 `StorageUnavailable`
    pub fn close(&self) {
        self.db.shutdown();
    }

    // ========== 记录集合 ==========

    /// 插入新记录，返回完整的行
    #[instrument(skip(self, record), fields(owner = %record.owner_id))]
    pub async fn insert(&self, collection: &str, record: NewRecord) -> Result<StoredRecord> {
        let collection = collection.to_string();
        self.db
            .transaction(move |conn| {
                let dao = DaoFactory::record_dao(conn);
                let local_id = dao.insert(&collection, &record, now_millis())?;
                debug!("📝 已插入记录 {}#{} ({})", collection, local_id, record.sync_status);
                dao.get(&collection, local_id)?
                    .ok_or_else(|| FieldSyncError::NotFound(format!("{}#{}", collection, local_id)))
            })
            .await
    }

    /// 按 local_id 读取（包含墓碑）
    pub async fn get(&self, collection: &str, local_id: i64) -> Result<Option<StoredRecord>> {
        let collection = collection.to_string();
        self.db
            .call(move |conn| DaoFactory::record_dao(conn).get(&collection, local_id))
            .await
    }

    pub async fn update(&self, collection: &str, local_id: i64, patch: RecordPatch) -> Result<StoredRecord> {
        let collection = collection.to_string();
        self.db
            .call(move |conn| DaoFactory::record_dao(conn).update(&collection, local_id, &patch, now_millis()))
            .await
    }

    /// 二级索引查询（不含墓碑）
    pub async fn query_by_index(&self, collection: &str, query: IndexQuery) -> Result<Vec<StoredRecord>> {
        let collection = collection.to_string();
        debug!("🔍 查询 {} via {}", collection, query.index_name());
        self.db
            .call(move |conn| DaoFactory::record_dao(conn).query(&collection, &query))
            .await
    }

    /// 按 server_id 查找（包含墓碑）
    pub async fn find_by_server_id(&self, collection: &str, server_id: &str) -> Result<Option<StoredRecord>> {
        let collection = collection.to_string();
        let server_id = server_id.to_string();
        self.db
            .call(move |conn| DaoFactory::record_dao(conn).find_by_server_id(&collection, &server_id))
            .await
    }

    /// 软删除（打墓碑）
    pub async fn soft_delete(&self, collection: &str, local_id: i64) -> Result<StoredRecord> {
        let collection = collection.to_string();
        self.db
            .call(move |conn| DaoFactory::record_dao(conn).soft_delete(&collection, local_id, now_millis()))
            .await
    }

    /// 撤销墓碑；记录不存在或未被删除时返回 false
    pub async fn restore(&self, collection: &str, local_id: i64) -> Result<bool> {
        let collection = collection.to_string();
        self.db
            .call(move |conn| DaoFactory::record_dao(conn).restore(&collection, local_id))
            .await
    }

    /// 物理删除；仅在远端确认删除后调用
    pub async fn purge(&self, collection: &str, local_id: i64) -> Result<bool> {
        let collection = collection.to_string();
        self.db
            .call(move |conn| DaoFactory::record_dao(conn).purge(&collection, local_id))
            .await
    }

    /// 各集合可见记录数
    pub async fn collection_counts(&self) -> Result<BTreeMap<String, usize>> {
        self.db.call(|conn| DaoFactory::record_dao(conn).counts()).await
    }

    // ========== 同步队列表 ==========

    pub async fn queue_insert(&self, action: QueueAction, priority: QueuePriority) -> Result<QueueItem> {
        let policy = self.retry_policy;
        self.db
            .transaction(move |conn| {
                let dao = DaoFactory::queue_dao(conn, policy);
                let id = dao.insert(&action, priority, now_millis())?;
                dao.get(id)?
                    .ok_or_else(|| FieldSyncError::NotFound(format!("sync_queue#{}", id)))
            })
            .await
    }

    pub async fn queue_get(&self, id: i64) -> Result<Option<QueueItem>> {
        let policy = self.retry_policy;
        self.db
            .call(move |conn| DaoFactory::queue_dao(conn, policy).get(id))
            .await
    }

    pub async fn queue_list(&self) -> Result<Vec<QueueItem>> {
        let policy = self.retry_policy;
        self.db
            .call(move |conn| DaoFactory::queue_dao(conn, policy).list_ordered())
            .await
    }

    /// 全部队列行，无法解析的行单独返回
    pub async fn queue_scan(&self) -> Result<QueueScan> {
        let policy = self.retry_policy;
        self.db
            .call(move |conn| DaoFactory::queue_dao(conn, policy).scan())
            .await
    }

    pub async fn queue_find_by_target(&self, collection: &str, record_local_id: i64) -> Result<Vec<QueueItem>> {
        let policy = self.retry_policy;
        let collection = collection.to_string();
        self.db
            .call(move |conn| DaoFactory::queue_dao(conn, policy).find_by_target(&collection, record_local_id))
            .await
    }

    pub async fn queue_remove(&self, id: i64) -> Result<bool> {
        let policy = self.retry_policy;
        self.db
            .call(move |conn| DaoFactory::queue_dao(conn, policy).remove(id))
            .await
    }

    pub async fn queue_record_failure(&self, id: i64, error: String) -> Result<Option<QueueItem>> {
        let policy = self.retry_policy;
        self.db
            .transaction(move |conn| DaoFactory::queue_dao(conn, policy).record_failure(id, &error, now_millis()))
            .await
    }

    pub async fn queue_replace_action(&self, id: i64, action: QueueAction) -> Result<bool> {
        let policy = self.retry_policy;
        self.db
            .call(move |conn| DaoFactory::queue_dao(conn, policy).replace_action(id, &action))
            .await
    }

    pub async fn queue_count(&self) -> Result<usize> {
        let policy = self.retry_policy;
        self.db
            .call(move |conn| DaoFactory::queue_dao(conn, policy).count())
            .await
    }
}
