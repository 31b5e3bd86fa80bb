//! 记录仓库 - 按记录类型实例化的读写入口
//!
//! 写入先尝试远端（有超时上限），失败或离线时落本地并入队；
//! 读取合并远端已确认的记录与本地待同步记录。远端的瞬时错误不会返回给调用方，
//! 结构性错误（存储不可用、记录不存在）照常传播。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{FieldSyncError, Result};
use crate::remote::{ListFilters, RemoteRecord};
use crate::storage::queue::QueueAction;
use crate::storage::{IndexQuery, NewRecord, RecordPatch, StoredRecord, SyncStatus};
use crate::sync::SyncCoordinator;

/// 记录类型
///
/// 每种类型对应存储中的一个逻辑集合。
pub trait RecordKind:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// 集合名（本地集合与远端路径共用）
    const COLLECTION: &'static str;

    /// 业务时间戳（毫秒），用于列表排序与时间过滤
    fn occurred_at(&self) -> i64;
}

/// 类型化的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<K> {
    pub local_id: i64,
    pub server_id: Option<String>,
    pub owner_id: String,
    pub payload: K,
    pub sync_status: SyncStatus,
    pub deleted: bool,
    pub deleted_at: Option<i64>,
    pub local_timestamp: i64,
}

impl<K: RecordKind> Record<K> {
    pub fn from_stored(stored: StoredRecord) -> Result<Self> {
        let payload = serde_json::from_value(stored.payload).map_err(|e| {
            FieldSyncError::InvalidData(format!("{}#{} 数据无法解析: {}", K::COLLECTION, stored.local_id, e))
        })?;
        Ok(Self {
            local_id: stored.local_id,
            server_id: stored.server_id,
            owner_id: stored.owner_id,
            payload,
            sync_status: stored.sync_status,
            deleted: stored.deleted,
            deleted_at: stored.deleted_at,
            local_timestamp: stored.local_timestamp,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    /// UI 使用的引用：已同步记录用服务端 ID，否则用 `local_<id>` 占位
    pub fn record_ref(&self) -> RecordRef {
        match &self.server_id {
            Some(server_id) => RecordRef::Server(server_id.clone()),
            None => RecordRef::Local(self.local_id),
        }
    }
}

/// 记录引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordRef {
    /// 本地 ID（文本形式 `local_<id>`）
    Local(i64),
    /// 服务端 ID
    Server(String),
}

const LOCAL_PREFIX: &str = "local_";

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRef::Local(local_id) => write!(f, "{}{}", LOCAL_PREFIX, local_id),
            RecordRef::Server(server_id) => f.write_str(server_id),
        }
    }
}

impl FromStr for RecordRef {
    type Err = FieldSyncError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(FieldSyncError::InvalidData("空的记录引用".to_string()));
        }
        match s.strip_prefix(LOCAL_PREFIX).map(str::parse::<i64>) {
            Some(Ok(local_id)) => Ok(RecordRef::Local(local_id)),
            _ => Ok(RecordRef::Server(s.to_string())),
        }
    }
}

/// 创建结果
#[derive(Debug, Clone)]
pub struct CreateOutcome<K> {
    pub record: Record<K>,
    /// true 表示已落本地并入队，等待同步
    pub offline: bool,
}

/// 更新结果
#[derive(Debug, Clone)]
pub struct UpdateOutcome<K> {
    pub record: Record<K>,
    pub offline: bool,
}

/// 删除结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub local_id: Option<i64>,
    /// true 表示删除已入队，等待同步
    pub offline: bool,
    /// true 表示记录从未同步，排队中的创建被直接取消
    pub cancelled_before_sync: bool,
}

/// 列表项
#[derive(Debug, Clone)]
pub struct ListedRecord<K> {
    pub record: Record<K>,
    /// 本地待同步（UI 显示"待同步"标记）
    pub is_pending: bool,
    /// 待同步但已没有排队操作（重试耗尽），再次编辑后才会重新同步
    pub stalled: bool,
}

/// 列表结果
#[derive(Debug, Clone)]
pub struct ListOutcome<K> {
    pub records: Vec<ListedRecord<K>>,
    /// true 表示远端不可用，只返回了本地数据
    pub offline: bool,
}

/// 记录仓库
pub struct RecordRepository<K: RecordKind> {
    coordinator: Arc<SyncCoordinator>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: RecordKind> Clone for RecordRepository<K> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            _kind: PhantomData,
        }
    }
}

impl<K: RecordKind> fmt::Debug for RecordRepository<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordRepository")
            .field("collection", &K::COLLECTION)
            .finish()
    }
}

impl<K: RecordKind> RecordRepository<K> {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            coordinator,
            _kind: PhantomData,
        }
    }

    pub fn collection(&self) -> &'static str {
        K::COLLECTION
    }

    /// 创建记录：在线时先写远端，失败或离线时落本地并入队
    #[instrument(skip(self, payload), fields(collection = K::COLLECTION))]
    pub async fn create(&self, owner_id: &str, payload: K) -> Result<CreateOutcome<K>> {
        let c = &self.coordinator;
        let value = serde_json::to_value(&payload)?;

        if c.monitor().is_online() {
            match c.bounded(c.remote().create(K::COLLECTION, owner_id, &value)).await {
                Ok(remote) => {
                    let stored = self.cache_confirmed(owner_id, &remote.server_id, value).await?;
                    info!("✅ 已在线创建 {}#{} -> {}", K::COLLECTION, stored.local_id, remote.server_id);
                    return Ok(CreateOutcome {
                        record: Record::from_stored(stored)?,
                        offline: false,
                    });
                }
                Err(e) if e.is_structural() => return Err(e),
                Err(e) => warn!("⚠️ 在线创建失败，转为离线保存: {}", e),
            }
        }

        let stored = c
            .store()
            .insert(K::COLLECTION, NewRecord::pending(owner_id, value))
            .await?;
        c.queue()
            .enqueue(QueueAction::CreateRecord {
                collection: K::COLLECTION.to_string(),
                local_id: stored.local_id,
                owner_id: stored.owner_id.clone(),
                payload: stored.payload.clone(),
                local_timestamp: stored.local_timestamp,
            })
            .await?;
        info!("💾 离线保存 {}#{}，等待同步", K::COLLECTION, stored.local_id);

        Ok(CreateOutcome {
            record: Record::from_stored(stored)?,
            offline: true,
        })
    }

    /// 列出归属者的记录：远端已确认 + 本地待同步，按业务时间倒序
    #[instrument(skip(self, filters), fields(collection = K::COLLECTION))]
    pub async fn list_for_owner(&self, owner_id: &str, filters: ListFilters) -> Result<ListOutcome<K>> {
        let c = &self.coordinator;
        let mut listed: Vec<ListedRecord<K>> = Vec::new();
        let mut fetched: Option<HashSet<String>> = None;

        if c.monitor().is_online() {
            match c.bounded(c.remote().list(K::COLLECTION, owner_id, &filters)).await {
                Ok(remote_records) => {
                    let mut ids = HashSet::with_capacity(remote_records.len());
                    for remote in remote_records {
                        ids.insert(remote.server_id.clone());
                        if let Some(entry) = self.merge_remote(owner_id, remote).await? {
                            listed.push(entry);
                        }
                    }
                    fetched = Some(ids);
                }
                Err(e) if e.is_structural() => return Err(e),
                Err(e) => warn!("⚠️ 获取远端列表失败，仅返回本地数据: {}", e),
            }
        }

        let offline = fetched.is_none();
        let local = c
            .store()
            .query_by_index(K::COLLECTION, IndexQuery::ByOwner(owner_id.to_string()))
            .await?;
        for stored in local {
            let include = match &fetched {
                // 远端可用：只补充远端结果中没有的待同步记录
                Some(ids) => {
                    stored.is_pending()
                        && stored.server_id.as_ref().map_or(true, |id| !ids.contains(id))
                }
                // 离线：本地缓存 + 待同步
                None => true,
            };
            if !include {
                continue;
            }
            if let Some(entry) = to_listed::<K>(stored) {
                listed.push(entry);
            }
        }

        listed.retain(|entry| filters.contains(entry.record.payload.occurred_at()));
        listed.sort_by(|a, b| {
            b.record
                .payload
                .occurred_at()
                .cmp(&a.record.payload.occurred_at())
                .then(b.record.local_id.cmp(&a.record.local_id))
        });
        if let Some(limit) = filters.limit {
            listed.truncate(limit);
        }

        if listed.iter().any(|entry| entry.is_pending) {
            let queued: HashSet<i64> = c
                .queue()
                .peek_all()
                .await?
                .iter()
                .filter(|item| item.action.collection() == K::COLLECTION)
                .filter_map(|item| item.action.record_local_id())
                .collect();
            for entry in listed.iter_mut().filter(|entry| entry.is_pending) {
                entry.stalled = !queued.contains(&entry.record.local_id);
            }
        }

        debug!("📋 {} 列表: {} 条 (offline={})", K::COLLECTION, listed.len(), offline);
        Ok(ListOutcome { records: listed, offline })
    }

    /// 更新记录
    #[instrument(skip(self, payload), fields(collection = K::COLLECTION))]
    pub async fn update(&self, local_id: i64, payload: K) -> Result<UpdateOutcome<K>> {
        let c = &self.coordinator;
        let current = self.require_visible(local_id).await?;
        let value = serde_json::to_value(&payload)?;

        let Some(server_id) = current.server_id.clone() else {
            // 从未同步：只改本地，并刷新排队中的创建快照
            let stored = c
                .store()
                .update(K::COLLECTION, local_id, RecordPatch::new().payload(value))
                .await?;
            let refreshed = c
                .queue()
                .replace_create_snapshot(K::COLLECTION, local_id, stored.payload.clone(), stored.local_timestamp)
                .await?;
            if !refreshed {
                // 之前的创建已被放弃，重新入队
                c.queue()
                    .enqueue(QueueAction::CreateRecord {
                        collection: K::COLLECTION.to_string(),
                        local_id,
                        owner_id: stored.owner_id.clone(),
                        payload: stored.payload.clone(),
                        local_timestamp: stored.local_timestamp,
                    })
                    .await?;
            }
            return Ok(UpdateOutcome {
                record: Record::from_stored(stored)?,
                offline: true,
            });
        };

        if c.monitor().is_online() {
            match c.bounded(c.remote().update(K::COLLECTION, &server_id, &value)).await {
                Ok(_) => {
                    // 排队中的旧更新已过时
                    c.queue().cancel_pending_for(K::COLLECTION, local_id).await?;
                    let stored = c
                        .store()
                        .update(
                            K::COLLECTION,
                            local_id,
                            RecordPatch::new().payload(value).mark_synced(server_id),
                        )
                        .await?;
                    return Ok(UpdateOutcome {
                        record: Record::from_stored(stored)?,
                        offline: false,
                    });
                }
                Err(e) if e.is_structural() => return Err(e),
                Err(e) => warn!("⚠️ 在线更新失败，转为离线保存: {}", e),
            }
        }

        let stored = c
            .store()
            .update(K::COLLECTION, local_id, RecordPatch::new().payload(value).mark_pending())
            .await?;
        // 同一记录只保留最新的一次更新
        c.queue().cancel_pending_for(K::COLLECTION, local_id).await?;
        c.queue()
            .enqueue(QueueAction::UpdateRecord {
                collection: K::COLLECTION.to_string(),
                local_id,
                server_id,
                payload: stored.payload.clone(),
            })
            .await?;

        Ok(UpdateOutcome {
            record: Record::from_stored(stored)?,
            offline: true,
        })
    }

    /// 删除记录
    ///
    /// 从未同步的记录直接取消排队中的创建，远端永远不会看到它。
    #[instrument(skip(self), fields(collection = K::COLLECTION))]
    pub async fn delete(&self, target: RecordRef) -> Result<DeleteOutcome> {
        let c = &self.coordinator;

        let local = match &target {
            RecordRef::Local(local_id) => Some(self.require_visible(*local_id).await?),
            RecordRef::Server(server_id) => {
                match c.store().find_by_server_id(K::COLLECTION, server_id).await? {
                    Some(record) if record.deleted => {
                        return Err(FieldSyncError::NotFound(format!("{}:{}", K::COLLECTION, server_id)))
                    }
                    other => other,
                }
            }
        };

        let server_id = match (&target, &local) {
            (_, Some(record)) => record.server_id.clone(),
            (RecordRef::Server(server_id), None) => Some(server_id.clone()),
            (RecordRef::Local(_), None) => None,
        };

        let Some(server_id) = server_id else {
            // 仅本地存在：打墓碑并取消创建
            let Some(record) = local else {
                return Err(FieldSyncError::NotFound(target.to_string()));
            };
            c.store().soft_delete(K::COLLECTION, record.local_id).await?;
            let cancelled = c.queue().cancel_pending_for(K::COLLECTION, record.local_id).await?;
            info!(
                "🗑️ 删除未同步记录 {}#{}，取消 {} 个排队操作",
                K::COLLECTION,
                record.local_id,
                cancelled.len()
            );
            return Ok(DeleteOutcome {
                local_id: Some(record.local_id),
                offline: false,
                cancelled_before_sync: true,
            });
        };

        let local_id = local.as_ref().map(|r| r.local_id);

        if c.monitor().is_online() {
            match c.bounded(c.remote().delete(K::COLLECTION, &server_id)).await {
                Ok(()) => {
                    if let Some(local_id) = local_id {
                        c.store().soft_delete(K::COLLECTION, local_id).await?;
                        c.queue().cancel_pending_for(K::COLLECTION, local_id).await?;
                        c.store().purge(K::COLLECTION, local_id).await?;
                    }
                    info!("✅ 已在线删除 {}:{}", K::COLLECTION, server_id);
                    return Ok(DeleteOutcome {
                        local_id,
                        offline: false,
                        cancelled_before_sync: false,
                    });
                }
                Err(e) if e.is_structural() => return Err(e),
                Err(e) => warn!("⚠️ 在线删除失败，转为离线删除: {}", e),
            }
        }

        if let Some(local_id) = local_id {
            c.store().soft_delete(K::COLLECTION, local_id).await?;
            c.queue().cancel_pending_for(K::COLLECTION, local_id).await?;
        }
        c.queue()
            .enqueue(QueueAction::DeleteRecord {
                collection: K::COLLECTION.to_string(),
                local_id,
                server_id,
            })
            .await?;

        Ok(DeleteOutcome {
            local_id,
            offline: true,
            cancelled_before_sync: false,
        })
    }

    /// 按本地 ID 读取（不含墓碑）
    pub async fn get(&self, local_id: i64) -> Result<Option<Record<K>>> {
        match self.coordinator.store().get(K::COLLECTION, local_id).await? {
            Some(stored) if !stored.deleted => Ok(Some(Record::from_stored(stored)?)),
            _ => Ok(None),
        }
    }

    /// 归属者的待同步记录
    pub async fn pending(&self, owner_id: &str) -> Result<Vec<Record<K>>> {
        let stored = self
            .coordinator
            .store()
            .query_by_index(K::COLLECTION, IndexQuery::BySyncStatus(SyncStatus::Pending))
            .await?;
        stored
            .into_iter()
            .filter(|record| record.owner_id == owner_id)
            .map(Record::from_stored)
            .collect()
    }

    async fn require_visible(&self, local_id: i64) -> Result<StoredRecord> {
        match self.coordinator.store().get(K::COLLECTION, local_id).await? {
            Some(stored) if !stored.deleted => Ok(stored),
            _ => Err(FieldSyncError::NotFound(format!("{}#{}", K::COLLECTION, local_id))),
        }
    }

    /// 缓存远端已确认的记录；server_id 已存在时刷新数据
    async fn cache_confirmed(&self, owner_id: &str, server_id: &str, value: serde_json::Value) -> Result<StoredRecord> {
        let store = self.coordinator.store();
        match store.find_by_server_id(K::COLLECTION, server_id).await? {
            Some(existing) => {
                store
                    .update(
                        K::COLLECTION,
                        existing.local_id,
                        RecordPatch::new().payload(value).mark_synced(server_id),
                    )
                    .await
            }
            None => {
                store
                    .insert(K::COLLECTION, NewRecord::synced(owner_id, server_id, value))
                    .await
            }
        }
    }

    /// 合并一条远端记录到本地，返回应显示的列表项
    async fn merge_remote(&self, owner_id: &str, remote: RemoteRecord) -> Result<Option<ListedRecord<K>>> {
        let store = self.coordinator.store();

        if let Err(e) = serde_json::from_value::<K>(remote.data.clone()) {
            warn!("⚠️ 跳过无法解析的远端记录 {}:{}: {}", K::COLLECTION, remote.server_id, e);
            return Ok(None);
        }

        let stored = match store.find_by_server_id(K::COLLECTION, &remote.server_id).await? {
            None => {
                let owner = remote.owner_id.as_deref().unwrap_or(owner_id);
                store
                    .insert(K::COLLECTION, NewRecord::synced(owner, &remote.server_id, remote.data))
                    .await?
            }
            // 本地已删除，删除尚未同步
            Some(local) if local.deleted => return Ok(None),
            // 本地有未同步的修改，以本地为准
            Some(local) if local.is_pending() => local,
            Some(local) if local.payload != remote.data => {
                store
                    .update(K::COLLECTION, local.local_id, RecordPatch::new().payload(remote.data))
                    .await?
            }
            Some(local) => local,
        };

        Ok(to_listed::<K>(stored))
    }
}

fn to_listed<K: RecordKind>(stored: StoredRecord) -> Option<ListedRecord<K>> {
    let local_id = stored.local_id;
    match Record::<K>::from_stored(stored) {
        Ok(record) => Some(ListedRecord {
            is_pending: record.is_pending(),
            stalled: false,
            record,
        }),
        Err(e) => {
            warn!("⚠️ 跳过无法解析的本地记录 {}#{}: {}", K::COLLECTION, local_id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::kinds::{AttendanceEvent, AttendanceType};
    use crate::network::ConnectivityMonitor;
    use crate::remote::test_helpers::{Fault, MockRemoteApi};
    use crate::storage::LocalStore;
    use serde_json::json;
    use std::time::Duration;

    async fn setup(online: bool) -> (RecordRepository<AttendanceEvent>, Arc<SyncCoordinator>, MockRemoteApi) {
        let remote = MockRemoteApi::new();
        let config = SyncConfig::builder().in_memory().remote_timeout_ms(200).build();
        let store = LocalStore::open(&config).await.unwrap();
        let monitor = Arc::new(ConnectivityMonitor::new(online));
        let coordinator = SyncCoordinator::new(config, store, Arc::new(remote.clone()), monitor);
        (coordinator.repository::<AttendanceEvent>(), coordinator, remote)
    }

    fn ingreso(ts: i64) -> AttendanceEvent {
        AttendanceEvent::new(AttendanceType::Ingreso, ts)
    }

    #[test]
    fn test_record_ref_text_form() {
        assert_eq!(RecordRef::Local(12).to_string(), "local_12");
        assert_eq!("local_12".parse::<RecordRef>().unwrap(), RecordRef::Local(12));
        assert_eq!("abc".parse::<RecordRef>().unwrap(), RecordRef::Server("abc".into()));
        assert_eq!("local_x".parse::<RecordRef>().unwrap(), RecordRef::Server("local_x".into()));
        assert!("".parse::<RecordRef>().is_err());
    }

    #[tokio::test]
    async fn test_create_online_is_synced() {
        let (repo, coordinator, remote) = setup(true).await;
        let outcome = repo.create("u1", ingreso(100)).await.unwrap();
        assert!(!outcome.offline);
        assert_eq!(outcome.record.sync_status, SyncStatus::Synced);
        assert!(outcome.record.server_id.is_some());
        assert_eq!(remote.records("attendance_events").len(), 1);
        assert_eq!(coordinator.queue().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_falls_back_on_remote_failure() {
        let (repo, coordinator, remote) = setup(true).await;
        remote.push_fault(Fault::Status(500));

        let outcome = repo.create("u1", ingreso(100)).await.unwrap();
        assert!(outcome.offline);
        assert!(outcome.record.is_pending());
        assert_eq!(outcome.record.record_ref(), RecordRef::Local(outcome.record.local_id));
        assert_eq!(coordinator.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_times_out_into_queue() {
        let (repo, coordinator, remote) = setup(true).await;
        remote.push_fault(Fault::Hang(Duration::from_secs(5)));

        let started = std::time::Instant::now();
        let outcome = repo.create("u1", ingreso(100)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(outcome.offline);
        assert_eq!(coordinator.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_offline_never_calls_remote() {
        let (repo, _coordinator, remote) = setup(false).await;
        let outcome = repo.create("u1", ingreso(100)).await.unwrap();
        assert!(outcome.offline);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_structural_error_is_not_queued() {
        let (repo, coordinator, remote) = setup(true).await;
        remote.push_fault(Fault::Missing);

        let err = repo.create("u1", ingreso(100)).await.unwrap_err();
        assert!(matches!(err, FieldSyncError::NotFound(_)));
        assert_eq!(coordinator.queue().len().await.unwrap(), 0);
        assert!(repo.pending("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_merges_and_sorts() {
        let (repo, coordinator, remote) = setup(true).await;
        remote.seed("attendance_events", "u1", json!({"type": "ingreso", "timestamp": 100}));
        remote.seed("attendance_events", "u1", json!({"type": "egreso", "timestamp": 300}));
        remote.seed("attendance_events", "u2", json!({"type": "ingreso", "timestamp": 400}));

        coordinator.monitor().set_online(false);
        repo.create("u1", ingreso(200)).await.unwrap();
        coordinator.monitor().set_online(true);

        let listed = repo.list_for_owner("u1", ListFilters::new()).await.unwrap();
        assert!(!listed.offline);
        let stamps: Vec<i64> = listed.records.iter().map(|e| e.record.payload.timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);
        let pending: Vec<bool> = listed.records.iter().map(|e| e.is_pending).collect();
        assert_eq!(pending, vec![false, true, false]);
    }

    #[tokio::test]
    async fn test_list_offline_uses_cache() {
        let (repo, coordinator, remote) = setup(true).await;
        remote.seed("attendance_events", "u1", json!({"type": "ingreso", "timestamp": 100}));
        repo.list_for_owner("u1", ListFilters::new()).await.unwrap();

        remote.set_unreachable(true);
        repo.create("u1", ingreso(200)).await.unwrap();

        let listed = repo.list_for_owner("u1", ListFilters::new()).await.unwrap();
        assert!(listed.offline);
        assert_eq!(listed.records.len(), 2);
        assert!(listed.records[0].is_pending);
        assert!(!listed.records[1].is_pending);
        assert_eq!(coordinator.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (repo, _coordinator, _remote) = setup(false).await;
        for ts in [100, 200, 300, 400] {
            repo.create("u1", ingreso(ts)).await.unwrap();
        }
        let listed = repo
            .list_for_owner("u1", ListFilters::new().from(150).to(400).limit(2))
            .await
            .unwrap();
        let stamps: Vec<i64> = listed.records.iter().map(|e| e.record.payload.timestamp).collect();
        assert_eq!(stamps, vec![400, 300]);
    }

    #[tokio::test]
    async fn test_list_hides_locally_deleted_remote_record() {
        let (repo, coordinator, remote) = setup(true).await;
        let server_id = remote.seed("attendance_events", "u1", json!({"type": "ingreso", "timestamp": 100}));
        repo.list_for_owner("u1", ListFilters::new()).await.unwrap();

        coordinator.monitor().set_online(false);
        let outcome = repo.delete(RecordRef::Server(server_id)).await.unwrap();
        assert!(outcome.offline);
        coordinator.monitor().set_online(true);

        // 远端仍有该记录，但本地删除尚未同步
        let listed = repo.list_for_owner("u1", ListFilters::new()).await.unwrap();
        assert!(listed.records.is_empty());
    }

    #[tokio::test]
    async fn test_update_synced_offline_enqueues_update() {
        let (repo, coordinator, _remote) = setup(true).await;
        let created = repo.create("u1", ingreso(100)).await.unwrap().record;

        coordinator.monitor().set_online(false);
        let updated = repo
            .update(created.local_id, ingreso(100).with_note("olvidé marcar"))
            .await
            .unwrap();
        assert!(updated.offline);
        assert!(updated.record.is_pending());
        assert_eq!(updated.record.server_id, created.server_id);

        // 第二次修改合并为一个排队更新
        repo.update(created.local_id, ingreso(101)).await.unwrap();
        let items = coordinator.queue().peek_all().await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0].action,
            QueueAction::UpdateRecord { payload, .. } if payload["timestamp"] == 101
        ));
    }

    #[tokio::test]
    async fn test_update_unsynced_rewrites_create() {
        let (repo, coordinator, _remote) = setup(false).await;
        let created = repo.create("u1", ingreso(100)).await.unwrap().record;
        repo.update(created.local_id, ingreso(150)).await.unwrap();

        let items = coordinator.queue().peek_all().await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0].action,
            QueueAction::CreateRecord { payload, .. } if payload["timestamp"] == 150
        ));
    }

    #[tokio::test]
    async fn test_delete_online_purges() {
        let (repo, coordinator, remote) = setup(true).await;
        let created = repo.create("u1", ingreso(100)).await.unwrap().record;

        let outcome = repo.delete(created.record_ref()).await.unwrap();
        assert!(!outcome.offline);
        assert!(remote.records("attendance_events").is_empty());
        assert!(coordinator.store().get("attendance_events", created.local_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (repo, _coordinator, _remote) = setup(false).await;
        let err = tokio_test::assert_err!(repo.delete(RecordRef::Local(999)).await);
        assert!(matches!(err, FieldSyncError::NotFound(_)));
    }
}
