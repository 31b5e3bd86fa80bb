//! 同步协调器
//!
//! 职责：
//! - 网络恢复时排空队列（同一时刻最多一个排空）
//! - 把队列项重放到远端，并把结果写回本地
//! - 汇总同步状态供 UI 展示

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::error::{FieldSyncError, Result};
use crate::events::{event_builders, EventManager, SyncEvent};
use crate::network::{ConnectivityEvent, ConnectivityMonitor};
use crate::remote::{RemoteApi, RemoteRecord};
use crate::repository::{RecordKind, RecordRepository};
use crate::storage::queue::{QueueAction, QueueItem, SyncQueue};
use crate::storage::{LocalStore, RecordPatch};
use crate::sync::status::{DrainOutcome, DrainReport, DrainState, SyncStatusSnapshot};
use crate::utils::time::now_millis;

/// 远端重放的结果
#[derive(Debug)]
enum Dispatched {
    Created { remote: RemoteRecord, sent: serde_json::Value },
    Updated { sent: serde_json::Value },
    Deleted,
    /// 目标记录已不存在或已同步，无需访问远端
    Skipped,
}

/// 排空互斥标志；离开作用域时自动释放
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// 同步协调器
pub struct SyncCoordinator {
    config: SyncConfig,
    store: LocalStore,
    queue: SyncQueue,
    monitor: Arc<ConnectivityMonitor>,
    remote: Arc<dyn RemoteApi>,
    events: Arc<EventManager>,
    draining: AtomicBool,
    shutdown: Arc<Notify>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("online", &self.monitor.is_online())
            .field("state", &self.state())
            .field("remote", &self.remote)
            .finish()
    }
}

impl SyncCoordinator {
    /// 按配置打开本地存储并创建协调器
    pub async fn open(
        config: SyncConfig,
        remote: Arc<dyn RemoteApi>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let build = crate::version::build_info();
        info!(
            "🚀 FieldSync SDK v{} (schema v{}, built {})",
            build.sdk_version, build.db_version, build.build_time
        );
        let store = LocalStore::open(&config).await?;
        Ok(Self::new(config, store, remote, monitor))
    }

    pub fn new(
        config: SyncConfig,
        store: LocalStore,
        remote: Arc<dyn RemoteApi>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Arc<Self> {
        let events = Arc::new(EventManager::new(config.event_buffer_size));
        let queue = SyncQueue::new(store.clone(), Arc::clone(&events));
        Arc::new(Self {
            config,
            store,
            queue,
            monitor,
            remote,
            events,
            draining: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// 某种记录类型的仓库
    pub fn repository<K: RecordKind>(self: &Arc<Self>) -> RecordRepository<K> {
        RecordRepository::new(Arc::clone(self))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn remote(&self) -> &Arc<dyn RemoteApi> {
        &self.remote
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// 给远端调用加上超时上限；超时按网络失败处理
    pub async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.remote_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(FieldSyncError::Timeout(format!(
                "远端调用超过 {}ms",
                self.config.remote_timeout_ms
            ))),
        }
    }

    pub fn state(&self) -> DrainState {
        if self.draining.load(Ordering::SeqCst) {
            DrainState::Draining
        } else {
            DrainState::Idle
        }
    }

    /// 启动后台任务：转发平台网络状态，网络恢复时自动排空
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if let Some(handle) = self.monitor.start().await? {
            self.tasks.lock().push(handle);
        }

        let mut receiver = self.monitor.subscribe();
        let shutdown = Arc::clone(&self.shutdown);
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    event = receiver.recv() => {
                        let Some(this) = coordinator.upgrade() else { break };
                        match event {
                            Ok(ConnectivityEvent::WentOnline) => this.on_connectivity_changed(true).await,
                            Ok(ConnectivityEvent::WentOffline) => this.on_connectivity_changed(false).await,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("⚠️ 网络事件积压，跳过 {} 条", skipped);
                                let online = this.monitor.is_online();
                                this.on_connectivity_changed(online).await;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            debug!("网络恢复监听任务退出");
        });
        self.tasks.lock().push(handle);

        // 启动时已在线且有积压，立即排空
        if self.monitor.is_online() && !self.queue.is_empty().await? {
            self.spawn_drain();
        }

        info!("✅ 同步协调器已启动 (online={})", self.monitor.is_online());
        Ok(())
    }

    /// 停止后台任务并关闭本地存储
    pub async fn shutdown(&self) {
        info!("🛑 正在关闭同步协调器");
        self.shutdown.notify_one();
        self.monitor.stop().await;

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in tasks {
            handle.abort();
            let _ = handle.await;
        }
        self.store.close();
    }

    async fn on_connectivity_changed(self: &Arc<Self>, online: bool) {
        self.events.emit(event_builders::connectivity_changed(online)).await;
        self.emit_status().await;

        if online && self.config.auto_sync_on_reconnect {
            info!("🌐 网络已恢复，开始排空同步队列");
            if let Err(e) = self.drain().await {
                error!("❌ 排空同步队列失败: {}", e);
            }
        }
    }

    fn spawn_drain(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = this.drain().await {
                error!("❌ 排空同步队列失败: {}", e);
            }
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// 手动触发同步；离线时返回 `NoConnection`
    pub async fn force_sync(&self) -> Result<DrainOutcome> {
        if !self.monitor.is_online() {
            return Err(FieldSyncError::NoConnection);
        }
        self.drain().await
    }

    /// 排空队列
    ///
    /// 已有排空在进行时直接返回 `AlreadyRunning`。
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Result<DrainOutcome> {
        let Some(guard) = DrainGuard::acquire(&self.draining) else {
            debug!("排空已在进行，跳过");
            return Ok(DrainOutcome::AlreadyRunning);
        };

        let batch = self.queue.pending_eligible().await?;
        let mut report = DrainReport {
            abandoned: batch.abandoned.len() + batch.discarded.len(),
            ..Default::default()
        };
        self.events
            .emit(event_builders::drain_started(batch.eligible.len()))
            .await;
        info!("🔄 开始排空同步队列: {} 项", batch.eligible.len());

        for snapshot in batch.eligible {
            if !self.monitor.is_online() {
                warn!("⚠️ 网络断开，暂停排空");
                report.stopped_offline = true;
                break;
            }

            // 排空期间可能已被取消或改写
            let Some(item) = self.queue.get(snapshot.local_id).await? else {
                report.skipped += 1;
                continue;
            };

            report.attempted += 1;
            match self.dispatch(&item).await {
                Ok(dispatched) => {
                    let server_id = self.apply_success(&item, dispatched).await?;
                    self.queue.remove(item.local_id).await?;
                    report.synced += 1;
                    self.events
                        .emit(SyncEvent::QueueItemSynced {
                            queue_id: item.local_id,
                            action: item.action.name().to_string(),
                            collection: item.action.collection().to_string(),
                            server_id,
                            timestamp: now_millis(),
                        })
                        .await;
                }
                Err(e) => match self.queue.record_failure(item.local_id, &e).await? {
                    Some(failed) if failed.is_exhausted() => {
                        self.queue.abandon(&failed).await?;
                        report.abandoned += 1;
                    }
                    Some(_) => report.failed += 1,
                    None => report.skipped += 1,
                },
            }
        }

        report.remaining = self.queue.len().await?;
        drop(guard);

        info!(
            "✅ 排空结束: 成功 {}, 失败 {}, 放弃 {}, 剩余 {}",
            report.synced, report.failed, report.abandoned, report.remaining
        );
        self.events
            .emit(event_builders::drain_completed(report.clone()))
            .await;
        self.emit_status().await;
        Ok(DrainOutcome::Completed(report))
    }

    /// 把一个队列项重放到远端
    async fn dispatch(&self, item: &QueueItem) -> Result<Dispatched> {
        match &item.action {
            QueueAction::CreateRecord {
                collection,
                local_id,
                owner_id,
                payload,
                ..
            } => {
                let current = self.store.get(collection, *local_id).await?;
                let sent = match current {
                    None => {
                        warn!("⚠️ 待创建的记录已不存在: {}#{}", collection, local_id);
                        return Ok(Dispatched::Skipped);
                    }
                    Some(record) if record.server_id.is_some() => {
                        debug!("记录已同步，跳过创建: {}#{}", collection, local_id);
                        return Ok(Dispatched::Skipped);
                    }
                    // 以本地最新数据为准
                    Some(record) if !record.deleted => record.payload,
                    Some(_) => payload.clone(),
                };
                let remote = self
                    .bounded(self.remote.create(collection, owner_id, &sent))
                    .await?;
                Ok(Dispatched::Created { remote, sent })
            }
            QueueAction::UpdateRecord {
                collection,
                server_id,
                payload,
                ..
            } => {
                self.bounded(self.remote.update(collection, server_id, payload))
                    .await?;
                Ok(Dispatched::Updated { sent: payload.clone() })
            }
            QueueAction::DeleteRecord {
                collection,
                server_id,
                ..
            } => {
                self.bounded(self.remote.delete(collection, server_id)).await?;
                Ok(Dispatched::Deleted)
            }
        }
    }

    /// 远端确认后更新本地记录，返回服务端 ID
    async fn apply_success(&self, item: &QueueItem, dispatched: Dispatched) -> Result<Option<String>> {
        let collection = item.action.collection();
        match (&item.action, dispatched) {
            (QueueAction::CreateRecord { local_id, .. }, Dispatched::Created { remote, sent }) => {
                let server_id = remote.server_id;
                let Some(record) = self.store.get(collection, *local_id).await? else {
                    warn!("⚠️ 远端已创建但本地记录已不存在: {}#{} -> {}", collection, local_id, server_id);
                    return Ok(Some(server_id));
                };

                // 列表合并可能已缓存了同一服务端记录
                if let Some(cached) = self.store.find_by_server_id(collection, &server_id).await? {
                    if cached.local_id != record.local_id {
                        self.store.purge(collection, cached.local_id).await?;
                    }
                }

                self.store
                    .update(collection, *local_id, RecordPatch::new().mark_synced(server_id.clone()))
                    .await?;

                if record.deleted {
                    // 创建途中被删除：补一个删除
                    info!("🗑️ 记录在同步途中被删除，补发删除: {}#{}", collection, local_id);
                    self.queue
                        .enqueue(QueueAction::DeleteRecord {
                            collection: collection.to_string(),
                            local_id: Some(*local_id),
                            server_id: server_id.clone(),
                        })
                        .await?;
                } else if record.payload != sent {
                    // 创建途中被修改：回到待同步并补一个更新
                    self.store
                        .update(collection, *local_id, RecordPatch::new().mark_pending())
                        .await?;
                    self.queue
                        .enqueue(QueueAction::UpdateRecord {
                            collection: collection.to_string(),
                            local_id: *local_id,
                            server_id: server_id.clone(),
                            payload: record.payload,
                        })
                        .await?;
                }
                Ok(Some(server_id))
            }
            (QueueAction::UpdateRecord { local_id, server_id, .. }, Dispatched::Updated { sent }) => {
                if let Some(record) = self.store.get(collection, *local_id).await? {
                    // 只有本地数据仍是本次发送的版本时才标记为已同步
                    if !record.deleted && record.is_pending() && record.payload == sent {
                        self.store
                            .update(collection, *local_id, RecordPatch::new().mark_synced(server_id.clone()))
                            .await?;
                    }
                }
                Ok(Some(server_id.clone()))
            }
            (QueueAction::DeleteRecord { local_id, server_id, .. }, Dispatched::Deleted) => {
                let target = match local_id {
                    Some(local_id) => Some(*local_id),
                    None => self
                        .store
                        .find_by_server_id(collection, server_id)
                        .await?
                        .map(|record| record.local_id),
                };
                if let Some(local_id) = target {
                    self.store.purge(collection, local_id).await?;
                }
                Ok(Some(server_id.clone()))
            }
            (_, Dispatched::Skipped) => Ok(None),
            (action, other) => Err(FieldSyncError::InvalidData(format!(
                "重放结果与动作不匹配: {} / {:?}",
                action, other
            ))),
        }
    }

    /// 当前同步状态
    pub async fn status(&self) -> Result<SyncStatusSnapshot> {
        Ok(SyncStatusSnapshot {
            is_online: self.monitor.is_online(),
            sync_in_progress: self.state() == DrainState::Draining,
            pending_count: self.queue.len().await?,
            local_data_counts: self.store.collection_counts().await?,
        })
    }

    async fn emit_status(&self) {
        match self.status().await {
            Ok(status) => self.events.emit(event_builders::status_changed(status)).await,
            Err(e) => warn!("⚠️ 获取同步状态失败: {}", e),
        }
    }
}
