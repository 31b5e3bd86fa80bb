//! 同步队列 - 离线写入的持久化待办列表
//!
//! 队列项只通过 peek → 远端重放 → remove 的路径被消费；
//! 每个队列项最终恰好被移除一次：远端确认、本地取消、重试耗尽或数据损坏。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{FieldSyncError, Result};
use crate::events::{event_builders, EventManager, SyncEvent};
use crate::storage::dao::UnreadableRow;
use crate::storage::LocalStore;
use crate::utils::time::now_millis;

pub mod priority;
pub mod queue_item;
pub mod retry_policy;

pub use priority::QueuePriority;
pub use queue_item::{QueueAction, QueueItem};
pub use retry_policy::{FailureReason, RetryPolicy, RetryState, RETRY_LIMIT};

/// 因重试耗尽而被丢弃的队列项（显式上报的数据丢失）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedItem {
    pub queue_id: i64,
    pub action: QueueAction,
    pub retries: u32,
    pub last_error: Option<String>,
}

impl AbandonedItem {
    fn from_item(item: &QueueItem) -> Self {
        Self {
            queue_id: item.local_id,
            action: item.action.clone(),
            retries: item.retries(),
            last_error: item.error.clone(),
        }
    }

    pub fn to_error(&self) -> FieldSyncError {
        FieldSyncError::RetryBudgetExhausted {
            queue_id: self.queue_id,
            action: self.action.to_string(),
            retries: self.retries,
            last_error: self.last_error.clone().unwrap_or_default(),
        }
    }
}

/// 一次排空前取出的队列快照
#[derive(Debug, Clone, Default)]
pub struct EligibleBatch {
    /// 可重放的队列项（已按处理顺序排列）
    pub eligible: Vec<QueueItem>,
    /// 本次清理掉的重试耗尽项
    pub abandoned: Vec<AbandonedItem>,
    /// 本次清理掉的损坏行
    pub discarded: Vec<UnreadableRow>,
}

/// 队列统计信息
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub total: usize,
    /// 至少失败过一次的队列项
    pub retrying: usize,
    pub priority_distribution: HashMap<QueuePriority, usize>,
}

/// 同步队列管理器
#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: LocalStore,
    events: Arc<EventManager>,
}

impl SyncQueue {
    pub fn new(store: LocalStore, events: Arc<EventManager>) -> Self {
        Self { store, events }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.store.retry_policy()
    }

    /// 按动作默认优先级入队；只写本地，不访问网络
    pub async fn enqueue(&self, action: QueueAction) -> Result<QueueItem> {
        let priority = QueuePriority::for_action(&action);
        self.enqueue_with_priority(action, priority).await
    }

    pub async fn enqueue_with_priority(&self, action: QueueAction, priority: QueuePriority) -> Result<QueueItem> {
        let item = self.store.queue_insert(action, priority).await?;
        info!("📥 入队: {}", item.details());

        self.events
            .emit(SyncEvent::QueueItemEnqueued {
                queue_id: item.local_id,
                action: item.action.name().to_string(),
                collection: item.action.collection().to_string(),
                timestamp: now_millis(),
            })
            .await;
        Ok(item)
    }

    /// 按处理顺序列出全部队列项（不出队）
    pub async fn peek_all(&self) -> Result<Vec<QueueItem>> {
        self.store.queue_list().await
    }

    pub async fn get(&self, queue_id: i64) -> Result<Option<QueueItem>> {
        self.store.queue_get(queue_id).await
    }

    /// 出队；重复调用无副作用
    pub async fn remove(&self, queue_id: i64) -> Result<bool> {
        let removed = self.store.queue_remove(queue_id).await?;
        if removed {
            debug!("📤 出队: {}", queue_id);
        }
        Ok(removed)
    }

    /// 记录一次失败并返回更新后的队列项；`RetryState::Exhausted` 表示预算已用完
    pub async fn record_failure(&self, queue_id: i64, failure: &FieldSyncError) -> Result<Option<QueueItem>> {
        let item = self.store.queue_record_failure(queue_id, failure.to_string()).await?;
        if let Some(item) = &item {
            let remaining = self.retry_policy().remaining(item.retries());
            if failure.is_transient() {
                warn!(
                    "⚠️ 重放失败 ({:?}), 剩余 {} 次: {}",
                    FailureReason::from(failure),
                    remaining,
                    item.details()
                );
            } else {
                // 本地数据或存储问题，重试大概率无效，但仍按同一预算计数
                error!(
                    "❌ 重放失败 ({:?}), 剩余 {} 次: {}",
                    FailureReason::from(failure),
                    remaining,
                    item.details()
                );
            }
            self.events
                .emit(SyncEvent::QueueItemFailed {
                    queue_id: item.local_id,
                    action: item.action.name().to_string(),
                    collection: item.action.collection().to_string(),
                    retries: item.retries(),
                    error: failure.to_string(),
                    timestamp: now_millis(),
                })
                .await;
        }
        Ok(item)
    }

    /// 丢弃重试耗尽的队列项并上报
    ///
    /// 放弃的是删除时，本地墓碑一并撤销：记录仍在服务端，应重新可见、可再次删除。
    pub async fn abandon(&self, item: &QueueItem) -> Result<AbandonedItem> {
        let abandoned = AbandonedItem::from_item(item);
        self.store.queue_remove(item.local_id).await?;

        error!("❌ 放弃同步，数据未到达服务端: {}", abandoned.to_error());
        if let QueueAction::DeleteRecord {
            collection,
            local_id: Some(local_id),
            server_id,
        } = &item.action
        {
            if self.store.restore(collection, *local_id).await? {
                warn!("↩️ 删除未能同步，恢复记录 {}#{} ({})", collection, local_id, server_id);
            }
        }
        self.events.emit(event_builders::item_abandoned(abandoned.clone())).await;
        Ok(abandoned)
    }

    /// 取出可重放的队列项，同时清理重试耗尽项与无法解析的行
    pub async fn pending_eligible(&self) -> Result<EligibleBatch> {
        let scan = self.store.queue_scan().await?;
        let mut batch = EligibleBatch::default();

        for row in scan.unreadable {
            self.store.queue_remove(row.local_id).await?;
            error!("❌ 丢弃损坏的队列项 {}: {}", row.local_id, row.error);
            self.events
                .emit(SyncEvent::QueueItemDiscarded {
                    queue_id: row.local_id,
                    error: row.error.clone(),
                    timestamp: now_millis(),
                })
                .await;
            batch.discarded.push(row);
        }

        for item in scan.items {
            if item.is_exhausted() {
                batch.abandoned.push(self.abandon(&item).await?);
            } else {
                batch.eligible.push(item);
            }
        }
        Ok(batch)
    }

    /// 取消指向某条本地记录的创建/更新操作（记录在同步前被删除）
    pub async fn cancel_pending_for(&self, collection: &str, record_local_id: i64) -> Result<Vec<QueueItem>> {
        let mut cancelled = Vec::new();
        for item in self.store.queue_find_by_target(collection, record_local_id).await? {
            if matches!(item.action, QueueAction::DeleteRecord { .. }) {
                continue;
            }
            if self.store.queue_remove(item.local_id).await? {
                info!("🚫 已取消: {}", item.details());
                self.events
                    .emit(SyncEvent::QueueItemCancelled {
                        queue_id: item.local_id,
                        action: item.action.name().to_string(),
                        collection: collection.to_string(),
                        timestamp: now_millis(),
                    })
                    .await;
                cancelled.push(item);
            }
        }
        Ok(cancelled)
    }

    /// 用最新的本地数据替换排队中的创建快照；没有排队的创建时返回 false
    pub async fn replace_create_snapshot(
        &self,
        collection: &str,
        record_local_id: i64,
        payload: serde_json::Value,
        local_timestamp: i64,
    ) -> Result<bool> {
        let queued = self.store.queue_find_by_target(collection, record_local_id).await?;
        let Some(item) = queued
            .into_iter()
            .find(|item| matches!(item.action, QueueAction::CreateRecord { .. }))
        else {
            return Ok(false);
        };

        let QueueAction::CreateRecord { owner_id, .. } = item.action else {
            return Ok(false);
        };
        let refreshed = QueueAction::CreateRecord {
            collection: collection.to_string(),
            local_id: record_local_id,
            owner_id,
            payload,
            local_timestamp,
        };
        debug!("♻️ 刷新创建快照: {}#{}", collection, record_local_id);
        self.store.queue_replace_action(item.local_id, refreshed).await
    }

    /// 队列中的待处理项数量
    pub async fn len(&self) -> Result<usize> {
        self.store.queue_count().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let items = self.store.queue_list().await?;
        let mut stats = QueueStats {
            total: items.len(),
            ..Default::default()
        };
        for item in &items {
            if item.retries() > 0 {
                stats.retrying += 1;
            }
            *stats.priority_distribution.entry(item.priority).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
