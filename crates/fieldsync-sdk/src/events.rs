//! 事件系统模块 - 向 UI 层广播同步状态
//!
//! 功能包括：
//! - 连接状态变更事件
//! - 队列项入队、同步成功、失败、放弃、取消事件
//! - 排空开始/结束与状态快照
//! - 事件广播和订阅机制

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::storage::queue::AbandonedItem;
use crate::sync::status::{DrainReport, SyncStatusSnapshot};
use crate::utils::time::now_millis;

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 连接状态变更
    ConnectivityChanged { is_online: bool, timestamp: i64 },
    /// 操作已入队（离线写入）
    QueueItemEnqueued {
        queue_id: i64,
        action: String,
        collection: String,
        timestamp: i64,
    },
    /// 队列项已在远端确认并出队
    QueueItemSynced {
        queue_id: i64,
        action: String,
        collection: String,
        server_id: Option<String>,
        timestamp: i64,
    },
    /// 队列项本次重放失败（仍会重试）
    QueueItemFailed {
        queue_id: i64,
        action: String,
        collection: String,
        retries: u32,
        error: String,
        timestamp: i64,
    },
    /// 队列项重试次数耗尽，已被丢弃（数据未到达服务端）
    QueueItemAbandoned { item: AbandonedItem, timestamp: i64 },
    /// 队列项数据损坏，无法重放，已被移除
    QueueItemDiscarded {
        queue_id: i64,
        error: String,
        timestamp: i64,
    },
    /// 队列项在同步前被本地取消
    QueueItemCancelled {
        queue_id: i64,
        action: String,
        collection: String,
        timestamp: i64,
    },
    /// 开始排空队列
    DrainStarted { pending: usize, timestamp: i64 },
    /// 排空结束
    DrainCompleted { report: DrainReport, timestamp: i64 },
    /// 状态快照变化
    StatusChanged { status: SyncStatusSnapshot, timestamp: i64 },
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ConnectivityChanged { .. } => "connectivity_changed",
            SyncEvent::QueueItemEnqueued { .. } => "queue_item_enqueued",
            SyncEvent::QueueItemSynced { .. } => "queue_item_synced",
            SyncEvent::QueueItemFailed { .. } => "queue_item_failed",
            SyncEvent::QueueItemAbandoned { .. } => "queue_item_abandoned",
            SyncEvent::QueueItemDiscarded { .. } => "queue_item_discarded",
            SyncEvent::QueueItemCancelled { .. } => "queue_item_cancelled",
            SyncEvent::DrainStarted { .. } => "drain_started",
            SyncEvent::DrainCompleted { .. } => "drain_completed",
            SyncEvent::StatusChanged { .. } => "status_changed",
        }
    }

    /// 获取事件关联的集合
    pub fn collection(&self) -> Option<&str> {
        match self {
            SyncEvent::QueueItemEnqueued { collection, .. }
            | SyncEvent::QueueItemSynced { collection, .. }
            | SyncEvent::QueueItemFailed { collection, .. }
            | SyncEvent::QueueItemCancelled { collection, .. } => Some(collection),
            SyncEvent::QueueItemAbandoned { item, .. } => Some(item.action.collection()),
            _ => None,
        }
    }

    /// 获取事件时间戳
    pub fn timestamp(&self) -> i64 {
        match self {
            SyncEvent::ConnectivityChanged { timestamp, .. }
            | SyncEvent::QueueItemEnqueued { timestamp, .. }
            | SyncEvent::QueueItemSynced { timestamp, .. }
            | SyncEvent::QueueItemFailed { timestamp, .. }
            | SyncEvent::QueueItemAbandoned { timestamp, .. }
            | SyncEvent::QueueItemDiscarded { timestamp, .. }
            | SyncEvent::QueueItemCancelled { timestamp, .. }
            | SyncEvent::DrainStarted { timestamp, .. }
            | SyncEvent::DrainCompleted { timestamp, .. }
            | SyncEvent::StatusChanged { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// 集合过滤器
    pub collections: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = Some(collections);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &SyncEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref collections) = self.collections {
            match event.collection() {
                Some(collection) if collections.iter().any(|c| c == collection) => {}
                // 事件没有集合信息但过滤器要求有
                _ => return false,
            }
        }

        true
    }
}

/// 回调监听器（宿主 UI 层注册）
pub type EventListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// 所有事件类型共用的监听键
pub const ANY_EVENT: &str = "*";

/// 事件计数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub listener_count: usize,
    pub last_event_time: Option<i64>,
}

/// 事件管理器：broadcast 订阅 + 回调监听
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
    listeners: RwLock<HashMap<String, Vec<EventListener>>>,
    stats: Mutex<EventStats>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .field("listeners", &self.stats.lock().listener_count)
            .finish()
    }
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            stats: Mutex::new(EventStats::default()),
        }
    }

    /// 发布事件；订阅者落后时只会丢失最旧的事件，不会阻塞同步流程
    pub async fn emit(&self, event: SyncEvent) {
        let kind = event.event_type();
        debug!("📣 事件: {}", kind);

        {
            let mut stats = self.stats.lock();
            stats.total_events += 1;
            *stats.events_by_type.entry(kind.to_string()).or_default() += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 没有订阅者（无 UI）时 send 返回错误，忽略即可
        let _ = self.sender.send(event.clone());

        // 先复制监听器再调用，回调里可以再注册监听器
        let targets: Vec<EventListener> = {
            let listeners = self.listeners.read();
            [kind, ANY_EVENT]
                .iter()
                .filter_map(|key| listeners.get(*key))
                .flatten()
                .cloned()
                .collect()
        };
        for listener in targets {
            listener(&event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 注册回调；`event_type` 为 [`ANY_EVENT`] 时接收全部事件
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let count = {
            let mut listeners = self.listeners.write();
            listeners
                .entry(event_type.to_string())
                .or_default()
                .push(Arc::new(listener));
            listeners.values().map(Vec::len).sum()
        };
        self.stats.lock().listener_count = count;
        info!("👂 注册事件监听: {}", event_type);
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.lock().listener_count = 0;
    }

    pub fn stats(&self) -> EventStats {
        self.stats.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SyncEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SyncEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<SyncEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<SyncEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// 事件构建器
pub mod event_builders {
    use super::*;

    pub fn connectivity_changed(is_online: bool) -> SyncEvent {
        SyncEvent::ConnectivityChanged {
            is_online,
            timestamp: now_millis(),
        }
    }

    pub fn drain_started(pending: usize) -> SyncEvent {
        SyncEvent::DrainStarted {
            pending,
            timestamp: now_millis(),
        }
    }

    pub fn drain_completed(report: DrainReport) -> SyncEvent {
        SyncEvent::DrainCompleted {
            report,
            timestamp: now_millis(),
        }
    }

    pub fn status_changed(status: SyncStatusSnapshot) -> SyncEvent {
        SyncEvent::StatusChanged {
            status,
            timestamp: now_millis(),
        }
    }

    pub fn item_abandoned(item: AbandonedItem) -> SyncEvent {
        SyncEvent::QueueItemAbandoned {
            item,
            timestamp: now_millis(),
        }
    }
}
