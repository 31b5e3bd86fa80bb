//! 连接状态监控
//!
//! 在线标志只是提示：标志为在线时远端调用仍可能失败，失败走正常的回退路径。
//! 标志只能由监控器自身修改（平台监听器转发或手动覆盖）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::utils::time::now_millis;

/// 平台上报的网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
    /// 连接中
    Connecting,
    /// 网络受限（仍视为在线）
    Limited,
}

impl NetworkStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, NetworkStatus::Online | NetworkStatus::Limited)
    }
}

/// 平台网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: i64,
}

/// 网络状态监听器trait（由平台层实现，如 Android/iOS）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 在线/离线切换事件；只在真实发生切换时广播
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityEvent {
    WentOnline,
    WentOffline,
}

/// 连接状态监控器
#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: AtomicBool,
    sender: broadcast::Sender<ConnectivityEvent>,
    listener: Option<Arc<dyn NetworkStatusListener>>,
}

impl ConnectivityMonitor {
    /// 无平台监听器的监控器，初始状态由调用方给出
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            online: AtomicBool::new(initially_online),
            sender,
            listener: None,
        }
    }

    /// 绑定平台监听器；`start()` 之后开始转发
    pub fn with_listener(listener: Arc<dyn NetworkStatusListener>, initially_online: bool) -> Self {
        let mut monitor = Self::new(initially_online);
        monitor.listener = Some(listener);
        monitor
    }

    /// 当前是否在线
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// 手动覆盖在线状态，返回是否发生了切换
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        let event = if online {
            ConnectivityEvent::WentOnline
        } else {
            ConnectivityEvent::WentOffline
        };
        info!("🌐 网络状态切换: {:?}", event);
        // 无订阅者时发送失败属正常情况
        let _ = self.sender.send(event);
        true
    }

    /// 订阅在线/离线切换
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.sender.subscribe()
    }

    /// 启动平台监听器转发任务；没有监听器时返回 None
    pub async fn start(self: &Arc<Self>) -> Result<Option<JoinHandle<()>>> {
        let Some(listener) = self.listener.clone() else {
            return Ok(None);
        };

        let initial = listener.get_current_status().await;
        self.set_online(initial.is_online());

        let mut receiver = listener.start_monitoring().await?;
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        debug!("平台网络状态: {:?} -> {:?}", event.old_status, event.new_status);
                        monitor.set_online(event.new_status.is_online());
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("⚠️ 网络状态事件积压，跳过 {} 条", skipped);
                        let current = listener.get_current_status().await;
                        monitor.set_online(current.is_online());
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("网络状态转发任务退出");
        });
        Ok(Some(handle))
    }

    /// 停止平台监听
    pub async fn stop(&self) {
        if let Some(listener) = &self.listener {
            listener.stop_monitoring().await;
        }
    }
}

/// 构造网络状态事件
pub fn status_event(old_status: NetworkStatus, new_status: NetworkStatus) -> NetworkStatusEvent {
    NetworkStatusEvent {
        old_status,
        new_status,
        timestamp: now_millis(),
    }
}


#[cfg(test)]
pub use test_helpers::DummyNetworkStatusListener;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_only_transitions_are_broadcast() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));

        assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::WentOnline);
        assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::WentOffline);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_platform_listener_is_forwarded() {
        let listener = Arc::new(DummyNetworkStatusListener::new(NetworkStatus::Offline));
        let monitor = Arc::new(ConnectivityMonitor::with_listener(listener.clone(), true));
        let mut rx = monitor.subscribe();

        let handle = monitor.start().await.unwrap();
        assert!(handle.is_some());
        // 初始状态取自平台
        assert!(!monitor.is_online());
        assert_eq!(rx.recv().await.unwrap(), ConnectivityEvent::WentOffline);

        listener.emit(NetworkStatus::Limited).await;
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ConnectivityEvent::WentOnline);
        assert!(monitor.is_online());

        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_start_without_listener() {
        let monitor = Arc::new(ConnectivityMonitor::new(true));
        assert!(monitor.start().await.unwrap().is_none());
        assert!(monitor.is_online());
    }
}
