//! 离线写入演示
//!
//! 离线打卡 → 网络恢复 → 自动排空队列 → 记录变为已同步。
//! 使用进程内的内存远端，无需真实服务端。

use async_trait::async_trait;
use fieldsync_sdk::{
    AttendanceEvent, AttendanceType, ConnectivityMonitor, FieldSyncError, ListFilters, RemoteApi,
    RemoteRecord, Result, SyncConfig, SyncCoordinator, SyncEvent,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

/// 进程内远端：数据只保存在内存中
#[derive(Debug, Default)]
struct InMemoryRemote {
    next_id: AtomicU64,
    records: Mutex<Vec<(String, RemoteRecord)>>,
}

#[async_trait]
impl RemoteApi for InMemoryRemote {
    async fn create(&self, collection: &str, owner_id: &str, payload: &Value) -> Result<RemoteRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = RemoteRecord {
            server_id: format!("att-{}", id),
            owner_id: Some(owner_id.to_string()),
            data: payload.clone(),
        };
        self.records.lock().await.push((collection.to_string(), record.clone()));
        println!("  🌍 服务端创建 {} -> {}", collection, record.server_id);
        Ok(record)
    }

    async fn list(&self, collection: &str, owner_id: &str, _filters: &ListFilters) -> Result<Vec<RemoteRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|(c, r)| c == collection && r.owner_id.as_deref() == Some(owner_id))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn update(&self, collection: &str, server_id: &str, payload: &Value) -> Result<RemoteRecord> {
        let mut records = self.records.lock().await;
        let (_, record) = records
            .iter_mut()
            .find(|(c, r)| c == collection && r.server_id == server_id)
            .ok_or_else(|| FieldSyncError::NotFound(server_id.to_string()))?;
        record.data = payload.clone();
        Ok(record.clone())
    }

    async fn delete(&self, collection: &str, server_id: &str) -> Result<()> {
        self.records
            .lock()
            .await
            .retain(|(c, r)| !(c == collection && r.server_id == server_id));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n==============================================");
    println!("📴 FieldSync 离线写入演示");
    println!("==============================================\n");

    let config = SyncConfig::builder()
        .in_memory()
        .remote_timeout_ms(2_000)
        .build();
    let remote = Arc::new(InMemoryRemote::default());
    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let coordinator = SyncCoordinator::open(config, remote.clone(), monitor.clone()).await?;
    coordinator.start().await?;
    let mut events = coordinator.subscribe();

    // 1. 离线打卡
    println!("📌 步骤 1: 离线打卡");
    let attendance = coordinator.repository::<AttendanceEvent>();
    let now = chrono::Utc::now().timestamp_millis();
    let outcome = attendance
        .create(
            "u1",
            AttendanceEvent::new(AttendanceType::Ingreso, now).at(-34.6037, -58.3816),
        )
        .await?;
    println!(
        "  💾 已保存: {} (offline={}, status={})",
        outcome.record.record_ref(),
        outcome.offline,
        outcome.record.sync_status
    );
    println!("  📋 状态: {:?}\n", coordinator.status().await?);

    // 2. 网络恢复
    println!("📌 步骤 2: 网络恢复，自动排空队列");
    monitor.set_online(true);
    let report = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SyncEvent::DrainCompleted { report, .. }) = events.recv().await {
                return report;
            }
        }
    })
    .await?;
    println!("  ✅ 排空完成: {:?}\n", report);

    // 3. 查看结果
    println!("📌 步骤 3: 查看记录");
    let listed = attendance.list_for_owner("u1", ListFilters::new()).await?;
    for entry in &listed.records {
        println!(
            "  - {} {:?} @ {} (pending={})",
            entry.record.record_ref(),
            entry.record.payload.event_type,
            entry.record.payload.timestamp,
            entry.is_pending
        );
    }
    println!("  📋 状态: {:?}", coordinator.status().await?);

    coordinator.shutdown().await;

    println!("\n==============================================");
    println!("✅ 演示完成");
    println!("==============================================\n");
    Ok(())
}
