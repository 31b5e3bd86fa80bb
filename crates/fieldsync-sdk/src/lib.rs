//! FieldSync SDK - 离线优先的数据同步引擎
//!
//! 面向网络不稳定的外勤场景：
//! - 💾 本地持久化存储：SQLite + refinery 迁移，墓碑软删除
//! - 📡 网络状态监控：只在真实切换时广播
//! - 📥 同步队列：离线写入持久化排队，重试有上限，耗尽显式上报
//! - 🔄 同步协调器：网络恢复时排空队列，同一时刻只有一个排空
//! - 📚 记录仓库：在线优先写入，失败自动回退到本地，读取合并远端与本地
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fieldsync_sdk::{
//!     AttendanceEvent, AttendanceType, ConnectivityMonitor, HttpRemoteApi, ListFilters,
//!     SyncConfig, SyncCoordinator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .remote_base_url("https://api.example.com/v1")
//!         .build();
//!
//!     let remote = Arc::new(HttpRemoteApi::new(&config.remote)?);
//!     let monitor = Arc::new(ConnectivityMonitor::new(true));
//!     let coordinator = SyncCoordinator::open(config, remote, monitor).await?;
//!     coordinator.start().await?;
//!
//!     let attendance = coordinator.repository::<AttendanceEvent>();
//!     let outcome = attendance
//!         .create("u1", AttendanceEvent::new(AttendanceType::Ingreso, 1_700_000_000_000))
//!         .await?;
//!     println!("已保存 (offline={})", outcome.offline);
//!
//!     let listed = attendance.list_for_owner("u1", ListFilters::new()).await?;
//!     println!("共 {} 条", listed.records.len());
//!
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod config;
pub mod error;
pub mod events;
pub mod kinds;
pub mod logging;
pub mod network;
pub mod remote;
pub mod repository;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use config::{RemoteApiConfig, SyncConfig, SyncConfigBuilder};
pub use error::{FieldSyncError, Result};
pub use events::{EventFilter, EventManager, SyncEvent};
pub use kinds::{AttendanceEvent, AttendanceType, WorkOrder, WorkOrderStatus};
pub use logging::init_tracing;
pub use network::{ConnectivityEvent, ConnectivityMonitor, NetworkStatus, NetworkStatusListener};
pub use remote::{HttpRemoteApi, ListFilters, RemoteApi, RemoteRecord};
pub use repository::{
    CreateOutcome, DeleteOutcome, ListOutcome, ListedRecord, Record, RecordKind, RecordRef,
    RecordRepository, UpdateOutcome,
};
pub use storage::queue::{AbandonedItem, QueueAction, QueueItem, SyncQueue, RETRY_LIMIT};
pub use storage::{LocalStore, SyncStatus};
pub use sync::{DrainOutcome, DrainReport, DrainState, SyncCoordinator, SyncStatusSnapshot};
pub use version::{build_info, BuildInfo, SDK_DB_VERSION, SDK_VERSION};
