//! 同步模块
//!
//! 职责：
//! - 网络恢复时排空离线队列（同一时刻最多一个排空）
//! - 把远端确认结果写回本地记录
//! - 对外提供同步状态

pub mod coordinator;
pub mod status;


pub use coordinator::SyncCoordinator;
pub use status::{DrainOutcome, DrainReport, DrainState, SyncStatusSnapshot};
