//! 同步状态与排空报告

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 协调器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainState {
    /// 空闲
    Idle,
    /// 正在排空队列
    Draining,
}

/// 同步状态快照（供 UI 展示）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusSnapshot {
    pub is_online: bool,
    pub sync_in_progress: bool,
    /// 队列中的待处理项
    pub pending_count: usize,
    /// 各集合的本地可见记录数
    pub local_data_counts: BTreeMap<String, usize>,
}

/// 一次排空的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// 实际发往远端的队列项
    pub attempted: usize,
    pub synced: usize,
    /// 失败但仍有重试预算
    pub failed: usize,
    /// 重试耗尽被放弃
    pub abandoned: usize,
    /// 排空过程中已被取消或移除
    pub skipped: usize,
    /// 因网络断开提前结束
    pub stopped_offline: bool,
    /// 结束时队列剩余项
    pub remaining: usize,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.abandoned == 0 && !self.stopped_offline
    }
}

/// 排空调用的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainOutcome {
    /// 已有排空在进行，本次调用未执行
    AlreadyRunning,
    Completed(DrainReport),
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            DrainOutcome::AlreadyRunning => None,
        }
    }
}
