use serde::{Deserialize, Serialize};

use crate::repository::RecordKind;

/// 工单状态；无法识别的状态保留为 `Unknown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Open,
    InProgress,
    Done,
    #[serde(other)]
    Unknown,
}

/// 外勤工单（以只读缓存为主）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    pub number: String,
    pub title: String,
    pub status: WorkOrderStatus,
    #[serde(with = "super::flexible_timestamp")]
    pub scheduled_at: i64,
}

impl WorkOrder {
    /// 新建工单，状态为 Open
    pub fn new(number: impl Into<String>, title: impl Into<String>, scheduled_at: i64) -> Self {
        Self {
            number: number.into(),
            title: title.into(),
            status: WorkOrderStatus::Open,
            scheduled_at,
        }
    }

    pub fn with_status(mut self, status: WorkOrderStatus) -> Self {
        self.status = status;
        self
    }
}

impl RecordKind for WorkOrder {
    const COLLECTION: &'static str = "work_orders";

    fn occurred_at(&self) -> i64 {
        self.scheduled_at
    }
}
