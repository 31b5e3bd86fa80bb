use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::queue::queue_item::QueueAction;

/// 队列优先级
///
/// 只决定队列内的排序（High 先于 Normal），不会抢占正在进行的同步。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum QueuePriority {
    High = 0,   // 创建、删除
    Normal = 1, // 更新
}

impl QueuePriority {
    /// 根据队列动作获取默认优先级
    pub fn for_action(action: &QueueAction) -> Self {
        match action {
            QueueAction::CreateRecord { .. } | QueueAction::DeleteRecord { .. } => QueuePriority::High,
            QueueAction::UpdateRecord { .. } => QueuePriority::Normal,
        }
    }

    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(QueuePriority::High),
            1 => Some(QueuePriority::Normal),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueuePriority::High => "high",
            QueuePriority::Normal => "normal",
        }
    }
}

impl Default for QueuePriority {
    fn default() -> Self {
        QueuePriority::Normal
    }
}

impl fmt::Display for QueuePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
