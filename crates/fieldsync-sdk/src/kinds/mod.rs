//! 内置记录类型

pub mod attendance;
pub mod work_order;

pub use attendance::{AttendanceEvent, AttendanceType};
pub use work_order::{WorkOrder, WorkOrderStatus};

/// 时间字段兼容毫秒数与 RFC 3339 字符串，序列化时始终写毫秒数
pub(crate) mod flexible_timestamp {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::utils::time::parse_remote_timestamp;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        parse_remote_timestamp(&value).ok_or_else(|| D::Error::custom(format!("无法解析时间: {}", value)))
    }
}
