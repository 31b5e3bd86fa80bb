use serde::{Deserialize, Serialize};
use std::fmt;

use crate::repository::RecordKind;

/// 考勤打卡类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceType {
    /// 上班
    Ingreso,
    /// 下班
    Egreso,
}

impl fmt::Display for AttendanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceType::Ingreso => f.write_str("ingreso"),
            AttendanceType::Egreso => f.write_str("egreso"),
        }
    }
}

/// 考勤打卡记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    #[serde(rename = "type")]
    pub event_type: AttendanceType,
    /// 打卡时间（UTC 毫秒）
    #[serde(with = "super::flexible_timestamp")]
    pub timestamp: i64,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AttendanceEvent {
    pub fn new(event_type: AttendanceType, timestamp: i64) -> Self {
        Self {
            event_type,
            timestamp,
            latitude: None,
            longitude: None,
            note: None,
        }
    }

    pub fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl RecordKind for AttendanceEvent {
    const COLLECTION: &'static str = "attendance_events";

    fn occurred_at(&self) -> i64 {
        self.timestamp
    }
}
