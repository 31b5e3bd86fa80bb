//! 时间工具
//!
//! - 存储层: 所有时间字段使用 UTC 毫秒时间戳（INTEGER）
//! - 远端: 时间字段可能是毫秒数或 RFC 3339 字符串，统一在这里转换

use chrono::{DateTime, TimeZone, Utc};

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒时间戳 → RFC 3339（UTC）；超出范围时返回 None
pub fn to_rfc3339(utc_timestamp_ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(utc_timestamp_ms)
        .single()
        .map(|dt| dt.to_rfc3339())
}

/// 解析 RFC 3339 字符串为毫秒时间戳
pub fn parse_rfc3339(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// 解析远端时间字段：毫秒数、数字字符串或 RFC 3339
pub fn parse_remote_timestamp(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse::<i64>().ok().or_else(|| parse_rfc3339(s)),
        _ => None,
    }
}
