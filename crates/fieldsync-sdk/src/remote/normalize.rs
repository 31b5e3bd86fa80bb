//! 远端响应归一化
//!
//! 远端列表可能是 `{documents: [...]}`、`{users: [...]}`、`{items: [...]}`、
//! `{data: [...]}` 或裸数组；记录 ID 可能是 `id`、`_id` 或 `serverId`，
//! 字符串或数字。所有形态只在这里转换为 [`ListEnvelope`] / [`RemoteRecord`]。

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{FieldSyncError, Result};
use crate::remote::RemoteRecord;

/// 列表响应外层可能使用的键
const LIST_KEYS: &[&str] = &["documents", "users", "items", "data", "records"];
/// 单条响应外层可能使用的键
const SINGLE_KEYS: &[&str] = &["document", "user", "item", "data", "record"];
/// 记录 ID 字段
const ID_KEYS: &[&str] = &["id", "_id", "serverId", "server_id"];
/// 归属字段
const OWNER_KEYS: &[&str] = &["ownerId", "owner_id", "userId", "user_id"];

/// 归一化后的列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListEnvelope {
    pub items: Vec<Value>,
}

/// 解析列表外层
pub fn list_envelope(body: Value) -> Result<ListEnvelope> {
    match body {
        Value::Array(items) => Ok(ListEnvelope { items }),
        Value::Object(mut map) => {
            for key in LIST_KEYS {
                if let Some(Value::Array(_)) = map.get(*key) {
                    if let Some(Value::Array(items)) = map.remove(*key) {
                        return Ok(ListEnvelope { items });
                    }
                }
            }
            Err(FieldSyncError::InvalidData(format!(
                "无法识别的列表响应，字段: {:?}",
                map.keys().collect::<Vec<_>>()
            )))
        }
        other => Err(FieldSyncError::InvalidData(format!("列表响应不是对象或数组: {}", other))),
    }
}

/// 单条记录 → RemoteRecord；缺少 ID 时报错
pub fn remote_record(item: Value) -> Result<RemoteRecord> {
    let Value::Object(mut map) = item else {
        return Err(FieldSyncError::InvalidData("远端记录不是对象".to_string()));
    };

    let server_id = take_first(&mut map, ID_KEYS)
        .and_then(|v| id_to_string(&v))
        .ok_or_else(|| FieldSyncError::InvalidData("远端记录缺少 id".to_string()))?;
    let owner_id = take_first(&mut map, OWNER_KEYS).and_then(|v| id_to_string(&v));

    Ok(RemoteRecord {
        server_id,
        owner_id,
        data: Value::Object(map),
    })
}

/// 列表响应 → 记录；无法解析的条目跳过
pub fn remote_records(body: Value) -> Result<Vec<RemoteRecord>> {
    let envelope = list_envelope(body)?;
    let mut records = Vec::with_capacity(envelope.items.len());
    for item in envelope.items {
        match remote_record(item) {
            Ok(record) => records.push(record),
            Err(e) => warn!("⚠️ 跳过无法识别的远端记录: {}", e),
        }
    }
    Ok(records)
}

/// 单条响应（创建/更新）；外层可能包一层 `{document: {...}}` 等
pub fn single_record(body: Value) -> Result<RemoteRecord> {
    if let Value::Object(map) = &body {
        let has_id = ID_KEYS.iter().any(|k| map.contains_key(*k));
        if !has_id {
            for key in SINGLE_KEYS {
                if let Some(inner @ Value::Object(_)) = map.get(*key) {
                    return remote_record(inner.clone());
                }
            }
        }
    }
    remote_record(body)
}

fn take_first(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    let mut found = None;
    for key in keys {
        if let Some(value) = map.remove(*key) {
            if found.is_none() && !value.is_null() {
                found = Some(value);
            }
        }
    }
    found
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_shapes() {
        for body in [
            json!({"documents": [{"id": 1}]}),
            json!({"users": [{"id": 1}]}),
            json!({"items": [{"id": 1}]}),
            json!({"data": [{"id": 1}], "total": 1}),
            json!([{"id": 1}]),
        ] {
            assert_eq!(list_envelope(body).unwrap().items.len(), 1);
        }
        assert!(list_envelope(json!({"total": 0})).is_err());
        assert!(list_envelope(json!("nope")).is_err());
    }

    #[test]
    fn test_id_variants() {
        let record = remote_record(json!({"_id": "abc", "type": "ingreso"})).unwrap();
        assert_eq!(record.server_id, "abc");
        assert_eq!(record.data, json!({"type": "ingreso"}));

        let record = remote_record(json!({"serverId": 42, "ownerId": "u1"})).unwrap();
        assert_eq!(record.server_id, "42");
        assert_eq!(record.owner_id.as_deref(), Some("u1"));

        assert!(remote_record(json!({"type": "ingreso"})).is_err());
        assert!(remote_record(json!({"id": null})).is_err());
    }

    #[test]
    fn test_remote_records_skips_malformed() {
        let records = remote_records(json!({"documents": [{"id": "a"}, {"noid": true}, 7]})).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].server_id, "a");
    }

    #[test]
    fn test_single_record_unwraps() {
        let record = single_record(json!({"document": {"id": "x1", "note": "hi"}})).unwrap();
        assert_eq!(record.server_id, "x1");
        assert_eq!(record.data["note"], "hi");

        // 记录本身带有 data 字段时不拆包
        let record = single_record(json!({"id": "x2", "data": {"k": 1}})).unwrap();
        assert_eq!(record.server_id, "x2");
        assert_eq!(record.data["data"]["k"], 1);
    }
}
