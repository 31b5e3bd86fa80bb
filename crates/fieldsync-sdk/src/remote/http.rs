//! HTTP 远端实现 - 基于 reqwest 的 REST 客户端
//!
//! - `POST   {base}/{collection}`        创建
//! - `GET    {base}/{collection}?ownerId=` 列表
//! - `PATCH  {base}/{collection}/{id}`   更新
//! - `DELETE {base}/{collection}/{id}`   删除（404 视为已删除）

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::RemoteApiConfig;
use crate::error::{FieldSyncError, Result};
use crate::remote::{normalize, ListFilters, RemoteApi, RemoteRecord};

/// HTTP 远端客户端
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpRemoteApi {
    pub fn new(config: &RemoteApiConfig) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| FieldSyncError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        info!("✅ HTTP 客户端已创建 (base_url: {})", base_url);

        Ok(Self {
            client,
            base_url,
            bearer_token: config.bearer_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{}", self.base_url, collection)
    }

    fn record_url(&self, collection: &str, server_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, server_id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// 发送请求并把非 2xx 转为 `Remote` 错误
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "无法读取错误信息".to_string());
        error!("❌ {} 失败，HTTP 状态码: {}, 错误: {}", what, status, message);
        Err(FieldSyncError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn json_body(response: Response) -> Result<Value> {
        response
            .json::<Value>()
            .await
            .map_err(|e| FieldSyncError::InvalidData(format!("解析响应失败: {}", e)))
    }
}

/// 请求体：业务字段 + ownerId
fn create_body(owner_id: &str, payload: &Value) -> Value {
    let mut body = match payload {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    };
    body.insert("ownerId".to_string(), json!(owner_id));
    Value::Object(body)
}

fn list_query(owner_id: &str, filters: &ListFilters) -> Vec<(&'static str, String)> {
    let mut query = vec![("ownerId", owner_id.to_string())];
    if let Some(from) = filters.from {
        query.push(("from", from.to_string()));
    }
    if let Some(to) = filters.to {
        query.push(("to", to.to_string()));
    }
    if let Some(limit) = filters.limit {
        query.push(("limit", limit.to_string()));
    }
    query
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create(&self, collection: &str, owner_id: &str, payload: &Value) -> Result<RemoteRecord> {
        debug!("📤 POST {}", self.collection_url(collection));
        let request = self
            .client
            .post(self.collection_url(collection))
            .json(&create_body(owner_id, payload));
        let response = self.send(request, "创建记录").await?;
        let record = normalize::single_record(Self::json_body(response).await?)?;
        info!("✅ 远端已创建 {}#{}", collection, record.server_id);
        Ok(record)
    }

    async fn list(&self, collection: &str, owner_id: &str, filters: &ListFilters) -> Result<Vec<RemoteRecord>> {
        let request = self
            .client
            .get(self.collection_url(collection))
            .query(&list_query(owner_id, filters));
        let response = self.send(request, "获取列表").await?;
        let records = normalize::remote_records(Self::json_body(response).await?)?;
        debug!("📥 远端返回 {} 条 {}", records.len(), collection);
        Ok(records)
    }

    async fn update(&self, collection: &str, server_id: &str, payload: &Value) -> Result<RemoteRecord> {
        let request = self
            .client
            .patch(self.record_url(collection, server_id))
            .json(payload);
        let response = self.send(request, "更新记录").await?;
        let body = Self::json_body(response).await.unwrap_or(Value::Null);
        // 部分服务端更新后只返回状态，不返回记录
        match normalize::single_record(body) {
            Ok(record) => Ok(record),
            Err(_) => Ok(RemoteRecord {
                server_id: server_id.to_string(),
                owner_id: None,
                data: payload.clone(),
            }),
        }
    }

    async fn delete(&self, collection: &str, server_id: &str) -> Result<()> {
        let request = self.client.delete(self.record_url(collection, server_id));
        match self.send(request, "删除记录").await {
            Ok(_) => Ok(()),
            Err(FieldSyncError::Remote { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                debug!("远端记录已不存在: {}#{}", collection, server_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
