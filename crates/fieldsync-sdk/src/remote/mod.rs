//! 远端 API 边界
//!
//! 同步引擎只通过 [`RemoteApi`] 访问服务端；HTTP 实现见 [`http::HttpRemoteApi`]，
//! 响应形态的差异在 [`normalize`] 中消化。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub mod http;
pub mod normalize;

pub use http::HttpRemoteApi;
pub use normalize::ListEnvelope;

/// 归一化后的远端记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub server_id: String,
    pub owner_id: Option<String>,
    /// 业务字段（已去掉 ID 与归属字段）
    pub data: Value,
}

/// 列表过滤条件（按记录的业务时间戳，毫秒）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilters {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub limit: Option<usize>,
}

impl ListFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, from: i64) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: i64) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 时间戳是否落在 [from, to] 内
    pub fn contains(&self, timestamp: i64) -> bool {
        self.from.map_or(true, |from| timestamp >= from) && self.to.map_or(true, |to| timestamp <= to)
    }
}

/// 远端 API
#[async_trait]
pub trait RemoteApi: Send + Sync + std::fmt::Debug {
    /// 创建记录，返回服务端分配的 ID
    async fn create(&self, collection: &str, owner_id: &str, payload: &Value) -> Result<RemoteRecord>;

    /// 列出某个归属者的记录
    async fn list(&self, collection: &str, owner_id: &str, filters: &ListFilters) -> Result<Vec<RemoteRecord>>;

    /// 更新记录
    async fn update(&self, collection: &str, server_id: &str, payload: &Value) -> Result<RemoteRecord>;

    /// 删除记录
    async fn delete(&self, collection: &str, server_id: &str) -> Result<()>;
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::error::FieldSyncError;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Arc;
    use std::time::Duration;

    /// 脚本化的故障
    #[derive(Debug, Clone)]
    pub enum Fault {
        /// 连接失败
        Network,
        /// 服务端返回状态码
        Status(u16),
        /// 挂起指定时长（配合调用方超时）
        Hang(Duration),
        /// 远端已执行，但响应丢失
        LostResponse,
        /// 结构性错误（不应触发离线回退）
        Missing,
    }

    /// 调用记录
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RemoteCall {
        pub op: &'static str,
        pub collection: String,
        /// create/list 为 owner_id，update/delete 为 server_id
        pub target: String,
    }

    #[derive(Debug, Default)]
    struct MockState {
        next_id: u64,
        records: BTreeMap<String, Vec<RemoteRecord>>,
        faults: VecDeque<Fault>,
        unreachable: bool,
        calls: Vec<RemoteCall>,
    }

    /// 测试用内存远端
    #[derive(Debug, Clone, Default)]
    pub struct MockRemoteApi {
        state: Arc<Mutex<MockState>>,
        delay: Arc<Mutex<Option<Duration>>>,
    }

    impl MockRemoteApi {
        pub fn new() -> Self {
            Self::default()
        }

        /// 之后的每次调用都以网络错误失败
        pub fn set_unreachable(&self, unreachable: bool) {
            self.state.lock().unreachable = unreachable;
        }

        /// 依次为接下来的调用注入故障
        pub fn push_fault(&self, fault: Fault) {
            self.state.lock().faults.push_back(fault);
        }

        pub fn push_faults(&self, fault: Fault, times: usize) {
            for _ in 0..times {
                self.push_fault(fault.clone());
            }
        }

        /// 每次调用前等待
        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock() = delay;
        }

        /// 直接在服务端放入一条记录
        pub fn seed(&self, collection: &str, owner_id: &str, data: Value) -> String {
            let mut state = self.state.lock();
            state.next_id += 1;
            let server_id = format!("srv-{}", state.next_id);
            state.records.entry(collection.to_string()).or_default().push(RemoteRecord {
                server_id: server_id.clone(),
                owner_id: Some(owner_id.to_string()),
                data,
            });
            server_id
        }

        pub fn records(&self, collection: &str) -> Vec<RemoteRecord> {
            self.state.lock().records.get(collection).cloned().unwrap_or_default()
        }

        pub fn calls(&self) -> Vec<RemoteCall> {
            self.state.lock().calls.clone()
        }

        pub fn calls_of(&self, op: &str) -> usize {
            self.state.lock().calls.iter().filter(|c| c.op == op).count()
        }

        /// 记录调用并取出本次要注入的故障
        async fn enter(&self, op: &'static str, collection: &str, target: &str) -> Result<Option<Fault>> {
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let fault = {
                let mut state = self.state.lock();
                state.calls.push(RemoteCall {
                    op,
                    collection: collection.to_string(),
                    target: target.to_string(),
                });
                if state.unreachable {
                    return Err(FieldSyncError::Network("mock remote unreachable".into()));
                }
                state.faults.pop_front()
            };

            match fault {
                Some(Fault::Network) => Err(FieldSyncError::Network("mock connection reset".into())),
                Some(Fault::Status(status)) => Err(FieldSyncError::Remote {
                    status,
                    message: "mock failure".into(),
                }),
                Some(Fault::Hang(duration)) => {
                    tokio::time::sleep(duration).await;
                    Err(FieldSyncError::Timeout("mock hang".into()))
                }
                Some(Fault::LostResponse) => Ok(Some(Fault::LostResponse)),
                Some(Fault::Missing) => Err(FieldSyncError::NotFound(format!("mock {}:{}", collection, target))),
                None => Ok(None),
            }
        }
    }

    fn lost() -> FieldSyncError {
        FieldSyncError::Network("mock response lost".into())
    }

    #[async_trait]
    impl RemoteApi for MockRemoteApi {
        async fn create(&self, collection: &str, owner_id: &str, payload: &Value) -> Result<RemoteRecord> {
            let fault = self.enter("create", collection, owner_id).await?;
            let server_id = self.seed(collection, owner_id, payload.clone());
            if fault.is_some() {
                return Err(lost());
            }
            Ok(RemoteRecord {
                server_id,
                owner_id: Some(owner_id.to_string()),
                data: payload.clone(),
            })
        }

        async fn list(&self, collection: &str, owner_id: &str, _filters: &ListFilters) -> Result<Vec<RemoteRecord>> {
            self.enter("list", collection, owner_id).await?;
            Ok(self
                .records(collection)
                .into_iter()
                .filter(|r| r.owner_id.as_deref() == Some(owner_id))
                .collect())
        }

        async fn update(&self, collection: &str, server_id: &str, payload: &Value) -> Result<RemoteRecord> {
            let fault = self.enter("update", collection, server_id).await?;
            let updated = {
                let mut state = self.state.lock();
                let record = state
                    .records
                    .get_mut(collection)
                    .and_then(|records| records.iter_mut().find(|r| r.server_id == server_id))
                    .ok_or_else(|| FieldSyncError::Remote {
                        status: 404,
                        message: format!("{} not found", server_id),
                    })?;
                record.data = payload.clone();
                record.clone()
            };
            if fault.is_some() {
                return Err(lost());
            }
            Ok(updated)
        }

        async fn delete(&self, collection: &str, server_id: &str) -> Result<()> {
            let fault = self.enter("delete", collection, server_id).await?;
            if let Some(records) = self.state.lock().records.get_mut(collection) {
                records.retain(|r| r.server_id != server_id);
            }
            if fault.is_some() {
                return Err(lost());
            }
            Ok(())
        }
    }
}
