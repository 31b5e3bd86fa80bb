//! 数据访问层 (DAO) - 每张表一个专门的操作模块
//!
//! DAO 只借用 Connection，不持有；只在 DB Actor 线程内构造和使用。

pub mod queue;
pub mod record;

pub use queue::{QueueDao, QueueScan, UnreadableRow};
pub use record::RecordDao;

use rusqlite::Connection;

use crate::storage::queue::RetryPolicy;

/// DAO 工厂 - 统一创建各种 DAO 实例
pub struct DaoFactory;

impl DaoFactory {
    /// 创建记录 DAO
    pub fn record_dao(conn: &Connection) -> RecordDao<'_> {
        RecordDao::new(conn)
    }

    /// 创建同步队列 DAO
    pub fn queue_dao(conn: &Connection, policy: RetryPolicy) -> QueueDao<'_> {
        QueueDao::new(conn, policy)
    }
}
