//! 数据库 Actor - 单线程数据库访问模型
//!
//! - SQLite Connection 只存在于一个专用线程中
//! - 所有数据库操作以闭包形式通过 channel 发送，结果经 oneshot 返回
//! - 命令按发送顺序串行执行，单条命令内的多次写入可放进同一事务

use crossbeam_channel::{unbounded, Receiver, Sender};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::{FieldSyncError, Result};
use crate::storage::migrate::init_db;

/// 数据库位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// 磁盘文件（进程重启后数据仍在）
    File(PathBuf),
    /// 内存数据库（测试、演示）
    Memory,
}

impl DbLocation {
    fn open(&self) -> rusqlite::Result<Connection> {
        match self {
            DbLocation::File(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            ),
            DbLocation::Memory => Connection::open_in_memory(),
        }
    }
}

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// 数据库命令
pub enum DbCommand {
    /// 在 Actor 线程上执行一段数据库操作
    Call(Job),
    /// 停止 Actor
    Shutdown,
}

/// 数据库 Actor（运行在独立线程）
struct DbActor {
    conn: Connection,
    receiver: Receiver<DbCommand>,
    thread_id: thread::ThreadId,
}

impl DbActor {
    /// 打开连接并执行初始化（pragmas + migrations）
    fn open(location: &DbLocation, receiver: Receiver<DbCommand>) -> Result<Self> {
        let thread_id = thread::current().id();
        info!("🚀 [Thread {:?}] DbActor 启动: {:?}", thread_id, location);

        if let DbLocation::File(path) = location {
            ensure_parent_dir(path)?;
        }

        let mut conn = location.open().map_err(|e| {
            FieldSyncError::StorageUnavailable(format!("打开数据库失败 {:?}: {}", location, e))
        })?;
        init_db(&mut conn).map_err(|e| {
            FieldSyncError::StorageUnavailable(format!("初始化数据库失败: {}", e))
        })?;

        Ok(Self {
            conn,
            receiver,
            thread_id,
        })
    }

    /// 运行 Actor 主循环；所有句柄被丢弃或收到 Shutdown 时退出
    fn run(mut self) {
        debug!("🔄 [Thread {:?}] DbActor 开始处理命令", self.thread_id);

        while let Ok(command) = self.receiver.recv() {
            match command {
                DbCommand::Call(job) => job(&mut self.conn),
                DbCommand::Shutdown => {
                    info!("🛑 [Thread {:?}] DbActor 收到停止信号", self.thread_id);
                    break;
                }
            }
        }

        debug!("👋 [Thread {:?}] DbActor 已退出", self.thread_id);
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            FieldSyncError::StorageUnavailable(format!("创建数据目录失败 {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}

/// 数据库 Actor 句柄（用于异步调用）
#[derive(Clone)]
pub struct DbActorHandle {
    sender: Sender<DbCommand>,
}

impl std::fmt::Debug for DbActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbActorHandle")
            .field("sender", &"<channel>")
            .finish()
    }
}

impl DbActorHandle {
    /// 启动 DB Actor，等待数据库打开与迁移完成
    ///
    /// 任何打开或迁移失败都以 `StorageUnavailable` 返回，线程随之退出。
    pub async fn spawn(location: DbLocation) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name("fieldsync-db".to_string())
            .spawn(move || match DbActor::open(&location, receiver) {
                Ok(actor) => {
                    let _ = ready_tx.send(Ok(()));
                    actor.run();
                }
                Err(e) => {
                    error!("❌ DbActor 初始化失败: {}", e);
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| FieldSyncError::StorageUnavailable(format!("无法启动 DB Actor 线程: {}", e)))?;

        ready_rx
            .await
            .map_err(|_| FieldSyncError::StorageUnavailable("DB Actor 启动中断".to_string()))??;

        Ok(Self { sender })
    }

    /// 在 Actor 线程上执行闭包并等待结果
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = tx.send(f(conn));
        });

        self.sender
            .send(DbCommand::Call(job))
            .map_err(|_| FieldSyncError::StorageUnavailable("DB Actor 已停止".to_string()))?;

        rx.await
            .map_err(|_| FieldSyncError::StorageUnavailable("DB Actor 响应失败".to_string()))?
    }

    /// 在单个事务中执行闭包；闭包返回错误时整体回滚
    pub async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.call(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| FieldSyncError::Database(format!("开始事务失败: {}", e)))?;
            let result = f(&tx)?;
            tx.commit()
                .map_err(|e| FieldSyncError::Database(format!("提交事务失败: {}", e)))?;
            Ok(result)
        })
        .await
    }

    /// 停止 DB Actor；之后的调用返回 `StorageUnavailable`
    pub fn shutdown(&self) {
        let _ = self.sender.send(DbCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_runs_on_actor_thread() {
        let handle = DbActorHandle::spawn(DbLocation::Memory).await.unwrap();
        let name = handle
            .call(|_| Ok(thread::current().name().map(str::to_string)))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("fieldsync-db"));
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let handle = DbActorHandle::spawn(DbLocation::Memory).await.unwrap();

        let result: Result<()> = handle
            .transaction(|conn| {
                conn.execute(
                    "INSERT INTO sync_queue (action, data, priority, timestamp) VALUES ('X', '{}', 1, 1)",
                    [],
                )?;
                Err(FieldSyncError::InvalidData("abort".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = handle
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let handle = DbActorHandle::spawn(DbLocation::Memory).await.unwrap();
        handle.shutdown();
        let err = handle.call(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, FieldSyncError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unopenable_path_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        // 目录本身不能作为数据库文件打开
        let err = DbActorHandle::spawn(DbLocation::File(dir.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(matches!(err, FieldSyncError::StorageUnavailable(_)));
    }
}
