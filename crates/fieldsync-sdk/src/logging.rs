//! 日志初始化
//!
//! SDK 内部只通过 `tracing` 宏记录日志；宿主应用可以自行安装订阅者，
//! 也可以调用 [`init_tracing`] 使用默认的 fmt 输出。

use tracing::Level;

/// 安装默认的 fmt 订阅者；已安装过订阅者时返回 false
pub fn init_tracing(debug_mode: bool) -> bool {
    let level = if debug_mode { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}
