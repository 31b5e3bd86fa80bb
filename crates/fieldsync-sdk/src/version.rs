//! 版本信息
//!
//! SDK 版本取自 Cargo.toml；数据库 schema 版本由 migrations/ 目录决定，
//! 打开本地存储时用它拒绝由更新版本 SDK 写过的数据库。

use serde::{Deserialize, Serialize};

/// SDK semver
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 构建时间（vergen）
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// 本构建支持的最高 schema 版本（refinery_schema_history.version）
pub const SDK_DB_VERSION: i64 = digits_to_i64(env!("SDK_DB_VERSION"));

/// 编译期把 build.rs 输出的数字串转为 i64，非数字字符忽略
const fn digits_to_i64(s: &str) -> i64 {
    let bytes = s.as_bytes();
    let mut value = 0i64;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_digit() {
            value = value * 10 + (b - b'0') as i64;
        }
        i += 1;
    }
    value
}

/// 运行时可查询的构建信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub sdk_version: String,
    pub build_time: String,
    pub db_version: i64,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        sdk_version: SDK_VERSION.to_string(),
        build_time: BUILD_TIME.to_string(),
        db_version: SDK_DB_VERSION,
    }
}
