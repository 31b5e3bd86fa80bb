//! 编译期元信息：
//! - VERGEN_BUILD_TIMESTAMP（vergen）
//! - SDK_DB_VERSION：migrations/ 下 refinery 迁移文件（V{n}__{name}.sql）的最大版本号

use std::path::Path;
use vergen::EmitBuilder;

fn migration_version(file_name: &str) -> Option<i64> {
    let rest = file_name.strip_prefix('V')?.strip_suffix(".sql")?;
    let (version, _) = rest.split_once("__")?;
    version.parse().ok()
}

fn max_migration_version(dir: &Path) -> i64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|entry| entry.file_name().to_str().and_then(migration_version))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

fn main() {
    let _ = EmitBuilder::builder().build_timestamp().emit();

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let version = max_migration_version(&Path::new(&manifest_dir).join("migrations"));
    println!("cargo:rustc-env=SDK_DB_VERSION={}", version);
    println!("cargo:rerun-if-changed=migrations/");
}
