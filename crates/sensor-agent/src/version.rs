//! 版本与运行时元信息
//!
//! - **Agent Version** → Cargo.toml
//! - **Migration Version** → migrations 文件（由 refinery 管理）

/// semver，来自 Cargo.toml
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（由 vergen 在 build.rs 中生成）
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// 当前版本支持的最高缓冲库 migration 版本（refinery_schema_history.version）。
/// 由 build.rs 扫描 migrations/ 生成；打开数据库时若库版本更高则拒绝使用。
pub const SENSOR_DB_VERSION: i64 = parse_db_version(env!("SENSOR_DB_VERSION"));

/// 编译期解析版本号字符串为 i64（build.rs 只会输出纯数字）
const fn parse_db_version(s: &str) -> i64 {
    let b = s.as_bytes();
    let mut v = 0i64;
    let mut i = 0usize;
    while i < b.len() {
        if b[i] >= b'0' && b[i] <= b'9' {
            v = v * 10 + (b[i] - b'0') as i64;
        }
        i += 1;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_version_matches_migrations() {
        assert!(SENSOR_DB_VERSION >= 1);
        assert_eq!(parse_db_version("12"), 12);
        assert_eq!(parse_db_version(""), 0);
    }
}
