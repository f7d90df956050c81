//! 缓冲库迁移与初始化 - 由 refinery 自动管理
//!
//! 统一入口 `init_db`：pragmas → migrate → 版本校验。
//! 新增迁移只需在 migrations/ 添加 V{n}__{name}.sql。

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

use rusqlite::Connection;

use crate::error::{Result, SensorAgentError};
use crate::version::SENSOR_DB_VERSION;

/// refinery 使用的 migration 历史表名
const REFINERY_TABLE: &str = "refinery_schema_history";

/// 采集场景 PRAGMA：WAL 允许采集写入与同步读删并发，NORMAL 同步减少写放大。
const BUFFER_PRAGMAS: &str = "
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA temp_store=MEMORY;
";

pub fn enable_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(BUFFER_PRAGMAS.trim())
        .map_err(|e| SensorAgentError::Database(format!("设置 PRAGMA 失败: {}", e)))?;
    Ok(())
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    embedded::migrations::runner()
        .run(conn)
        .map_err(|e| SensorAgentError::Migration(format!("执行 migration 失败: {}", e)))?;
    Ok(())
}

/// 读取当前数据库的 migration 版本；无表或空表返回 None。
fn get_db_migration_version(conn: &Connection) -> Result<Option<i64>> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            [REFINERY_TABLE],
            |row| row.get(0),
        )
        .map_err(|e| SensorAgentError::Database(format!("查询 {} 失败: {}", REFINERY_TABLE, e)))?;

    if !exists {
        return Ok(None);
    }

    let version: Option<i64> = conn
        .query_row(
            &format!("SELECT MAX(version) FROM {}", REFINERY_TABLE),
            [],
            |row| row.get::<_, Option<i64>>(0),
        )
        .map_err(|e| SensorAgentError::Database(format!("读取 migration 版本失败: {}", e)))?;

    Ok(version.filter(|&v| v > 0))
}

/// 库版本高于当前代码支持的版本时拒绝打开（防降级后 schema 不兼容）
fn check_db_version(conn: &Connection) -> Result<()> {
    let Some(v) = get_db_migration_version(conn)? else {
        return Ok(());
    };
    if v > SENSOR_DB_VERSION {
        return Err(SensorAgentError::Migration(format!(
            "缓冲库版本 {} 高于当前支持的最高版本 {}",
            v, SENSOR_DB_VERSION
        )));
    }
    Ok(())
}

pub fn init_db(conn: &mut Connection) -> Result<()> {
    enable_pragmas(conn)?;
    run_migrations(conn)?;
    check_db_version(conn)?;
    Ok(())
}
