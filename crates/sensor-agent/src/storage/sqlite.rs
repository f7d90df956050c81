//! SQLite 传感器缓冲 - 按时间有序的追加日志
//!
//! 采集侧与同步侧共用同一连接，由异步互斥锁串行化；
//! 删除只作用于 `timestamp < threshold` 且 `id <= max_id` 的已读记录，不会影响读取之后追加的新记录。
//! 本版本不认识的类型码（其他版本写入）既不返回也不删除。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, SensorAgentError};
use crate::sensor_type::SensorType;
use crate::storage::migrate;
use crate::storage::{LocalBuffer, RawRecord};

/// 缓冲库文件名
pub const BUFFER_DB_FILE: &str = "sensor_data.db";

#[derive(Debug)]
pub struct SqliteSensorBuffer {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSensorBuffer {
    /// 在数据目录下打开（或创建）缓冲库
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| SensorAgentError::IO(format!("创建数据目录失败: {}", e)))?;

        let db_path = data_dir.join(BUFFER_DB_FILE);
        let mut conn = Connection::open(&db_path)
            .map_err(|e| SensorAgentError::Database(format!("打开数据库失败: {}", e)))?;
        migrate::init_db(&mut conn)?;

        tracing::info!("传感器缓冲初始化完成: {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// 本版本认识的类型码，形如 `1,2,...,11`
fn known_codes() -> String {
    SensorType::STORED
        .iter()
        .map(|t| t.code().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl LocalBuffer for SqliteSensorBuffer {
    async fn append(&self, sensor_type: SensorType, payload: &str, timestamp: i64) -> Result<i64> {
        if !sensor_type.is_stored() {
            return Err(SensorAgentError::InvalidArgument(format!(
                "{} 不能写入本地缓冲",
                sensor_type
            )));
        }

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sensor_data (sensor_type, sensor_data, timestamp) VALUES (?1, ?2, ?3)",
            params![sensor_type.code(), payload, timestamp],
        )
        .map_err(|e| SensorAgentError::Database(format!("写入传感器数据失败: {}", e)))?;

        Ok(conn.last_insert_rowid())
    }

    async fn query(&self, start: i64, end_exclusive: i64) -> Result<Vec<RawRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, sensor_type, sensor_data, timestamp FROM sensor_data
                 WHERE timestamp >= ?1 AND timestamp < ?2
                 ORDER BY timestamp ASC, id ASC",
            )
            .map_err(|e| SensorAgentError::Database(format!("准备查询失败: {}", e)))?;

        let rows = stmt
            .query_map(params![start, end_exclusive], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| SensorAgentError::Database(format!("查询传感器数据失败: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, code, payload, timestamp) =
                row.map_err(|e| SensorAgentError::Database(format!("读取行失败: {}", e)))?;
            match SensorType::from_code(code) {
                Some(sensor_type) => records.push(RawRecord {
                    id,
                    sensor_type,
                    payload,
                    timestamp,
                }),
                None => warn!("跳过未知传感器类型: id={}, sensor_type={}", id, code),
            }
        }

        debug!("查询缓冲: [{}, {}) -> {} 条", start, end_exclusive, records.len());
        Ok(records)
    }

    async fn oldest_timestamp(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        let oldest: Option<i64> = conn
            .query_row("SELECT MIN(timestamp) FROM sensor_data", [], |row| row.get(0))
            .map_err(|e| SensorAgentError::Database(format!("查询最早记录失败: {}", e)))?;
        Ok(oldest)
    }

    async fn delete_before(&self, threshold: i64, max_id: i64, retain: &[i64]) -> Result<usize> {
        let retain_json = serde_json::to_string(retain)?;
        let sql = format!(
            "DELETE FROM sensor_data WHERE timestamp < ?1 AND id <= ?2
             AND sensor_type IN ({})
             AND id NOT IN (SELECT value FROM json_each(?3))",
            known_codes()
        );

        let conn = self.conn.lock().await;
        let deleted = conn
            .execute(&sql, params![threshold, max_id, retain_json])
            .map_err(|e| SensorAgentError::Database(format!("删除传感器数据失败: {}", e)))?;

        debug!("删除缓冲: timestamp < {}, 保留 {} 条, 删除 {} 条", threshold, retain.len(), deleted);
        Ok(deleted)
    }

    async fn count_before(&self, threshold: i64) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sensor_data WHERE timestamp < ?1",
                params![threshold],
                |row| row.get(0),
            )
            .map_err(|e| SensorAgentError::Database(format!("统计传感器数据失败: {}", e)))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_buffer(temp_dir: &TempDir) -> SqliteSensorBuffer {
        SqliteSensorBuffer::open(temp_dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn test_append_and_query_range() {
        let temp_dir = TempDir::new().unwrap();
        let buffer = open_buffer(&temp_dir).await;

        buffer.append(SensorType::Gps, "12.5,45.2,10,3", 200).await.unwrap();
        buffer.append(SensorType::Accelerometer, "1.0,0.1,0.2,0.3", 100).await.unwrap();
        buffer.append(SensorType::Wifi, "abc,2412,-40", 300).await.unwrap();

        let records = buffer.query(100, 300).await.unwrap();
        assert_eq!(records.len(), 2);
        // 按时间升序
        assert_eq!(records[0].sensor_type, SensorType::Accelerometer);
        assert_eq!(records[0].timestamp, 100);
        assert_eq!(records[1].sensor_type, SensorType::Gps);
        assert_eq!(records[1].payload, "12.5,45.2,10,3");

        assert_eq!(buffer.oldest_timestamp().await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_identifiers_are_never_stored() {
        let temp_dir = TempDir::new().unwrap();
        let buffer = open_buffer(&temp_dir).await;

        let result = buffer.append(SensorType::Identifiers, "x", 1).await;
        assert!(matches!(result, Err(SensorAgentError::InvalidArgument(_))));
        assert_eq!(buffer.oldest_timestamp().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_before_respects_threshold_and_retain() {
        let temp_dir = TempDir::new().unwrap();
        let buffer = open_buffer(&temp_dir).await;

        let keep = buffer.append(SensorType::Calls, "1.0,0.1", 100).await.unwrap();
        buffer.append(SensorType::AppLog, "started", 150).await.unwrap();
        buffer.append(SensorType::AppLog, "later", 250).await.unwrap();

        let deleted = buffer.delete_before(200, i64::MAX, &[keep]).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining = buffer.query(0, i64::MAX).await.unwrap();
        let ids: Vec<i64> = remaining.iter().map(|r| r.id).collect();
        assert_eq!(remaining.len(), 2);
        assert!(ids.contains(&keep));
        assert_eq!(buffer.count_before(200).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_before_stops_at_max_id() {
        let temp_dir = TempDir::new().unwrap();
        let buffer = open_buffer(&temp_dir).await;

        let read = buffer.append(SensorType::Gps, "1,2,3,4", 150).await.unwrap();
        let late = buffer.append(SensorType::Gps, "9,9,9,9", 250).await.unwrap();

        assert_eq!(buffer.delete_before(300, read, &[]).await.unwrap(), 1);
        let remaining = buffer.query(0, i64::MAX).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, late);
    }

    #[tokio::test]
    async fn test_unknown_type_code_is_never_pruned() {
        let temp_dir = TempDir::new().unwrap();
        let buffer = open_buffer(&temp_dir).await;

        // 其他版本写入的类型码
        buffer
            .conn
            .lock()
            .await
            .execute(
                "INSERT INTO sensor_data (sensor_type, sensor_data, timestamp) VALUES (42, 'x', 150)",
                [],
            )
            .unwrap();
        buffer.append(SensorType::Gps, "1,2,3,4", 160).await.unwrap();

        let records = buffer.query(100, 200).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sensor_type, SensorType::Gps);

        assert_eq!(buffer.delete_before(200, i64::MAX, &[]).await.unwrap(), 1);
        assert_eq!(buffer.count_before(200).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let temp_dir = TempDir::new().unwrap();
        {
            let buffer = open_buffer(&temp_dir).await;
            buffer.append(SensorType::Proximity, "near", 42).await.unwrap();
        }
        let buffer = open_buffer(&temp_dir).await;
        assert_eq!(buffer.oldest_timestamp().await.unwrap(), Some(42));
    }
}
