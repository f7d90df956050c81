//! 存储模块 - 采集代理的本地持久化层
//!
//! - `LocalBuffer`: 传感器原始记录缓冲的抽象（追加 / 按时间范围查询 / 按阈值删除）
//! - `SqliteSensorBuffer`: 基于 SQLite 的生产实现，schema 由 refinery 管理
//! - `MemorySensorBuffer`: 内存实现，用于嵌入场景与测试
//! - `KvStore`: 基于 sled 的键值存储，承载同步游标

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sensor_type::SensorType;

pub mod kv;
pub mod memory;
pub mod migrate;
pub mod sqlite;

pub use kv::KvStore;
pub use memory::MemorySensorBuffer;
pub use sqlite::SqliteSensorBuffer;

/// 缓冲中的一条原始记录，写入后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 缓冲内主键
    pub id: i64,
    pub sensor_type: SensorType,
    /// 传感器子系统产出的逗号分隔字符串
    pub payload: String,
    /// 采集时间（毫秒）
    pub timestamp: i64,
}

/// 本地缓冲
///
/// 约定：
/// - `append` 与 `query` / `delete_before` 可并发调用
/// - `query` 返回 `[start, end_exclusive)` 内的记录，按时间升序
/// - 主键单调递增，后写入的记录 id 更大
/// - `delete_before` 只删除 `timestamp < threshold` 且 `id <= max_id` 的记录，`retain` 中的 id 不删；
///   `max_id` 取本次读到的最大主键，读取之后才写入的记录不会被删
#[async_trait]
pub trait LocalBuffer: Send + Sync {
    /// 追加一条记录，返回主键
    async fn append(&self, sensor_type: SensorType, payload: &str, timestamp: i64) -> Result<i64>;

    async fn query(&self, start: i64, end_exclusive: i64) -> Result<Vec<RawRecord>>;

    /// 最早一条记录的时间；缓冲为空返回 None
    async fn oldest_timestamp(&self) -> Result<Option<i64>>;

    /// 删除早于阈值且已读到的记录，返回删除条数
    async fn delete_before(&self, threshold: i64, max_id: i64, retain: &[i64]) -> Result<usize>;

    /// 早于阈值的记录条数
    async fn count_before(&self, threshold: i64) -> Result<u64>;
}
