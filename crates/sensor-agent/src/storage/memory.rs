//! 内存传感器缓冲

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Result, SensorAgentError};
use crate::sensor_type::SensorType;
use crate::storage::{LocalBuffer, RawRecord};

/// 进程内缓冲，不跨重启保存
#[derive(Debug, Default)]
pub struct MemorySensorBuffer {
    records: RwLock<Vec<RawRecord>>,
    next_id: AtomicI64,
}

impl MemorySensorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// 当前全部记录（按时间升序）
    pub fn snapshot(&self) -> Vec<RawRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl LocalBuffer for MemorySensorBuffer {
    async fn append(&self, sensor_type: SensorType, payload: &str, timestamp: i64) -> Result<i64> {
        if !sensor_type.is_stored() {
            return Err(SensorAgentError::InvalidArgument(format!(
                "{} 不能写入本地缓冲",
                sensor_type
            )));
        }
        // 持写锁分配 id，保证 id 顺序与可见顺序一致
        let mut records = self.records.write();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        // 保持时间有序（同一时间按写入顺序）
        let pos = records.partition_point(|r| r.timestamp <= timestamp);
        records.insert(
            pos,
            RawRecord {
                id,
                sensor_type,
                payload: payload.to_string(),
                timestamp,
            },
        );
        Ok(id)
    }

    async fn query(&self, start: i64, end_exclusive: i64) -> Result<Vec<RawRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end_exclusive)
            .cloned()
            .collect())
    }

    async fn oldest_timestamp(&self) -> Result<Option<i64>> {
        Ok(self.records.read().first().map(|r| r.timestamp))
    }

    async fn delete_before(&self, threshold: i64, max_id: i64, retain: &[i64]) -> Result<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.timestamp >= threshold || r.id > max_id || retain.contains(&r.id));
        Ok(before - records.len())
    }

    async fn count_before(&self, threshold: i64) -> Result<u64> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.timestamp < threshold)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_buffer_keeps_time_order() {
        let buffer = MemorySensorBuffer::new();
        buffer.append(SensorType::Gps, "b", 200).await.unwrap();
        buffer.append(SensorType::Gps, "a", 100).await.unwrap();
        buffer.append(SensorType::Gps, "c", 200).await.unwrap();

        let payloads: Vec<String> = buffer.snapshot().into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
        assert_eq!(buffer.oldest_timestamp().await.unwrap(), Some(100));

        let deleted = buffer.delete_before(200, i64::MAX, &[]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_before_skips_records_not_yet_read() {
        let buffer = MemorySensorBuffer::new();
        buffer.append(SensorType::Gps, "1,2,3,4", 150).await.unwrap();
        let read = buffer.query(100, 300).await.unwrap();
        let max_id = read.iter().map(|r| r.id).max().unwrap();

        // 读取之后才写入，时间落在同一窗口内
        let late = buffer.append(SensorType::Gps, "9,9,9,9", 250).await.unwrap();

        assert_eq!(buffer.delete_before(300, max_id, &[]).await.unwrap(), 1);
        let remaining = buffer.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, late);
    }
}
