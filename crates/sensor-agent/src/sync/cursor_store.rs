//! 同步游标存储
//!
//! 持久化两项：`last_uploaded_time`（已确认上报的时间水位）与
//! `identifiers_sent`（设备标识是否已上报）。`upload_end_time` 只在单轮内有效，不落盘。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::kv::KvStore;

const PREFIX: &str = "sync_state";

/// 同步状态持久化接口
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// 0 表示从未同步
    async fn last_uploaded_time(&self) -> Result<i64>;

    async fn set_last_uploaded_time(&self, time: i64) -> Result<()>;

    async fn identifiers_sent(&self) -> Result<bool>;

    async fn mark_identifiers_sent(&self) -> Result<()>;
}

/// sled 实现，key 形如 `sync_state:last_uploaded_time`
pub struct KvSyncStateStore {
    kv: Arc<KvStore>,
}

impl KvSyncStateStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn key(name: &str) -> String {
        format!("{}:{}", PREFIX, name)
    }
}

#[async_trait]
impl SyncStateStore for KvSyncStateStore {
    async fn last_uploaded_time(&self) -> Result<i64> {
        let key = Self::key("last_uploaded_time");
        Ok(self.kv.get::<&str, i64>(key.as_str()).await?.unwrap_or(0))
    }

    async fn set_last_uploaded_time(&self, time: i64) -> Result<()> {
        let key = Self::key("last_uploaded_time");
        self.kv.set(key.as_str(), &time).await
    }

    async fn identifiers_sent(&self) -> Result<bool> {
        let key = Self::key("identifiers_sent");
        // 以整数保存，与 last_uploaded_time 同构
        Ok(self.kv.get::<&str, i64>(key.as_str()).await?.unwrap_or(0) != 0)
    }

    async fn mark_identifiers_sent(&self) -> Result<()> {
        let key = Self::key("identifiers_sent");
        self.kv.set(key.as_str(), &1i64).await
    }
}

/// 进程内实现
#[derive(Debug, Default)]
pub struct MemorySyncStateStore {
    inner: Mutex<(i64, bool)>,
}

impl MemorySyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(last_uploaded_time: i64, identifiers_sent: bool) -> Self {
        Self {
            inner: Mutex::new((last_uploaded_time, identifiers_sent)),
        }
    }
}

#[async_trait]
impl SyncStateStore for MemorySyncStateStore {
    async fn last_uploaded_time(&self) -> Result<i64> {
        Ok(self.inner.lock().0)
    }

    async fn set_last_uploaded_time(&self, time: i64) -> Result<()> {
        self.inner.lock().0 = time;
        Ok(())
    }

    async fn identifiers_sent(&self) -> Result<bool> {
        Ok(self.inner.lock().1)
    }

    async fn mark_identifiers_sent(&self) -> Result<()> {
        self.inner.lock().1 = true;
        Ok(())
    }
}
