//! KV 存储模块 - 基于 sled 的键值存储
//!
//! 承载同步游标等少量需要跨重启保存的状态，值以 JSON 编码。

use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::error::{Result, SensorAgentError};

/// 代理状态所在的 Tree 名称
const AGENT_TREE: &str = "sensor_agent";

#[derive(Debug)]
pub struct KvStore {
    db: Db,
    tree: Tree,
}

impl KvStore {
    /// 在数据目录下打开 KV 存储
    pub async fn new(base_path: &Path) -> Result<Self> {
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| SensorAgentError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 服务重启时旧实例可能刚释放文件锁，带退避重试
        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            SensorAgentError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        let tree = db
            .open_tree(AGENT_TREE)
            .map_err(|e| SensorAgentError::KvStore(format!("打开 Tree 失败: {}", e)))?;

        tracing::info!("KV 存储初始化完成: {}", kv_path.display());

        Ok(Self { db, tree })
    }

    /// 设置键值对并落盘
    pub async fn set<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Serialize,
    {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| SensorAgentError::Serialization(format!("序列化值失败: {}", e)))?;

        self.tree
            .insert(key, value_bytes)
            .map_err(|e| SensorAgentError::KvStore(format!("设置键值对失败: {}", e)))?;

        self.flush().await
    }

    pub async fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: for<'de> Deserialize<'de>,
    {
        let result = self
            .tree
            .get(key)
            .map_err(|e| SensorAgentError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| SensorAgentError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| SensorAgentError::KvStore(format!("落盘失败: {}", e)))?;
        Ok(())
    }
}
