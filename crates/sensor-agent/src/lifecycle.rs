//! 代理生命周期管理
//!
//! 启动、停止等一级生命周期事件统一分发给各模块。
//! 内置的 `AppLogHook` 把生命周期变化写成 APP_LOG 记录，随传感器数据一起上报。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;
use crate::sensor_type::SensorType;
use crate::storage::LocalBuffer;

pub const SERVICE_CREATED: &str = "Sensor service created";
pub const SERVICE_STARTED: &str = "Service started!";
pub const SERVICE_STOPPED: &str = "Sensor service stopped.";
pub const LOW_MEMORY: &str = "onLowMemory called.";

/// 生命周期回调 Hook
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// 代理启动完成后调用
    async fn on_start(&self) -> Result<()>;

    /// 代理停止前调用
    async fn on_stop(&self) -> Result<()>;
}

/// 生命周期管理器
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 通知所有 Hook：代理启动
    ///
    /// 按注册顺序执行，某个 Hook 失败时记录错误并继续，最后返回第一个错误
    pub async fn notify_start(&self) -> Result<()> {
        info!("🔄 通知所有模块：代理启动");

        let mut first_error = None;
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_start().await {
                warn!("⚠️ Hook #{} 启动回调失败: {}", index, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 通知所有 Hook：代理停止（逆序）
    pub async fn notify_stop(&self) -> Result<()> {
        info!("🔄 通知所有模块：代理停止");

        let mut first_error = None;
        for (index, hook) in self.hooks.iter().enumerate().rev() {
            if let Err(e) = hook.on_stop().await {
                warn!("⚠️ Hook #{} 停止回调失败: {}", index, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 生命周期 APP_LOG 记录
pub struct AppLogHook {
    buffer: Arc<dyn LocalBuffer>,
}

impl AppLogHook {
    pub fn new(buffer: Arc<dyn LocalBuffer>) -> Self {
        Self { buffer }
    }

    /// 以当前时间写入一条 APP_LOG
    pub async fn log(&self, message: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        self.buffer.append(SensorType::AppLog, message, now).await
    }

    pub async fn low_memory(&self) -> Result<i64> {
        warn!("⚠️ 系统内存不足");
        self.log(LOW_MEMORY).await
    }
}

#[async_trait]
impl LifecycleHook for AppLogHook {
    async fn on_start(&self) -> Result<()> {
        self.log(SERVICE_CREATED).await?;
        self.log(SERVICE_STARTED).await.map(|_| ())
    }

    async fn on_stop(&self) -> Result<()> {
        self.log(SERVICE_STOPPED).await.map(|_| ())
    }
}
