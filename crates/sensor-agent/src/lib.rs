//! Sensor Agent - 设备端传感器数据采集与批量上报
//!
//! 本库提供后台采集代理的核心能力：
//! - 📥 传感器原始记录写入本地缓冲（SQLite，schema 由 refinery 管理）
//! - 🔄 按固定窗口分批追赶上报，服务端确认后才删除本地数据
//! - 📍 持久化同步游标，只前进不后退，失败从同一窗口重试
//! - ⏰ 周期闹钟触发，单轮互斥
//! - 🆔 每次安装仅上报一次的设备标识
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use sensor_agent::{AgentConfig, SensorAgent, SensorType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::builder()
//!         .data_dir("/path/to/data")
//!         .upload_url("https://collector.example.com/api/sensor_data")
//!         .build();
//!
//!     let agent = SensorAgent::initialize(config).await?;
//!
//!     // 传感器回调中写入
//!     agent.record_now(SensorType::Gps, "12.5,45.2,10,3").await?;
//!
//!     // 不等闹钟，立即同步一轮
//!     let outcome = agent.sync_now().await?;
//!     println!("{:?}", outcome);
//!
//!     agent.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod alarm;
pub mod config;
pub mod device_info;
pub mod error;
pub mod events;
pub mod http_client;
pub mod lifecycle;
pub mod sensor_type;
pub mod storage;
pub mod sync;
pub mod version;

// 重新导出核心类型，方便使用
pub use agent::{AgentComponents, SensorAgent};
pub use alarm::{AlarmCallback, AlarmScheduler, SyncAlarm, TokioAlarmScheduler};
pub use config::{AgentConfig, AgentConfigBuilder, HttpClientConfig, MalformedPolicy};
pub use device_info::{DeviceIdentifiers, DeviceInfoProvider, StaticDeviceInfo, SystemDeviceInfo};
pub use error::{EncodeError, Result, SensorAgentError, UploadFailure};
pub use events::{EventManager, EventStats, SyncEvent};
pub use http_client::{HttpRemoteSink, RemoteSink};
pub use lifecycle::{AppLogHook, LifecycleHook, LifecycleManager};
pub use sensor_type::SensorType;
pub use storage::{KvStore, LocalBuffer, MemorySensorBuffer, RawRecord, SqliteSensorBuffer};
pub use sync::{
    CycleOutcome, CycleState, EncodedPayload, KvSyncStateStore, MemorySyncStateStore, PayloadEncoder,
    SyncOrchestrator, SyncSettings, SyncState, SyncStateStore,
};
