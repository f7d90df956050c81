//! 采集代理入口
//!
//! `SensorAgent` 组装本地缓冲、同步游标、上报端与定时器：
//! 传感器数据经 `record` 写入缓冲，闹钟按 `sync_interval` 触发同步，
//! 也可以通过 `sync_now` 立即同步一轮。

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::alarm::{AlarmScheduler, SyncAlarm, TokioAlarmScheduler};
use crate::config::AgentConfig;
use crate::device_info::{DeviceInfoProvider, StaticDeviceInfo, SystemDeviceInfo};
use crate::error::{Result, SensorAgentError};
use crate::events::{EventManager, EventStats, SyncEvent};
use crate::http_client::{HttpRemoteSink, RemoteSink};
use crate::lifecycle::{AppLogHook, LifecycleManager};
use crate::sensor_type::SensorType;
use crate::storage::{KvStore, LocalBuffer, SqliteSensorBuffer};
use crate::sync::{CycleOutcome, KvSyncStateStore, SyncOrchestrator, SyncSettings, SyncStateStore};

/// 可注入的协作者
pub struct AgentComponents {
    pub buffer: Arc<dyn LocalBuffer>,
    pub sink: Arc<dyn RemoteSink>,
    pub state_store: Arc<dyn SyncStateStore>,
    pub device_info: Arc<dyn DeviceInfoProvider>,
    pub scheduler: Arc<dyn AlarmScheduler>,
}

pub struct SensorAgent {
    config: AgentConfig,
    buffer: Arc<dyn LocalBuffer>,
    state_store: Arc<dyn SyncStateStore>,
    orchestrator: Arc<SyncOrchestrator>,
    event_manager: Arc<EventManager>,
    alarm: Arc<SyncAlarm>,
    app_log: Arc<AppLogHook>,
    lifecycle_manager: RwLock<LifecycleManager>,
    shutting_down: RwLock<bool>,
}

impl SensorAgent {
    /// 按配置打开本地存储、创建 HTTP 上报端并启动闹钟
    pub async fn initialize(config: AgentConfig) -> Result<Arc<Self>> {
        info!("正在初始化 SensorAgent...");
        config.validate()?;

        tokio::fs::create_dir_all(&config.data_dir).await?;

        // === 第1层：本地缓冲 ===
        let buffer = Arc::new(SqliteSensorBuffer::open(&config.data_dir).await?);

        // === 第2层：同步游标 ===
        let kv = Arc::new(KvStore::new(&config.data_dir).await?);
        let state_store = Arc::new(KvSyncStateStore::new(kv));

        // === 第3层：上报端 ===
        let sink = Arc::new(HttpRemoteSink::new(
            &config.http_client_config,
            config.upload_url.clone(),
            config.auth_token.clone(),
        )?);

        let device_info: Arc<dyn DeviceInfoProvider> = match &config.device_profile {
            Some(profile) => Arc::new(StaticDeviceInfo::new(profile.clone())),
            None => Arc::new(SystemDeviceInfo),
        };

        let scheduler = Arc::new(TokioAlarmScheduler::new()?);

        Self::with_components(
            config,
            AgentComponents {
                buffer,
                sink,
                state_store,
                device_info,
                scheduler,
            },
        )
        .await
    }

    /// 使用注入的协作者启动
    pub async fn with_components(config: AgentConfig, components: AgentComponents) -> Result<Arc<Self>> {
        config.validate_with(false)?;

        let event_manager = Arc::new(EventManager::new(config.event_buffer_size));

        let orchestrator = Arc::new(SyncOrchestrator::new(
            components.buffer.clone(),
            components.sink,
            components.state_store.clone(),
            components.device_info,
            event_manager.clone(),
            SyncSettings::from_config(&config),
        ));

        let alarm = SyncAlarm::new(components.scheduler, orchestrator.clone(), config.sync_interval())?;

        let app_log = Arc::new(AppLogHook::new(components.buffer.clone()));
        let mut lifecycle_manager = LifecycleManager::new();
        lifecycle_manager.register_hook(app_log.clone());

        let agent = Arc::new(Self {
            config,
            buffer: components.buffer,
            state_store: components.state_store,
            orchestrator,
            event_manager,
            alarm,
            app_log,
            lifecycle_manager: RwLock::new(lifecycle_manager),
            shutting_down: RwLock::new(false),
        });

        if let Err(e) = agent.lifecycle_manager.read().await.notify_start().await {
            warn!("⚠️ 启动回调失败: {}", e);
        }

        agent.alarm.start();

        info!("✅ SensorAgent 初始化完成 (version: {})", crate::version::AGENT_VERSION);
        Ok(agent)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// 写入一条传感器记录，返回缓冲内主键
    pub async fn record(&self, sensor_type: SensorType, payload: &str, timestamp: i64) -> Result<i64> {
        self.ensure_running().await?;

        if !sensor_type.is_stored() {
            return Err(SensorAgentError::InvalidArgument(format!(
                "{} 不是可采集的传感器类型",
                sensor_type
            )));
        }
        if !self.config.is_sensor_enabled(sensor_type) {
            return Err(SensorAgentError::InvalidArgument(format!("{} 未启用", sensor_type)));
        }

        let id = self.buffer.append(sensor_type, payload, timestamp).await?;
        debug!("记录已写入: id={}, type={}, ts={}", id, sensor_type, timestamp);
        Ok(id)
    }

    /// 以当前时间写入
    pub async fn record_now(&self, sensor_type: SensorType, payload: &str) -> Result<i64> {
        self.record(sensor_type, payload, chrono::Utc::now().timestamp_millis()).await
    }

    /// 立即同步一轮；已有一轮在执行时返回 `Skipped`，关闭后返回 `ShuttingDown`
    pub async fn sync_now(&self) -> Result<CycleOutcome> {
        self.ensure_running().await?;
        Ok(self
            .orchestrator
            .run_cycle(chrono::Utc::now().timestamp_millis())
            .await)
    }

    pub async fn on_low_memory(&self) -> Result<()> {
        self.ensure_running().await?;
        self.app_log.low_memory().await.map(|_| ())
    }

    /// 游标之前仍留在缓冲中的记录数（保留下来的编码失败记录）
    pub async fn malformed_backlog(&self) -> Result<u64> {
        let cursor = self.state_store.last_uploaded_time().await?;
        if cursor == 0 {
            return Ok(0);
        }
        self.buffer.count_before(cursor).await
    }

    pub async fn last_uploaded_time(&self) -> Result<i64> {
        self.state_store.last_uploaded_time().await
    }

    pub fn is_sync_running(&self) -> bool {
        self.orchestrator.is_running()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_manager.subscribe()
    }

    pub async fn event_stats(&self) -> EventStats {
        self.event_manager.get_stats().await
    }

    pub async fn is_shutting_down(&self) -> bool {
        *self.shutting_down.read().await
    }

    /// 停止闹钟并写入停止日志；已缓冲的数据保留到下次启动
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut shutting_down = self.shutting_down.write().await;
            if *shutting_down {
                return Ok(());
            }
            *shutting_down = true;
        }

        info!("正在关闭 SensorAgent...");
        self.alarm.stop();

        if let Err(e) = self.lifecycle_manager.read().await.notify_stop().await {
            warn!("⚠️ 停止回调失败: {}", e);
        }

        info!("SensorAgent 关闭完成");
        Ok(())
    }

    async fn ensure_running(&self) -> Result<()> {
        if *self.shutting_down.read().await {
            return Err(SensorAgentError::ShuttingDown("SensorAgent 已关闭".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AlarmCallback;
    use crate::device_info::DeviceIdentifiers;
    use crate::error::UploadFailure;
    use crate::lifecycle::{SERVICE_CREATED, SERVICE_STARTED, SERVICE_STOPPED};
    use crate::storage::MemorySensorBuffer;
    use crate::sync::{EncodedPayload, MemorySyncStateStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// 只记录设定次数，从不触发
    #[derive(Default)]
    struct ManualScheduler {
        scheduled: AtomicUsize,
        cancelled: AtomicBool,
    }

    impl AlarmScheduler for ManualScheduler {
        fn schedule_once(&self, _delay: Duration, _callback: AlarmCallback) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<Vec<EncodedPayload>>>,
        reject: AtomicBool,
    }

    #[async_trait]
    impl RemoteSink for CollectingSink {
        async fn upload(&self, batch: &[EncodedPayload]) -> std::result::Result<(), UploadFailure> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(UploadFailure::Rejected {
                    status: 500,
                    message: "internal error".to_string(),
                });
            }
            self.batches.lock().push(batch.to_vec());
            Ok(())
        }
    }

    struct Fixture {
        agent: Arc<SensorAgent>,
        buffer: Arc<MemorySensorBuffer>,
        sink: Arc<CollectingSink>,
        scheduler: Arc<ManualScheduler>,
    }

    async fn fixture(config: AgentConfig) -> Fixture {
        let buffer = Arc::new(MemorySensorBuffer::new());
        let sink = Arc::new(CollectingSink::default());
        let scheduler = Arc::new(ManualScheduler::default());
        let agent = SensorAgent::with_components(
            config,
            AgentComponents {
                buffer: buffer.clone(),
                sink: sink.clone(),
                state_store: Arc::new(MemorySyncStateStore::new()),
                device_info: Arc::new(StaticDeviceInfo::new(DeviceIdentifiers {
                    device_id: "test-device".to_string(),
                    ..Default::default()
                })),
                scheduler: scheduler.clone(),
            },
        )
        .await
        .unwrap();
        Fixture {
            agent,
            buffer,
            sink,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_start_logs_and_arms_alarm() {
        let f = fixture(AgentConfig::default()).await;

        assert_eq!(f.scheduler.scheduled.load(Ordering::SeqCst), 1);
        let records = f.buffer.snapshot();
        assert!(records.iter().all(|r| r.sensor_type == SensorType::AppLog));
        let payloads: Vec<&str> = records.iter().map(|r| r.payload.as_str()).collect();
        assert_eq!(payloads, vec![SERVICE_CREATED, SERVICE_STARTED]);
    }

    #[tokio::test]
    async fn test_record_rejects_identifiers_and_disabled_types() {
        let config = AgentConfig::builder().disable_sensor(SensorType::Texts).build();
        let f = fixture(config).await;

        let err = f.agent.record(SensorType::Identifiers, "x", 1).await.unwrap_err();
        assert!(matches!(err, SensorAgentError::InvalidArgument(_)));
        let err = f.agent.record(SensorType::Texts, "1,2,3,4", 1).await.unwrap_err();
        assert!(matches!(err, SensorAgentError::InvalidArgument(_)));

        f.agent.record(SensorType::Gps, "1,2,3,4", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_now_uploads_everything() {
        let f = fixture(AgentConfig::default()).await;
        let now = chrono::Utc::now().timestamp_millis();
        f.agent.record(SensorType::Gps, "12.5,45.2,10,3", now - 5_000).await.unwrap();
        f.agent.record(SensorType::Wifi, "aa,2412,-40", now - 4_000).await.unwrap();
        // 本轮终点晚于启动日志
        tokio::time::sleep(Duration::from_millis(5)).await;

        let outcome = f.agent.sync_now().await.unwrap();

        assert!(outcome.is_completed(), "{:?}", outcome);
        let batches = f.sink.batches.lock().clone();
        let categories: Vec<String> = batches.iter().flatten().map(|p| p.category.clone()).collect();
        assert_eq!(categories.iter().filter(|c| *c == "identifiers").count(), 1);
        assert!(categories.contains(&"gps".to_string()));
        assert!(categories.contains(&"wifi".to_string()));
        assert!(categories.contains(&"applog".to_string()));
        assert!(f.buffer.is_empty());
        assert!(f.agent.last_uploaded_time().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_buffer() {
        let f = fixture(AgentConfig::default()).await;
        f.sink.reject.store(true, Ordering::SeqCst);
        f.agent.record_now(SensorType::Proximity, "near").await.unwrap();

        let outcome = f.agent.sync_now().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Failed { last_uploaded_time: 0, .. }));
        assert_eq!(f.buffer.len(), 3);
        assert!(!f.agent.is_sync_running());
        assert_eq!(f.agent.event_stats().await.events_by_type["cycle_failed"], 1);
    }

    #[tokio::test]
    async fn test_malformed_backlog_counts_retained_records() {
        let f = fixture(AgentConfig::default()).await;
        let now = chrono::Utc::now().timestamp_millis();
        f.agent.record(SensorType::Calls, "1.0,0.1", now - 1_000).await.unwrap();

        assert_eq!(f.agent.malformed_backlog().await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        f.agent.sync_now().await.unwrap();

        assert_eq!(f.agent.malformed_backlog().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_alarm_and_logs() {
        let f = fixture(AgentConfig::default()).await;
        f.agent.on_low_memory().await.unwrap();

        f.agent.shutdown().await.unwrap();
        f.agent.shutdown().await.unwrap();

        assert!(f.scheduler.cancelled.load(Ordering::SeqCst));
        assert!(f.agent.is_shutting_down().await);
        let payloads: Vec<String> = f.buffer.snapshot().into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads.iter().filter(|p| *p == SERVICE_STOPPED).count(), 1);

        let err = f.agent.record_now(SensorType::Gps, "1,2,3,4").await.unwrap_err();
        assert!(matches!(err, SensorAgentError::ShuttingDown(_)));
    }

    #[tokio::test]
    async fn test_sync_now_after_shutdown_is_rejected() {
        let f = fixture(AgentConfig::default()).await;
        f.agent.shutdown().await.unwrap();

        let err = f.agent.sync_now().await.unwrap_err();

        assert!(matches!(err, SensorAgentError::ShuttingDown(_)));
        assert!(f.sink.batches.lock().is_empty());
        assert_eq!(f.agent.last_uploaded_time().await.unwrap(), 0);
        // 停止日志留在缓冲中，下次启动再上报
        assert_eq!(f.buffer.len(), 3);
    }

    #[tokio::test]
    async fn test_initialize_persists_buffer_on_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        // 端口释放后连接会被拒绝
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = AgentConfig::builder()
            .data_dir(temp_dir.path())
            .upload_url(format!("http://{}/api/sensor_data", addr))
            .build();
        let agent = SensorAgent::initialize(config).await.unwrap();
        agent.record_now(SensorType::Gyroscope, "3,0.1,0.2,0.3").await.unwrap();

        let outcome = agent.sync_now().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Failed { .. }));
        assert_eq!(agent.last_uploaded_time().await.unwrap(), 0);

        assert!(temp_dir.path().join("sensor_data.db").exists());
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_requires_upload_url() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::builder().data_dir(temp_dir.path()).build();
        let err = SensorAgent::initialize(config).await.err().unwrap();
        assert!(matches!(err, SensorAgentError::Config(_)));
    }
}
