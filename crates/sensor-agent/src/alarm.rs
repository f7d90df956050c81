//! 定时触发模块
//!
//! - `AlarmScheduler`: 一次性定时回调的抽象
//! - `TokioAlarmScheduler`: 基于 `tokio::time::sleep` 的实现，重新设定会替换尚未触发的闹钟
//! - `SyncAlarm`: 周期同步触发器，每次触发先设定下一次，再尝试开始一轮同步

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Result, SensorAgentError};
use crate::sync::{CycleOutcome, SyncOrchestrator};

pub type AlarmCallback = Box<dyn FnOnce() + Send + 'static>;

/// 一次性定时回调
pub trait AlarmScheduler: Send + Sync {
    /// `delay` 后调用一次 `callback`；再次调用会替换尚未触发的闹钟
    fn schedule_once(&self, delay: Duration, callback: AlarmCallback);

    /// 取消尚未触发的闹钟
    fn cancel(&self);
}

/// tokio 定时实现
pub struct TokioAlarmScheduler {
    runtime: Handle,
    generation: AtomicU64,
    pending: Arc<Mutex<Option<(u64, JoinHandle<()>)>>>,
}

impl TokioAlarmScheduler {
    /// 需在 tokio 运行时内创建
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SensorAgentError::NotInitialized(format!("tokio 运行时不可用: {}", e)))?;
        Ok(Self::with_handle(runtime))
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            generation: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl AlarmScheduler for TokioAlarmScheduler {
    fn schedule_once(&self, delay: Duration, callback: AlarmCallback) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pending = Arc::clone(&self.pending);

        // 持锁 spawn，保证新任务取槽位时旧句柄已被替换
        let mut slot = self.pending.lock();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = pending.lock();
                // 先让出槽位，回调内重新设定时不会中止自身
                if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
                    slot.take();
                }
            }
            callback();
        });

        if let Some((_, previous)) = slot.replace((generation, task)) {
            previous.abort();
        }
        debug!("闹钟已设定: delay={:?}, generation={}", delay, generation);
    }

    fn cancel(&self) {
        if let Some((generation, task)) = self.pending.lock().take() {
            task.abort();
            debug!("闹钟已取消: generation={}", generation);
        }
    }
}

/// 周期同步触发器
pub struct SyncAlarm {
    scheduler: Arc<dyn AlarmScheduler>,
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    runtime: Handle,
    stopped: AtomicBool,
    this: Weak<SyncAlarm>,
}

impl SyncAlarm {
    pub fn new(
        scheduler: Arc<dyn AlarmScheduler>,
        orchestrator: Arc<SyncOrchestrator>,
        interval: Duration,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| SensorAgentError::NotInitialized(format!("tokio 运行时不可用: {}", e)))?;

        Ok(Arc::new_cyclic(|this| Self {
            scheduler,
            orchestrator,
            interval,
            runtime,
            stopped: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 设定第一次触发
    pub fn start(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.arm();
        info!("⏰ 同步闹钟已启动: interval={:?}", self.interval);
    }

    /// 闹钟触发
    ///
    /// 先设定下一次，再在后台开始一轮同步；已有一轮在执行时该轮记为跳过。
    pub fn on_fire(&self) -> Option<JoinHandle<CycleOutcome>> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }

        self.arm();

        let orchestrator = Arc::clone(&self.orchestrator);
        let now = chrono::Utc::now().timestamp_millis();
        debug!("⏰ 闹钟触发: now={}", now);
        Some(self.runtime.spawn(async move { orchestrator.run_cycle(now).await }))
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.scheduler.cancel();
        info!("⏰ 同步闹钟已停止");
    }

    fn arm(&self) {
        let this = self.this.clone();
        self.scheduler.schedule_once(
            self.interval,
            Box::new(move || {
                if let Some(alarm) = this.upgrade() {
                    alarm.on_fire();
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MalformedPolicy;
    use crate::device_info::{DeviceIdentifiers, StaticDeviceInfo};
    use crate::error::UploadFailure;
    use crate::events::EventManager;
    use crate::http_client::RemoteSink;
    use crate::storage::MemorySensorBuffer;
    use crate::sync::{EncodedPayload, MemorySyncStateStore, SyncSettings};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct AcceptAll;

    #[async_trait]
    impl RemoteSink for AcceptAll {
        async fn upload(&self, _batch: &[EncodedPayload]) -> std::result::Result<(), UploadFailure> {
            Ok(())
        }
    }

    const INTERVAL: Duration = Duration::from_secs(600);

    fn orchestrator(events: Arc<EventManager>) -> Arc<SyncOrchestrator> {
        Arc::new(SyncOrchestrator::new(
            Arc::new(MemorySensorBuffer::new()),
            Arc::new(AcceptAll),
            Arc::new(MemorySyncStateStore::with_state(0, true)),
            Arc::new(StaticDeviceInfo::new(DeviceIdentifiers::default())),
            events,
            SyncSettings {
                fixed_window_ms: 180_000,
                upload_timeout: Duration::from_secs(60),
                identifiers_enabled: false,
                malformed_policy: MalformedPolicy::Retain,
            },
        ))
    }

    async fn count(events: &EventManager, event_type: &str) -> u64 {
        events
            .get_stats()
            .await
            .events_by_type
            .get(event_type)
            .copied()
            .unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_fires_once() {
        let scheduler = TokioAlarmScheduler::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        scheduler.schedule_once(
            Duration::from_secs(10),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(scheduler.has_pending());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_pending_alarm() {
        let scheduler = TokioAlarmScheduler::new().unwrap();
        let fired = Arc::new(Mutex::new(Vec::new()));

        for (name, secs) in [("first", 10), ("second", 20)] {
            let fired = fired.clone();
            scheduler.schedule_once(
                Duration::from_secs(secs),
                Box::new(move || fired.lock().push(name)),
            );
        }

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(*fired.lock(), vec!["second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let scheduler = TokioAlarmScheduler::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        scheduler.schedule_once(
            Duration::from_secs(10),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.cancel();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_alarm_rearms_every_interval() {
        let events = Arc::new(EventManager::new(64));
        let scheduler = Arc::new(TokioAlarmScheduler::new().unwrap());
        let alarm = SyncAlarm::new(scheduler.clone(), orchestrator(events.clone()), INTERVAL).unwrap();

        alarm.start();
        tokio::time::sleep(INTERVAL * 3 + INTERVAL / 2).await;

        assert_eq!(count(&events, "cycle_started").await, 3);
        assert_eq!(count(&events, "cycle_completed").await, 3);
        assert!(scheduler.has_pending());
        alarm.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_alarm_rearms_while_cycle_in_flight() {
        let events = Arc::new(EventManager::new(64));
        let orchestrator = orchestrator(events.clone());
        let alarm = SyncAlarm::new(
            Arc::new(TokioAlarmScheduler::new().unwrap()),
            orchestrator.clone(),
            INTERVAL,
        )
        .unwrap();

        // 模拟一轮长时间未结束的同步
        let permit = orchestrator.try_begin_cycle().unwrap();
        alarm.start();
        tokio::time::sleep(INTERVAL * 2 + INTERVAL / 2).await;

        assert_eq!(count(&events, "cycle_skipped").await, 2);
        assert_eq!(count(&events, "cycle_started").await, 0);

        drop(permit);
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(count(&events, "cycle_started").await, 1);
        alarm.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_alarm_stop() {
        let events = Arc::new(EventManager::new(64));
        let alarm = SyncAlarm::new(
            Arc::new(TokioAlarmScheduler::new().unwrap()),
            orchestrator(events.clone()),
            INTERVAL,
        )
        .unwrap();

        alarm.start();
        alarm.stop();
        assert!(alarm.on_fire().is_none());

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(count(&events, "cycle_started").await, 0);
    }
}
