//! 事件系统模块 - 同步周期事件的广播与订阅
//!
//! 事件只用于观测（UI、诊断、测试），发布失败（无订阅者）不影响同步流程。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// 同步事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 一轮同步开始
    CycleStarted { upload_end_time: i64 },
    /// 一个窗口上报成功并已清理本地
    WindowUploaded {
        window_start: i64,
        window_end: i64,
        records: usize,
        pruned: usize,
    },
    /// 一轮同步完成
    CycleCompleted { last_uploaded_time: i64, windows: u32 },
    /// 一轮同步失败，游标停在 last_uploaded_time
    CycleFailed { last_uploaded_time: i64, reason: String },
    /// 已有一轮在执行，本次触发被跳过
    CycleSkipped,
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::CycleStarted { .. } => "cycle_started",
            SyncEvent::WindowUploaded { .. } => "window_uploaded",
            SyncEvent::CycleCompleted { .. } => "cycle_completed",
            SyncEvent::CycleFailed { .. } => "cycle_failed",
            SyncEvent::CycleSkipped => "cycle_skipped",
        }
    }
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
}

/// 事件管理器
#[derive(Debug)]
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
    stats: Arc<RwLock<EventStats>>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            stats: Arc::new(RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_subscribe() {
        let manager = EventManager::new(16);
        let mut receiver = manager.subscribe();
        assert_eq!(manager.subscriber_count(), 1);

        manager.emit(SyncEvent::CycleStarted { upload_end_time: 300 }).await;
        manager.emit(SyncEvent::CycleSkipped).await;

        assert_eq!(receiver.recv().await.unwrap(), SyncEvent::CycleStarted { upload_end_time: 300 });
        assert_eq!(receiver.recv().await.unwrap(), SyncEvent::CycleSkipped);

        let stats = manager.get_stats().await;
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.events_by_type["cycle_skipped"], 1);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let manager = EventManager::default();
        manager.emit(SyncEvent::CycleSkipped).await;
        assert_eq!(manager.get_stats().await.total_events, 1);
    }
}
