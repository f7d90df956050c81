/// 传感器数据同步模块
///
/// 职责：
/// - 原始记录编码为上报载荷（encoder）
/// - 持久化同步游标与设备标识发送标记（cursor_store）
/// - 单轮互斥（guard）
/// - 分窗追赶、确认后删除、游标单调推进（orchestrator）

pub mod cursor_store;
pub mod encoder;
pub mod guard;
pub mod orchestrator;

pub use cursor_store::{KvSyncStateStore, MemorySyncStateStore, SyncStateStore};
pub use encoder::{EncodedBatch, EncodedPayload, PayloadEncoder};
pub use guard::{UploadGuard, UploadPermit};
pub use orchestrator::{SyncOrchestrator, SyncSettings};

/// 一轮同步看到的状态
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncState {
    /// 已确认上报的时间上界（毫秒），0 表示从未同步
    pub last_uploaded_time: i64,
    /// 本轮终点，触发时固定
    pub upload_end_time: i64,
    /// 设备标识是否已上报
    pub identifiers_sent: bool,
}

/// 同步状态机的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CycleState {
    /// 空闲
    Idle,
    /// 正在处理窗口
    Running,
    /// 窗口成功，还有后续窗口
    SuccessContinue,
    /// 已追赶到终点
    SuccessDone,
    /// 本轮失败，等待下一次触发
    Failed,
}

/// 一轮同步的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 已有一轮在执行
    Skipped,
    Completed {
        windows: u32,
        uploaded: usize,
        pruned: usize,
        last_uploaded_time: i64,
    },
    Failed {
        reason: String,
        last_uploaded_time: i64,
    },
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }
}
