//! 上报互斥标记
//!
//! 同一时刻只允许一轮同步。许可在 drop 时释放，
//! 无论本轮成功、失败还是任务 panic，标记都不会跨轮残留。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct UploadGuard {
    in_flight: Arc<AtomicBool>,
}

impl UploadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试占用；已有一轮在执行时返回 None
    pub fn try_acquire(&self) -> Option<UploadPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| UploadPermit {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    pub fn is_held(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// 一轮同步的执行许可
#[derive(Debug)]
pub struct UploadPermit {
    in_flight: Arc<AtomicBool>,
}

impl Drop for UploadPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}
