//! 同步编排器 - 分窗追赶状态机
//!
//! 职责：
//! - 以触发时刻固定本轮终点 `upload_end_time`
//! - 从游标 `last_uploaded_time` 起按固定窗口逐段查询、编码、上报
//! - 服务端确认后才删除本地记录并推进游标
//! - 单轮内循环追赶到终点，不依赖多次闹钟
//!
//! 失败（上报 / 存储）一律在本层吸收：记日志、发事件、返回 `CycleOutcome::Failed`，
//! 游标停在最后一次确认的位置，下一次闹钟从同一窗口重试。

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{AgentConfig, MalformedPolicy};
use crate::device_info::DeviceInfoProvider;
use crate::error::{Result, SensorAgentError, UploadFailure};
use crate::events::{EventManager, SyncEvent};
use crate::http_client::RemoteSink;
use crate::storage::{LocalBuffer, RawRecord};
use crate::sync::cursor_store::SyncStateStore;
use crate::sync::encoder::{EncodedPayload, PayloadEncoder};
use crate::sync::guard::{UploadGuard, UploadPermit};
use crate::sync::{CycleOutcome, CycleState, SyncState};

/// 编排参数
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// 单批窗口跨度（毫秒）
    pub fixed_window_ms: i64,
    /// 单次上报超时
    pub upload_timeout: Duration,
    pub identifiers_enabled: bool,
    pub malformed_policy: MalformedPolicy,
}

impl SyncSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            fixed_window_ms: config.fixed_window_millis(),
            upload_timeout: config.upload_timeout(),
            identifiers_enabled: config.identifiers_enabled,
            malformed_policy: config.malformed_policy,
        }
    }
}

/// 单轮进度，失败时用于上报游标位置
#[derive(Debug, Default)]
struct CycleProgress {
    windows: u32,
    uploaded: usize,
    pruned: usize,
}

pub struct SyncOrchestrator {
    buffer: Arc<dyn LocalBuffer>,
    sink: Arc<dyn RemoteSink>,
    state_store: Arc<dyn SyncStateStore>,
    device_info: Arc<dyn DeviceInfoProvider>,
    encoder: PayloadEncoder,
    events: Arc<EventManager>,
    guard: UploadGuard,
    settings: SyncSettings,
    state: RwLock<CycleState>,
}

impl SyncOrchestrator {
    pub fn new(
        buffer: Arc<dyn LocalBuffer>,
        sink: Arc<dyn RemoteSink>,
        state_store: Arc<dyn SyncStateStore>,
        device_info: Arc<dyn DeviceInfoProvider>,
        events: Arc<EventManager>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            buffer,
            sink,
            state_store,
            device_info,
            encoder: PayloadEncoder::new(),
            events,
            guard: UploadGuard::new(),
            settings,
            state: RwLock::new(CycleState::Idle),
        }
    }

    /// 替换编码器（自定义类型编码）
    pub fn with_encoder(mut self, encoder: PayloadEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn current_state(&self) -> CycleState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_held()
    }

    /// 尝试占用互斥标记；已有一轮在执行时返回 None
    ///
    /// 供触发方同步判断后再把本轮放到后台任务执行。
    pub fn try_begin_cycle(&self) -> Option<UploadPermit> {
        self.guard.try_acquire()
    }

    /// 执行一轮同步，`now` 为本轮终点（毫秒）
    pub async fn run_cycle(&self, now: i64) -> CycleOutcome {
        match self.try_begin_cycle() {
            Some(permit) => self.run_with_permit(permit, now).await,
            None => {
                debug!("同步进行中，跳过本次触发");
                self.events.emit(SyncEvent::CycleSkipped).await;
                CycleOutcome::Skipped
            }
        }
    }

    /// 持有许可执行一轮，返回时许可随之释放
    pub async fn run_with_permit(&self, permit: UploadPermit, now: i64) -> CycleOutcome {
        let _permit = permit;
        self.set_state(CycleState::Running);

        info!("🔄 开始同步: upload_end_time={}", now);
        self.events.emit(SyncEvent::CycleStarted { upload_end_time: now }).await;

        let mut state = SyncState {
            last_uploaded_time: 0,
            upload_end_time: now,
            identifiers_sent: false,
        };
        let mut progress = CycleProgress::default();

        let outcome = match self.drive(&mut state, &mut progress).await {
            Ok(()) => {
                self.set_state(CycleState::SuccessDone);
                info!(
                    "✅ 同步完成: last_uploaded_time={}, windows={}, uploaded={}, pruned={}",
                    state.last_uploaded_time, progress.windows, progress.uploaded, progress.pruned
                );
                self.events
                    .emit(SyncEvent::CycleCompleted {
                        last_uploaded_time: state.last_uploaded_time,
                        windows: progress.windows,
                    })
                    .await;
                CycleOutcome::Completed {
                    windows: progress.windows,
                    uploaded: progress.uploaded,
                    pruned: progress.pruned,
                    last_uploaded_time: state.last_uploaded_time,
                }
            }
            Err(e) => {
                self.set_state(CycleState::Failed);
                if e.is_storage_error() {
                    error!(
                        "❌ 本地存储失败，本轮中止: last_uploaded_time={}, error={}",
                        state.last_uploaded_time, e
                    );
                } else {
                    error!(
                        "❌ 同步失败，等待下次触发重试: last_uploaded_time={}, error={}",
                        state.last_uploaded_time, e
                    );
                }
                let reason = e.to_string();
                self.events
                    .emit(SyncEvent::CycleFailed {
                        last_uploaded_time: state.last_uploaded_time,
                        reason: reason.clone(),
                    })
                    .await;
                CycleOutcome::Failed {
                    reason,
                    last_uploaded_time: state.last_uploaded_time,
                }
            }
        };

        self.set_state(CycleState::Idle);
        outcome
    }

    // ============================================================
    // 私有方法
    // ============================================================

    fn set_state(&self, next: CycleState) {
        let mut state = self.state.write();
        debug!("同步状态: {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// 状态机主体；任何 Err 都发生在游标推进之前
    async fn drive(&self, state: &mut SyncState, progress: &mut CycleProgress) -> Result<()> {
        state.last_uploaded_time = self.state_store.last_uploaded_time().await?;
        state.identifiers_sent = self.state_store.identifiers_sent().await?;
        let upload_end = state.upload_end_time;

        // 工作游标：首次同步时取缓冲中最早一条的时间，避免从纪元开始的超大查询
        let mut cursor = state.last_uploaded_time;
        let mut identifiers_due = false;

        if cursor == 0 {
            identifiers_due = self.settings.identifiers_enabled && !state.identifiers_sent;

            match self.buffer.oldest_timestamp().await? {
                Some(oldest) => {
                    debug!("首次同步，从最早记录开始: oldest={}", oldest);
                    cursor = oldest;
                }
                None => {
                    // 缓冲为空：只可能需要发送设备标识
                    if identifiers_due {
                        let batch = vec![self.identifiers_payload()];
                        self.upload(&batch).await?;
                        self.state_store.mark_identifiers_sent().await?;
                        state.identifiers_sent = true;
                        progress.uploaded += 1;
                        progress.windows += 1;
                        info!("设备标识已上报");
                    }
                    self.advance_cursor(state, upload_end).await?;
                    return Ok(());
                }
            }
        }

        // 游标之前的残留：上轮保留的编码失败记录，以及上报期间才写入的迟到记录
        let mut retained: Vec<i64> = Vec::new();
        if state.last_uploaded_time > 0 {
            let backlog = self.buffer.query(i64::MIN, cursor).await?;
            if !backlog.is_empty() {
                debug!("游标之前残留 {} 条记录", backlog.len());
                if let Some((sent, pruned)) =
                    self.deliver(&backlog, false, cursor, &mut retained).await?
                {
                    progress.windows += 1;
                    progress.uploaded += sent;
                    progress.pruned += pruned;
                    info!("迟到记录补报成功: payloads={}, pruned={}", sent, pruned);
                    self.events
                        .emit(SyncEvent::WindowUploaded {
                            window_start: backlog[0].timestamp,
                            window_end: cursor,
                            records: sent,
                            pruned,
                        })
                        .await;
                }
            }
        }

        loop {
            if cursor >= upload_end && !identifiers_due {
                debug!("游标已到达终点: cursor={}, upload_end_time={}", cursor, upload_end);
                return Ok(());
            }

            let window_end = cursor.saturating_add(self.settings.fixed_window_ms).min(upload_end);
            debug!(
                "同步窗口: [{}, {}), upload_end_time={}",
                cursor, window_end, upload_end
            );

            let records = if window_end > cursor {
                self.buffer.query(cursor, window_end).await?
            } else {
                Vec::new()
            };

            progress.windows += 1;

            let delivered = self
                .deliver(&records, identifiers_due, window_end, &mut retained)
                .await?;
            let Some((batch_len, pruned)) = delivered else {
                if window_end < upload_end {
                    // 空窗口：无可删除也无可丢失，直接推进避免卡住
                    self.advance_cursor(state, window_end).await?;
                    cursor = window_end;
                    self.set_state(CycleState::SuccessContinue);
                    continue;
                }
                return Ok(());
            };

            if identifiers_due {
                self.state_store.mark_identifiers_sent().await?;
                state.identifiers_sent = true;
                identifiers_due = false;
            }
            self.advance_cursor(state, window_end).await?;

            progress.uploaded += batch_len;
            progress.pruned += pruned;
            info!(
                "窗口上报成功: [{}, {}), payloads={}, pruned={}",
                cursor, window_end, batch_len, pruned
            );
            self.events
                .emit(SyncEvent::WindowUploaded {
                    window_start: cursor,
                    window_end,
                    records: batch_len,
                    pruned,
                })
                .await;

            if window_end < upload_end {
                cursor = window_end;
                self.set_state(CycleState::SuccessContinue);
            } else {
                return Ok(());
            }
        }
    }

    /// 编码、上报并删除一组已读记录
    ///
    /// 批次为空时返回 None；否则返回 (上报条数, 删除条数)。
    /// 删除以本组最大 id 为上界，上报期间新追加的记录不受影响。
    async fn deliver(
        &self,
        records: &[RawRecord],
        with_identifiers: bool,
        threshold: i64,
        retained: &mut Vec<i64>,
    ) -> Result<Option<(usize, usize)>> {
        let encoded = self.encoder.encode_batch(records);
        if !encoded.failures.is_empty() {
            warn!(
                "{} 条记录编码失败 (threshold={}, policy={:?})",
                encoded.failures.len(),
                threshold,
                self.settings.malformed_policy
            );
            if self.settings.malformed_policy == MalformedPolicy::Retain {
                retained.extend(encoded.failed_ids());
            }
        }

        let mut batch: Vec<EncodedPayload> = Vec::with_capacity(encoded.payloads.len() + 1);
        if with_identifiers {
            batch.push(self.identifiers_payload());
        }
        batch.extend(encoded.payloads);
        if batch.is_empty() {
            return Ok(None);
        }

        self.upload(&batch).await?;

        // 服务端已确认：先删本地，再推进游标；中途失败只会导致重发
        let pruned = match records.iter().map(|r| r.id).max() {
            Some(max_id) => self.buffer.delete_before(threshold, max_id, retained).await?,
            None => 0,
        };
        Ok(Some((batch.len(), pruned)))
    }

    /// 持久化游标，只前进不后退
    async fn advance_cursor(&self, state: &mut SyncState, to: i64) -> Result<()> {
        if to <= state.last_uploaded_time {
            return Ok(());
        }
        self.state_store.set_last_uploaded_time(to).await?;
        state.last_uploaded_time = to;
        Ok(())
    }

    /// 带超时的上报，超时等同网络失败
    async fn upload(&self, batch: &[EncodedPayload]) -> Result<()> {
        match tokio::time::timeout(self.settings.upload_timeout, self.sink.upload(batch)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => Err(SensorAgentError::Upload(failure)),
            Err(_) => Err(SensorAgentError::Upload(UploadFailure::Timeout(
                self.settings.upload_timeout,
            ))),
        }
    }

    fn identifiers_payload(&self) -> EncodedPayload {
        PayloadEncoder::identifiers_payload(
            &self.device_info.identifiers(),
            chrono::Utc::now().timestamp_millis(),
        )
    }
}
