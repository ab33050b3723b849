// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 状态快照 (处理线程 → 展示层)
//!
//! 每个tick发布一个不可变快照, 姿态与轨迹列表总是同一tick的值.
//! 展示层只读快照, 不触碰处理线程的内存.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbaImage;

use crate::config::ProtectionMode;
use crate::detection::{Observation, TrackedThreat};
use crate::security::Posture;

/// 运行统计
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineMetrics {
    pub ticks: u64,
    pub fps: f64,               // 处理帧率
    pub inference_ms: f64,      // 最近一次推理耗时
    pub detection_count: usize, // 阈值以上的检测数 (全部类别)
    pub live_tracks: usize,
    pub missed_deadlines: u64,
    pub detector_failures: u64,
    pub sink_failures: u64,
}

/// 单tick状态快照
#[derive(Clone, Debug)]
pub struct PipelineSnapshot {
    pub tick: u64,
    pub frame_seq: u64,
    pub posture: Posture,
    pub mode: ProtectionMode,
    pub regions: Vec<TrackedThreat>,
    /// 调试可视化用的原始观测 (仅DebugSuspended)
    pub observations: Vec<Observation>,
    /// 锁定倒计时 (整秒)
    pub lockout_remaining_secs: Option<u64>,
    pub metrics: PipelineMetrics,
    /// 本tick写入输出端的帧
    pub output: Arc<RgbaImage>,
}

impl PipelineSnapshot {
    pub fn initial(mode: ProtectionMode) -> Self {
        Self {
            tick: 0,
            frame_seq: 0,
            posture: Posture::Armed,
            mode,
            regions: Vec::new(),
            observations: Vec::new(),
            lockout_remaining_secs: None,
            metrics: PipelineMetrics::default(),
            output: Arc::new(RgbaImage::new(0, 0)),
        }
    }
}

/// 向上取整到秒, 显示 "10s" 而不是 "9s"
pub fn countdown_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

type Latest = Arc<Mutex<Arc<PipelineSnapshot>>>;

/// 发布端 (处理线程独占)
pub struct SnapshotBus {
    latest: Latest,
    tx: Sender<Arc<PipelineSnapshot>>,
    dropped: u64,
}

/// 订阅端 (展示层)
#[derive(Clone)]
pub struct SnapshotReader {
    latest: Latest,
    rx: Receiver<Arc<PipelineSnapshot>>,
}

pub fn snapshot_bus(capacity: usize, mode: ProtectionMode) -> (SnapshotBus, SnapshotReader) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let latest = Arc::new(Mutex::new(Arc::new(PipelineSnapshot::initial(mode))));
    (
        SnapshotBus {
            latest: latest.clone(),
            tx,
            dropped: 0,
        },
        SnapshotReader { latest, rx },
    )
}

impl SnapshotBus {
    /// 更新最新快照并尝试推送, 订阅端跟不上时丢弃推送 (最新快照仍可读)
    pub fn publish(&mut self, snapshot: PipelineSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        match self.tx.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl SnapshotReader {
    pub fn latest(&self) -> Arc<PipelineSnapshot> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<PipelineSnapshot>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_iter(&self) -> impl Iterator<Item = Arc<PipelineSnapshot>> + '_ {
        self.rx.try_iter()
    }
}
