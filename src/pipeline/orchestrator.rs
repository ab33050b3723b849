// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧流水线调度 (Frame Pipeline Orchestrator)
//!
//! 每个tick: 控制命令 → 暂停采样 → 限时检测 → 过滤 → 门限/跟踪 → 姿态 → 渲染 → 输出.
//! 处理线程是姿态, 门限计数, 轨迹集合与安全帧缓存的唯一写者.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel::Receiver;
use image::RgbaImage;
use tracing::{debug, error, info, warn};

use super::cache::{SafeFrame, SafeFrameCache};
use super::deadline::{DeadlineDetector, DetectOutcome};
use super::render;
use super::snapshot::{countdown_secs, PipelineMetrics, PipelineSnapshot, SnapshotBus};
use crate::config::{ProtectionConfig, ProtectionMode};
use crate::control::{ControlCommand, PauseFlag};
use crate::detection::{
    class_label, normalize, threats, Detector, GateEvent, Observation, PersistenceGate,
    RawDetection, ThreatTracker, TrackedThreat,
};
use crate::input::{Frame, OutputSink};
use crate::security::{AuditEvent, AuditKind, AuditSink, Posture, PostureMachine, PostureTransition, ThreatSignal};

/// 单个tick的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 评估并渲染, 缓存已更新
    Rendered,
    /// Paused/DebugSuspended, 原帧直通
    Passthrough,
    /// 推理超时, 重发缓存帧
    DeadlineMissed,
    /// 检测器报错, 重发缓存帧
    DetectorFailed,
    /// tick内部崩溃, 重发缓存帧
    Faulted,
}

pub struct FramePipeline {
    config: ProtectionConfig,
    detector: DeadlineDetector,
    sink: Box<dyn OutputSink>,
    audit: Option<Box<dyn AuditSink>>,
    bus: SnapshotBus,
    commands: Receiver<ControlCommand>,
    pause: PauseFlag,
    was_paused: bool,

    gate: PersistenceGate,
    tracker: ThreatTracker,
    posture: PostureMachine,
    cache: SafeFrameCache,

    tick: u64,
    metrics: PipelineMetrics,
    fps_window_start: Instant,
    fps_window_ticks: u64,
}

impl FramePipeline {
    pub fn new(
        config: ProtectionConfig,
        detector: Box<dyn Detector>,
        sink: Box<dyn OutputSink>,
        bus: SnapshotBus,
        commands: Receiver<ControlCommand>,
        pause: PauseFlag,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let detector = DeadlineDetector::spawn(detector)?;
        Ok(Self {
            gate: PersistenceGate::new(config.persistence_frames),
            config,
            detector,
            sink,
            audit: None,
            bus,
            commands,
            pause,
            was_paused: false,
            tracker: ThreatTracker::new(),
            posture: PostureMachine::new(),
            cache: SafeFrameCache::new(),
            tick: 0,
            metrics: PipelineMetrics::default(),
            fps_window_start: Instant::now(),
            fps_window_ticks: 0,
        })
    }

    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    pub fn posture(&self) -> Posture {
        self.posture.posture()
    }

    pub fn cache(&self) -> &SafeFrameCache {
        &self.cache
    }

    pub fn tracks(&self) -> &[TrackedThreat] {
        self.tracker.tracks()
    }

    pub fn gate(&self) -> &PersistenceGate {
        &self.gate
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// 处理线程主循环, 帧通道关闭后返回统计
    pub fn run(mut self, frames: Receiver<Frame>) -> PipelineMetrics {
        info!(
            "🛡️  处理线程启动: 模式={} 阈值={:.2} 推理时限={}ms",
            self.config.protection_mode.tag(),
            self.config.confidence_threshold,
            self.config.inference_budget_ms
        );
        for frame in frames.iter() {
            self.tick_guarded(&frame);
        }
        info!(
            "✅ 处理线程退出: {} ticks, 超时 {}, 输出失败 {}",
            self.metrics.ticks, self.metrics.missed_deadlines, self.metrics.sink_failures
        );
        self.metrics
    }

    /// 带崩溃保护的tick: 崩溃时姿态保持原值, 输出缓存帧
    pub fn tick_guarded(&mut self, frame: &Frame) -> TickOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.tick(frame))) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("❌ tick #{} 内部错误, 重发安全帧 (姿态: {})", frame.seq, self.posture.posture().label());
                if panic::catch_unwind(AssertUnwindSafe(|| self.emit_fallback(frame))).is_err() {
                    error!("❌ 安全帧重发失败");
                }
                TickOutcome::Faulted
            }
        }
    }

    pub fn tick(&mut self, frame: &Frame) -> TickOutcome {
        self.tick += 1;
        self.metrics.ticks = self.tick;

        // 1. tick边界: 命令与暂停
        self.apply_commands();
        self.sync_pause();

        match self.posture.posture() {
            Posture::Paused => self.passthrough(frame, Vec::new()),
            Posture::DebugSuspended => {
                // 只为可视化检测, 不评估
                let observations = match self.run_detection(frame) {
                    Ok(raw) => normalize(&raw, self.config.confidence_threshold),
                    Err(_) => Vec::new(),
                };
                self.passthrough(frame, observations)
            }
            _ => self.protect(frame),
        }
    }

    fn protect(&mut self, frame: &Frame) -> TickOutcome {
        // 2. 限时检测, 失败则不评估
        let raw = match self.run_detection(frame) {
            Ok(raw) => raw,
            Err(outcome) => {
                self.emit_fallback(frame);
                return outcome;
            }
        };

        // 3. 过滤
        let observations = normalize(&raw, self.config.confidence_threshold);
        self.metrics.detection_count = observations.len();
        let threat_obs: Vec<Observation> = threats(&observations, &self.config.threat_classes)
            .copied()
            .collect();
        let strongest = threat_obs
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
        let confidence = strongest.map(|o| o.confidence).unwrap_or(0.0);
        let class_id = strongest.map(|o| o.class_id);

        // 4. 门限 / 跟踪
        let mode = self.config.protection_mode;
        let signal = match mode {
            ProtectionMode::Shield => {
                let event = self.gate.update(!threat_obs.is_empty());
                ThreatSignal {
                    confirmed: event == GateEvent::Qualified,
                    present: !threat_obs.is_empty(),
                    confidence,
                    class_id,
                }
            }
            ProtectionMode::Censorship => {
                let live = self.tracker.update(&threat_obs, frame.width(), frame.height()).len();
                ThreatSignal {
                    confirmed: live > 0,
                    present: live > 0,
                    confidence,
                    class_id: class_id.or_else(|| self.tracker.tracks().first().map(|t| t.class_id)),
                }
            }
        };

        // 5. 姿态
        if let Some(transition) = self
            .posture
            .evaluate(signal, frame.captured_at, self.config.lockout_duration())
        {
            self.on_transition(transition);
        }

        // 6. 渲染 → 缓存 → 输出
        let regions = match mode {
            ProtectionMode::Censorship => self.tracker.tracks().to_vec(),
            ProtectionMode::Shield => Vec::new(),
        };
        let output = Arc::new(render::render_output(
            &frame.image,
            self.posture.posture(),
            mode,
            &regions,
        ));
        self.cache.store(SafeFrame {
            seq: frame.seq,
            image: output.clone(),
        });
        self.write_sink(frame.seq, &output);
        self.publish(frame, output, regions, Vec::new());
        TickOutcome::Rendered
    }

    /// 不评估, 原帧输出, 缓存同步更新
    fn passthrough(&mut self, frame: &Frame, observations: Vec<Observation>) -> TickOutcome {
        self.metrics.detection_count = observations.len();
        let output = frame.image.clone();
        self.cache.store(SafeFrame {
            seq: frame.seq,
            image: output.clone(),
        });
        self.write_sink(frame.seq, &output);
        self.publish(frame, output, Vec::new(), observations);
        TickOutcome::Passthrough
    }

    fn run_detection(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, TickOutcome> {
        let budget = self.config.inference_budget();
        match self
            .detector
            .detect(frame, self.config.confidence_threshold, budget)
        {
            DetectOutcome::Completed { detections, elapsed } => {
                self.metrics.inference_ms = elapsed.as_secs_f64() * 1000.0;
                Ok(detections)
            }
            DetectOutcome::TimedOut => {
                self.metrics.missed_deadlines += 1;
                warn!("⏱️  帧 #{} 推理超时 (>{}ms), 重发安全帧", frame.seq, budget.as_millis());
                Err(TickOutcome::DeadlineMissed)
            }
            DetectOutcome::Busy => {
                self.metrics.missed_deadlines += 1;
                debug!("帧 #{} 跳过: 上一次推理未返回", frame.seq);
                Err(TickOutcome::DeadlineMissed)
            }
            DetectOutcome::Failed(e) => {
                self.metrics.detector_failures += 1;
                warn!("⚠️  帧 #{} 检测失败: {}", frame.seq, e);
                Err(TickOutcome::DetectorFailed)
            }
        }
    }

    /// 重发缓存帧 (缓存为空则全黑), 缓存本身不变
    fn emit_fallback(&mut self, frame: &Frame) {
        let output = self.cache.fallback(frame.width(), frame.height());
        self.write_sink(frame.seq, &output);
        let regions = match self.config.protection_mode {
            ProtectionMode::Censorship => self.tracker.tracks().to_vec(),
            ProtectionMode::Shield => Vec::new(),
        };
        self.publish(frame, output, regions, Vec::new());
    }

    fn write_sink(&mut self, seq: u64, image: &RgbaImage) {
        if let Err(e) = self.sink.write(seq, image) {
            self.metrics.sink_failures += 1;
            warn!("⚠️  输出帧 #{} 写入失败: {:#}", seq, e);
        }
    }

    fn publish(
        &mut self,
        frame: &Frame,
        output: Arc<RgbaImage>,
        regions: Vec<TrackedThreat>,
        observations: Vec<Observation>,
    ) {
        self.fps_window_ticks += 1;
        let window = self.fps_window_start.elapsed();
        if window >= Duration::from_secs(1) {
            self.metrics.fps = self.fps_window_ticks as f64 / window.as_secs_f64();
            self.fps_window_start = Instant::now();
            self.fps_window_ticks = 0;
        }
        self.metrics.live_tracks = regions.len();

        self.bus.publish(PipelineSnapshot {
            tick: self.tick,
            frame_seq: frame.seq,
            posture: self.posture.posture(),
            mode: self.config.protection_mode,
            regions,
            observations,
            lockout_remaining_secs: self
                .posture
                .lockout_remaining(frame.captured_at)
                .map(countdown_secs),
            metrics: self.metrics.clone(),
            output,
        });
    }

    // ========== 控制 ==========

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::SetMode(mode) => self.switch_mode(mode),
            ControlCommand::UpdateConfig(update) => {
                let previous_mode = self.config.protection_mode;
                match self.config.apply(&update) {
                    Ok(()) => {
                        self.gate.set_required(self.config.persistence_frames);
                        info!(
                            "🎛️  配置已更新: 阈值={:.2} 连续帧={} 锁定={:.1}s",
                            self.config.confidence_threshold,
                            self.config.persistence_frames,
                            self.config.lockout_duration_secs
                        );
                        if self.config.protection_mode != previous_mode {
                            self.reset_memory();
                            info!("🔄 防护模式: {} → {}", previous_mode.tag(), self.config.protection_mode.tag());
                        }
                    }
                    Err(e) => warn!("⚠️  配置更新被拒绝, 保留原值: {}", e),
                }
            }
            ControlCommand::SetDebug(enabled) => match self.posture.set_debug(enabled, self.was_paused) {
                Ok(()) => {
                    self.reset_memory();
                    info!("🐞 调试可视化: {}", if enabled { "开启" } else { "关闭" });
                }
                Err(e) => warn!("⚠️  调试切换被拒绝: {}", e),
            },
        }
    }

    fn switch_mode(&mut self, mode: ProtectionMode) {
        let previous = self.config.protection_mode;
        if previous == mode {
            return;
        }
        self.config.protection_mode = mode;
        self.reset_memory();
        info!("🔄 防护模式: {} → {}", previous.tag(), mode.tag());
    }

    /// 暂停标志按边沿处理, tick中途不生效
    fn sync_pause(&mut self) {
        let paused = self.pause.sample();
        if paused == self.was_paused {
            return;
        }
        self.was_paused = paused;
        if paused {
            let previous = self.posture.pause();
            self.reset_memory();
            info!("⏸️  监控已暂停 (之前: {})", previous.label());
        } else {
            match self.posture.resume() {
                Ok(()) => {
                    self.reset_memory();
                    info!("▶️  监控已恢复");
                }
                Err(e) => warn!("⚠️  恢复被忽略: {}", e),
            }
        }
    }

    fn reset_memory(&mut self) {
        self.gate.reset();
        self.tracker.reset();
    }

    // ========== 事件 ==========

    fn on_transition(&mut self, transition: PostureTransition) {
        let mode = self.config.protection_mode.tag();
        match transition {
            PostureTransition::Triggered { confidence, class_id } => {
                info!(
                    "🚨 威胁确认 [{}]: {} ({:.0}%)",
                    mode,
                    class_id.map(class_label).unwrap_or("unknown"),
                    confidence * 100.0
                );
                self.record_audit(AuditKind::Triggered, confidence, 0.0, class_id);
            }
            PostureTransition::LockoutStarted { remaining } => {
                info!("🔒 威胁消失, 锁定 {:.1}s", remaining.as_secs_f64());
            }
            PostureTransition::Reconfirmed => {
                info!("🚨 锁定期间威胁再次出现, 计时刷新");
            }
            PostureTransition::Cleared {
                duration,
                max_confidence,
                class_id,
            } => {
                info!(
                    "✅ 解除锁定 [{}]: 持续 {:.1}s, 最高置信度 {:.0}%",
                    mode,
                    duration.as_secs_f64(),
                    max_confidence * 100.0
                );
                self.record_audit(AuditKind::Cleared, max_confidence, duration.as_secs_f64(), class_id);
            }
        }
    }

    fn record_audit(&mut self, kind: AuditKind, confidence: f32, duration_secs: f64, class_id: Option<u32>) {
        if !self.config.enable_forensic_logging {
            return;
        }
        let Some(audit) = self.audit.as_mut() else {
            return;
        };
        let event = AuditEvent {
            kind,
            timestamp: Local::now(),
            confidence,
            duration_secs,
            mode: self.config.protection_mode,
            threat_type: class_id.map(class_label).unwrap_or("unknown").to_string(),
        };
        if let Err(e) = audit.record(&event) {
            warn!("⚠️  审计日志写入失败: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigUpdate;
    use crate::control::{control_channel, pause_flag, PauseSwitch};
    use crate::detection::{BBox, CELL_PHONE_CLASS};
    use crate::pipeline::snapshot::{snapshot_bus, SnapshotReader};
    use crate::security::MemoryAuditLog;
    use crossbeam_channel::Sender;
    use image::Rgba;
    use std::sync::Mutex;

    type Written = Arc<Mutex<Vec<(u64, RgbaImage)>>>;

    struct RecordingSink {
        written: Written,
    }

    impl OutputSink for RecordingSink {
        fn write(&mut self, seq: u64, image: &RgbaImage) -> anyhow::Result<()> {
            self.written.lock().unwrap().push((seq, image.clone()));
            Ok(())
        }
    }

    struct FailingSink;

    impl OutputSink for FailingSink {
        fn write(&mut self, _: u64, _: &RgbaImage) -> anyhow::Result<()> {
            anyhow::bail!("虚拟摄像头未连接")
        }
    }

    struct Harness {
        pipeline: FramePipeline,
        written: Written,
        reader: SnapshotReader,
        commands: Sender<ControlCommand>,
        pause: PauseSwitch,
        base: Instant,
    }

    impl Harness {
        /// 第seq帧, 采集时间 base + seq*100ms
        fn frame(&self, seq: u64) -> Frame {
            let image = RgbaImage::from_fn(32, 32, |x, y| {
                let v = ((x * 7 + y * 13 + seq as u32) % 256) as u8;
                Rgba([v, 255 - v, v / 2, 255])
            });
            Frame::new(seq, self.base + Duration::from_millis(100 * seq), Arc::new(image))
        }

        fn tick(&mut self, seq: u64) -> TickOutcome {
            let frame = self.frame(seq);
            self.pipeline.tick_guarded(&frame)
        }

        fn last_written(&self) -> RgbaImage {
            self.written.lock().unwrap().last().unwrap().1.clone()
        }
    }

    fn phone(confidence: f32) -> RawDetection {
        RawDetection::new(CELL_PHONE_CLASS, confidence, BBox::from_xywh(8.0, 8.0, 8.0, 8.0))
    }

    fn config(mode: ProtectionMode, persistence: u32) -> ProtectionConfig {
        ProtectionConfig {
            protection_mode: mode,
            persistence_frames: persistence,
            confidence_threshold: 0.75,
            lockout_duration_secs: 1.0,
            inference_budget_ms: 1_000,
            ..Default::default()
        }
    }

    fn harness<D: Detector + 'static>(config: ProtectionConfig, detector: D) -> Harness {
        let written: Written = Arc::default();
        let (bus, reader) = snapshot_bus(64, config.protection_mode);
        let (tx, rx) = control_channel();
        let (switch, flag) = pause_flag();
        let pipeline = FramePipeline::new(
            config,
            Box::new(detector),
            Box::new(RecordingSink {
                written: written.clone(),
            }),
            bus,
            rx,
            flag,
        )
        .unwrap();
        Harness {
            pipeline,
            written,
            reader,
            commands: tx,
            pause: switch,
            base: Instant::now(),
        }
    }

    /// 指定帧序号出现手机
    fn phone_on(frames: &'static [u64]) -> impl FnMut(&Frame, f32) -> anyhow::Result<Vec<RawDetection>> + Send {
        move |f: &Frame, _: f32| Ok(if frames.contains(&f.seq) { vec![phone(0.9)] } else { Vec::new() })
    }

    #[test]
    fn test_shield_triggers_on_third_frame() {
        let mut h = harness(config(ProtectionMode::Shield, 3), phone_on(&[1, 2, 3]));
        h.tick(1);
        assert_eq!(h.pipeline.posture(), Posture::Armed);
        h.tick(2);
        assert_eq!(h.pipeline.posture(), Posture::Armed);
        h.tick(3);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
        // 触发后输出全黑
        assert!(h.last_written().pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
    }

    #[test]
    fn test_below_threshold_never_triggers() {
        let detector = |_: &Frame, _: f32| -> anyhow::Result<Vec<RawDetection>> { Ok(vec![phone(0.7)]) };
        let mut h = harness(config(ProtectionMode::Shield, 1), detector);
        for seq in 1..=5 {
            h.tick(seq);
        }
        assert_eq!(h.pipeline.posture(), Posture::Armed);
    }

    #[test]
    fn test_shield_lockout_holds_until_deadline() {
        let mut h = harness(config(ProtectionMode::Shield, 1), phone_on(&[1]));
        h.tick(1);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
        // t=0.2s 威胁消失, 锁定到 1.2s
        h.tick(2);
        assert_eq!(h.pipeline.posture(), Posture::Lockout);
        for seq in 3..=11 {
            h.tick(seq);
            assert_eq!(h.pipeline.posture(), Posture::Lockout, "frame {}", seq);
            assert!(h.last_written().pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
        }
        assert_eq!(h.reader.latest().lockout_remaining_secs, Some(1));
        h.tick(12);
        assert_eq!(h.pipeline.posture(), Posture::Armed);
        assert_eq!(h.last_written(), *h.frame(12).image);
    }

    #[test]
    fn test_lockout_reentry_refreshes_timer() {
        let mut h = harness(config(ProtectionMode::Shield, 1), phone_on(&[1, 5]));
        h.tick(1);
        h.tick(2);
        assert_eq!(h.pipeline.posture(), Posture::Lockout);
        h.tick(5);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
        h.tick(6);
        // 新锁定到 0.6 + 1.0 = 1.6s
        for seq in 7..=15 {
            h.tick(seq);
            assert_eq!(h.pipeline.posture(), Posture::Lockout, "frame {}", seq);
        }
        h.tick(16);
        assert_eq!(h.pipeline.posture(), Posture::Armed);
    }

    #[test]
    fn test_censorship_track_survives_gap() {
        let mut h = harness(config(ProtectionMode::Censorship, 3), phone_on(&[1, 2, 3, 4, 5, 9]));
        h.tick(1);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
        let id = h.reader.latest().regions[0].id;
        for seq in 2..=9 {
            h.tick(seq);
            let snap = h.reader.latest();
            assert_eq!(snap.regions.len(), 1, "frame {}", seq);
            assert_eq!(snap.regions[0].id, id);
            assert_eq!(snap.posture, Posture::Triggered);
        }
        assert_eq!(h.pipeline.tracks()[0].age, 0);
    }

    #[test]
    fn test_censorship_blurs_region_only() {
        let mut h = harness(config(ProtectionMode::Censorship, 3), phone_on(&[1]));
        h.tick(1);
        let out = h.last_written();
        let raw = h.frame(1);
        // 区域外像素未改动
        assert_eq!(out.get_pixel(0, 0), raw.image.get_pixel(0, 0));
        assert_eq!(out.get_pixel(31, 31), raw.image.get_pixel(31, 31));
        assert_ne!(out, *raw.image);
    }

    #[test]
    fn test_deadline_miss_resends_cached_frame() {
        let detector = |f: &Frame, _: f32| -> anyhow::Result<Vec<RawDetection>> {
            if f.seq == 2 {
                std::thread::sleep(Duration::from_millis(400));
            }
            Ok(Vec::new())
        };
        let mut cfg = config(ProtectionMode::Shield, 3);
        cfg.inference_budget_ms = 100;
        let mut h = harness(cfg, detector);

        assert_eq!(h.tick(1), TickOutcome::Rendered);
        let cached = h.pipeline.cache().get().unwrap().image.clone();
        let stores = h.pipeline.cache().store_count();

        assert_eq!(h.tick(2), TickOutcome::DeadlineMissed);
        assert_eq!(h.pipeline.cache().store_count(), stores);
        assert!(Arc::ptr_eq(&h.pipeline.cache().get().unwrap().image, &cached));
        assert_eq!(h.last_written(), *cached);

        // 第2帧推理仍未返回
        assert_eq!(h.tick(3), TickOutcome::DeadlineMissed);
        assert_eq!(h.last_written(), *cached);

        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(h.tick(4), TickOutcome::Rendered);
        assert_eq!(h.pipeline.metrics().missed_deadlines, 2);
    }

    #[test]
    fn test_first_frame_failure_emits_blackout() {
        let detector = |_: &Frame, _: f32| -> anyhow::Result<Vec<RawDetection>> { anyhow::bail!("模型未加载") };
        let mut h = harness(config(ProtectionMode::Censorship, 3), detector);
        assert_eq!(h.tick(1), TickOutcome::DetectorFailed);
        assert!(h.pipeline.cache().get().is_none());
        let out = h.last_written();
        assert_eq!(out.dimensions(), (32, 32));
        assert!(out.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
        assert_eq!(h.pipeline.posture(), Posture::Armed);
    }

    #[test]
    fn test_invalid_update_keeps_previous_config() {
        let mut h = harness(config(ProtectionMode::Shield, 3), phone_on(&[]));
        h.commands
            .send(ControlCommand::UpdateConfig(ConfigUpdate {
                persistence_frames: Some(2),
                confidence_threshold: Some(1.5),
                ..Default::default()
            }))
            .unwrap();
        h.tick(1);
        assert_eq!(h.pipeline.config().persistence_frames, 3);
        assert_eq!(h.pipeline.config().confidence_threshold, 0.75);

        h.commands
            .send(ControlCommand::UpdateConfig(ConfigUpdate {
                persistence_frames: Some(2),
                ..Default::default()
            }))
            .unwrap();
        h.tick(2);
        assert_eq!(h.pipeline.config().persistence_frames, 2);
        assert_eq!(h.pipeline.gate().required(), 2);
    }

    #[test]
    fn test_pause_passes_through_and_resume_rearms() {
        let detector = |_: &Frame, _: f32| -> anyhow::Result<Vec<RawDetection>> { Ok(vec![phone(0.9)]) };
        let mut h = harness(config(ProtectionMode::Shield, 3), detector);
        h.tick(1);
        h.tick(2);
        assert_eq!(h.pipeline.gate().counter(), 2);

        h.pause.pause();
        assert_eq!(h.tick(3), TickOutcome::Passthrough);
        assert_eq!(h.pipeline.posture(), Posture::Paused);
        assert_eq!(h.last_written(), *h.frame(3).image);
        assert_eq!(h.pipeline.gate().counter(), 0);

        h.pause.resume();
        h.tick(4);
        assert_eq!(h.pipeline.posture(), Posture::Armed);
        assert_eq!(h.pipeline.gate().counter(), 1);
        h.tick(5);
        h.tick(6);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
    }

    #[test]
    fn test_debug_rejected_while_triggered() {
        let mut h = harness(config(ProtectionMode::Shield, 1), phone_on(&[1, 2]));
        h.tick(1);
        h.commands.send(ControlCommand::SetDebug(true)).unwrap();
        h.tick(2);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
    }

    #[test]
    fn test_debug_mode_reports_observations_without_trigger() {
        let detector = |_: &Frame, _: f32| -> anyhow::Result<Vec<RawDetection>> { Ok(vec![phone(0.9)]) };
        let mut h = harness(config(ProtectionMode::Shield, 1), detector);
        h.commands.send(ControlCommand::SetDebug(true)).unwrap();
        for seq in 1..=3 {
            assert_eq!(h.tick(seq), TickOutcome::Passthrough);
        }
        let snap = h.reader.latest();
        assert_eq!(snap.posture, Posture::DebugSuspended);
        assert_eq!(snap.observations.len(), 1);
        h.commands.send(ControlCommand::SetDebug(false)).unwrap();
        h.tick(4);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
    }

    #[test]
    fn test_debug_exit_returns_to_pause_while_flag_set() {
        let detector = |_: &Frame, _: f32| -> anyhow::Result<Vec<RawDetection>> { Ok(vec![phone(0.9)]) };
        let mut h = harness(config(ProtectionMode::Shield, 1), detector);
        h.pause.pause();
        h.tick(1);
        assert_eq!(h.pipeline.posture(), Posture::Paused);
        h.commands.send(ControlCommand::SetDebug(true)).unwrap();
        h.tick(2);
        assert_eq!(h.pipeline.posture(), Posture::DebugSuspended);

        h.commands.send(ControlCommand::SetDebug(false)).unwrap();
        assert_eq!(h.tick(3), TickOutcome::Passthrough);
        assert_eq!(h.pipeline.posture(), Posture::Paused);
        assert_eq!(h.last_written(), *h.frame(3).image);

        h.pause.resume();
        h.tick(4);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
    }

    #[test]
    fn test_huge_lockout_update_keeps_ticking() {
        let mut h = harness(config(ProtectionMode::Shield, 1), phone_on(&[1]));
        h.commands
            .send(ControlCommand::UpdateConfig(ConfigUpdate {
                lockout_duration_secs: Some(1e20),
                ..Default::default()
            }))
            .unwrap();
        assert_ne!(h.tick(1), TickOutcome::Faulted);
        assert_eq!(h.pipeline.config().lockout_duration_secs, 1.0);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
        assert_ne!(h.tick(2), TickOutcome::Faulted);
        assert_eq!(h.pipeline.posture(), Posture::Lockout);
    }

    #[test]
    fn test_mode_switch_clears_tracks() {
        let mut h = harness(config(ProtectionMode::Censorship, 3), phone_on(&[1]));
        h.tick(1);
        assert_eq!(h.pipeline.tracks().len(), 1);
        h.commands
            .send(ControlCommand::SetMode(ProtectionMode::Shield))
            .unwrap();
        h.tick(2);
        assert!(h.pipeline.tracks().is_empty());
        assert_eq!(h.pipeline.config().protection_mode, ProtectionMode::Shield);
    }

    #[test]
    fn test_audit_records_incident() {
        let audit = MemoryAuditLog::new();
        let mut h = harness(config(ProtectionMode::Shield, 1), phone_on(&[1]));
        h.pipeline = h.pipeline.with_audit(Box::new(audit.clone()));
        for seq in 1..=12 {
            h.tick(seq);
        }
        let events = audit.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuditKind::Triggered);
        assert_eq!(events[0].threat_type, "cell phone");
        assert_eq!(events[1].kind, AuditKind::Cleared);
        assert!((events[1].confidence - 0.9).abs() < 1e-6);
        assert!(events[1].duration_secs >= 1.0);
    }

    #[test]
    fn test_forensic_logging_disabled_suppresses_audit() {
        let audit = MemoryAuditLog::new();
        let mut cfg = config(ProtectionMode::Shield, 1);
        cfg.enable_forensic_logging = false;
        let mut h = harness(cfg, phone_on(&[1]));
        h.pipeline = h.pipeline.with_audit(Box::new(audit.clone()));
        h.tick(1);
        assert_eq!(h.pipeline.posture(), Posture::Triggered);
        assert!(audit.events().is_empty());
    }

    #[test]
    fn test_sink_failure_does_not_stop_pipeline() {
        let (bus, _reader) = snapshot_bus(4, ProtectionMode::Shield);
        let (_tx, rx) = control_channel();
        let (_switch, flag) = pause_flag();
        let mut pipeline = FramePipeline::new(
            config(ProtectionMode::Shield, 1),
            Box::new(phone_on(&[2])),
            Box::new(FailingSink),
            bus,
            rx,
            flag,
        )
        .unwrap();
        let base = Instant::now();
        for seq in 1..=3 {
            let frame = Frame::new(seq, base, Arc::new(RgbaImage::new(8, 8)));
            assert_eq!(pipeline.tick_guarded(&frame), TickOutcome::Rendered);
        }
        assert_eq!(pipeline.metrics().sink_failures, 3);
        assert_eq!(pipeline.posture(), Posture::Lockout);
    }

    #[test]
    fn test_run_drains_frame_channel() {
        let (bus, reader) = snapshot_bus(4, ProtectionMode::Shield);
        let (_tx, rx) = control_channel();
        let (_switch, flag) = pause_flag();
        let pipeline = FramePipeline::new(
            config(ProtectionMode::Shield, 3),
            Box::new(phone_on(&[])),
            Box::new(crate::input::NullSink::default()),
            bus,
            rx,
            flag,
        )
        .unwrap();
        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        for seq in 1..=5 {
            frame_tx
                .send(Frame::new(seq, Instant::now(), Arc::new(RgbaImage::new(4, 4))))
                .unwrap();
        }
        drop(frame_tx);
        let metrics = pipeline.run(frame_rx);
        assert_eq!(metrics.ticks, 5);
        assert_eq!(reader.latest().frame_seq, 5);
    }
}
