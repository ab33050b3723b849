// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 镜头卫士 (Lens Sentinel)
//!
//! 实时镜头防护: 检测画面中的拍摄设备, 遮黑或模糊后再送往虚拟摄像头
//!
//! 系统架构:
//! 1. 采集线程: 独占视频源, 只保留最新帧
//! 2. 处理线程: 限时检测 + 安全姿态 + 渲染输出
//! 3. 主线程:   订阅快照, 日志与预览 (展示层)

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lensblock_rs::input::{ImageSequenceSource, NullSink, PngSequenceSink};
use lensblock_rs::pipeline::{annotate_debug, annotate_preview, snapshot_bus, PipelineSnapshot};
use lensblock_rs::{
    control_channel, pause_flag, Acquisition, CameraHandle, ConfigUpdate, ControlCommand,
    FramePipeline, JsonlAuditLog, OutputSink, PauseSwitch, Posture, ProtectionConfig,
    ProtectionMode, ReplayDetector, SnapshotReader,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 镜头卫士参数
#[derive(Parser, Debug)]
#[command(author, version, about = "镜头卫士 - 实时镜头防护", long_about = None)]
struct Args {
    /// 输入帧目录 (按文件名顺序回放)
    #[arg(short, long)]
    frames: PathBuf,

    /// 检测结果回放脚本 (JSON Lines)
    #[arg(short, long)]
    detections: Option<PathBuf>,

    /// 配置文件路径
    #[arg(short, long, default_value = "lensblock_config.json")]
    config: PathBuf,

    /// 防护模式覆盖: shield / censorship
    #[arg(short, long)]
    mode: Option<ProtectionMode>,

    /// 置信度阈值覆盖
    #[arg(long)]
    threshold: Option<f32>,

    /// 连续命中帧数覆盖 (1-5)
    #[arg(long)]
    persistence: Option<u32>,

    /// 输入帧率
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// 循环播放输入
    #[arg(long = "loop", default_value_t = false)]
    looping: bool,

    /// 处理到第N帧后停止
    #[arg(long)]
    max_frames: Option<u64>,

    /// 输出帧目录 (模拟虚拟摄像头); 不指定则丢弃输出
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// 输出帧保存间隔
    #[arg(long, default_value_t = 1)]
    output_every: u64,

    /// 标注预览目录
    #[arg(long)]
    preview_dir: Option<PathBuf>,

    /// 预览保存间隔 (tick)
    #[arg(long, default_value_t = 30)]
    preview_every: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // ========== 配置 ==========
    let mut config = ProtectionConfig::load(&args.config);
    config
        .apply(&ConfigUpdate {
            confidence_threshold: args.threshold,
            persistence_frames: args.persistence,
            protection_mode: args.mode,
            ..Default::default()
        })
        .context("命令行参数无效")?;

    info!("🚀 镜头卫士启动");
    info!("📹 输入目录: {}", args.frames.display());
    config.print_summary();

    // ========== 视频源 / 检测器 / 输出端 ==========
    let source = ImageSequenceSource::open(&args.frames, args.fps, args.looping)?;
    let period = source.len() as u64;
    let detector = match &args.detections {
        Some(path) => {
            let replay = ReplayDetector::load(path)?;
            info!("📦 回放脚本: {} ({} 帧有检测)", path.display(), replay.frame_count());
            if args.looping {
                replay.with_period(period)
            } else {
                replay
            }
        }
        None => {
            warn!("⚠️  未指定检测脚本, 检测器不会产出任何结果");
            ReplayDetector::new(HashMap::new())
        }
    };
    let sink: Box<dyn OutputSink> = match &args.output_dir {
        Some(dir) => Box::new(PngSequenceSink::create(dir, args.output_every)?),
        None => Box::new(NullSink::default()),
    };
    let audit_path = PathBuf::from(&config.audit_log_path);
    let audit = JsonlAuditLog::open(audit_path.clone())?;
    info!("📝 审计日志: {}", audit.path().display());

    // ========== 通道 ==========
    let (commands_tx, commands_rx) = control_channel();
    let (pause_switch, pause) = pause_flag();
    let (bus, reader) = snapshot_bus(8, config.protection_mode);
    let stop = Arc::new(AtomicBool::new(false));

    // ========== 启动采集线程 ==========
    let handle = CameraHandle::acquire(source);
    let (acquisition, frames) = Acquisition::spawn(handle, stop.clone())?;

    // ========== 启动处理线程 ==========
    let pipeline = FramePipeline::new(config, Box::new(detector), sink, bus, commands_rx, pause)?
        .with_audit(Box::new(audit));
    let processing = std::thread::Builder::new()
        .name("processing".into())
        .spawn(move || pipeline.run(frames))
        .context("处理线程创建失败")?;

    spawn_hotkeys(commands_tx, pause_switch, reader.clone());

    // ========== 主线程: 展示层 ==========
    if let Some(dir) = &args.preview_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("无法创建预览目录: {}", dir.display()))?;
    }
    info!("✅ 系统就绪,开始监控... (热键: p=暂停 m=切换模式 d=调试 t <阈值> n <帧数>)");

    let mut last_posture = Posture::Armed;
    loop {
        match reader.recv_timeout(Duration::from_millis(200)) {
            Ok(snapshot) => {
                if snapshot.posture != last_posture {
                    info!("🧭 姿态: {} → {}", last_posture.label(), snapshot.posture.label());
                    last_posture = snapshot.posture;
                }
                if let Some(secs) = snapshot.lockout_remaining_secs {
                    tracing::debug!("🔒 锁定剩余 {}s", secs);
                }
                if snapshot.tick % 100 == 0 {
                    log_metrics(&snapshot);
                }
                if let Some(dir) = &args.preview_dir {
                    if snapshot.tick % args.preview_every.max(1) == 0 {
                        save_preview(dir, &snapshot);
                    }
                }
                if args.max_frames.is_some_and(|max| snapshot.frame_seq >= max) {
                    stop.store(true, Ordering::Relaxed);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if processing.is_finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // ========== 退出 ==========
    stop.store(true, Ordering::Relaxed);
    let capture = acquisition.join();
    let metrics = processing
        .join()
        .map_err(|_| anyhow::anyhow!("处理线程崩溃"))?;
    info!(
        "📊 采集 {} 帧 (替换 {}, 失败 {}), 处理 {} ticks, 推理超时 {}, 输出失败 {}",
        capture.captured,
        capture.replaced,
        capture.errors,
        metrics.ticks,
        metrics.missed_deadlines,
        metrics.sink_failures
    );
    print_recent_incidents(&audit_path);
    Ok(())
}

fn log_metrics(snapshot: &PipelineSnapshot) {
    let m = &snapshot.metrics;
    info!(
        "📈 tick {} | {} | {} | FPS {:.1} | 推理 {:.1}ms | 检测 {} | 轨迹 {} | 超时 {}",
        snapshot.tick,
        snapshot.mode.tag(),
        snapshot.posture.label(),
        m.fps,
        m.inference_ms,
        m.detection_count,
        m.live_tracks,
        m.missed_deadlines
    );
}

fn save_preview(dir: &Path, snapshot: &PipelineSnapshot) {
    let preview = if snapshot.posture == Posture::DebugSuspended {
        annotate_debug(&snapshot.output, &snapshot.observations)
    } else {
        annotate_preview(&snapshot.output, &snapshot.regions)
    };
    let path = dir.join(format!("preview_{}_{:06}.png", lensblock_rs::gen_time_string(""), snapshot.frame_seq));
    if let Err(e) = preview.save(&path) {
        warn!("⚠️  预览保存失败 {}: {}", path.display(), e);
    }
}

fn print_recent_incidents(path: &Path) {
    let log = match JsonlAuditLog::open(path) {
        Ok(log) => log,
        Err(e) => {
            warn!("⚠️  无法读取审计日志: {:#}", e);
            return;
        }
    };
    match log.recent(5) {
        Ok(events) if events.is_empty() => info!("📋 本地审计日志无事件"),
        Ok(events) => {
            info!("📋 最近事件:");
            for e in events {
                info!(
                    "  {} {:?} [{}] {} {:.0}% {:.1}s",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.kind,
                    e.mode.tag(),
                    e.threat_type,
                    e.confidence * 100.0,
                    e.duration_secs
                );
            }
        }
        Err(e) => warn!("⚠️  审计日志解析失败: {:#}", e),
    }
}

/// 热键解析结果
#[derive(Debug, PartialEq)]
enum Hotkey {
    TogglePause,
    Command(ControlCommand),
    Invalid(String),
    Empty,
}

/// 切换类热键以处理线程最新快照为准
fn hotkey_command(line: &str, current: &PipelineSnapshot) -> Hotkey {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("p"), _) => Hotkey::TogglePause,
        (Some("m"), _) => Hotkey::Command(ControlCommand::SetMode(current.mode.toggled())),
        (Some("d"), _) => Hotkey::Command(ControlCommand::SetDebug(current.posture != Posture::DebugSuspended)),
        (Some("t"), Some(v)) => match v.parse::<f32>() {
            Ok(v) => Hotkey::Command(ControlCommand::UpdateConfig(ConfigUpdate {
                confidence_threshold: Some(v),
                ..Default::default()
            })),
            Err(_) => Hotkey::Invalid(format!("无效阈值: {}", v)),
        },
        (Some("n"), Some(v)) => match v.parse::<u32>() {
            Ok(v) => Hotkey::Command(ControlCommand::UpdateConfig(ConfigUpdate {
                persistence_frames: Some(v),
                ..Default::default()
            })),
            Err(_) => Hotkey::Invalid(format!("无效帧数: {}", v)),
        },
        (Some(other), _) => Hotkey::Invalid(format!("未知命令: {}", other)),
        (None, _) => Hotkey::Empty,
    }
}

/// 标准输入热键: 每行一条命令
fn spawn_hotkeys(commands: Sender<ControlCommand>, pause: PauseSwitch, reader: SnapshotReader) {
    let spawned = std::thread::Builder::new()
        .name("hotkeys".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let command = match hotkey_command(&line, &reader.latest()) {
                    Hotkey::TogglePause => {
                        let paused = pause.toggle();
                        info!("{}", if paused { "⏸️  请求暂停" } else { "▶️  请求恢复" });
                        continue;
                    }
                    Hotkey::Command(command) => command,
                    Hotkey::Invalid(reason) => {
                        warn!("⚠️  {}", reason);
                        continue;
                    }
                    Hotkey::Empty => continue,
                };
                if commands.try_send(command).is_err() {
                    warn!("⚠️  控制队列已满或处理线程已退出");
                }
            }
        });
    if let Err(e) = spawned {
        warn!("⚠️  热键线程创建失败: {}", e);
    }
}
