// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 防护流水线 (Protection Pipeline)
///
/// 三个角色, 通过通道传递不可变消息:
/// - Acquisition:  采集线程独占摄像头, 只保留最新帧
/// - Processing:   限时检测 + 状态机 + 渲染 + 输出 (本模块)
/// - Presentation: 订阅状态快照, 发送控制命令
pub mod cache;
pub mod deadline;
pub mod orchestrator;
pub mod render;
pub mod snapshot;

pub use cache::{SafeFrame, SafeFrameCache};
pub use deadline::{DeadlineDetector, DetectOutcome};
pub use orchestrator::{FramePipeline, TickOutcome};
pub use render::{annotate_debug, annotate_preview, blackout, censor_regions, render_output, BLUR_SIGMA};
pub use snapshot::{countdown_secs, snapshot_bus, PipelineMetrics, PipelineSnapshot, SnapshotBus, SnapshotReader};
