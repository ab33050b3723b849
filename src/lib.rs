// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 防护配置参数
pub mod control; // 暂停标志与控制命令
pub mod detection; // 检测结果过滤/门限/跟踪
pub mod error; // 错误类型
pub mod input; // 视频输入与输出端
pub mod pipeline; // 防护流水线
pub mod security; // 安全姿态与审计

pub use crate::config::{ConfigUpdate, ProtectionConfig, ProtectionMode};
pub use crate::control::{control_channel, pause_flag, ControlCommand, PauseFlag, PauseSwitch};
pub use crate::detection::{
    BBox, Detector, Observation, PersistenceGate, RawDetection, ReplayDetector, ThreatTracker,
    TrackedThreat,
};
pub use crate::error::{ConfigError, TransitionError};
pub use crate::input::{Acquisition, CameraHandle, Frame, FrameSource, OutputSink};
pub use crate::pipeline::{FramePipeline, PipelineMetrics, PipelineSnapshot, SnapshotReader, TickOutcome};
pub use crate::security::{AuditEvent, AuditSink, JsonlAuditLog, Posture, PostureMachine};

/// 时间戳字符串, 用于输出文件命名
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}
