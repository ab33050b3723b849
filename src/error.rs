// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型

use thiserror::Error;

use crate::security::Posture;

/// 配置校验/读写错误. 校验失败时保留原配置, 不做静默钳位
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("置信度阈值必须在 [0, 1] 内: {0}")]
    ConfidenceOutOfRange(f32),

    #[error("持续帧数必须在 1..=5 内: {0}")]
    PersistenceOutOfRange(u32),

    #[error("锁定时长必须为非负有限值: {0}")]
    InvalidLockout(f64),

    #[error("锁定时长不能超过3600秒: {0}")]
    LockoutTooLong(f64),

    #[error("推理预算必须大于0毫秒")]
    ZeroInferenceBudget,

    #[error("威胁类别列表不能为空")]
    NoThreatClasses,

    #[error("配置文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置文件解析失败: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 当前姿态下不允许的状态切换
#[derive(Debug, Error, PartialEq, Eq)]
#[error("状态 {from:?} 不允许切换到 {to:?}")]
pub struct TransitionError {
    pub from: Posture,
    pub to: Posture,
}
