// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 安全系统 (Security System)
///
/// 处理线程独占, 两种防护模式共用:
/// - Posture: 安全姿态状态机 + 锁定计时
/// - Audit:   取证审计日志
pub mod audit;
pub mod posture;

pub use audit::{AuditEvent, AuditKind, AuditSink, JsonlAuditLog, MemoryAuditLog};
pub use posture::{Incident, LockoutTimer, Posture, PostureMachine, PostureTransition, ThreatSignal};
