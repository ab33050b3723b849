// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// 检测器输出 → 威胁判定:
/// - Normalizer:  置信度过滤
/// - Persistence: 连续帧门限 (Shield)
/// - Tracker:     威胁区域时序跟踪 (Censorship)
pub mod detector;
pub mod normalizer;
pub mod persistence;
pub mod tracker;
pub mod types;

pub use detector::{Detector, ReplayDetector};
pub use normalizer::{max_threat_confidence, normalize, threats};
pub use persistence::{GateEvent, GateState, PersistenceGate};
pub use tracker::{compute_iou, ThreatTracker, TrackedThreat, MATCH_IOU_THRESHOLD, MAX_TRACK_AGE, ROI_MARGIN};
pub use types::{class_label, BBox, Observation, RawDetection, CELL_PHONE_CLASS};
