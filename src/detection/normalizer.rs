// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 观测归一化 (Observation Normalizer)
//! 检测器原始输出 → 置信度过滤后的观测序列

use super::types::{Observation, RawDetection};

/// 丢弃低于阈值的检测, 保持检测器输出顺序 (不重新排序, 保证后续匹配可复现)
pub fn normalize(raw: &[RawDetection], confidence_threshold: f32) -> Vec<Observation> {
    raw.iter()
        // NaN 置信度比较结果为 false, 一并丢弃
        .filter(|det| det.confidence >= confidence_threshold)
        .map(|det| Observation {
            class_id: det.class_id,
            confidence: det.confidence,
            bbox: det.bbox.with_class(det.class_id, det.confidence),
        })
        .collect()
}

/// 只保留威胁类别
pub fn threats<'a>(
    observations: &'a [Observation],
    threat_classes: &'a [u32],
) -> impl Iterator<Item = &'a Observation> + 'a {
    observations
        .iter()
        .filter(move |obs| threat_classes.contains(&obs.class_id))
}

/// 当前帧威胁观测中的最高置信度
pub fn max_threat_confidence(observations: &[Observation], threat_classes: &[u32]) -> Option<f32> {
    threats(observations, threat_classes)
        .map(|obs| obs.confidence)
        .fold(None, |best, c| match best {
            Some(b) if b >= c => Some(b),
            _ => Some(c),
        })
}
