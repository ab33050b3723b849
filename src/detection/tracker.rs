// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 威胁区域时序跟踪 (Temporal Tracker, Censorship模式)
//!
//! 核心思想:
//! 1. 观测框先扩展20%安全边距, 再与已有轨迹做IOU匹配
//! 2. 贪心匹配: IOU从高到低, 每个轨迹/观测最多使用一次
//! 3. 未匹配观测 → 新建轨迹; 未匹配轨迹 → 老化, 超过10帧删除
//! 4. 老化中的轨迹仍然输出, 单帧漏检不会造成打码闪烁

use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{BBox, Observation};

// ========== 公共常量 ==========

/// ROI安全边距 (每边扩展比例)
pub const ROI_MARGIN: f32 = 0.20;

/// 同一目标判定的最小IOU (严格大于)
pub const MATCH_IOU_THRESHOLD: f32 = 0.3;

/// 最大允许连续丢失帧数, 超过即删除
pub const MAX_TRACK_AGE: u32 = 10;

/// 进程级轨迹ID, 单调递增, 跟踪器重置后也不回退
static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

fn next_track_id() -> u64 {
    NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed)
}

// ========== 数据结构 ==========

/// 被跟踪的威胁区域
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedThreat {
    /// 唯一跟踪ID
    pub id: u64,

    /// 当前区域 (已扩展安全边距并裁剪到帧内)
    pub bbox: BBox,

    /// 类别
    pub class_id: u32,

    /// 最近一次匹配的tick
    pub last_seen_tick: u64,

    /// 连续未匹配帧数
    pub age: u32,
}

impl TrackedThreat {
    /// 本帧是否有新鲜检测
    pub fn is_fresh(&self) -> bool {
        self.age == 0
    }
}

// ========== 工具函数 ==========

/// 计算两个边界框的IOU (Intersection over Union)
pub fn compute_iou(bbox1: &BBox, bbox2: &BBox) -> f32 {
    let x1 = bbox1.x1.max(bbox2.x1);
    let y1 = bbox1.y1.max(bbox2.y1);
    let x2 = bbox1.x2.min(bbox2.x2);
    let y2 = bbox1.y2.min(bbox2.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = bbox1.area() + bbox2.area() - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

// ========== 跟踪器 ==========

pub struct ThreatTracker {
    tracks: Vec<TrackedThreat>,
    tick: u64,
    iou_threshold: f32,
    max_age: u32,
    margin: f32,
}

impl ThreatTracker {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            tick: 0,
            iou_threshold: MATCH_IOU_THRESHOLD,
            max_age: MAX_TRACK_AGE,
            margin: ROI_MARGIN,
        }
    }

    /// 更新跟踪
    ///
    /// # 参数
    /// - `observations`: 当前帧的威胁观测 (调用方已按威胁类别过滤)
    /// - `frame_w`/`frame_h`: 帧尺寸, 用于裁剪扩展后的区域
    ///
    /// # 返回
    /// 当前所有活跃轨迹 (新鲜 + 老化中)
    pub fn update(
        &mut self,
        observations: &[Observation],
        frame_w: u32,
        frame_h: u32,
    ) -> &[TrackedThreat] {
        self.tick += 1;

        // 1. 扩展安全边距
        let expanded: Vec<BBox> = observations
            .iter()
            .map(|obs| obs.bbox.expand(self.margin, frame_w, frame_h))
            .collect();

        // 2. 贪心匹配
        let assignments = self.match_observations(observations, &expanded);

        let mut matched_obs = vec![false; observations.len()];
        let mut matched_track = vec![false; self.tracks.len()];
        for (obs_idx, track_idx) in assignments {
            matched_obs[obs_idx] = true;
            matched_track[track_idx] = true;
            let track = &mut self.tracks[track_idx];
            track.bbox = expanded[obs_idx];
            track.age = 0;
            track.last_seen_tick = self.tick;
        }

        // 3. 未匹配的轨迹 → 老化
        for (track_idx, track) in self.tracks.iter_mut().enumerate() {
            if !matched_track[track_idx] {
                track.age += 1;
            }
        }

        // 4. 删除丢失太久的轨迹
        let max_age = self.max_age;
        self.tracks.retain(|t| t.age <= max_age);

        // 5. 未匹配的观测 → 新建轨迹
        for (obs_idx, obs) in observations.iter().enumerate() {
            if !matched_obs[obs_idx] {
                self.tracks.push(TrackedThreat {
                    id: next_track_id(),
                    bbox: expanded[obs_idx],
                    class_id: obs.class_id,
                    last_seen_tick: self.tick,
                    age: 0,
                });
            }
        }

        &self.tracks
    }

    /// IOU 贪心匹配, 返回 (观测索引, 轨迹索引)
    fn match_observations(
        &self,
        observations: &[Observation],
        expanded: &[BBox],
    ) -> Vec<(usize, usize)> {
        if observations.is_empty() || self.tracks.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for (obs_idx, (obs, bbox)) in observations.iter().zip(expanded).enumerate() {
            for (track_idx, track) in self.tracks.iter().enumerate() {
                if track.class_id != obs.class_id {
                    continue;
                }
                let iou = compute_iou(bbox, &track.bbox);
                if iou > self.iou_threshold {
                    candidates.push((iou, obs_idx, track_idx));
                }
            }
        }

        // IOU降序; 稳定排序保证同分时按检测顺序、轨迹顺序
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut assignments = Vec::new();
        let mut used_obs = vec![false; observations.len()];
        let mut used_track = vec![false; self.tracks.len()];

        for (_, obs_idx, track_idx) in candidates {
            if !used_obs[obs_idx] && !used_track[track_idx] {
                assignments.push((obs_idx, track_idx));
                used_obs[obs_idx] = true;
                used_track[track_idx] = true;
            }
        }

        assignments
    }

    /// 当前活跃轨迹快照
    pub fn tracks(&self) -> &[TrackedThreat] {
        &self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// 清除所有轨迹 (切换模式/恢复监控时)
    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

impl Default for ThreatTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::CELL_PHONE_CLASS;

    const W: u32 = 640;
    const H: u32 = 480;

    fn phone(x: f32, y: f32, w: f32, h: f32) -> Observation {
        Observation {
            class_id: CELL_PHONE_CLASS,
            confidence: 0.9,
            bbox: BBox::from_xywh(x, y, w, h).with_class(CELL_PHONE_CLASS, 0.9),
        }
    }

    #[test]
    fn test_iou() {
        let a = BBox::from_xywh(0.0, 0.0, 10.0, 10.0);
        let b = BBox::from_xywh(5.0, 0.0, 10.0, 10.0);
        assert!((compute_iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(compute_iou(&a, &BBox::from_xywh(20.0, 20.0, 5.0, 5.0)), 0.0);
        assert_eq!(compute_iou(&a, &a), 1.0);
    }

    #[test]
    fn test_near_identical_boxes_make_one_track() {
        let mut tracker = ThreatTracker::new();
        tracker.update(&[phone(100.0, 100.0, 40.0, 80.0)], W, H);
        let tracks = tracker.update(&[phone(102.0, 101.0, 40.0, 80.0)], W, H);
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].is_fresh());
    }

    #[test]
    fn test_identity_stable_under_repeated_observation() {
        let mut tracker = ThreatTracker::new();
        let id = tracker.update(&[phone(50.0, 50.0, 30.0, 60.0)], W, H)[0].id;
        for _ in 0..20 {
            let tracks = tracker.update(&[phone(50.0, 50.0, 30.0, 60.0)], W, H);
            assert_eq!(tracks.len(), 1);
            assert_eq!(tracks[0].id, id);
        }
    }

    #[test]
    fn test_evicted_on_eleventh_missed_frame() {
        let mut tracker = ThreatTracker::new();
        tracker.update(&[phone(50.0, 50.0, 30.0, 60.0)], W, H);
        for missed in 1..=10 {
            let tracks = tracker.update(&[], W, H);
            assert_eq!(tracks.len(), 1, "track dropped after {} misses", missed);
            assert_eq!(tracks[0].age, missed);
        }
        assert!(tracker.update(&[], W, H).is_empty());
    }

    #[test]
    fn test_reported_box_contains_expanded_raw_box() {
        let mut tracker = ThreatTracker::new();
        let raw = phone(600.0, 10.0, 50.0, 30.0);
        let tracks = tracker.update(&[raw], W, H);
        let expected = raw.bbox.expand(ROI_MARGIN, W, H);
        assert!(tracks[0].bbox.contains(&expected));
        assert_eq!(tracks[0].bbox.x2, W as f32);
        assert_eq!(tracks[0].bbox.x1, 590.0);
        assert_eq!(tracks[0].bbox.y1, 4.0);
    }

    #[test]
    fn test_greedy_best_iou_first() {
        let mut tracker = ThreatTracker::new();
        tracker.update(&[phone(100.0, 100.0, 50.0, 50.0)], W, H);
        let id = tracker.tracks()[0].id;

        // 第一个观测偏移较大, 第二个几乎重合: 轨迹应归属第二个
        let tracks = tracker
            .update(
                &[phone(115.0, 100.0, 50.0, 50.0), phone(101.0, 100.0, 50.0, 50.0)],
                W,
                H,
            )
            .to_vec();
        assert_eq!(tracks.len(), 2);
        let kept = tracks.iter().find(|t| t.id == id).map(|t| t.bbox);
        assert_eq!(kept, Some(phone(101.0, 100.0, 50.0, 50.0).bbox.expand(ROI_MARGIN, W, H)));
        assert!(tracks.iter().any(|t| t.id > id));
    }

    #[test]
    fn test_different_class_not_matched() {
        let mut tracker = ThreatTracker::new();
        tracker.update(&[phone(100.0, 100.0, 50.0, 50.0)], W, H);
        let mut other = phone(100.0, 100.0, 50.0, 50.0);
        other.class_id = 63;
        let tracks = tracker.update(&[other], W, H);
        assert_eq!(tracks.len(), 2);
    }

    #[test]
    fn test_flicker_free_gap_then_refresh() {
        let mut tracker = ThreatTracker::new();
        let obs = phone(200.0, 150.0, 40.0, 70.0);
        let mut id = None;
        for _ in 1..=5 {
            let tracks = tracker.update(&[obs], W, H);
            id.get_or_insert(tracks[0].id);
        }
        for _ in 6..=8 {
            let tracks = tracker.update(&[], W, H);
            assert_eq!(tracks.len(), 1);
            assert_eq!(Some(tracks[0].id), id);
        }
        let tracks = tracker.update(&[obs], W, H);
        assert_eq!(tracks.len(), 1);
        assert_eq!(Some(tracks[0].id), id);
        assert_eq!(tracks[0].age, 0);
    }

    #[test]
    fn test_reset_does_not_reuse_ids() {
        let mut tracker = ThreatTracker::new();
        let first = tracker.update(&[phone(10.0, 10.0, 20.0, 20.0)], W, H)[0].id;
        tracker.reset();
        assert_eq!(tracker.track_count(), 0);
        let second = tracker.update(&[phone(10.0, 10.0, 20.0, 20.0)], W, H)[0].id;
        assert!(second > first);
    }
}
