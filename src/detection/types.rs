// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统数据结构定义
/// Data structures for the threat detection system
use serde::{Deserialize, Serialize};

// ========== 数据结构 ==========

/// 检测框 (Detection bounding box), 帧坐标系, 左上角 + 右下角
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    /// 从 (x, y, w, h) 构造
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            x1: x,
            y1: y,
            x2: x + w,
            y2: y + h,
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class_id: u32, confidence: f32) -> Self {
        self.class_id = class_id;
        self.confidence = confidence;
        self
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 按比例向四周扩展 (ROI安全边距), 并裁剪到帧边界内
    pub fn expand(&self, margin: f32, frame_w: u32, frame_h: u32) -> BBox {
        let pad_x = self.width() * margin;
        let pad_y = self.height() * margin;
        BBox {
            x1: (self.x1 - pad_x).max(0.0),
            y1: (self.y1 - pad_y).max(0.0),
            x2: (self.x2 + pad_x).min(frame_w as f32),
            y2: (self.y2 + pad_y).min(frame_h as f32),
            ..*self
        }
    }

    /// 是否完整包含另一个框
    pub fn contains(&self, other: &BBox) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }

    /// 像素矩形 (x, y, w, h), 向外取整并裁剪, 空区域返回 None
    pub fn pixel_rect(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.floor().max(0.0) as u32;
        let y1 = self.y1.floor().max(0.0) as u32;
        let x2 = (self.x2.ceil().max(0.0) as u32).min(frame_w);
        let y2 = (self.y2.ceil().max(0.0) as u32).min(frame_h);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// 检测器原始输出 (Detector → Normalizer)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BBox,
}

impl RawDetection {
    pub fn new(class_id: u32, confidence: f32, bbox: BBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox: bbox.with_class(class_id, confidence),
        }
    }
}

/// 单帧观测 (阈值过滤后), 只在一个tick内有效
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BBox,
}

// ========== 类别表 ==========

/// COCO 80类名称
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// 手机 (COCO class 67), 默认威胁类别
pub const CELL_PHONE_CLASS: u32 = 67;

pub fn class_label(class_id: u32) -> &'static str {
    COCO_CLASSES
        .get(class_id as usize)
        .copied()
        .unwrap_or("unknown")
}
