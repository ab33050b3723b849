// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测器接口 (Detector)
//! 职责: Frame → 原始检测框. 神经网络推理本身在核心之外, 这里只定义接口.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use super::types::RawDetection;
use crate::input::Frame;

/// 目标检测器 Trait
///
/// 调用可能超过推理预算, 超时由流水线处理, 不是检测器的错误
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> anyhow::Result<Vec<RawDetection>>;

    fn name(&self) -> &str {
        "detector"
    }
}

impl<F> Detector for F
where
    F: FnMut(&Frame, f32) -> anyhow::Result<Vec<RawDetection>> + Send,
{
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> anyhow::Result<Vec<RawDetection>> {
        self(frame, confidence_threshold)
    }
}

/// 回放脚本中的一行
#[derive(Debug, Deserialize)]
struct ReplayLine {
    frame: u64,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

/// 回放检测器: 按帧序号返回预先录制的检测结果 (JSON Lines)
///
/// ```text
/// {"frame": 3, "detections": [{"class_id": 67, "confidence": 0.91,
///   "bbox": {"x1": 10, "y1": 20, "x2": 60, "y2": 110, "confidence": 0.91, "class_id": 67}}]}
/// ```
pub struct ReplayDetector {
    script: HashMap<u64, Vec<RawDetection>>,
    /// 序号取模周期 (循环播放源)
    period: Option<u64>,
    /// 模拟推理耗时
    latency: Duration,
}

impl ReplayDetector {
    pub fn new(script: HashMap<u64, Vec<RawDetection>>) -> Self {
        Self {
            script,
            period: None,
            latency: Duration::ZERO,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("读取回放脚本失败: {}", path.display()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut script = HashMap::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry: ReplayLine = serde_json::from_str(line)
                .with_context(|| format!("回放脚本第{}行解析失败", line_no + 1))?;
            script
                .entry(entry.frame)
                .or_insert_with(Vec::new)
                .extend(entry.detections);
        }
        Ok(Self::new(script))
    }

    pub fn with_period(mut self, period: u64) -> Self {
        self.period = (period > 0).then_some(period);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.script.len()
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> anyhow::Result<Vec<RawDetection>> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let key = match self.period {
            // 帧序号从1开始
            Some(p) => frame.seq.saturating_sub(1) % p + 1,
            None => frame.seq,
        };
        Ok(self
            .script
            .get(&key)
            .map(|dets| {
                dets.iter()
                    .filter(|d| d.confidence >= confidence_threshold)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "replay"
    }
}
