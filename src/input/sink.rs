// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 输出端实现

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use image::RgbaImage;

use super::OutputSink;

/// 丢弃所有帧, 只计数 (未接虚拟摄像头时)
#[derive(Debug, Default)]
pub struct NullSink {
    pub written: u64,
}

impl OutputSink for NullSink {
    fn write(&mut self, _seq: u64, _image: &RgbaImage) -> anyhow::Result<()> {
        self.written += 1;
        Ok(())
    }
}

/// 每隔N帧保存一张PNG, 用于离线核查输出内容
pub struct PngSequenceSink {
    dir: PathBuf,
    every: u64,
    written: u64,
}

impl PngSequenceSink {
    pub fn create(dir: impl Into<PathBuf>, every: u64) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("无法创建输出目录: {}", dir.display()))?;
        Ok(Self {
            dir,
            every: every.max(1),
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl OutputSink for PngSequenceSink {
    fn write(&mut self, seq: u64, image: &RgbaImage) -> anyhow::Result<()> {
        if seq % self.every != 0 {
            return Ok(());
        }
        let path = self.dir.join(format!("out_{:06}.png", seq));
        image
            .save(&path)
            .with_context(|| format!("写入输出帧失败: {}", path.display()))?;
        self.written += 1;
        Ok(())
    }
}
