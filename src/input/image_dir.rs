// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 图片序列输入 - 按文件名顺序回放目录中的图片, 模拟摄像头帧率

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use image::RgbaImage;

use super::FrameSource;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

pub struct ImageSequenceSource {
    name: String,
    paths: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    frame_interval: Duration,
    next_due: Instant,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>, fps: f64, looping: bool) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("无法打开图片目录: {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            anyhow::bail!("图片目录为空: {}", dir.display());
        }

        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 30.0 };
        Ok(Self {
            name: dir.display().to_string(),
            paths,
            cursor: 0,
            looping,
            frame_interval: Duration::from_secs_f64(1.0 / fps),
            next_due: Instant::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbaImage>> {
        if self.is_exhausted() || Instant::now() < self.next_due {
            return Ok(None);
        }
        if self.cursor >= self.paths.len() {
            self.cursor = 0;
        }

        let path = &self.paths[self.cursor];
        self.cursor += 1;
        self.next_due += self.frame_interval;

        let image = image::open(path)
            .with_context(|| format!("图片解码失败: {}", path.display()))?
            .to_rgba8();
        Ok(Some(image))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_exhausted(&self) -> bool {
        !self.looping && self.cursor >= self.paths.len()
    }
}
