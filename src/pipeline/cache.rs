// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 安全帧缓存 (SafeFrameCache)
//!
//! 单槽位, 只保存已经过状态评估并完整渲染的输出帧.
//! 推理超时时重发此帧, 原始帧永远不会进入缓存.

use std::sync::Arc;

use image::RgbaImage;

use super::render;

/// 已审核的输出帧
#[derive(Clone, Debug)]
pub struct SafeFrame {
    pub seq: u64,
    pub image: Arc<RgbaImage>,
}

#[derive(Default)]
pub struct SafeFrameCache {
    slot: Option<SafeFrame>,
    stores: u64,
}

impl SafeFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖槽位, 传入的必须是完整渲染的帧
    pub fn store(&mut self, frame: SafeFrame) {
        self.slot = Some(frame);
        self.stores += 1;
    }

    pub fn get(&self) -> Option<&SafeFrame> {
        self.slot.as_ref()
    }

    /// 缓存为空时 (尚无审核帧) 返回全黑帧
    pub fn fallback(&self, width: u32, height: u32) -> Arc<RgbaImage> {
        match &self.slot {
            Some(frame) => frame.image.clone(),
            None => Arc::new(render::blackout(width, height)),
        }
    }

    pub fn store_count(&self) -> u64 {
        self.stores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_empty_cache_falls_back_to_blackout() {
        let cache = SafeFrameCache::new();
        let img = cache.fallback(3, 2);
        assert_eq!(img.dimensions(), (3, 2));
        assert!(img.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
    }

    #[test]
    fn test_store_overwrites_single_slot() {
        let mut cache = SafeFrameCache::new();
        let a = Arc::new(RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255])));
        let b = Arc::new(RgbaImage::from_pixel(2, 2, Rgba([2, 2, 2, 255])));
        cache.store(SafeFrame { seq: 1, image: a });
        cache.store(SafeFrame { seq: 2, image: b.clone() });
        assert_eq!(cache.get().map(|f| f.seq), Some(2));
        assert!(Arc::ptr_eq(&cache.fallback(2, 2), &b));
        assert_eq!(cache.store_count(), 2);
    }
}
