// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入/输出系统 (Video Input & Output System)
///
/// 独立采集线程, 摄像头句柄进程内只打开一次:
/// - CameraHandle:        RAII句柄, 启动时获取, 退出时释放一次
/// - Acquisition:         持续拉帧 (暂停时也不停), 保持源缓冲新鲜
/// - ImageSequenceSource: 图片序列输入 (回放/联调)
/// - Sinks:               虚拟摄像头等下游输出
pub mod camera;
pub mod image_dir;
pub mod sink;

use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;

pub use camera::{Acquisition, AcquisitionStats, CameraHandle};
pub use image_dir::ImageSequenceSource;
pub use sink::{NullSink, PngSequenceSink};

/// 采集帧 (采集线程 → 处理线程), 不可变
#[derive(Clone, Debug)]
pub struct Frame {
    /// 单调递增帧序号
    pub seq: u64,
    /// 采集时间
    pub captured_at: Instant,
    /// Arc共享, 避免跨线程复制
    pub image: Arc<RgbaImage>,
}

impl Frame {
    pub fn new(seq: u64, captured_at: Instant, image: Arc<RgbaImage>) -> Self {
        Self {
            seq,
            captured_at,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 视频源 (非阻塞拉取), `Ok(None)` 表示暂时无帧
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbaImage>>;

    fn name(&self) -> &str;

    /// 有限源 (图片序列) 播放完毕
    fn is_exhausted(&self) -> bool {
        false
    }

    /// 进程退出时调用一次
    fn release(&mut self) {}
}

/// 输出端 (虚拟摄像头), 尽力写入
pub trait OutputSink: Send {
    fn write(&mut self, seq: u64, image: &RgbaImage) -> anyhow::Result<()>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn write(&mut self, seq: u64, image: &RgbaImage) -> anyhow::Result<()> {
        (**self).write(seq, image)
    }
}
