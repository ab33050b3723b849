// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 采集模块 - 独立线程运行
//!
//! 摄像头句柄在进程启动时获取一次, 暂停/恢复不会重新打开.
//! 部分平台反复打开/关闭摄像头会死锁.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbaImage;
use tracing::{debug, info, warn};

use super::{Frame, FrameSource};

/// 无帧时的重试间隔
const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// 采集出错后的退避
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// 摄像头句柄 (RAII), Drop时释放且只释放一次
pub struct CameraHandle<S: FrameSource> {
    source: S,
    released: bool,
}

impl<S: FrameSource> CameraHandle<S> {
    pub fn acquire(source: S) -> Self {
        info!("📷 摄像头句柄已获取: {}", source.name());
        Self {
            source,
            released: false,
        }
    }

    pub fn next_frame(&mut self) -> anyhow::Result<Option<RgbaImage>> {
        self.source.next_frame()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: FrameSource> Drop for CameraHandle<S> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
            info!("📷 摄像头句柄已释放: {}", self.source.name());
        }
    }
}

/// 采集统计
#[derive(Debug, Clone, Default)]
pub struct AcquisitionStats {
    pub captured: u64,
    /// 处理线程来不及消费时被替换的旧帧
    pub replaced: u64,
    pub errors: u64,
}

/// 采集线程: 持续拉帧, 只保留最新一帧给处理线程
pub struct Acquisition {
    join: JoinHandle<AcquisitionStats>,
}

impl Acquisition {
    /// 启动采集线程, 返回帧接收端
    ///
    /// 源耗尽或 `stop` 置位后线程退出, 发送端随之关闭
    pub fn spawn<S>(
        handle: CameraHandle<S>,
        stop: Arc<AtomicBool>,
    ) -> anyhow::Result<(Self, Receiver<Frame>)>
    where
        S: FrameSource + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let stale_rx = rx.clone();
        let join = std::thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || Self::run(handle, tx, stale_rx, stop))
            .context("采集线程创建失败")?;
        Ok((Self { join }, rx))
    }

    fn run<S: FrameSource>(
        mut handle: CameraHandle<S>,
        tx: Sender<Frame>,
        stale_rx: Receiver<Frame>,
        stop: Arc<AtomicBool>,
    ) -> AcquisitionStats {
        info!("🎬 采集线程启动");
        let mut stats = AcquisitionStats::default();
        let mut seq = 0u64;

        while !stop.load(Ordering::Relaxed) {
            match handle.next_frame() {
                Ok(Some(image)) => {
                    seq += 1;
                    stats.captured += 1;
                    let mut frame = Frame::new(seq, Instant::now(), Arc::new(image));
                    loop {
                        match tx.try_send(frame) {
                            Ok(()) => break,
                            Err(TrySendError::Full(back)) => {
                                // 丢弃未被消费的旧帧, 保持新鲜
                                if stale_rx.try_recv().is_ok() {
                                    stats.replaced += 1;
                                }
                                frame = back;
                            }
                            Err(TrySendError::Disconnected(_)) => return stats,
                        }
                    }
                }
                Ok(None) => {
                    if handle.source().is_exhausted() {
                        info!("📹 视频源已结束 ({} 帧)", stats.captured);
                        break;
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!("⚠️ 采集失败, 稍后重试: {:#}", e);
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        debug!("采集统计: {:?}", stats);
        stats
    }

    pub fn join(self) -> AcquisitionStats {
        self.join.join().unwrap_or_default()
    }
}
