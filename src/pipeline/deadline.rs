// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 推理时限守卫 (Deadline Guard)
//!
//! 检测器在独立线程运行, 处理线程最多等待一个推理预算.
//! 超时不取消推理: 迟到的结果在下次调用时被回收丢弃,
//! 推理未返回前的后续帧直接按超时处理, 请求不会堆积.

use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::detection::{Detector, RawDetection};
use crate::input::Frame;

/// 单次检测结果
#[derive(Debug)]
pub enum DetectOutcome {
    /// 预算内完成
    Completed {
        detections: Vec<RawDetection>,
        elapsed: Duration,
    },
    /// 超过预算
    TimedOut,
    /// 上一次推理仍未返回
    Busy,
    /// 检测器报错或崩溃
    Failed(String),
}

struct Request {
    id: u64,
    frame: Frame,
    confidence_threshold: f32,
}

struct Response {
    id: u64,
    result: Result<Vec<RawDetection>, String>,
    elapsed: Duration,
}

pub struct DeadlineDetector {
    tx: Option<Sender<Request>>,
    rx: Receiver<Response>,
    next_id: u64,
    in_flight: Option<u64>,
    join: Option<JoinHandle<()>>,
}

impl DeadlineDetector {
    pub fn spawn(detector: Box<dyn Detector>) -> anyhow::Result<Self> {
        let (req_tx, req_rx) = crossbeam_channel::bounded::<Request>(1);
        let (resp_tx, resp_rx) = crossbeam_channel::bounded::<Response>(1);
        let join = std::thread::Builder::new()
            .name("detector".into())
            .spawn(move || Self::worker(detector, req_rx, resp_tx))
            .context("检测线程创建失败")?;
        Ok(Self {
            tx: Some(req_tx),
            rx: resp_rx,
            next_id: 0,
            in_flight: None,
            join: Some(join),
        })
    }

    fn worker(mut detector: Box<dyn Detector>, rx: Receiver<Request>, tx: Sender<Response>) {
        info!("🔍 检测线程启动: {}", detector.name());
        while let Ok(req) = rx.recv() {
            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                detector.detect(&req.frame, req.confidence_threshold)
            }));
            let result = match result {
                Ok(Ok(dets)) => Ok(dets),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err("检测器崩溃 (panic)".to_string()),
            };
            let resp = Response {
                id: req.id,
                result,
                elapsed: start.elapsed(),
            };
            if tx.send(resp).is_err() {
                break;
            }
        }
        info!("✅ 检测线程退出");
    }

    /// 提交一帧并在预算内等待结果
    pub fn detect(&mut self, frame: &Frame, confidence_threshold: f32, budget: Duration) -> DetectOutcome {
        // 回收迟到的结果
        while let Ok(late) = self.rx.try_recv() {
            debug!("丢弃迟到的检测结果 #{} ({:.1}ms)", late.id, late.elapsed.as_secs_f64() * 1000.0);
            if self.in_flight == Some(late.id) {
                self.in_flight = None;
            }
        }
        if self.in_flight.is_some() {
            return DetectOutcome::Busy;
        }

        let Some(tx) = self.tx.as_ref() else {
            return DetectOutcome::Failed("检测线程已关闭".into());
        };

        self.next_id += 1;
        let id = self.next_id;
        let request = Request {
            id,
            frame: frame.clone(),
            confidence_threshold,
        };
        if tx.send(request).is_err() {
            return DetectOutcome::Failed("检测线程已退出".into());
        }
        self.in_flight = Some(id);

        let deadline = Instant::now() + budget;
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(resp) if resp.id == id => {
                    self.in_flight = None;
                    return match resp.result {
                        Ok(detections) => DetectOutcome::Completed {
                            detections,
                            elapsed: resp.elapsed,
                        },
                        Err(e) => DetectOutcome::Failed(e),
                    };
                }
                Ok(stale) => {
                    debug!("丢弃过期检测结果 #{}", stale.id);
                }
                Err(RecvTimeoutError::Timeout) => return DetectOutcome::TimedOut,
                Err(RecvTimeoutError::Disconnected) => {
                    self.in_flight = None;
                    warn!("❌ 检测线程意外退出");
                    return DetectOutcome::Failed("检测线程已退出".into());
                }
            }
        }
    }
}

impl Drop for DeadlineDetector {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
