// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 安全姿态状态机 (Posture State Machine)
//!
//! ```text
//!   Armed ──确认威胁──▶ Triggered ──威胁消失──▶ Lockout ──计时结束且无威胁──▶ Armed
//!                          ▲                       │
//!                          └──────威胁重现─────────┘
//!   任意状态 ──暂停──▶ Paused ──恢复──▶ Armed
//!   Armed/Paused ──调试开──▶ DebugSuspended ──调试关──▶ Armed (暂停标志仍置位时回到 Paused)
//! ```

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// 安全姿态, 任意时刻只有一个值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Posture {
    /// 监控中, 无威胁
    #[default]
    Armed,
    /// 威胁已确认, 遮挡/打码生效
    Triggered,
    /// 威胁已消失, 惩罚计时中
    Lockout,
    /// 用户暂停, 输出继续但不评估
    Paused,
    /// 调试可视化, 不评估不触发
    DebugSuspended,
}

impl Posture {
    pub fn label(&self) -> &'static str {
        match self {
            Posture::Armed => "ARMED",
            Posture::Triggered => "LOCKDOWN",
            Posture::Lockout => "LOCKOUT",
            Posture::Paused => "PAUSED",
            Posture::DebugSuspended => "DEBUG",
        }
    }

    /// 遮挡/打码是否生效
    pub fn is_protecting(&self) -> bool {
        matches!(self, Posture::Triggered | Posture::Lockout)
    }

    /// 本tick是否做威胁评估
    pub fn evaluates(&self) -> bool {
        matches!(self, Posture::Armed | Posture::Triggered | Posture::Lockout)
    }
}

/// 单次锁定的最长时长
const MAX_ARM_DURATION: Duration = Duration::from_secs(3600);

/// 锁定计时器, 只延长不缩短
#[derive(Debug, Clone, Copy, Default)]
pub struct LockoutTimer {
    deadline: Option<Instant>,
}

impl LockoutTimer {
    pub fn arm(&mut self, now: Instant, duration: Duration) {
        // 时钟无法表示的时长按上限处理
        let Some(candidate) = now
            .checked_add(duration)
            .or_else(|| now.checked_add(MAX_ARM_DURATION))
        else {
            self.deadline.get_or_insert(now);
            return;
        };
        self.deadline = Some(match self.deadline {
            Some(d) if d > candidate => d,
            _ => candidate,
        });
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(true)
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}

/// 单个tick的威胁评估结果 (门限/跟踪器 → 状态机)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThreatSignal {
    /// 威胁已确认 (Shield: 门限上升沿; Censorship: 至少一个活跃轨迹)
    pub confirmed: bool,
    /// 本tick存在威胁
    pub present: bool,
    /// 本tick最高威胁置信度
    pub confidence: f32,
    /// 最高置信度对应的类别
    pub class_id: Option<u32>,
}

impl ThreatSignal {
    pub fn clear() -> Self {
        Self::default()
    }
}

/// 一次威胁事件 (Triggered → ... → Armed)
#[derive(Debug, Clone, Copy)]
pub struct Incident {
    pub started: Instant,
    pub started_wall: DateTime<Local>,
    pub trigger_confidence: f32,
    pub max_confidence: f32,
    pub class_id: Option<u32>,
}

/// 需要通知外部的状态切换
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostureTransition {
    /// Armed → Triggered
    Triggered {
        confidence: f32,
        class_id: Option<u32>,
    },
    /// Triggered → Lockout
    LockoutStarted { remaining: Duration },
    /// Lockout → Triggered
    Reconfirmed,
    /// Lockout → Armed
    Cleared {
        duration: Duration,
        max_confidence: f32,
        class_id: Option<u32>,
    },
}

pub struct PostureMachine {
    posture: Posture,
    timer: LockoutTimer,
    incident: Option<Incident>,
}

impl PostureMachine {
    pub fn new() -> Self {
        Self {
            posture: Posture::Armed,
            timer: LockoutTimer::default(),
            incident: None,
        }
    }

    pub fn posture(&self) -> Posture {
        self.posture
    }

    pub fn incident(&self) -> Option<&Incident> {
        self.incident.as_ref()
    }

    pub fn timer(&self) -> &LockoutTimer {
        &self.timer
    }

    /// 锁定剩余时间 (仅Triggered/Lockout)
    pub fn lockout_remaining(&self, now: Instant) -> Option<Duration> {
        if self.posture.is_protecting() {
            self.timer.remaining(now)
        } else {
            None
        }
    }

    /// 根据本tick的威胁信号推进状态
    pub fn evaluate(
        &mut self,
        signal: ThreatSignal,
        now: Instant,
        lockout: Duration,
    ) -> Option<PostureTransition> {
        if signal.present {
            if let Some(incident) = self.incident.as_mut() {
                if signal.confidence > incident.max_confidence {
                    incident.max_confidence = signal.confidence;
                }
            }
        }

        match self.posture {
            Posture::Armed if signal.confirmed => {
                self.timer.clear();
                self.timer.arm(now, lockout);
                self.incident = Some(Incident {
                    started: now,
                    started_wall: Local::now(),
                    trigger_confidence: signal.confidence,
                    max_confidence: signal.confidence,
                    class_id: signal.class_id,
                });
                self.posture = Posture::Triggered;
                Some(PostureTransition::Triggered {
                    confidence: signal.confidence,
                    class_id: signal.class_id,
                })
            }
            Posture::Triggered => {
                self.timer.arm(now, lockout);
                if signal.present {
                    None
                } else {
                    self.posture = Posture::Lockout;
                    Some(PostureTransition::LockoutStarted {
                        remaining: self.timer.remaining(now).unwrap_or_default(),
                    })
                }
            }
            Posture::Lockout if signal.present => {
                self.timer.arm(now, lockout);
                self.posture = Posture::Triggered;
                Some(PostureTransition::Reconfirmed)
            }
            Posture::Lockout if self.timer.expired(now) => {
                let incident = self.incident.take();
                self.timer.clear();
                self.posture = Posture::Armed;
                Some(PostureTransition::Cleared {
                    duration: incident
                        .map(|i| now.saturating_duration_since(i.started))
                        .unwrap_or_default(),
                    max_confidence: incident.map(|i| i.max_confidence).unwrap_or_default(),
                    class_id: incident.and_then(|i| i.class_id),
                })
            }
            _ => None,
        }
    }

    /// 任意状态 → Paused, 进行中的威胁事件作废
    pub fn pause(&mut self) -> Posture {
        let previous = self.posture;
        self.posture = Posture::Paused;
        self.timer.clear();
        self.incident = None;
        previous
    }

    /// Paused → Armed
    pub fn resume(&mut self) -> Result<(), TransitionError> {
        if self.posture != Posture::Paused {
            return Err(TransitionError {
                from: self.posture,
                to: Posture::Armed,
            });
        }
        self.posture = Posture::Armed;
        Ok(())
    }

    /// Armed/Paused ⇄ DebugSuspended, 退出调试时暂停标志仍置位则回到 Paused
    pub fn set_debug(&mut self, enabled: bool, pause_requested: bool) -> Result<(), TransitionError> {
        match (self.posture, enabled) {
            (Posture::Armed | Posture::Paused, true) => {
                self.posture = Posture::DebugSuspended;
                Ok(())
            }
            (Posture::DebugSuspended, false) => {
                self.posture = if pause_requested { Posture::Paused } else { Posture::Armed };
                Ok(())
            }
            (Posture::DebugSuspended, true) => Ok(()),
            (from, true) => Err(TransitionError {
                from,
                to: Posture::DebugSuspended,
            }),
            (from, false) => Err(TransitionError {
                from,
                to: Posture::Armed,
            }),
        }
    }
}

impl Default for PostureMachine {
    fn default() -> Self {
        Self::new()
    }
}
