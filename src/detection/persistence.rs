// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 持续帧门限 (Persistence Gate, Shield模式)
//!
//! 严格连续帧计数: 任意一帧无威胁即清零, 不做部分衰减.
//! 达到门限时只产生一次上升沿事件, 后续连续命中不重复触发.
//! TODO: "x-out-of-y" 滑动窗口变体可作为独立门限模式加入, 不替换当前合约.

/// 门限状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Idle,
    Counting,
    Qualified,
}

/// 单帧更新结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// 无状态变化
    None,
    /// 本帧首次达到门限 (上升沿)
    Qualified,
}

pub struct PersistenceGate {
    /// 连续命中帧数 (饱和于门限值)
    counter: u32,

    /// 需要的连续帧数 (1-5)
    required: u32,

    state: GateState,
}

impl PersistenceGate {
    pub fn new(required: u32) -> Self {
        Self {
            counter: 0,
            required: required.max(1),
            state: GateState::Idle,
        }
    }

    /// 每个tick调用一次
    pub fn update(&mut self, threat_present: bool) -> GateEvent {
        if !threat_present {
            self.counter = 0;
            self.state = GateState::Idle;
            return GateEvent::None;
        }

        self.counter = (self.counter + 1).min(self.required);
        if self.counter < self.required {
            self.state = GateState::Counting;
            return GateEvent::None;
        }

        if self.state == GateState::Qualified {
            GateEvent::None
        } else {
            self.state = GateState::Qualified;
            GateEvent::Qualified
        }
    }

    /// 在线更新门限, 计数超出新门限时钳位
    pub fn set_required(&mut self, required: u32) {
        self.required = required.max(1);
        self.counter = self.counter.min(self.required);
        if self.state == GateState::Counting && self.counter >= self.required {
            // 下一次命中帧会产生上升沿
            self.counter = self.required - 1;
        }
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.state = GateState::Idle;
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_qualified(&self) -> bool {
        self.state == GateState::Qualified
    }
}
