// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 控制通道 (UI/热键/托盘 → 处理线程)
//!
//! - 软暂停: 单写多读标志, 处理线程每个tick开始时采样一次
//! - 控制命令: 离散消息, 在tick边界统一应用

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::config::{ConfigUpdate, ProtectionMode};

/// 配置/模式控制消息
#[derive(Clone, Debug, PartialEq)]
pub enum ControlCommand {
    /// 切换防护模式 (F2)
    SetMode(ProtectionMode),
    /// 在线更新阈值/持续帧数/锁定时长
    UpdateConfig(ConfigUpdate),
    /// 调试可视化开关
    SetDebug(bool),
}

/// 暂停开关 (写端), 只由展示层/热键持有
pub struct PauseSwitch {
    flag: Arc<AtomicBool>,
}

/// 暂停标志 (读端), 处理线程只读
#[derive(Clone)]
pub struct PauseFlag {
    flag: Arc<AtomicBool>,
}

/// 创建一对暂停开关/标志
pub fn pause_flag() -> (PauseSwitch, PauseFlag) {
    let flag = Arc::new(AtomicBool::new(false));
    (PauseSwitch { flag: flag.clone() }, PauseFlag { flag })
}

impl PauseSwitch {
    pub fn pause(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// 托盘菜单 "暂停/恢复监控", 返回切换后的状态
    pub fn toggle(&self) -> bool {
        !self.flag.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn is_paused(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl PauseFlag {
    pub fn sample(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// 控制通道
pub fn control_channel() -> (Sender<ControlCommand>, Receiver<ControlCommand>) {
    crossbeam_channel::bounded(32)
}
