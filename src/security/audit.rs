// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 取证审计日志
//! 每次 Armed→Triggered 和 Lockout→Armed 各记录一条事件

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::ProtectionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Triggered,
    Cleared,
}

/// 审计事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub timestamp: DateTime<Local>,
    /// 触发时置信度 (Triggered) 或事件期间最高置信度 (Cleared)
    pub confidence: f32,
    /// 事件持续秒数, Triggered 为 0
    pub duration_secs: f64,
    pub mode: ProtectionMode,
    pub threat_type: String,
}

/// 审计日志输出端
pub trait AuditSink: Send {
    fn record(&mut self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// JSON Lines 文件日志 (追加写)
pub struct JsonlAuditLog {
    path: PathBuf,
}

impl JsonlAuditLog {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("无法创建日志目录: {}", parent.display()))?;
        }
        // 预先创建文件, 权限问题在启动时暴露
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("无法打开审计日志: {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 最近的事件, 最新在前
    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<AuditEvent>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("读取审计日志失败: {}", self.path.display()))?;
        let mut events: Vec<AuditEvent> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&mut self, event: &AuditEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("无法打开审计日志: {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// 内存日志, 克隆共享同一缓冲 (展示层读取/测试)
#[derive(Clone, Default)]
pub struct MemoryAuditLog {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&mut self, event: &AuditEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: AuditKind, confidence: f32) -> AuditEvent {
        AuditEvent {
            kind,
            timestamp: Local::now(),
            confidence,
            duration_secs: 0.0,
            mode: ProtectionMode::Shield,
            threat_type: "cell phone".into(),
        }
    }

    #[test]
    fn test_jsonl_appends_and_reads_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = JsonlAuditLog::open(dir.path().join("logs/audit.jsonl")).unwrap();
        assert_eq!(log.path(), dir.path().join("logs/audit.jsonl").as_path());
        assert!(log.path().exists());
        log.record(&event(AuditKind::Triggered, 0.8)).unwrap();
        log.record(&event(AuditKind::Cleared, 0.9)).unwrap();
        log.record(&event(AuditKind::Triggered, 0.7)).unwrap();

        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].confidence, 0.7);
        assert_eq!(recent[1].kind, AuditKind::Cleared);
    }

    #[test]
    fn test_memory_log_shared_between_clones() {
        let log = MemoryAuditLog::new();
        let mut writer = log.clone();
        writer.record(&event(AuditKind::Triggered, 0.6)).unwrap();
        assert_eq!(log.events().len(), 1);
    }
}
