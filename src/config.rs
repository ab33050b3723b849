// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 防护配置 - 通过JSON文件调整参数, 运行中可在线更新

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::CELL_PHONE_CLASS;
use crate::error::ConfigError;

/// 持续帧数允许范围
pub const PERSISTENCE_RANGE: std::ops::RangeInclusive<u32> = 1..=5;

/// 锁定时长上限 (秒)
pub const MAX_LOCKOUT_SECS: f64 = 3600.0;

/// 防护模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionMode {
    /// 全屏遮挡
    #[default]
    Shield,
    /// 只模糊威胁区域
    Censorship,
}

impl ProtectionMode {
    pub fn tag(&self) -> &'static str {
        match self {
            ProtectionMode::Shield => "shield",
            ProtectionMode::Censorship => "censorship",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            ProtectionMode::Shield => ProtectionMode::Censorship,
            ProtectionMode::Censorship => ProtectionMode::Shield,
        }
    }
}

impl std::str::FromStr for ProtectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shield" => Ok(ProtectionMode::Shield),
            "censorship" | "censor" => Ok(ProtectionMode::Censorship),
            other => Err(format!("未知防护模式: {}", other)),
        }
    }
}

/// 防护参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    // === 检测参数 ===
    pub confidence_threshold: f32, // 检测置信度阈值
    pub threat_classes: Vec<u32>,  // 威胁类别 (COCO id)

    // === 状态机参数 ===
    pub persistence_frames: u32,    // 连续命中帧数 (Shield)
    pub lockout_duration_secs: f64, // 威胁消失后的锁定时长
    pub protection_mode: ProtectionMode,

    // === 流水线参数 ===
    pub inference_budget_ms: u64, // 推理时限, 超时则重发安全帧

    // === 审计日志 ===
    pub enable_forensic_logging: bool,
    pub audit_log_path: String,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.60,
            threat_classes: vec![CELL_PHONE_CLASS],
            persistence_frames: 3,
            lockout_duration_secs: 10.0,
            protection_mode: ProtectionMode::Shield,
            inference_budget_ms: 50,
            enable_forensic_logging: true,
            audit_log_path: "lensblock_audit.jsonl".to_string(),
        }
    }
}

/// 在线配置更新 (UI → 处理线程), 下一个tick生效
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub confidence_threshold: Option<f32>,
    pub persistence_frames: Option<u32>,
    pub lockout_duration_secs: Option<f64>,
    pub protection_mode: Option<ProtectionMode>,
    pub enable_forensic_logging: Option<bool>,
}

impl ProtectionConfig {
    /// 从JSON文件加载配置, 不存在时写入默认配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(config) => {
                info!("✅ 配置已从 {} 加载", path.display());
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存默认配置失败: {}", e);
                }
                config
            }
            Err(e) => {
                warn!("⚠️  配置文件无效: {}, 使用默认值", e);
                Self::default()
            }
        }
    }

    /// 严格加载: 读取、解析、校验任一失败都返回错误
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_confidence(self.confidence_threshold)?;
        validate_persistence(self.persistence_frames)?;
        validate_lockout(self.lockout_duration_secs)?;
        if self.inference_budget_ms == 0 {
            return Err(ConfigError::ZeroInferenceBudget);
        }
        if self.threat_classes.is_empty() {
            return Err(ConfigError::NoThreatClasses);
        }
        Ok(())
    }

    /// 应用在线更新: 全部字段合法才生效, 否则保留原值
    pub fn apply(&mut self, update: &ConfigUpdate) -> Result<(), ConfigError> {
        let mut next = self.clone();
        if let Some(v) = update.confidence_threshold {
            next.confidence_threshold = v;
        }
        if let Some(v) = update.persistence_frames {
            next.persistence_frames = v;
        }
        if let Some(v) = update.lockout_duration_secs {
            next.lockout_duration_secs = v;
        }
        if let Some(v) = update.protection_mode {
            next.protection_mode = v;
        }
        if let Some(v) = update.enable_forensic_logging {
            next.enable_forensic_logging = v;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// 超过上限时按上限处理, 负值按0处理
    pub fn lockout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.lockout_duration_secs.min(MAX_LOCKOUT_SECS)).unwrap_or_default()
    }

    pub fn inference_budget(&self) -> Duration {
        Duration::from_millis(self.inference_budget_ms)
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前防护配置:");
        info!("  防护模式: {}", self.protection_mode.tag());
        info!("  检测置信度: {:.2}", self.confidence_threshold);
        info!("  连续命中帧数: {}", self.persistence_frames);
        info!("  锁定时长: {:.1}s", self.lockout_duration_secs);
        info!("  推理时限: {}ms", self.inference_budget_ms);
        info!(
            "  取证日志: {}",
            if self.enable_forensic_logging { "开启" } else { "关闭" }
        );
    }
}

fn validate_confidence(v: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(ConfigError::ConfidenceOutOfRange(v))
    }
}

fn validate_persistence(v: u32) -> Result<(), ConfigError> {
    if PERSISTENCE_RANGE.contains(&v) {
        Ok(())
    } else {
        Err(ConfigError::PersistenceOutOfRange(v))
    }
}

fn validate_lockout(v: f64) -> Result<(), ConfigError> {
    if !(v.is_finite() && v >= 0.0) {
        return Err(ConfigError::InvalidLockout(v));
    }
    if v > MAX_LOCKOUT_SECS {
        return Err(ConfigError::LockoutTooLong(v));
    }
    Ok(())
}
