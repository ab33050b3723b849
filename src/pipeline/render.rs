// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 输出帧渲染
//!
//! - Shield:     Triggered/Lockout 时整帧遮黑
//! - Censorship: 只对活跃轨迹区域做两次叠加高斯模糊
//! - Preview:    预览图额外画出区域边框, 不进入输出端

use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::filter::gaussian_blur_f32;
use imageproc::rect::Rect;

use crate::config::ProtectionMode;
use crate::detection::{Observation, TrackedThreat};
use crate::security::Posture;

/// 高斯模糊强度, 叠加两次, 防止锐化还原
pub const BLUR_SIGMA: f32 = 16.0;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const FRESH_COLOR: Rgba<u8> = Rgba([200, 0, 0, 255]); // 本帧命中: 红色
const AGING_COLOR: Rgba<u8> = Rgba([255, 140, 0, 255]); // 老化中: 橙色
const DEBUG_COLOR: Rgba<u8> = Rgba([0, 255, 136, 255]);

/// 全黑帧
pub fn blackout(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, BLACK)
}

/// 按姿态与模式生成输出帧
pub fn render_output(
    frame: &RgbaImage,
    posture: Posture,
    mode: ProtectionMode,
    regions: &[TrackedThreat],
) -> RgbaImage {
    match mode {
        ProtectionMode::Shield if posture.is_protecting() => {
            blackout(frame.width(), frame.height())
        }
        ProtectionMode::Censorship if posture.evaluates() => censor_regions(frame, regions),
        _ => frame.clone(),
    }
}

/// 模糊所有区域, 区域外像素不变
pub fn censor_regions(frame: &RgbaImage, regions: &[TrackedThreat]) -> RgbaImage {
    let mut out = frame.clone();
    for region in regions {
        let Some((x, y, w, h)) = region.bbox.pixel_rect(frame.width(), frame.height()) else {
            continue;
        };
        let roi = imageops::crop_imm(&out, x, y, w, h).to_image();
        let blurred = gaussian_blur_f32(&gaussian_blur_f32(&roi, BLUR_SIGMA), BLUR_SIGMA);
        imageops::replace(&mut out, &blurred, x as i64, y as i64);
    }
    out
}

/// 预览图: 在输出帧上画区域边框
pub fn annotate_preview(output: &RgbaImage, regions: &[TrackedThreat]) -> RgbaImage {
    let mut preview = output.clone();
    for region in regions {
        let Some((x, y, w, h)) = region.bbox.pixel_rect(output.width(), output.height()) else {
            continue;
        };
        let color = if region.is_fresh() {
            FRESH_COLOR
        } else {
            AGING_COLOR
        };
        draw_hollow_rect_mut(&mut preview, Rect::at(x as i32, y as i32).of_size(w, h), color);
    }
    preview
}

/// 调试视图: 画出本帧全部检测框
pub fn annotate_debug(frame: &RgbaImage, observations: &[Observation]) -> RgbaImage {
    let mut preview = frame.clone();
    for obs in observations {
        if let Some((x, y, w, h)) = obs.bbox.pixel_rect(frame.width(), frame.height()) {
            draw_hollow_rect_mut(&mut preview, Rect::at(x as i32, y as i32).of_size(w, h), DEBUG_COLOR);
        }
    }
    preview
}
