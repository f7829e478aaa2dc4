// 该文件是 Xunlu （巡路） 项目的一部分。
// src/output/draw.rs - 模拟检测框绘制
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use super::OutputError;
use crate::{frame::Frame, model::InferenceResult};

static FONT_DATA: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

// 固定叠加层参数
const OVERLAY_MIN: (i32, i32) = (50, 50);
const OVERLAY_MAX: (i32, i32) = (200, 200);
const OVERLAY_THICKNESS: i32 = 2;
const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]); // 绿色
const CAPTION: &str = "Detected Object";
const CAPTION_BASELINE: i32 = 45;
const CAPTION_FONT_SIZE: f32 = 16.0;

/// 加载内置字体
pub fn load_font() -> Result<FontArc, OutputError> {
  Ok(FontArc::try_from_slice(FONT_DATA)?)
}

/// 标注器：在固定位置绘制边框和说明文字
///
/// 叠加层的位置与推理结果无关，这是一个模拟的检测框。
pub struct Overlay {
  font: FontArc,
  caption_scale: PxScale,
}

impl Overlay {
  pub fn new() -> Result<Self, OutputError> {
    Ok(Self::with_font(load_font()?))
  }

  pub fn with_font(font: FontArc) -> Self {
    Self {
      font,
      caption_scale: PxScale::from(CAPTION_FONT_SIZE),
    }
  }

  pub fn annotate(&self, mut frame: Frame, _result: &InferenceResult) -> Frame {
    self.draw_on_image(&mut frame.image);
    frame
  }

  fn draw_on_image(&self, image: &mut RgbImage) {
    let (x_min, y_min) = OVERLAY_MIN;
    let (x_max, y_max) = OVERLAY_MAX;

    // 加粗为 2 像素，向内收缩；越界部分由 imageproc 裁剪
    for thickness in 0..OVERLAY_THICKNESS {
      let width = (x_max - x_min + 1 - 2 * thickness) as u32;
      let height = (y_max - y_min + 1 - 2 * thickness) as u32;
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width, height);
      draw_hollow_rect_mut(image, rect, OVERLAY_COLOR);
    }

    // 文字基线位于 y = 45
    let (_, text_height) = text_size(self.caption_scale, &self.font, CAPTION);
    draw_text_mut(
      image,
      OVERLAY_COLOR,
      x_min,
      CAPTION_BASELINE - text_height as i32,
      self.caption_scale,
      &self.font,
      CAPTION,
    );
  }
}
