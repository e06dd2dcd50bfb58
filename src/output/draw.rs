// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::{collections::HashMap, path::Path};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use thiserror::Error;
use tracing::{info, warn};

use crate::{detection::Detection, frame::Frame};

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const GREY: Rgb<u8> = Rgb([160, 160, 160]);

// 边框与标签常量
const BOX_THICKNESS: i64 = 2;
const LABEL_OFFSET_Y: i32 = 5;
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]); // 白色

/// 未指定 `--font` 时依次尝试的系统字体
pub const SYSTEM_FONTS: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

// 找不到任何字体时使用的 5x7 数字点阵，每行低 5 位有效，高位在左
const GLYPH_WIDTH: i64 = 5;
const GLYPH_HEIGHT: i64 = 7;
const GLYPH_SCALE: i64 = 2;
const DIGIT_GLYPHS: [[u8; 7]; 10] = [
  [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
  [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
  [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
  [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
  [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
  [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
  [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
  [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
  [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
  [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

/// 类别到边框颜色的映射，未登记的类别使用 `fallback`
#[derive(Debug, Clone)]
pub struct ColorTable {
  colors: HashMap<u32, Rgb<u8>>,
  fallback: Rgb<u8>,
}

impl Default for ColorTable {
  /// 0 (cavity) 红色，其余绿色
  fn default() -> Self {
    Self::new(GREEN).with_color(0, RED).with_color(1, GREEN)
  }
}

impl ColorTable {
  pub fn new(fallback: Rgb<u8>) -> Self {
    Self {
      colors: HashMap::new(),
      fallback,
    }
  }

  pub fn with_color(mut self, class_id: u32, color: Rgb<u8>) -> Self {
    self.colors.insert(class_id, color);
    self
  }

  pub fn with_fallback(mut self, color: Rgb<u8>) -> Self {
    self.fallback = color;
    self
  }

  pub fn color_of(&self, class_id: u32) -> Rgb<u8> {
    self.colors.get(&class_id).copied().unwrap_or(self.fallback)
  }
}

pub struct Draw {
  colors: ColorTable,
  font: Option<FontArc>,
  font_scale: PxScale,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      colors: ColorTable::default(),
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }
}

impl Draw {
  pub fn with_colors(mut self, colors: ColorTable) -> Self {
    self.colors = colors;
    self
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file(self, path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("标签字体已加载: {}", path.display());
    Ok(self.with_font(font))
  }

  /// 依次尝试 `SYSTEM_FONTS`，全部失败时保留内置点阵
  pub fn with_system_font(self) -> Self {
    for path in SYSTEM_FONTS.iter().map(Path::new) {
      if !path.exists() {
        continue;
      }
      match std::fs::read(path) {
        Ok(data) => match FontArc::try_from_vec(data) {
          Ok(font) => {
            info!("使用系统字体: {}", path.display());
            return self.with_font(font);
          }
          Err(e) => warn!("系统字体无效 {}: {}", path.display(), e),
        },
        Err(e) => warn!("无法读取系统字体 {}: {}", path.display(), e),
      }
    }
    warn!("未找到可用字体，标签使用内置数字点阵");
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn colors(&self) -> &ColorTable {
    &self.colors
  }

  /// 在原图副本上绘制，原图与检测结果均不修改
  pub fn render(&self, frame: &Frame, detections: &[Detection]) -> RgbImage {
    let mut image = frame.as_rgb().clone();
    self.draw_detections_on_image(&mut image, detections);
    image
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &[Detection]) {
    let mut ordered: Vec<&Detection> = detections.iter().collect();
    ordered.sort_by_key(|d| d.object_id);

    for detection in ordered {
      let color = self.colors.color_of(detection.class_id);
      draw_bbox(image, detection.bbox, color);
      self.draw_label(
        image,
        &detection.object_id.to_string(),
        detection.bbox[0],
        detection.bbox[1],
      );
    }
  }

  // 标签基线位于框左上角上方 LABEL_OFFSET_Y 像素
  fn draw_label(&self, image: &mut RgbImage, label: &str, x: i32, y: i32) {
    match &self.font {
      Some(font) => {
        let (_, text_height) = text_size(self.font_scale, font, label);
        let top = y
          .saturating_sub(LABEL_OFFSET_Y)
          .saturating_sub(text_height as i32);
        draw_text_mut(image, LABEL_COLOR, x, top, self.font_scale, font, label);
      }
      None => {
        let top = y as i64 - LABEL_OFFSET_Y as i64 - GLYPH_HEIGHT * GLYPH_SCALE;
        draw_digits(image, label, x as i64, top, LABEL_COLOR);
      }
    }
  }
}

fn put_pixel_checked(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
  if x >= 0 && y >= 0 && x < image.width() as i64 && y < image.height() as i64 {
    image.put_pixel(x as u32, y as u32, color);
  }
}

/// 绘制边框（向内加粗），超出图像的部分直接跳过
fn draw_bbox(image: &mut RgbImage, bbox: [i32; 4], color: Rgb<u8>) {
  let (w, h) = (image.width() as i64, image.height() as i64);
  let [x1, y1, x2, y2] = bbox.map(i64::from);

  for t in 0..BOX_THICKNESS {
    let (left, top, right, bottom) = (x1 + t, y1 + t, x2 - t, y2 - t);
    if left > right || top > bottom {
      break;
    }

    let (xs, xe) = (left.max(0), right.min(w - 1));
    let (ys, ye) = (top.max(0), bottom.min(h - 1));

    // 上下边
    for y in [top, bottom] {
      if (0..h).contains(&y) {
        for x in xs..=xe {
          image.put_pixel(x as u32, y as u32, color);
        }
      }
    }

    // 左右边
    for x in [left, right] {
      if (0..w).contains(&x) {
        for y in ys..=ye {
          image.put_pixel(x as u32, y as u32, color);
        }
      }
    }
  }
}

/// 无字体时的数字点阵绘制，非数字字符只占位
fn draw_digits(image: &mut RgbImage, text: &str, x: i64, y: i64, color: Rgb<u8>) {
  let mut pen_x = x;
  for ch in text.chars() {
    if let Some(rows) = ch.to_digit(10).map(|d| DIGIT_GLYPHS[d as usize]) {
      for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
          let mask = 1u8 << (GLYPH_WIDTH - 1 - col);
          if (*bits & mask) == 0 {
            continue;
          }
          let px = pen_x + col * GLYPH_SCALE;
          let py = y + row as i64 * GLYPH_SCALE;
          for dy in 0..GLYPH_SCALE {
            for dx in 0..GLYPH_SCALE {
              put_pixel_checked(image, px + dx, py + dy, color);
            }
          }
        }
      }
    }
    pen_x += (GLYPH_WIDTH + 1) * GLYPH_SCALE;
  }
}
