// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/output/record.rs - 归一化标注文本
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

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::warn;

use crate::detection::Detection;

#[derive(Error, Debug, PartialEq)]
pub enum RecordError {
  #[error("标注行字段数应为 6, 实际为 {0}: {1:?}")]
  FieldCount(usize, String),
  #[error("标注行字段无法解析: {0:?}")]
  InvalidField(String),
}

/// 一行标注: `class_id center_x center_y width height confidence`，
/// 几何量按图像宽高归一化
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
  pub class_id: u32,
  pub center_x: f64,
  pub center_y: f64,
  pub width: f64,
  pub height: f64,
  pub confidence: f64,
}

impl NormalizedBox {
  pub fn from_detection(detection: &Detection, (width, height): (u32, u32)) -> Self {
    let [x1, y1, x2, y2] = detection.bbox.map(f64::from);
    let (w, h) = (f64::from(width), f64::from(height));
    Self {
      class_id: detection.class_id,
      center_x: (x1 + x2) / 2.0 / w,
      center_y: (y1 + y2) / 2.0 / h,
      width: (x2 - x1) / w,
      height: (y2 - y1) / h,
      confidence: f64::from(detection.confidence),
    }
  }

  /// 还原为像素坐标 (center_x, center_y, width, height)
  pub fn to_pixels(&self, (width, height): (u32, u32)) -> [f64; 4] {
    let (w, h) = (f64::from(width), f64::from(height));
    [
      self.center_x * w,
      self.center_y * h,
      self.width * w,
      self.height * h,
    ]
  }
}

impl fmt::Display for NormalizedBox {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} {:.6} {:.6} {:.6} {:.6} {:.6}",
      self.class_id, self.center_x, self.center_y, self.width, self.height, self.confidence
    )
  }
}

impl FromStr for NormalizedBox {
  type Err = RecordError;

  fn from_str(line: &str) -> Result<Self, Self::Err> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 6 {
      return Err(RecordError::FieldCount(fields.len(), line.to_string()));
    }

    let invalid = |field: &str| RecordError::InvalidField(field.to_string());
    let number = |field: &str| field.parse::<f64>().map_err(|_| invalid(field));

    Ok(Self {
      class_id: fields[0].parse().map_err(|_| invalid(fields[0]))?,
      center_x: number(fields[1])?,
      center_y: number(fields[2])?,
      width: number(fields[3])?,
      height: number(fields[4])?,
      confidence: number(fields[5])?,
    })
  }
}

/// 每个检测一行，以换行结尾。图像尺寸为 0 时无法归一化，返回空文本
pub fn to_normalized_text(detections: &[Detection], original_size: (u32, u32)) -> String {
  if original_size.0 == 0 || original_size.1 == 0 {
    if !detections.is_empty() {
      warn!(
        "图像尺寸 {:?} 无效，跳过 {} 个检测的归一化标注",
        original_size,
        detections.len()
      );
    }
    return String::new();
  }

  detections
    .iter()
    .map(|d| format!("{}\n", NormalizedBox::from_detection(d, original_size)))
    .collect()
}

pub fn parse_normalized_text(text: &str) -> Result<Vec<NormalizedBox>, RecordError> {
  text
    .lines()
    .filter(|line| !line.trim().is_empty())
    .map(str::parse::<NormalizedBox>)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(class_id: u32, confidence: f32, bbox: [i32; 4]) -> Detection {
    Detection {
      object_id: 1,
      class_id,
      class_name: String::new(),
      confidence,
      bbox,
      probabilities: vec![],
    }
  }

  #[test]
  fn single_line_matches_expected_format() {
    let text = to_normalized_text(&[detection(0, 0.87, [10, 10, 50, 50])], (100, 100));
    assert_eq!(text, "0 0.300000 0.300000 0.400000 0.400000 0.870000\n");
  }

  #[test]
  fn empty_detections_give_empty_text() {
    assert_eq!(to_normalized_text(&[], (640, 480)), "");
  }

  #[test]
  fn zero_sized_image_gives_empty_text() {
    let detections = [detection(0, 0.87, [0, 0, 0, 0])];
    for size in [(0, 0), (0, 100), (100, 0)] {
      let text = to_normalized_text(&detections, size);
      assert_eq!(text, "");
      assert!(parse_normalized_text(&text).unwrap().is_empty());
    }
  }

  #[test]
  fn written_lines_restore_pixel_geometry() {
    let size = (1280, 720);
    let detections = [
      detection(0, 0.5, [100, 50, 300, 400]),
      detection(1, 0.333333, [7, 13, 1279, 719]),
      detection(3, 0.99, [640, 360, 651, 371]),
    ];
    let text = to_normalized_text(&detections, size);
    let parsed = parse_normalized_text(&text).unwrap();
    assert_eq!(parsed.len(), detections.len());

    for (line, detection) in parsed.iter().zip(detections.iter()) {
      let [x1, y1, x2, y2] = detection.bbox.map(f64::from);
      let expected = [(x1 + x2) / 2.0, (y1 + y2) / 2.0, x2 - x1, y2 - y1];
      for (got, want) in line.to_pixels(size).iter().zip(expected) {
        assert!(((got - want) / want).abs() < 1e-4, "{} vs {}", got, want);
      }
      assert_eq!(line.class_id, detection.class_id);
    }
  }

  #[test]
  fn malformed_lines_are_rejected() {
    assert!(matches!(
      "0 0.1 0.2".parse::<NormalizedBox>(),
      Err(RecordError::FieldCount(3, _))
    ));
    assert!(matches!(
      "x 0.1 0.2 0.3 0.4 0.5".parse::<NormalizedBox>(),
      Err(RecordError::InvalidField(_))
    ));
  }
}
