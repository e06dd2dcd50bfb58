// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/detection.rs - 检测结果规范化
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

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{label::ClassRegistry, model::RawDetection};

/// 规范化后的检测记录，直接序列化到响应中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  /// 从 1 开始，按检测器输出顺序编号
  pub object_id: u32,
  pub class_id: u32,
  pub class_name: String,
  pub confidence: f32,
  /// 像素坐标 [x1, y1, x2, y2]
  pub bbox: [i32; 4],
  /// 长度等于类别数，仅 `class_id` 位置为 `confidence`
  pub probabilities: Vec<f32>,
}

impl Detection {
  pub fn from_raw(object_id: u32, raw: &RawDetection, registry: &ClassRegistry) -> Self {
    let mut probabilities = vec![0.0; registry.len()];
    match probabilities.get_mut(raw.class_id as usize) {
      Some(slot) => *slot = raw.confidence,
      None => warn!(
        "类别 {} 超出类别表范围 ({}), 概率向量保持全零",
        raw.class_id,
        registry.len()
      ),
    }

    // 截断取整，不四舍五入
    let bbox = raw.bbox.map(|v| v as i32);

    Self {
      object_id,
      class_id: raw.class_id,
      class_name: registry.to_label_str(raw.class_id),
      confidence: raw.confidence,
      bbox,
      probabilities,
    }
  }
}

/// 保持顺序、不丢弃任何结果；过滤只由检测器按阈值完成
pub fn normalize(raw: &[RawDetection], registry: &ClassRegistry) -> Vec<Detection> {
  raw
    .iter()
    .enumerate()
    .map(|(idx, item)| Detection::from_raw(idx as u32 + 1, item, registry))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn raw(class_id: u32, confidence: f32, bbox: [f32; 4]) -> RawDetection {
    RawDetection {
      class_id,
      confidence,
      bbox,
    }
  }

  #[test]
  fn ids_follow_emission_order() {
    let registry = ClassRegistry::default();
    let detections = normalize(
      &[
        raw(1, 0.3, [0.0, 0.0, 1.0, 1.0]),
        raw(0, 0.9, [5.0, 5.0, 9.0, 9.0]),
        raw(1, 0.6, [2.0, 2.0, 3.0, 3.0]),
      ],
      &registry,
    );

    let ids: Vec<u32> = detections.iter().map(|d| d.object_id).collect();
    let scores: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(scores, vec![0.3, 0.9, 0.6]);
  }

  #[test]
  fn probabilities_are_one_hot_scaled() {
    let registry = ClassRegistry::default();
    let detection = Detection::from_raw(1, &raw(1, 0.42, [0.0; 4]), &registry);
    assert_eq!(detection.class_name, "normal");
    assert_eq!(detection.probabilities, vec![0.0, 0.42]);
  }

  #[test]
  fn out_of_range_class_keeps_detection_with_zero_vector() {
    let registry = ClassRegistry::default();
    let detections = normalize(&[raw(5, 0.7, [1.0, 2.0, 3.0, 4.0])], &registry);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_name, "class_5");
    assert_eq!(detections[0].probabilities, vec![0.0, 0.0]);
  }

  #[test]
  fn coordinates_are_truncated() {
    let registry = ClassRegistry::default();
    let detection = Detection::from_raw(1, &raw(0, 0.5, [10.9, 20.5, 49.99, 50.1]), &registry);
    assert_eq!(detection.bbox, [10, 20, 49, 50]);
  }

  #[test]
  fn serializes_expected_fields() {
    let registry = ClassRegistry::default();
    let detection = Detection::from_raw(1, &raw(0, 0.87, [10.0, 10.0, 50.0, 50.0]), &registry);
    let value = serde_json::to_value(&detection).unwrap();
    assert_eq!(value["object_id"], 1);
    assert_eq!(value["class_name"], "cavity");
    assert_eq!(value["bbox"], serde_json::json!([10, 10, 50, 50]));
    assert_eq!(value["probabilities"].as_array().unwrap().len(), 2);
  }
}
