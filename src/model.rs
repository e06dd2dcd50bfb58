// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/model.rs - 模型
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

use std::time::Instant;

use tracing::{debug, error};

use crate::{frame::Frame, pipeline::PipelineError};

/// 未指定时使用的置信度阈值
pub const DEFAULT_CONFIDENCE: f32 = 0.25;

/// 检测器接口。实现自身负责按阈值过滤，只返回 `confidence >= threshold` 的结果。
pub trait Model {
  type Error;

  fn infer(&self, input: &Frame, threshold: f32) -> Result<Vec<RawDetection>, Self::Error>;
}

/// 检测器原始输出，坐标为原图像素 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub class_id: u32,
  pub confidence: f32,
  pub bbox: [f32; 4],
}

/// 包装可能加载失败的检测器，并对推理计时
pub struct ModelAdapter<M> {
  model: Option<M>,
}

impl<M> ModelAdapter<M> {
  pub fn new(model: M) -> Self {
    Self { model: Some(model) }
  }

  /// 模型加载失败时使用：元数据接口照常可用，推理请求一律失败
  pub fn unavailable() -> Self {
    Self { model: None }
  }

  pub fn from_load_result<E: std::fmt::Display>(result: Result<M, E>) -> Self {
    match result {
      Ok(model) => Self::new(model),
      Err(e) => {
        error!("模型加载失败，推理功能不可用: {}", e);
        Self::unavailable()
      }
    }
  }

  pub fn is_available(&self) -> bool {
    self.model.is_some()
  }
}

impl<M> ModelAdapter<M>
where
  M: Model,
  M::Error: std::fmt::Display,
{
  /// 返回检测结果与推理耗时（毫秒），计时只覆盖检测器调用本身
  pub fn infer(
    &self,
    frame: &Frame,
    threshold: f32,
  ) -> Result<(Vec<RawDetection>, f64), PipelineError> {
    let model = self.model.as_ref().ok_or(PipelineError::ModelUnavailable)?;

    let now = Instant::now();
    let detections = model
      .infer(frame, threshold)
      .map_err(|e| PipelineError::Inference(e.to_string()))?;
    let elapsed_ms = now.elapsed().as_secs_f64() * 1000.0;

    debug!(
      "推理完成，耗时: {:.2} ms, 候选数: {}",
      elapsed_ms,
      detections.len()
    );
    Ok((detections, elapsed_ms))
  }
}

#[cfg(feature = "model_yolo")]
mod yolo;
#[cfg(feature = "model_yolo")]
pub use self::yolo::{Yolo, YoloBuilder, YoloError};
