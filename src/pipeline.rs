// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/pipeline.rs - 检测与标注流水线
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

use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
  detection::{Detection, normalize},
  frame::{Frame, encode_jpeg},
  label::ClassRegistry,
  model::{Model, ModelAdapter},
  output::{draw::Draw, record::to_normalized_text},
};

/// 流水线对外的唯一错误类型，失败时不返回任何部分结果
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
  #[error("模型未加载")]
  ModelUnavailable,
  #[error("图像解码失败: {0}")]
  DecodeError(String),
  #[error("置信度阈值无效: {0}")]
  InvalidThreshold(f32),
  #[error("渲染失败: {0}")]
  RenderFailure(String),
  #[error("推理失败: {0}")]
  Inference(String),
}

impl PipelineError {
  pub fn kind(&self) -> &'static str {
    match self {
      PipelineError::ModelUnavailable => "ModelUnavailable",
      PipelineError::DecodeError(_) => "DecodeError",
      PipelineError::InvalidThreshold(_) => "InvalidThreshold",
      PipelineError::RenderFailure(_) => "RenderFailure",
      PipelineError::Inference(_) => "InferenceError",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
  pub detections: Vec<Detection>,
  /// 只包含检测器调用的耗时
  pub inference_time_ms: f64,
  pub confidence_threshold: f32,
  /// 标注前原图的 (width, height)
  pub original_size: (u32, u32),
}

impl InferenceResult {
  pub fn num_detections(&self) -> usize {
    self.detections.len()
  }

  pub fn to_normalized_text(&self) -> String {
    to_normalized_text(&self.detections, self.original_size)
  }
}

pub fn assemble(
  detections: Vec<Detection>,
  inference_time_ms: f64,
  confidence_threshold: f32,
  original_size: (u32, u32),
) -> InferenceResult {
  InferenceResult {
    detections,
    inference_time_ms,
    confidence_threshold,
    original_size,
  }
}

pub struct PipelineOutput {
  pub result: InferenceResult,
  pub annotated: RgbImage,
}

impl PipelineOutput {
  pub fn encode_annotated(&self) -> Result<Vec<u8>, PipelineError> {
    encode_jpeg(&self.annotated).map_err(|e| PipelineError::RenderFailure(e.to_string()))
  }
}

/// 模型与类别表在启动时构造一次，之后只读共享
pub struct Pipeline<M> {
  adapter: ModelAdapter<M>,
  registry: Arc<ClassRegistry>,
  draw: Draw,
}

impl<M> Pipeline<M> {
  pub fn new(adapter: ModelAdapter<M>, registry: Arc<ClassRegistry>, draw: Draw) -> Self {
    Self {
      adapter,
      registry,
      draw,
    }
  }

  pub fn registry(&self) -> &ClassRegistry {
    &self.registry
  }

  pub fn is_model_available(&self) -> bool {
    self.adapter.is_available()
  }

  /// 不涉及推理，模型未加载时同样可用
  pub fn list_classes(&self) -> (Vec<String>, usize) {
    (self.registry.names().to_vec(), self.registry.len())
  }
}

impl<M> Pipeline<M>
where
  M: Model,
  M::Error: std::fmt::Display,
{
  pub fn run(&self, bytes: &[u8], threshold: f32) -> Result<PipelineOutput, PipelineError> {
    if !self.adapter.is_available() {
      return Err(PipelineError::ModelUnavailable);
    }
    let frame = Frame::decode(bytes).map_err(|e| PipelineError::DecodeError(e.to_string()))?;
    self.run_frame(&frame, threshold)
  }

  pub fn run_frame(&self, frame: &Frame, threshold: f32) -> Result<PipelineOutput, PipelineError> {
    if !(0.0..=1.0).contains(&threshold) {
      return Err(PipelineError::InvalidThreshold(threshold));
    }

    let (raw, inference_time_ms) = self.adapter.infer(frame, threshold)?;
    let detections = normalize(&raw, &self.registry);
    let annotated = self.draw.render(frame, &detections);
    if annotated.dimensions() != frame.size() {
      return Err(PipelineError::RenderFailure(format!(
        "标注图像尺寸 {:?} 与原图 {:?} 不一致",
        annotated.dimensions(),
        frame.size()
      )));
    }

    let result = assemble(detections, inference_time_ms, threshold, frame.size());
    info!(
      "检测到 {} 个对象 (阈值: {}, 耗时: {:.2} ms)",
      result.num_detections(),
      threshold,
      inference_time_ms
    );

    Ok(PipelineOutput { result, annotated })
  }
}
