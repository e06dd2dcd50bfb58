// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/model/yolo.rs - YOLO ONNX 检测模型
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

use std::{path::PathBuf, sync::Mutex};

use image::{Rgb, RgbImage, imageops::FilterType};
use ndarray::{Array4, ArrayView2, Axis, Ix3};
use ort::{
  execution_providers::CPUExecutionProvider,
  session::{Session, builder::GraphOptimizationLevel},
  value::Value,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{Model, RawDetection},
};

const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_DEFAULT_IOU_THRESH: f32 = 0.45;
const YOLO_DEFAULT_THREADS: usize = 4;
const YOLO_MAX_DETECTIONS: usize = 300;
const YOLO_PAD_VALUE: u8 = 114;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(String),
  #[error("模型输出形状不正确: {0:?}")]
  OutputShape(Vec<usize>),
  #[error("模型会话锁已损坏")]
  Poisoned,
}

fn ort_error<E: std::fmt::Display>(e: E) -> YoloError {
  YoloError::Ort(e.to_string())
}

pub struct YoloBuilder {
  model_path: PathBuf,
  input_size: u32,
  iou_threshold: f32,
  intra_threads: usize,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  /// `yolo:///path/to/best.onnx?size=640&iou=0.45&threads=4`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut builder = YoloBuilder {
      model_path: PathBuf::from(url.path()),
      input_size: YOLO_DEFAULT_INPUT_SIZE,
      iou_threshold: YOLO_DEFAULT_IOU_THRESH,
      intra_threads: YOLO_DEFAULT_THREADS,
    };

    for (k, v) in url.query_pairs() {
      let invalid = || YoloError::ModelPathError(format!("无效的参数 {}={}", k, v));
      match k.as_ref() {
        "size" => builder.input_size = v.parse().map_err(|_| invalid())?,
        "iou" => builder.iou_threshold = v.parse().map_err(|_| invalid())?,
        "threads" => builder.intra_threads = v.parse().map_err(|_| invalid())?,
        _ => debug!("忽略未知的模型参数: {}={}", k, v),
      }
    }

    if builder.input_size == 0 {
      return Err(YoloError::ModelPathError("输入尺寸不能为 0".to_string()));
    }

    Ok(builder)
  }
}

impl YoloBuilder {
  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn iou_threshold(mut self, iou: f32) -> Self {
    self.iou_threshold = iou;
    self
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    if !self.model_path.exists() {
      return Err(YoloError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()
      .map_err(ort_error)?
      .with_execution_providers([CPUExecutionProvider::default().build()])
      .map_err(ort_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ort_error)?
      .with_intra_threads(self.intra_threads)
      .map_err(ort_error)?
      .commit_from_file(&self.model_path)
      .map_err(ort_error)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .unwrap_or_else(|| "images".to_string());
    debug!(
      "模型输入: {}, 输入尺寸: {}, IoU 阈值: {}",
      input_name, self.input_size, self.iou_threshold
    );
    info!("模型加载完成");

    Ok(Yolo {
      session: Mutex::new(session),
      input_name,
      input_size: self.input_size,
      iou_threshold: self.iou_threshold,
    })
  }
}

/// ultralytics 导出的 YOLO 检测模型，输出形状 [1, 4 + nc, N]
pub struct Yolo {
  session: Mutex<Session>,
  input_name: String,
  input_size: u32,
  iou_threshold: f32,
}

/// 保持宽高比缩放并居中填充到 size x size
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  resized_w: u32,
  resized_h: u32,
  pad_x: u32,
  pad_y: u32,
  width: f32,
  height: f32,
}

impl Letterbox {
  fn new(width: u32, height: u32, size: u32) -> Self {
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let resized_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let resized_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    Self {
      scale,
      resized_w,
      resized_h,
      pad_x: (size - resized_w) / 2,
      pad_y: (size - resized_h) / 2,
      width: width as f32,
      height: height as f32,
    }
  }

  /// 模型输入坐标映射回原图像素坐标，并限制在图像范围内
  fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
    let x = |v: f32| ((v - self.pad_x as f32) / self.scale).clamp(0.0, self.width);
    let y = |v: f32| ((v - self.pad_y as f32) / self.scale).clamp(0.0, self.height);
    [x(bbox[0]), y(bbox[1]), x(bbox[2]), y(bbox[3])]
  }
}

impl Yolo {
  fn preprocess(&self, frame: &Frame) -> (Array4<f32>, Letterbox) {
    let size = self.input_size;
    let letterbox = Letterbox::new(frame.width(), frame.height(), size);
    let image = frame.as_rgb();

    let resized = image::imageops::resize(
      image,
      letterbox.resized_w,
      letterbox.resized_h,
      FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([YOLO_PAD_VALUE; 3]));
    image::imageops::overlay(
      &mut canvas,
      &resized,
      letterbox.pad_x as i64,
      letterbox.pad_y as i64,
    );

    // HWC -> NCHW, 归一化到 [0, 1]
    let tensor = Array4::from_shape_fn((1, 3, size as usize, size as usize), |(_, c, y, x)| {
      canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    (tensor, letterbox)
  }
}

impl Model for Yolo {
  type Error = YoloError;

  fn infer(&self, input: &Frame, threshold: f32) -> Result<Vec<RawDetection>, Self::Error> {
    debug!("设置模型输入");
    let (tensor, letterbox) = self.preprocess(input);
    let value = Value::from_array(tensor).map_err(ort_error)?;

    let candidates = {
      let mut session = self.session.lock().map_err(|_| YoloError::Poisoned)?;
      debug!("执行模型推理");
      let outputs = session
        .run(ort::inputs![&self.input_name => value])
        .map_err(ort_error)?;
      let output = outputs[0].try_extract_array::<f32>().map_err(ort_error)?;

      let shape = output.shape().to_vec();
      let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|_| YoloError::OutputShape(shape.clone()))?;
      if output.len_of(Axis(0)) == 0 {
        return Err(YoloError::OutputShape(shape));
      }
      decode_predictions(output.index_axis(Axis(0), 0), threshold)?
    };
    debug!("阈值过滤后候选数: {}", candidates.len());

    let items: Vec<RawDetection> = non_max_suppression(candidates, self.iou_threshold)
      .into_iter()
      .map(|item| RawDetection {
        bbox: letterbox.unmap(item.bbox),
        ..item
      })
      .collect();

    debug!("检测到 {} 个物体", items.len());
    Ok(items)
  }
}

/// 解析 [4 + nc, N]（或转置的 [N, 4 + nc]）预测，box 为 (cx, cy, w, h)
fn decode_predictions(
  pred: ArrayView2<f32>,
  threshold: f32,
) -> Result<Vec<RawDetection>, YoloError> {
  let pred = if pred.nrows() > pred.ncols() {
    pred.reversed_axes()
  } else {
    pred
  };
  let (channels, anchors) = pred.dim();
  if channels <= 4 {
    return Err(YoloError::OutputShape(vec![channels, anchors]));
  }

  let mut items = Vec::new();
  for column in pred.axis_iter(Axis(1)) {
    let (class_id, score) = column
      .iter()
      .skip(4)
      .enumerate()
      .fold((0usize, f32::MIN), |best, (c, &s)| {
        if s > best.1 { (c, s) } else { best }
      });

    if score < threshold {
      continue;
    }

    let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
    items.push(RawDetection {
      class_id: class_id as u32,
      confidence: score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }
  Ok(items)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = w * h;
  let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
  let union = area(a) + area(b) - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按类别做 NMS，结果按置信度降序
fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<RawDetection> = Vec::new();
  for candidate in candidates {
    let suppressed = kept.iter().any(|k| {
      k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
      if kept.len() >= YOLO_MAX_DETECTIONS {
        break;
      }
    }
  }
  kept
}
