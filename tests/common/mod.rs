// 该文件是 Quchi （龋齿检测） 项目的一部分。
// tests/common/mod.rs - 测试公共工具
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

#![allow(dead_code)]

use std::sync::Arc;

use image::{Rgb, RgbImage};
use quchi::{
  frame::{Frame, encode_png},
  label::ClassRegistry,
  model::{Model, ModelAdapter, RawDetection},
  output::draw::Draw,
  pipeline::Pipeline,
};

/// 固定输出的检测器，按阈值过滤
pub struct StubModel(pub Vec<RawDetection>);

impl Model for StubModel {
  type Error = std::convert::Infallible;

  fn infer(&self, _: &Frame, threshold: f32) -> Result<Vec<RawDetection>, Self::Error> {
    Ok(
      self
        .0
        .iter()
        .filter(|d| d.confidence >= threshold)
        .cloned()
        .collect(),
    )
  }
}

pub struct FailingModel;

impl Model for FailingModel {
  type Error = String;

  fn infer(&self, _: &Frame, _: f32) -> Result<Vec<RawDetection>, Self::Error> {
    Err("session crashed".to_string())
  }
}

pub fn raw(class_id: u32, confidence: f32, bbox: [f32; 4]) -> RawDetection {
  RawDetection {
    class_id,
    confidence,
    bbox,
  }
}

/// 单一检测: cavity 0.87 @ [10, 10, 50, 50]
pub fn single_cavity() -> StubModel {
  StubModel(vec![raw(0, 0.87, [10.0, 10.0, 50.0, 50.0])])
}

pub fn pipeline<M>(model: Option<M>) -> Pipeline<M> {
  let adapter = match model {
    Some(model) => ModelAdapter::new(model),
    None => ModelAdapter::unavailable(),
  };
  Pipeline::new(adapter, Arc::new(ClassRegistry::default()), Draw::default())
}

pub fn blank_image(width: u32, height: u32) -> RgbImage {
  RgbImage::from_pixel(width, height, Rgb([200, 200, 200]))
}

pub fn blank_png(width: u32, height: u32) -> Vec<u8> {
  encode_png(&blank_image(width, height)).unwrap()
}
