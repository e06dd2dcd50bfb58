// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/bin/oneshot.rs - 单张图像推理
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

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use quchi::{
  FromUrl,
  args::parse_confidence,
  label::{ClassRegistry, DEFAULT_CLASSES},
  model::{DEFAULT_CONFIDENCE, ModelAdapter, YoloBuilder},
  output::{SaveImageFileOutput, draw::Draw},
  pipeline::Pipeline,
};

/// 对单张图像推理并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolo:///models/best.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,
  /// 输出路径，例如 image:///tmp/result.jpg
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_parser = parse_confidence)]
  pub confidence: f32,
  /// 类别名称（逗号分隔）
  #[arg(long, value_delimiter = ',', default_values = DEFAULT_CLASSES)]
  pub classes: Vec<String>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入图像: {}", args.input.display());
  info!("输出路径: {}", args.output);

  let model = YoloBuilder::from_url(&args.model)?.build()?;
  let output = SaveImageFileOutput::from_url(&args.output)?;
  let registry = Arc::new(ClassRegistry::new(args.classes));
  let pipeline = Pipeline::new(ModelAdapter::new(model), registry, Draw::default());

  let bytes = std::fs::read(&args.input)?;
  info!("开始推理...");
  let result = pipeline.run(&bytes, args.confidence)?;
  info!(
    "推理完成，耗时: {:.2} ms, 检测数: {}",
    result.result.inference_time_ms,
    result.result.num_detections()
  );
  for det in &result.result.detections {
    info!(
      "  #{} {}: {:.2}% at {:?}",
      det.object_id,
      det.class_name,
      det.confidence * 100.0,
      det.bbox
    );
  }

  output.save(&result)?;
  info!("标注文本: {}", output.annotation_path().display());
  Ok(())
}
