// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use crate::{
  label::{ClassRegistry, DEFAULT_CLASSES},
  model::DEFAULT_CONFIDENCE,
  output::draw::{ColorTable, Draw, DrawError, GREY},
};

/// Quchi 服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolo:///models/best.onnx?size=640&iou=0.45
  /// 未指定或加载失败时服务仍会启动，但推理接口不可用
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,

  /// 类别名称（逗号分隔），下标即 class_id
  #[arg(long, value_delimiter = ',', default_values = DEFAULT_CLASSES)]
  pub classes: Vec<String>,

  /// 监听地址
  #[arg(long, default_value = "0.0.0.0")]
  pub host: String,

  /// 监听端口
  #[arg(long, default_value_t = 5000)]
  pub port: u16,

  /// 默认置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_name = "THRESHOLD", value_parser = parse_confidence)]
  pub confidence: f32,

  /// 标签字体文件 (TTF/OTF)，不指定时查找系统字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 结果记录目录，例如 folder:///var/lib/quchi
  #[arg(long, value_name = "URL")]
  pub record: Option<Url>,

  /// 未登记颜色的类别使用灰色边框（默认绿色）
  #[arg(long)]
  pub neutral_color: bool,
}

pub fn parse_confidence(value: &str) -> Result<f32, String> {
  let confidence: f32 = value
    .trim()
    .parse()
    .map_err(|_| format!("无法解析置信度: {}", value))?;
  if (0.0..=1.0).contains(&confidence) {
    Ok(confidence)
  } else {
    Err(format!("置信度必须在 0.0 - 1.0 之间: {}", value))
  }
}

impl Args {
  pub fn registry(&self) -> ClassRegistry {
    ClassRegistry::new(self.classes.iter().map(|name| name.trim().to_string()))
  }

  pub fn draw(&self) -> Result<Draw, DrawError> {
    let colors = if self.neutral_color {
      ColorTable::default().with_fallback(GREY)
    } else {
      ColorTable::default()
    };
    let draw = Draw::default().with_colors(colors);
    match &self.font {
      Some(path) => draw.with_font_file(path),
      None => Ok(draw.with_system_font()),
    }
  }
}
