// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/main.rs - 项目主程序
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

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quchi::{
  FromUrl,
  args::Args,
  model::{ModelAdapter, Yolo, YoloBuilder},
  output::DirectoryRecordOutput,
  pipeline::Pipeline,
  server::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("Quchi 龋齿检测服务");
  info!("模型地址: {:?}", args.model.as_ref().map(|url| url.as_str()));
  info!("类别: {:?}", args.classes);
  info!("默认置信度阈值: {}", args.confidence);

  let adapter: ModelAdapter<Yolo> = match &args.model {
    Some(url) => {
      info!("正在加载模型...");
      ModelAdapter::from_load_result(YoloBuilder::from_url(url).and_then(YoloBuilder::build))
    }
    None => {
      warn!("未指定模型，推理接口将返回 503");
      ModelAdapter::unavailable()
    }
  };
  if adapter.is_available() {
    info!("模型加载完成");
  }

  let registry = Arc::new(args.registry());
  let draw = args.draw()?;
  let recorder = match &args.record {
    Some(url) => {
      let recorder = DirectoryRecordOutput::from_url(url)?;
      info!("记录目录: {}", recorder.directory().display());
      Some(recorder)
    }
    None => None,
  };

  let state = Arc::new(AppState::new(
    Pipeline::new(adapter, registry, draw),
    recorder,
    args.confidence,
  ));

  let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
  info!("服务已启动: http://{}", listener.local_addr()?);
  server::serve(listener, state).await?;

  info!("服务已退出");
  Ok(())
}
