// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, encode_jpeg},
  output::record::to_normalized_text,
  pipeline::PipelineOutput,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] FrameError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 相对于记录目录的路径，使用 `/` 分隔，可直接拼到下载地址
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedPaths {
  pub image: String,
  pub annotation: String,
}

/// 按日期分目录保存标注图像与归一化标注文本:
/// `<dir>/<YYYY>/<MM>/<DD>/<stem>-<HH-MM-SS>-<seq>.{jpg,txt}`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: AtomicU32,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }
    Ok(Self::new(uri.path()))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: AtomicU32::new(0),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn relative_stem(&self, stem: &str) -> String {
    let now = Utc::now();
    format!(
      "{}/{:02}/{:02}/{}-{}-{:04X}",
      now.year(),
      now.month(),
      now.day(),
      sanitize_stem(stem),
      now.format("%H-%M-%S"),
      self.frame_id()
    )
  }

  pub fn record(
    &self,
    stem: &str,
    output: &PipelineOutput,
  ) -> Result<RecordedPaths, DirectoryRecordOutputError> {
    let relative = self.relative_stem(stem);
    let paths = RecordedPaths {
      image: format!("{}.jpg", relative),
      annotation: format!("{}.txt", relative),
    };

    let image_path = self.directory.join(&paths.image);
    if let Some(parent) = image_path.parent()
      && !parent.exists()
    {
      std::fs::create_dir_all(parent)?;
    }

    let jpeg = encode_jpeg(&output.annotated)?;
    let text = to_normalized_text(&output.result.detections, output.result.original_size);
    write_pair(
      &image_path,
      &self.directory.join(&paths.annotation),
      &jpeg,
      &text,
    )?;

    debug!("记录已保存: {}", image_path.display());
    Ok(paths)
  }

  /// 只接受普通的相对路径，拒绝 `..`、根目录等
  pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
    let path = Path::new(relative);
    let normal = path.components().count() > 0
      && path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    normal.then(|| self.directory.join(path))
  }
}

/// 图像与标注要么都写入，要么都不留下
fn write_pair(image: &Path, annotation: &Path, jpeg: &[u8], text: &str) -> std::io::Result<()> {
  std::fs::write(image, jpeg)?;
  if let Err(e) = std::fs::write(annotation, text) {
    if let Err(cleanup) = std::fs::remove_file(image) {
      warn!("无法删除未完成的记录 {}: {}", image.display(), cleanup);
    }
    return Err(e);
  }
  Ok(())
}

/// 上传文件名去掉扩展名，只保留字母数字、`-` 与 `_`
pub fn sanitize_stem(name: &str) -> String {
  let stem = Path::new(name)
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or_default();
  let cleaned: String = stem
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
    .collect();
  if cleaned.is_empty() {
    "image".to_string()
  } else {
    cleaned
  }
}
