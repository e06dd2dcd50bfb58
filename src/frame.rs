// 该文件是 Quchi （龋齿检测） 项目的一部分。
// src/frame.rs - 图像帧定义
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

use std::io::Cursor;

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::debug;

const JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("图像解码错误: {0}")]
  Decode(image::ImageError),
  #[error("图像为空: {0}x{1}")]
  Empty(u32, u32),
  #[error("图像编码错误: {0}")]
  Encode(image::ImageError),
}

/// 单次请求内解码得到的 RGB 图像（H x W x 3，每通道一个字节）
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
  image: RgbImage,
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

impl Frame {
  /// 从编码后的字节（JPEG、PNG 等）解码
  pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
    let image = image::load_from_memory(bytes)
      .map_err(FrameError::Decode)?
      .to_rgb8();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(FrameError::Empty(width, height));
    }
    debug!("图像解码完成: {}x{}", width, height);
    Ok(Self { image })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// (width, height)
  pub fn size(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  pub fn as_rgb(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_rgb(self) -> RgbImage {
    self.image
  }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, FrameError> {
  let mut buffer = Vec::new();
  let encoder =
    image::codecs::jpeg::JpegEncoder::new_with_quality(Cursor::new(&mut buffer), JPEG_QUALITY);
  image.write_with_encoder(encoder).map_err(FrameError::Encode)?;
  Ok(buffer)
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, FrameError> {
  let mut buffer = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
    .map_err(FrameError::Encode)?;
  Ok(buffer)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn decode_png_keeps_pixels() {
    let mut image = RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]));
    image.put_pixel(3, 2, Rgb([200, 100, 50]));
    let bytes = encode_png(&image).unwrap();

    let frame = Frame::decode(&bytes).unwrap();
    assert_eq!(frame.size(), (8, 4));
    assert_eq!((frame.width(), frame.height()), (8, 4));
    assert_eq!(frame.as_rgb(), &image);
  }

  #[test]
  fn decode_rejects_garbage() {
    let err = Frame::decode(b"definitely not an image").unwrap_err();
    assert!(matches!(err, FrameError::Decode(_)));
  }

  #[test]
  fn jpeg_output_decodes_to_same_size() {
    let image = RgbImage::from_pixel(32, 16, Rgb([0, 128, 255]));
    let bytes = encode_jpeg(&image).unwrap();
    let frame = Frame::decode(&bytes).unwrap();
    assert_eq!(frame.size(), (32, 16));
  }
}
