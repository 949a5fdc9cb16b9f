// 该文件是 Hongwai （红外） 项目的一部分。
// src/input.rs - 图像输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use ndarray::Array3;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Pixel layout mismatch: expected (height, width, 3), found ({0}, {1}, {2})")]
  BadPixelLayout(usize, usize, usize),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

/// 检测输入
#[derive(Debug)]
pub enum ImageInput {
  /// 图像文件路径，解析时解码
  File(PathBuf),
  /// 内存中的 (高, 宽, 通道) 像素数组，原样使用
  Pixels(Array3<u8>),
  /// 已解码的 RGB 图像
  Image(RgbImage),
}

impl ImageInput {
  /// 解析输入为 RGB 图像。
  /// 文件路径经解码器读取；像素数组不做内容校验，仅重解释为图像。
  pub fn resolve(self) -> Result<RgbImage, InputError> {
    match self {
      ImageInput::File(path) => read_image_file(&path),
      ImageInput::Pixels(pixels) => {
        debug!("使用提供的像素数组");
        let (height, width, channels) = pixels.dim();
        if channels != 3 {
          return Err(InputError::BadPixelLayout(height, width, channels));
        }
        let data = pixels.as_standard_layout().into_owned().into_raw_vec();
        RgbImage::from_raw(width as u32, height as u32, data)
          .ok_or(InputError::BadPixelLayout(height, width, 3))
      }
      ImageInput::Image(image) => Ok(image),
    }
  }
}

/// 从文件路径读取并解码图像
pub fn read_image_file(path: &Path) -> Result<RgbImage, InputError> {
  debug!("从路径加载图像: {}", path.display());
  let image = ImageReader::open(path)?.decode()?;
  Ok(image.to_rgb8())
}

impl From<&str> for ImageInput {
  fn from(path: &str) -> Self {
    ImageInput::File(PathBuf::from(path))
  }
}

impl From<String> for ImageInput {
  fn from(path: String) -> Self {
    ImageInput::File(PathBuf::from(path))
  }
}

impl From<&Path> for ImageInput {
  fn from(path: &Path) -> Self {
    ImageInput::File(path.to_path_buf())
  }
}

impl From<PathBuf> for ImageInput {
  fn from(path: PathBuf) -> Self {
    ImageInput::File(path)
  }
}

impl From<Array3<u8>> for ImageInput {
  fn from(pixels: Array3<u8>) -> Self {
    ImageInput::Pixels(pixels)
  }
}

impl From<RgbImage> for ImageInput {
  fn from(image: RgbImage) -> Self {
    ImageInput::Image(image)
  }
}

impl FromUrlWithScheme for ImageInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }

    Ok(ImageInput::File(PathBuf::from(url.path())))
  }
}
