// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("No image found in {0}")]
  NoImages(PathBuf),
  #[error("Invalid repeat count: {0}")]
  InvalidRepeat(String),
}

/// 逐帧读取单个图像文件或目录下的所有图像
///
/// `image:///path/to/dir?repeat=3` 按文件名顺序循环三遍；`repeat=0` 表示无限循环。
pub struct ImageFileInput {
  paths: Vec<PathBuf>,
  repeat: Option<usize>,
  cursor: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let repeat = match url.query_pairs().find(|(k, _)| k == "repeat") {
      Some((_, v)) => match v.parse::<usize>() {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(_) => return Err(ImageFileInputError::InvalidRepeat(v.into_owned())),
      },
      None => Some(1),
    };

    let paths = collect_images(Path::new(url.path()))?;
    info!("图像输入: {} 个文件, 循环 {:?} 次", paths.len(), repeat);

    Ok(ImageFileInput {
      paths,
      repeat,
      cursor: 0,
    })
  }
}

fn collect_images(path: &Path) -> Result<Vec<PathBuf>, ImageFileInputError> {
  if path.is_file() {
    return Ok(vec![path.to_path_buf()]);
  }

  let mut paths = Vec::new();
  for entry in std::fs::read_dir(path)? {
    let entry_path = entry?.path();
    let is_image = entry_path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    if is_image {
      paths.push(entry_path);
    }
  }

  if paths.is_empty() {
    return Err(ImageFileInputError::NoImages(path.to_path_buf()));
  }
  paths.sort();
  Ok(paths)
}

impl ImageFileInput {
  fn exhausted(&self) -> bool {
    self
      .repeat
      .is_some_and(|times| self.cursor >= times * self.paths.len())
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    // 解码失败的文件跳过，直到取到一帧或全部失败
    for _ in 0..self.paths.len() {
      if self.exhausted() {
        return None;
      }

      let path = &self.paths[self.cursor % self.paths.len()];
      self.cursor += 1;

      match ImageReader::open(path).map_err(ImageFileInputError::from).and_then(|reader| {
        reader.decode().map_err(ImageFileInputError::from)
      }) {
        Ok(image) => match Frame::try_from(image.to_rgb8()) {
          Ok(frame) => {
            debug!("读取图像: {}", path.display());
            return Some(frame);
          }
          Err(e) => error!("图像 {} 无法作为输入帧: {}", path.display(), e),
        },
        Err(e) => error!("无法读取图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
