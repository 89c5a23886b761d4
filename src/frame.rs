// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - HWC 帧定义
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

use image::RgbImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {width}x{height}x{channels}")]
  EmptyShape {
    width: u32,
    height: u32,
    channels: usize,
  },
}

/// 相机帧，按 HWC 排列的 8 位像素
#[derive(Debug, Clone)]
pub struct Frame {
  width: u32,
  height: u32,
  channels: usize,
  data: Box<[u8]>,
}

impl Frame {
  /// 从 RGB 字节构造帧
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    Self::with_channels(width, height, RGB_CHANNELS, data)
  }

  pub fn with_channels(
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 || channels == 0 {
      return Err(FrameError::EmptyShape {
        width,
        height,
        channels,
      });
    }

    let expected = channels * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      channels,
      data: data.into_boxed_slice(),
    })
  }

  /// 所有像素取同一值的帧
  pub fn filled(width: u32, height: u32, channels: usize, value: u8) -> Result<Self, FrameError> {
    let size = channels * width as usize * height as usize;
    Self::with_channels(width, height, channels, vec![value; size])
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }

  /// 坐标越界时返回 `None`
  pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let start = (y as usize * self.width as usize + x as usize) * self.channels;
    self.data.get(start..start + self.channels)
  }
}

impl AsRef<[u8]> for Frame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl TryFrom<RgbImage> for Frame {
  type Error = FrameError;

  fn try_from(image: RgbImage) -> Result<Self, Self::Error> {
    let (width, height) = image.dimensions();
    Self::with_channels(width, height, RGB_CHANNELS, image.into_raw())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_length_mismatch() {
    let err = Frame::new(2, 2, vec![0; 11]).unwrap_err();
    assert_eq!(
      err,
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    );
  }

  #[test]
  fn rejects_zero_dimension() {
    assert!(matches!(
      Frame::new(0, 4, vec![]),
      Err(FrameError::EmptyShape { .. })
    ));
  }

  #[test]
  fn pixel_reads_hwc_layout() {
    let data: Vec<u8> = (0..12).collect();
    let frame = Frame::new(2, 2, data).unwrap();
    assert_eq!(frame.pixel(0, 0), Some(&[0, 1, 2][..]));
    assert_eq!(frame.pixel(1, 0), Some(&[3, 4, 5][..]));
    assert_eq!(frame.pixel(0, 1), Some(&[6, 7, 8][..]));
    assert_eq!(frame.pixel(2, 0), None);
    assert_eq!(frame.pixel(0, 2), None);
  }

  #[test]
  fn converts_from_rgb_image() {
    let image = RgbImage::from_pixel(3, 2, image::Rgb([7, 8, 9]));
    let frame = Frame::try_from(image).unwrap();
    assert_eq!((frame.width(), frame.height(), frame.channels()), (3, 2, 3));
    assert_eq!(frame.pixel(2, 1), Some(&[7, 8, 9][..]));
  }

  #[test]
  fn empty_rgb_image_is_rejected() {
    assert!(matches!(
      Frame::try_from(RgbImage::new(0, 0)),
      Err(FrameError::EmptyShape { .. })
    ));
  }

  #[test]
  fn zero_sized_frame_fails_the_submit_check() {
    let frame = Frame {
      width: 0,
      height: 0,
      channels: RGB_CHANNELS,
      data: Box::new([]),
    };
    assert!(matches!(
      crate::pipeline::check_frame(&frame, RGB_CHANNELS),
      Err(crate::pipeline::PipelineError::MalformedInput(
        crate::preprocess::PreprocessError::EmptyFrame { .. }
      ))
    ));
  }
}
