// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tensor.rs - 输入输出张量
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

use std::{fmt, str::FromStr};

use serde::Deserialize;
use thiserror::Error;

/// 输出张量前 4 个通道为 cx, cy, w, h
pub const BOX_CHANNELS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("张量长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("输出通道数 {0} 不足，至少需要 {BOX_CHANNELS} 个坐标通道和 1 个类别通道")]
  TooFewChannels(usize),
  #[error("输出形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    expected: OutputShape,
    actual: OutputShape,
  },
  #[error("未知的张量排列: {0}")]
  UnknownLayout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  #[default]
  Nhwc,
  Nchw,
}

impl FromStr for TensorLayout {
  type Err = TensorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "nhwc" => Ok(TensorLayout::Nhwc),
      "nchw" => Ok(TensorLayout::Nchw),
      _ => Err(TensorError::UnknownLayout(s.to_string())),
    }
  }
}

impl fmt::Display for TensorLayout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TensorLayout::Nhwc => write!(f, "NHWC"),
      TensorLayout::Nchw => write!(f, "NCHW"),
    }
  }
}

/// 模型输入形状，批大小固定为 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct InputShape {
  pub width: u32,
  pub height: u32,
  pub channels: usize,
  #[serde(default)]
  pub layout: TensorLayout,
}

impl InputShape {
  pub fn len(&self) -> usize {
    self.width as usize * self.height as usize * self.channels
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn dims(&self) -> [usize; 4] {
    let (w, h, c) = (self.width as usize, self.height as usize, self.channels);
    match self.layout {
      TensorLayout::Nhwc => [1, h, w, c],
      TensorLayout::Nchw => [1, c, h, w],
    }
  }
}

impl fmt::Display for InputShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?} ({})", self.dims(), self.layout)
  }
}

#[derive(Debug, Clone)]
pub struct InputTensor {
  shape: InputShape,
  data: Vec<f32>,
}

impl InputTensor {
  pub fn new(shape: InputShape, data: Vec<f32>) -> Result<Self, TensorError> {
    if data.len() != shape.len() {
      return Err(TensorError::LengthMismatch {
        expected: shape.len(),
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn shape(&self) -> InputShape {
    self.shape
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

/// 模型输出形状 `[1, num_channel, num_elements]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct OutputShape {
  pub num_channel: usize,
  pub num_elements: usize,
}

impl OutputShape {
  pub fn len(&self) -> usize {
    self.num_channel * self.num_elements
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn num_classes(&self) -> usize {
    self.num_channel.saturating_sub(BOX_CHANNELS)
  }
}

impl fmt::Display for OutputShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[1, {}, {}]", self.num_channel, self.num_elements)
  }
}

/// 原始输出，按通道行优先排列
#[derive(Debug, Clone)]
pub struct RawOutput {
  shape: OutputShape,
  data: Vec<f32>,
}

impl RawOutput {
  pub fn new(num_channel: usize, num_elements: usize, data: Vec<f32>) -> Result<Self, TensorError> {
    if num_channel <= BOX_CHANNELS {
      return Err(TensorError::TooFewChannels(num_channel));
    }

    let shape = OutputShape {
      num_channel,
      num_elements,
    };
    if data.len() != shape.len() {
      return Err(TensorError::LengthMismatch {
        expected: shape.len(),
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn shape(&self) -> OutputShape {
    self.shape
  }

  pub fn num_channel(&self) -> usize {
    self.shape.num_channel
  }

  pub fn num_elements(&self) -> usize {
    self.shape.num_elements
  }

  #[inline]
  pub fn get(&self, channel: usize, element: usize) -> f32 {
    self.data[channel * self.shape.num_elements + element]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn raw_output_is_channel_major() {
    // 2 个候选框，1 个类别
    let data = vec![
      0.1, 0.2, // cx
      0.3, 0.4, // cy
      0.5, 0.6, // w
      0.7, 0.8, // h
      0.9, 1.0, // class 0
    ];
    let output = RawOutput::new(5, 2, data).unwrap();
    assert_eq!(output.get(0, 1), 0.2);
    assert_eq!(output.get(3, 0), 0.7);
    assert_eq!(output.get(4, 1), 1.0);
    assert_eq!(output.shape().num_classes(), 1);
  }

  #[test]
  fn raw_output_requires_a_class_channel() {
    assert_eq!(
      RawOutput::new(4, 1, vec![0.0; 4]).unwrap_err(),
      TensorError::TooFewChannels(4)
    );
  }

  #[test]
  fn raw_output_checks_length() {
    assert!(matches!(
      RawOutput::new(6, 3, vec![0.0; 17]),
      Err(TensorError::LengthMismatch {
        expected: 18,
        actual: 17
      })
    ));
  }

  #[test]
  fn input_dims_follow_layout() {
    let mut shape = InputShape {
      width: 640,
      height: 480,
      channels: 3,
      layout: TensorLayout::Nhwc,
    };
    assert_eq!(shape.dims(), [1, 480, 640, 3]);
    shape.layout = TensorLayout::Nchw;
    assert_eq!(shape.dims(), [1, 3, 480, 640]);
  }

  #[test]
  fn parses_layout_names() {
    assert_eq!("NCHW".parse::<TensorLayout>(), Ok(TensorLayout::Nchw));
    assert_eq!("nhwc".parse::<TensorLayout>(), Ok(TensorLayout::Nhwc));
    assert!("hwc".parse::<TensorLayout>().is_err());
  }
}
