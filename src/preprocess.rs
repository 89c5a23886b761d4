// 该文件是 Shanan （山南西风） 项目的一部分。
// src/preprocess.rs - 帧预处理
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

use image::{ImageBuffer, Luma, LumaA, Pixel, Rgb, Rgba, imageops};
use thiserror::Error;
use tracing::debug;

use crate::{
  config::PipelineConfig,
  frame::Frame,
  tensor::{InputTensor, TensorError, TensorLayout},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("帧通道数 {actual} 与模型输入通道数 {expected} 不一致")]
  ChannelMismatch { expected: usize, actual: usize },
  #[error("帧尺寸为空: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("不支持 {0} 通道的帧")]
  UnsupportedChannels(usize),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
}

/// 缩放、归一化并转为 f32 张量
pub fn preprocess(frame: &Frame, config: &PipelineConfig) -> Result<InputTensor, PreprocessError> {
  let shape = config.input();
  if frame.channels() != shape.channels {
    return Err(PreprocessError::ChannelMismatch {
      expected: shape.channels,
      actual: frame.channels(),
    });
  }

  let resized = if (frame.width(), frame.height()) == (shape.width, shape.height) {
    frame.as_hwc().to_vec()
  } else {
    debug!(
      "缩放帧: {}x{} -> {}x{}",
      frame.width(),
      frame.height(),
      shape.width,
      shape.height
    );
    match frame.channels() {
      1 => resize_as::<Luma<u8>>(frame, shape.width, shape.height),
      2 => resize_as::<LumaA<u8>>(frame, shape.width, shape.height),
      3 => resize_as::<Rgb<u8>>(frame, shape.width, shape.height),
      4 => resize_as::<Rgba<u8>>(frame, shape.width, shape.height),
      n => return Err(PreprocessError::UnsupportedChannels(n)),
    }
  };

  let (w, h, c) = (shape.width as usize, shape.height as usize, shape.channels);
  let mut data = vec![0f32; shape.len()];
  let norms: Vec<(f32, f32)> = (0..c).map(|ch| config.normalization(ch)).collect();

  for (pixel_idx, pixel) in resized.chunks_exact(c).enumerate() {
    for (ch, &value) in pixel.iter().enumerate() {
      let (mean, std) = norms[ch];
      let index = match shape.layout {
        TensorLayout::Nhwc => pixel_idx * c + ch,
        TensorLayout::Nchw => ch * h * w + pixel_idx,
      };
      data[index] = (value as f32 - mean) / std;
    }
  }

  Ok(InputTensor::new(shape, data)?)
}

// 最近邻缩放，与不做滤波的位图缩放一致
fn resize_as<P>(frame: &Frame, width: u32, height: u32) -> Vec<u8>
where
  P: Pixel<Subpixel = u8> + 'static,
{
  let view: ImageBuffer<P, &[u8]> =
    match ImageBuffer::from_raw(frame.width(), frame.height(), frame.as_hwc()) {
      Some(view) => view,
      // Frame 的构造保证了长度与尺寸一致
      None => unreachable!("帧数据长度与尺寸不一致"),
    };
  imageops::resize(&view, width, height, imageops::FilterType::Nearest).into_raw()
}
