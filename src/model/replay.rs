// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/replay.rs - 回放录制的模型输出
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

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::Model,
  tensor::{InputShape, InputTensor, OutputShape, RawOutput, TensorError},
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("录制文件格式错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("录制文件不含任何输出帧")]
  NoFrames,
  #[error("第 {index} 个输出帧无效: {source}")]
  InvalidFrame {
    index: usize,
    #[source]
    source: TensorError,
  },
  #[error("输入张量形状不匹配: 期望 {expected}, 实际 {actual}")]
  InputMismatch {
    expected: InputShape,
    actual: InputShape,
  },
}

/// 录制文件内容
///
/// ```json
/// { "input": { "width": 640, "height": 640, "channels": 3, "layout": "nhwc" },
///   "output": { "num_channel": 84, "num_elements": 8400 },
///   "frames": [[0.5, 0.5, ...]] }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayCapture {
  pub input: InputShape,
  pub output: OutputShape,
  pub frames: Vec<Vec<f32>>,
}

/// 依次回放录制输出的推理适配器，用于离线验证后处理
pub struct ReplayModel {
  input: InputShape,
  output: OutputShape,
  frames: Vec<RawOutput>,
  cursor: usize,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch);
    }

    info!("加载录制文件: {}", url.path());
    let data = std::fs::read(url.path())?;
    debug!(
      "录制文件大小: {:.2} MB",
      data.len() as f64 / (1024.0 * 1024.0)
    );
    let capture: ReplayCapture = serde_json::from_slice(&data)?;
    Self::from_capture(capture)
  }
}

impl ReplayModel {
  pub fn from_capture(capture: ReplayCapture) -> Result<Self, ReplayError> {
    if capture.frames.is_empty() {
      return Err(ReplayError::NoFrames);
    }

    let frames = capture
      .frames
      .into_iter()
      .enumerate()
      .map(|(index, data)| {
        RawOutput::new(capture.output.num_channel, capture.output.num_elements, data)
          .map_err(|source| ReplayError::InvalidFrame { index, source })
      })
      .collect::<Result<Vec<_>, _>>()?;

    info!(
      "回放模型就绪: 输入 {}, 输出 {}, 共 {} 帧",
      capture.input,
      capture.output,
      frames.len()
    );
    Ok(Self {
      input: capture.input,
      output: capture.output,
      frames,
      cursor: 0,
    })
  }
}

impl Model for ReplayModel {
  type Error = ReplayError;

  fn input_shape(&self) -> InputShape {
    self.input
  }

  fn output_shape(&self) -> OutputShape {
    self.output
  }

  fn run(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    if input.shape() != self.input {
      return Err(ReplayError::InputMismatch {
        expected: self.input,
        actual: input.shape(),
      });
    }

    let index = self.cursor % self.frames.len();
    self.cursor = self.cursor.wrapping_add(1);
    debug!("回放第 {} 个输出帧", index);
    Ok(self.frames[index].clone())
  }
}
