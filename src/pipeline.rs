// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 单帧检测流水线
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

use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  config::{ConfigError, PipelineConfig},
  decode::{Decoded, decode},
  frame::Frame,
  model::{Detection, Model},
  nms::non_max_suppression,
  preprocess::{PreprocessError, preprocess},
  tensor::TensorError,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Configuration(#[from] ConfigError),
  #[error("输入帧无效: {0}")]
  MalformedInput(#[from] PreprocessError),
  #[error("模型输出无效: {0}")]
  Output(#[from] TensorError),
  #[error("推理错误: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("无法启动推理线程: {0}")]
  Spawn(#[source] std::io::Error),
}

/// 预处理 → 推理 → 解码 → NMS
pub struct Detector<M> {
  model: M,
  config: PipelineConfig,
}

impl<M: Model> Detector<M> {
  /// 校验模型形状与配置是否一致
  pub fn new(model: M, config: PipelineConfig) -> Result<Self, ConfigError> {
    let input = model.input_shape();
    let output = model.output_shape();
    info!("模型输入: {}, 输出: {}", input, output);

    if input != config.input() {
      error!("模型输入 {} 与配置 {} 不一致", input, config.input());
      return Err(ConfigError::InputShapeMismatch {
        expected: config.input(),
        actual: input,
      });
    }

    if output.num_classes() == 0 || output.num_classes() != config.labels().len() {
      error!(
        "标签数量 {} 与模型类别数 {} 不一致",
        config.labels().len(),
        output.num_classes()
      );
      return Err(ConfigError::LabelCountMismatch {
        labels: config.labels().len(),
        output,
      });
    }

    Ok(Self { model, config })
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  /// 帧与模型输入不兼容时返回 `MalformedInput`
  pub fn check_frame(&self, frame: &Frame) -> Result<(), PipelineError> {
    check_frame(frame, self.config.input().channels)
  }

  /// 对单帧运行完整流水线，返回保留下来的检测结果（可能为空）
  pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, PipelineError> {
    let input = preprocess(frame, &self.config)?;

    debug!("执行模型推理");
    let output = self
      .model
      .run(&input)
      .map_err(|e| PipelineError::Inference(Box::new(e)))?;

    let expected = self.model.output_shape();
    if output.shape() != expected {
      return Err(PipelineError::Output(TensorError::ShapeMismatch {
        expected,
        actual: output.shape(),
      }));
    }

    match decode(&output, &self.config) {
      Decoded::Empty => Ok(Vec::new()),
      Decoded::Candidates(candidates) => Ok(non_max_suppression(
        candidates,
        self.config.iou_threshold(),
      )),
    }
  }
}

pub(crate) fn check_frame(frame: &Frame, channels: usize) -> Result<(), PipelineError> {
  if frame.width() == 0 || frame.height() == 0 {
    return Err(PipelineError::MalformedInput(PreprocessError::EmptyFrame {
      width: frame.width(),
      height: frame.height(),
    }));
  }
  if frame.channels() != channels {
    return Err(PipelineError::MalformedInput(
      PreprocessError::ChannelMismatch {
        expected: channels,
        actual: frame.channels(),
      },
    ));
  }
  Ok(())
}
