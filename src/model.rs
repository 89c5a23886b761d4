// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;

use crate::tensor::{InputShape, InputTensor, OutputShape, RawOutput};

/// 推理适配器，独占已加载的模型
///
/// `run` 通过 `&mut self` 调用，模型随检测器移交给唯一的推理线程，
/// 因而不会被两个线程同时调用。模型资源在值被丢弃时释放。
pub trait Model: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn input_shape(&self) -> InputShape;
  fn output_shape(&self) -> OutputShape;
  fn run(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error>;
}

/// 单个检测结果，坐标均为归一化值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub cx: f32,
  pub cy: f32,
  pub w: f32,
  pub h: f32,
  pub confidence: f32,
  pub class_index: usize,
  pub class_name: String,
}

impl Detection {
  /// 使用解码得到的宽高计算面积
  pub fn area(&self) -> f32 {
    self.w * self.h
  }
}

mod replay;
pub use self::replay::{ReplayCapture, ReplayError, ReplayModel};
