// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续帧检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_stream::{
  FromUrl,
  config::PipelineConfigBuilder,
  input::ImageFileInput,
  model::{Model, ReplayModel},
  output::JsonLinesOutput,
  task::{ContinuousTask, Task},
};
use tracing::info;

/// 模拟相机连续提交帧，只保留最新的一帧等待处理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型回放文件
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "stdout://")]
  pub output: Url,
  /// 流水线参数
  #[arg(long, value_name = "PIPELINE", default_value = "pipeline://")]
  pub pipeline: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// 提交帧率
  #[arg(long, value_name = "FPS")]
  pub fps: Option<f64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let model = ReplayModel::from_url(&args.model)?;
  let config = PipelineConfigBuilder::from_url(&args.pipeline)?
    .fill_input_shape(model.input_shape())
    .build()?;
  let input = ImageFileInput::from_url(&args.input)?;
  let output = JsonLinesOutput::from_url(&args.output)?;

  ContinuousTask::new(config)
    .with_frame_number(args.frame_number)
    .with_fps(args.fps)
    .run_task(input, model, output)?;

  Ok(())
}
