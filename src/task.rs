// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 推理任务
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

use std::{
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use anyhow::{Context, anyhow};
use tracing::{error, info, warn};

use crate::{
  config::PipelineConfig,
  dispatch::{DetectionEvent, ResultDispatcher},
  frame::Frame,
  model::Model,
  output::Render,
  pipeline::Detector,
  scheduler::{FrameScheduler, Submission},
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 同步处理第一帧
pub struct OneShotTask {
  config: PipelineConfig,
}

impl OneShotTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self { config }
  }
}

impl<I, M, O, RE> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = Frame>,
  M: Model,
  O: Render<Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow!("没有输入帧"))?;
    info!("输入帧获取成功: {}x{}", frame.width(), frame.height());

    let mut detector = Detector::new(model, self.config)?;
    detector.check_frame(&frame)?;

    let (tx, rx) = mpsc::channel();
    let mut dispatcher = ResultDispatcher::with_channel(tx);
    dispatcher.begin()?;
    let detections = match detector.detect(&frame) {
      Ok(detections) => detections,
      Err(e) => {
        dispatcher.abort();
        return Err(e.into());
      }
    };
    dispatcher.finish(detections)?;

    let event = rx.recv()?;
    match &event {
      DetectionEvent::Empty => info!("未检测到对象"),
      DetectionEvent::Detected {
        detections,
        elapsed,
      } => info!("检测到 {} 个对象，耗时: {:.2?}", detections.len(), elapsed),
    }
    output.render_event(&event)?;
    info!("渲染完成");

    Ok(())
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubmitStats {
  pub started: u64,
  pub buffered: u64,
  pub superseded: u64,
}

impl SubmitStats {
  fn record(&mut self, submission: Submission) {
    match submission {
      Submission::Started { .. } => self.started += 1,
      Submission::Buffered { superseded, .. } => {
        self.buffered += 1;
        if superseded.is_some() {
          self.superseded += 1;
        }
      }
      Submission::Ignored => {}
    }
  }
}

/// 按固定帧率向调度器提交帧，结果在独立线程中渲染
#[derive(Debug)]
pub struct ContinuousTask {
  config: PipelineConfig,
  frame_number: Option<usize>,
  frame_interval: Option<Duration>,
}

impl ContinuousTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      frame_number: None,
      frame_interval: None,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 模拟相机帧率，`None` 表示尽快提交
  pub fn with_fps(mut self, fps: Option<f64>) -> Self {
    self.frame_interval = fps
      .filter(|fps| fps.is_finite() && *fps > 0.0)
      .map(|fps| Duration::from_secs_f64(1.0 / fps));
    self
  }
}

impl<I, M, O, RE> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = Frame>,
  M: Model + 'static,
  O: Render<Error = RE> + Send + 'static,
  RE: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("无法设置 Ctrl-C 处理器")?;

    let (event_tx, event_rx) = mpsc::channel::<DetectionEvent>();
    let detector = Detector::new(model, self.config)?;
    let scheduler = FrameScheduler::start(detector, ResultDispatcher::with_channel(event_tx))?;

    let consumer = thread::Builder::new()
      .name("shanan-output".to_string())
      .spawn(move || {
        let (mut empty, mut detected) = (0u64, 0u64);
        for event in event_rx {
          match &event {
            DetectionEvent::Empty => empty += 1,
            DetectionEvent::Detected {
              detections,
              elapsed,
            } => {
              detected += 1;
              info!("检测到 {} 个对象，耗时: {:.2?}", detections.len(), elapsed);
            }
          }
          if let Err(e) = output.render_event(&event) {
            error!("渲染失败: {}", e);
          }
        }
        (empty, detected)
      })
      .context("无法启动输出线程")?;

    let started_at = Instant::now();
    let mut stats = SubmitStats::default();
    for (frame_index, frame) in input.enumerate() {
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }

      let submission = scheduler.submit(frame)?;
      stats.record(submission);
      if submission == Submission::Ignored {
        warn!("调度器已关闭，退出任务循环");
        break;
      }

      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if let Some(interval) = self.frame_interval {
        thread::sleep(interval);
      }
    }

    scheduler.teardown();
    drop(scheduler);
    let (empty, detected) = consumer
      .join()
      .map_err(|_| anyhow!("输出线程异常退出"))?;

    info!(
      "提交 {} 帧 (直接处理 {}, 缓冲 {}, 被替换 {}), 有结果 {} 帧, 无结果 {} 帧, 用时 {:.2?}",
      stats.started + stats.buffered,
      stats.started,
      stats.buffered,
      stats.superseded,
      detected,
      empty,
      started_at.elapsed()
    );
    info!("任务完成，退出");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stats_count_superseded_frames() {
    let mut stats = SubmitStats::default();
    stats.record(Submission::Started { seq: 0 });
    stats.record(Submission::Buffered {
      seq: 1,
      superseded: None,
    });
    stats.record(Submission::Buffered {
      seq: 2,
      superseded: Some(1),
    });
    stats.record(Submission::Ignored);
    assert_eq!(
      stats,
      SubmitStats {
        started: 1,
        buffered: 2,
        superseded: 1
      }
    );
  }
}
