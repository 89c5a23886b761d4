// 该文件是 Shanan （山南西风） 项目的一部分。
// src/dispatch.rs - 检测结果分发
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
  sync::mpsc::Sender,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::debug;

use crate::model::Detection;

/// 每个处理完成的帧恰好产生一个事件
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEvent {
  Empty,
  Detected {
    detections: Vec<Detection>,
    /// 预处理、推理、解码与 NMS 的总耗时
    elapsed: Duration,
  },
}

impl DetectionEvent {
  pub fn detections(&self) -> &[Detection] {
    match self {
      DetectionEvent::Empty => &[],
      DetectionEvent::Detected { detections, .. } => detections,
    }
  }

  pub fn elapsed_ms(&self) -> Option<u128> {
    match self {
      DetectionEvent::Empty => None,
      DetectionEvent::Detected { elapsed, .. } => Some(elapsed.as_millis()),
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, DetectionEvent::Empty)
  }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
  #[error("分发器未处于运行状态")]
  NotRunning,
  #[error("分发器已处于运行状态")]
  AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
  Idle,
  Running { started: Instant },
}

type Callback = Box<dyn FnMut(DetectionEvent) + Send>;

/// `Idle -> Running -> Idle` 状态机，把每帧结果交给注册的消费者
pub struct ResultDispatcher {
  state: DispatcherState,
  callback: Callback,
}

impl ResultDispatcher {
  pub fn with_callback<F>(callback: F) -> Self
  where
    F: FnMut(DetectionEvent) + Send + 'static,
  {
    Self {
      state: DispatcherState::Idle,
      callback: Box::new(callback),
    }
  }

  /// 接收端关闭后事件被静默丢弃
  pub fn with_channel(sender: Sender<DetectionEvent>) -> Self {
    Self::with_callback(move |event| {
      if sender.send(event).is_err() {
        debug!("结果接收端已关闭");
      }
    })
  }

  pub fn state(&self) -> DispatcherState {
    self.state
  }

  pub fn is_running(&self) -> bool {
    matches!(self.state, DispatcherState::Running { .. })
  }

  /// 开始计时，应在预处理之前调用
  pub fn begin(&mut self) -> Result<(), DispatchError> {
    if self.is_running() {
      return Err(DispatchError::AlreadyRunning);
    }
    self.state = DispatcherState::Running {
      started: Instant::now(),
    };
    Ok(())
  }

  /// 结束本帧并发出事件，空列表发出 `Empty`
  pub fn finish(&mut self, detections: Vec<Detection>) -> Result<(), DispatchError> {
    let DispatcherState::Running { started } = self.state else {
      return Err(DispatchError::NotRunning);
    };
    let elapsed = started.elapsed();
    self.state = DispatcherState::Idle;

    let event = if detections.is_empty() {
      DetectionEvent::Empty
    } else {
      DetectionEvent::Detected {
        detections,
        elapsed,
      }
    };
    (self.callback)(event);
    Ok(())
  }

  /// 处理失败时回到空闲状态，不发出事件
  pub fn abort(&mut self) {
    self.state = DispatcherState::Idle;
  }
}

impl std::fmt::Debug for ResultDispatcher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResultDispatcher")
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}
