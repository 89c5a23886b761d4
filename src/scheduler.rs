// 该文件是 Shanan （山南西风） 项目的一部分。
// src/scheduler.rs - 帧调度与背压
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
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  thread::{self, JoinHandle},
};

use tracing::{debug, error, info, warn};

use crate::{
  dispatch::ResultDispatcher,
  frame::Frame,
  model::Model,
  pipeline::{Detector, PipelineError, check_frame},
};

const WORKER_THREAD_NAME: &str = "shanan-detect";

/// `submit` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
  /// 推理线程空闲，帧已直接交付
  Started { seq: u64 },
  /// 推理线程忙，帧进入单槽缓冲；`superseded` 为被替换掉的旧帧
  Buffered { seq: u64, superseded: Option<u64> },
  /// 调度器已关闭
  Ignored,
}

struct Job {
  seq: u64,
  frame: Frame,
}

#[derive(Default)]
struct Slot {
  /// 已报告为 `Started` 的帧，不会被替换
  starting: Option<Job>,
  /// 推理线程忙时的单槽缓冲，只保留最新一帧
  buffered: Option<Job>,
  running: bool,
  closed: bool,
  next_seq: u64,
}

struct Shared {
  slot: Mutex<Slot>,
  wake: Condvar,
  channels: usize,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, Slot> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn submit(&self, frame: Frame) -> Result<Submission, PipelineError> {
    let mut slot = self.lock();
    if slot.closed {
      return Ok(Submission::Ignored);
    }
    check_frame(&frame, self.channels)?;

    let seq = slot.next_seq;
    slot.next_seq += 1;

    if !slot.running {
      slot.running = true;
      slot.starting = Some(Job { seq, frame });
      self.wake.notify_one();
      return Ok(Submission::Started { seq });
    }

    let superseded = slot.buffered.replace(Job { seq, frame }).map(|old| old.seq);
    if let Some(old) = superseded {
      debug!("丢弃未开始的第 {} 帧，由第 {} 帧替换", old, seq);
    }
    Ok(Submission::Buffered { seq, superseded })
  }

  /// 阻塞直到有待处理帧；关闭后只交付已报告为 `Started` 的帧
  fn next_job(&self) -> Option<Job> {
    let mut slot = self.lock();
    loop {
      if let Some(job) = slot.starting.take() {
        return Some(job);
      }
      if slot.closed {
        return None;
      }
      if let Some(job) = slot.buffered.take() {
        return Some(job);
      }
      slot = self.wake.wait(slot).unwrap_or_else(PoisonError::into_inner);
    }
  }

  fn complete(&self) {
    let mut slot = self.lock();
    if slot.starting.is_none() && slot.buffered.is_none() {
      slot.running = false;
    }
  }

  fn close(&self) -> Option<Job> {
    let mut slot = self.lock();
    slot.closed = true;
    self.wake.notify_all();
    slot.buffered.take()
  }
}

/// 推理线程退出时关闭调度器，包括线程意外终止的情况
struct WorkerExit(Arc<Shared>);

impl Drop for WorkerExit {
  fn drop(&mut self) {
    if let Some(job) = self.0.close() {
      debug!("推理线程退出，丢弃未开始的第 {} 帧", job.seq);
    }
    let mut slot = self.0.lock();
    slot.starting = None;
    slot.running = false;
  }
}

/// 向调度器提交帧的句柄，可在生产者线程间克隆
#[derive(Clone)]
pub struct FrameSubmitter {
  shared: Arc<Shared>,
}

impl FrameSubmitter {
  /// 非阻塞提交；关闭后为空操作，帧格式不符时返回 `MalformedInput`
  pub fn submit(&self, frame: Frame) -> Result<Submission, PipelineError> {
    self.shared.submit(frame)
  }

  pub fn is_ready(&self) -> bool {
    !self.shared.lock().closed
  }
}

/// 单推理线程调度器，缓冲区只保留最新一帧
pub struct FrameScheduler {
  submitter: FrameSubmitter,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl FrameScheduler {
  /// 启动推理线程，检测器（连同模型）移交给该线程独占
  pub fn start<M>(detector: Detector<M>, dispatcher: ResultDispatcher) -> Result<Self, PipelineError>
  where
    M: Model + 'static,
  {
    let shared = Arc::new(Shared {
      slot: Mutex::new(Slot::default()),
      wake: Condvar::new(),
      channels: detector.config().input().channels,
    });

    let worker_shared = shared.clone();
    let worker = thread::Builder::new()
      .name(WORKER_THREAD_NAME.to_string())
      .spawn(move || worker_loop(worker_shared, detector, dispatcher))
      .map_err(PipelineError::Spawn)?;

    info!("推理线程已启动");
    Ok(Self {
      submitter: FrameSubmitter { shared },
      worker: Mutex::new(Some(worker)),
    })
  }

  pub fn submit(&self, frame: Frame) -> Result<Submission, PipelineError> {
    self.submitter.submit(frame)
  }

  pub fn submitter(&self) -> FrameSubmitter {
    self.submitter.clone()
  }

  pub fn is_ready(&self) -> bool {
    self.submitter.is_ready()
  }

  /// 关闭调度器：丢弃缓冲帧，等待正在处理的帧完成后释放模型
  ///
  /// 不应在结果回调中调用。
  pub fn teardown(&self) {
    if let Some(job) = self.submitter.shared.close() {
      debug!("关闭时丢弃未开始的第 {} 帧", job.seq);
    }

    let handle = self
      .worker
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(handle) = handle {
      if handle.thread().id() == thread::current().id() {
        warn!("在推理线程内关闭调度器，跳过等待");
        return;
      }
      if handle.join().is_err() {
        error!("推理线程异常退出");
      }
      info!("调度器已关闭");
    }
  }
}

impl Drop for FrameScheduler {
  fn drop(&mut self) {
    self.teardown();
  }
}

fn worker_loop<M: Model>(shared: Arc<Shared>, mut detector: Detector<M>, mut dispatcher: ResultDispatcher) {
  let _exit = WorkerExit(shared.clone());
  while let Some(job) = shared.next_job() {
    debug!("处理第 {} 帧", job.seq);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      process_job(&mut detector, &mut dispatcher, &job)
    }));
    if let Err(payload) = outcome {
      error!("第 {} 帧处理时发生 panic: {}", job.seq, panic_message(&*payload));
      dispatcher.abort();
    }
    shared.complete();
  }

  info!("推理线程退出，释放模型");
  drop(detector);
}

fn process_job<M: Model>(detector: &mut Detector<M>, dispatcher: &mut ResultDispatcher, job: &Job) {
  if let Err(e) = dispatcher.begin() {
    error!("第 {} 帧无法开始分发: {}", job.seq, e);
    dispatcher.abort();
    return;
  }

  match detector.detect(&job.frame) {
    Ok(detections) => {
      debug!("第 {} 帧检测到 {} 个对象", job.seq, detections.len());
      if let Err(e) = dispatcher.finish(detections) {
        error!("第 {} 帧结果分发失败: {}", job.seq, e);
      }
    }
    Err(e) => {
      error!("第 {} 帧处理失败: {}", job.seq, e);
      dispatcher.abort();
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  payload
    .downcast_ref::<&str>()
    .copied()
    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
    .unwrap_or("未知错误")
}
