// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/test_scheduler.rs - 调度器背压测试
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
  sync::mpsc::{self, Receiver, Sender},
  time::Duration,
};

use shanan_stream::{
  config::{LabelTable, PipelineConfig},
  dispatch::{DetectionEvent, ResultDispatcher},
  frame::Frame,
  model::Model,
  pipeline::Detector,
  scheduler::{FrameScheduler, Submission},
  tensor::{InputShape, InputTensor, OutputShape, RawOutput, TensorLayout},
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
#[error("标记帧 {0} 推理失败")]
struct MarkedFailure(u8);

/// 每次推理先报告输入帧的标记值，再等待放行
struct GatedModel {
  entered: Sender<u8>,
  release: Receiver<()>,
  fail_on: Option<u8>,
  panic_on: Option<u8>,
}

fn input_shape() -> InputShape {
  InputShape {
    width: 2,
    height: 2,
    channels: 3,
    layout: TensorLayout::Nhwc,
  }
}

const OUTPUT_SHAPE: OutputShape = OutputShape {
  num_channel: 5,
  num_elements: 1,
};

impl Model for GatedModel {
  type Error = MarkedFailure;

  fn input_shape(&self) -> InputShape {
    input_shape()
  }

  fn output_shape(&self) -> OutputShape {
    OUTPUT_SHAPE
  }

  fn run(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    // 归一化参数为 mean=0, std=1，张量值即像素值
    let marker = input.as_slice()[0] as u8;
    let _ = self.entered.send(marker);
    let _ = self.release.recv_timeout(TIMEOUT);

    if self.panic_on == Some(marker) {
      panic!("标记帧 {} 触发 panic", marker);
    }
    if self.fail_on == Some(marker) {
      return Err(MarkedFailure(marker));
    }
    Ok(RawOutput::new(5, 1, vec![0.5, 0.5, 0.2, 0.2, 0.9]).unwrap())
  }
}

struct Harness {
  scheduler: FrameScheduler,
  entered: Receiver<u8>,
  release: Sender<()>,
  events: Receiver<DetectionEvent>,
}

fn harness(fail_on: Option<u8>) -> Harness {
  harness_with(fail_on, None)
}

fn harness_with(fail_on: Option<u8>, panic_on: Option<u8>) -> Harness {
  let (entered_tx, entered) = mpsc::channel();
  let (release, release_rx) = mpsc::channel();
  let (events_tx, events) = mpsc::channel();

  let model = GatedModel {
    entered: entered_tx,
    release: release_rx,
    fail_on,
    panic_on,
  };
  let config = PipelineConfig::builder()
    .fill_input_shape(input_shape())
    .normalization(vec![0.0], vec![1.0])
    .labels(["object"].into_iter().collect::<LabelTable>())
    .build()
    .unwrap();
  let detector = Detector::new(model, config).unwrap();
  let scheduler = FrameScheduler::start(detector, ResultDispatcher::with_channel(events_tx)).unwrap();

  Harness {
    scheduler,
    entered,
    release,
    events,
  }
}

fn marked(value: u8) -> Frame {
  Frame::filled(2, 2, 3, value).unwrap()
}

#[test]
fn busy_worker_keeps_only_the_latest_frame() {
  let h = harness(None);

  // A 开始处理并阻塞在推理中
  assert_eq!(
    h.scheduler.submit(marked(10)).unwrap(),
    Submission::Started { seq: 0 }
  );
  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 10);

  // B、C 在 A 完成前到达，C 替换 B
  assert_eq!(
    h.scheduler.submit(marked(20)).unwrap(),
    Submission::Buffered {
      seq: 1,
      superseded: None
    }
  );
  assert_eq!(
    h.scheduler.submit(marked(30)).unwrap(),
    Submission::Buffered {
      seq: 2,
      superseded: Some(1)
    }
  );

  h.release.send(()).unwrap();
  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 30);
  h.release.send(()).unwrap();

  for _ in 0..2 {
    assert!(matches!(
      h.events.recv_timeout(TIMEOUT).unwrap(),
      DetectionEvent::Detected { .. }
    ));
  }

  h.scheduler.teardown();
  // B 从未进入推理，也没有产生事件
  assert!(h.entered.try_recv().is_err());
  assert!(h.events.try_recv().is_err());
}

#[test]
fn worker_goes_idle_and_restarts_on_next_submit() {
  let h = harness(None);

  h.scheduler.submit(marked(1)).unwrap();
  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 1);
  h.release.send(()).unwrap();
  h.events.recv_timeout(TIMEOUT).unwrap();

  // 事件先于收尾发出，稍等推理线程回到空闲状态
  std::thread::sleep(Duration::from_millis(50));
  assert_eq!(
    h.scheduler.submit(marked(2)).unwrap(),
    Submission::Started { seq: 1 }
  );
  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 2);
  h.release.send(()).unwrap();
  assert!(matches!(
    h.events.recv_timeout(TIMEOUT).unwrap(),
    DetectionEvent::Detected { .. }
  ));
}

#[test]
fn failed_frame_does_not_block_later_frames() {
  let h = harness(Some(66));

  h.scheduler.submit(marked(66)).unwrap();
  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 66);
  h.scheduler.submit(marked(7)).unwrap();
  h.release.send(()).unwrap();

  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 7);
  h.release.send(()).unwrap();

  // 失败帧不产生事件，只有第二帧产生
  assert!(matches!(
    h.events.recv_timeout(TIMEOUT).unwrap(),
    DetectionEvent::Detected { .. }
  ));
  h.scheduler.teardown();
  assert!(h.events.try_recv().is_err());
}

#[test]
fn teardown_waits_for_the_in_flight_frame() {
  let h = harness(None);

  h.scheduler.submit(marked(5)).unwrap();
  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 5);
  // 缓冲帧在关闭时被丢弃
  h.scheduler.submit(marked(6)).unwrap();

  let release = h.release.clone();
  let releaser = std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(50));
    release.send(()).unwrap();
  });

  h.scheduler.teardown();
  releaser.join().unwrap();

  // 正在处理的帧完成并分发，之后的提交成为空操作
  assert!(matches!(
    h.events.try_recv().unwrap(),
    DetectionEvent::Detected { .. }
  ));
  assert!(h.entered.try_recv().is_err());
  assert_eq!(h.scheduler.submit(marked(7)).unwrap(), Submission::Ignored);
}

#[test]
fn back_to_back_submits_both_run() {
  let h = harness(None);

  // 推理线程尚未取走 A 时 B 到达，A 不应被替换
  assert_eq!(
    h.scheduler.submit(marked(10)).unwrap(),
    Submission::Started { seq: 0 }
  );
  assert_eq!(
    h.scheduler.submit(marked(20)).unwrap(),
    Submission::Buffered {
      seq: 1,
      superseded: None
    }
  );

  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 10);
  h.release.send(()).unwrap();
  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 20);
  h.release.send(()).unwrap();

  for _ in 0..2 {
    assert!(matches!(
      h.events.recv_timeout(TIMEOUT).unwrap(),
      DetectionEvent::Detected { .. }
    ));
  }
}

#[test]
fn panicking_frame_does_not_stop_the_worker() {
  let h = harness_with(None, Some(9));

  h.scheduler.submit(marked(9)).unwrap();
  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 9);
  h.release.send(()).unwrap();

  // panic 后推理线程继续服务
  h.scheduler.submit(marked(3)).unwrap();
  assert_eq!(h.entered.recv_timeout(TIMEOUT).unwrap(), 3);
  h.release.send(()).unwrap();
  assert!(matches!(
    h.events.recv_timeout(TIMEOUT).unwrap(),
    DetectionEvent::Detected { .. }
  ));
  assert!(h.scheduler.is_ready());

  h.scheduler.teardown();
  // panic 的帧不产生事件
  assert!(h.events.try_recv().is_err());
}
