// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/json_lines.rs - JSON Lines 结果输出
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
  fs::File,
  io::{BufWriter, Write},
  sync::{Arc, Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, dispatch::DetectionEvent, output::Render};

const STDOUT_SCHEME: &str = "stdout";
const JSONL_SCHEME: &str = "jsonl";

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每个事件输出一行 JSON
///
/// `stdout://` 写到标准输出，`jsonl:///path/out.jsonl` 写到文件。
pub struct JsonLinesOutput {
  writer: Arc<Mutex<Box<dyn Write + Send>>>,
  event_counter: Arc<Mutex<u64>>,
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let writer: Box<dyn Write + Send> = match url.scheme() {
      STDOUT_SCHEME => Box::new(std::io::stdout()),
      JSONL_SCHEME => {
        info!("结果写入文件: {}", url.path());
        Box::new(BufWriter::new(File::create(url.path())?))
      }
      _ => return Err(JsonLinesOutputError::SchemeMismatch),
    };
    Ok(Self::from_writer(writer))
  }
}

impl JsonLinesOutput {
  pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
    Self {
      writer: Arc::new(Mutex::new(writer)),
      event_counter: Arc::new(Mutex::new(0)),
    }
  }

  fn event_id(&self) -> u64 {
    let mut counter = self
      .event_counter
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    *counter += 1;
    *counter
  }
}

impl Render for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_event(&self, event: &DetectionEvent) -> Result<(), Self::Error> {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let record = match event {
      DetectionEvent::Empty => json!({
        "event": self.event_id(),
        "timestamp": timestamp,
        "status": "empty",
      }),
      DetectionEvent::Detected {
        detections,
        elapsed,
      } => json!({
        "event": self.event_id(),
        "timestamp": timestamp,
        "status": "detected",
        "elapsed_ms": elapsed.as_millis() as u64,
        "detections": detections,
      }),
    };

    let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    serde_json::to_writer(&mut *writer, &record)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
  }
}
