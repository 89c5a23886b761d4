// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 流水线配置
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
  collections::HashSet,
  io::{BufRead, BufReader},
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{InputShape, OutputShape, TensorLayout},
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_INPUT_MEAN: f32 = 0.0;
pub const DEFAULT_INPUT_STD: f32 = 255.0;
pub const DEFAULT_INPUT_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法读取标签文件 {path}: {source}")]
  LabelsIo {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("标签表为空")]
  EmptyLabels,
  #[error("缺少参数: {0}")]
  MissingParameter(&'static str),
  #[error("参数 {key} 的值无效: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("参数 {key} 超出范围 [0, 1]: {value}")]
  OutOfRange { key: &'static str, value: f32 },
  #[error("归一化参数无效: {0}")]
  InvalidNormalization(String),
  #[error("模型输入形状不匹配: 配置为 {expected}, 模型为 {actual}")]
  InputShapeMismatch {
    expected: InputShape,
    actual: InputShape,
  },
  #[error("标签数量 {labels} 与模型输出 {output} 的类别数不一致")]
  LabelCountMismatch { labels: usize, output: OutputShape },
}

/// 类别名称表，下标与分数通道对齐
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
  names: Vec<String>,
}

impl LabelTable {
  /// 读取每行一个类别名的标签文件
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let file = std::fs::File::open(path).map_err(|source| ConfigError::LabelsIo {
      path: path.to_path_buf(),
      source,
    })?;

    let mut names = Vec::new();
    for line in BufReader::new(file).lines() {
      let line = line.map_err(|source| ConfigError::LabelsIo {
        path: path.to_path_buf(),
        source,
      })?;
      names.push(line.trim_end_matches('\r').to_string());
    }
    while names.last().is_some_and(|name| name.trim().is_empty()) {
      names.pop();
    }

    if names.is_empty() {
      return Err(ConfigError::EmptyLabels);
    }
    debug!("共 {} 个类别", names.len());
    Ok(Self { names })
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
  fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

/// 解码后一律丢弃的类别
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
  names: HashSet<String>,
}

impl ExclusionSet {
  pub fn contains(&self, name: &str) -> bool {
    self.names.contains(name)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl<S: Into<String>> FromIterator<S> for ExclusionSet {
  fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}

/// 一次会话内不变的流水线参数
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  confidence_threshold: f32,
  iou_threshold: f32,
  input: InputShape,
  mean: Vec<f32>,
  std: Vec<f32>,
  labels: LabelTable,
  exclusions: ExclusionSet,
}

impl PipelineConfig {
  pub fn builder() -> PipelineConfigBuilder {
    PipelineConfigBuilder::default()
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  pub fn input(&self) -> InputShape {
    self.input
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn exclusions(&self) -> &ExclusionSet {
    &self.exclusions
  }

  /// 第 `channel` 个通道的 (mean, std)
  #[inline]
  pub fn normalization(&self, channel: usize) -> (f32, f32) {
    let pick = |values: &[f32]| {
      if values.len() == 1 {
        values[0]
      } else {
        values[channel]
      }
    };
    (pick(&self.mean), pick(&self.std))
  }
}

#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
  confidence_threshold: f32,
  iou_threshold: f32,
  width: Option<u32>,
  height: Option<u32>,
  channels: usize,
  layout: TensorLayout,
  mean: Vec<f32>,
  std: Vec<f32>,
  labels: Option<LabelTable>,
  labels_path: Option<PathBuf>,
  exclusions: Vec<String>,
}

impl Default for PipelineConfigBuilder {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      width: None,
      height: None,
      channels: DEFAULT_INPUT_CHANNELS,
      layout: TensorLayout::default(),
      mean: vec![DEFAULT_INPUT_MEAN],
      std: vec![DEFAULT_INPUT_STD],
      labels: None,
      labels_path: None,
      exclusions: Vec::new(),
    }
  }
}

impl FromUrlWithScheme for PipelineConfigBuilder {
  const SCHEME: &'static str = "pipeline";
}

impl FromUrl for PipelineConfigBuilder {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch);
    }

    let mut builder = Self::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "confidence" => builder.confidence_threshold = parse_value(&key, &value)?,
        "iou" => builder.iou_threshold = parse_value(&key, &value)?,
        "width" => builder.width = Some(parse_value(&key, &value)?),
        "height" => builder.height = Some(parse_value(&key, &value)?),
        "channels" => builder.channels = parse_value(&key, &value)?,
        "layout" => builder.layout = parse_value(&key, &value)?,
        "mean" => builder.mean = parse_list(&key, &value)?,
        "std" => builder.std = parse_list(&key, &value)?,
        "labels" => builder.labels_path = Some(PathBuf::from(value.as_ref())),
        "exclude" => builder.exclusions.extend(
          value
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        ),
        _ => warn!("忽略未知的流水线参数: {}={}", key, value),
      }
    }

    Ok(builder)
  }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.trim().parse().map_err(|_| ConfigError::InvalidParameter {
    key: key.to_string(),
    value: value.to_string(),
  })
}

fn parse_list(key: &str, value: &str) -> Result<Vec<f32>, ConfigError> {
  value.split(',').map(|v| parse_value(key, v)).collect()
}

impl PipelineConfigBuilder {
  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.width = Some(width);
    self.height = Some(height);
    self
  }

  pub fn channels(mut self, channels: usize) -> Self {
    self.channels = channels;
    self
  }

  pub fn layout(mut self, layout: TensorLayout) -> Self {
    self.layout = layout;
    self
  }

  /// 未显式指定的输入参数取自模型
  pub fn fill_input_shape(mut self, shape: InputShape) -> Self {
    if self.width.is_none() && self.height.is_none() {
      self.width = Some(shape.width);
      self.height = Some(shape.height);
      self.channels = shape.channels;
      self.layout = shape.layout;
    }
    self
  }

  pub fn normalization(mut self, mean: Vec<f32>, std: Vec<f32>) -> Self {
    self.mean = mean;
    self.std = std;
    self
  }

  pub fn labels(mut self, labels: LabelTable) -> Self {
    self.labels = Some(labels);
    self
  }

  pub fn exclude<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
    self.exclusions.extend(names.into_iter().map(Into::into));
    self
  }

  pub fn build(self) -> Result<PipelineConfig, ConfigError> {
    check_unit_range("confidence", self.confidence_threshold)?;
    check_unit_range("iou", self.iou_threshold)?;

    let width = self.width.ok_or(ConfigError::MissingParameter("width"))?;
    let height = self.height.ok_or(ConfigError::MissingParameter("height"))?;
    if width == 0 || height == 0 || self.channels == 0 {
      return Err(ConfigError::InvalidParameter {
        key: "input".to_string(),
        value: format!("{}x{}x{}", width, height, self.channels),
      });
    }

    for (name, values) in [("mean", &self.mean), ("std", &self.std)] {
      if values.len() != 1 && values.len() != self.channels {
        return Err(ConfigError::InvalidNormalization(format!(
          "{} 需要 1 个或 {} 个值，实际 {} 个",
          name,
          self.channels,
          values.len()
        )));
      }
      if values.iter().any(|v| !v.is_finite()) {
        return Err(ConfigError::InvalidNormalization(format!(
          "{} 含有非有限值",
          name
        )));
      }
    }
    if self.std.contains(&0.0) {
      return Err(ConfigError::InvalidNormalization("std 不能为 0".to_string()));
    }

    let labels = match (self.labels, self.labels_path) {
      (Some(labels), _) => labels,
      (None, Some(path)) => LabelTable::from_file(path)?,
      (None, None) => return Err(ConfigError::MissingParameter("labels")),
    };
    if labels.is_empty() {
      return Err(ConfigError::EmptyLabels);
    }

    let config = PipelineConfig {
      confidence_threshold: self.confidence_threshold,
      iou_threshold: self.iou_threshold,
      input: InputShape {
        width,
        height,
        channels: self.channels,
        layout: self.layout,
      },
      mean: self.mean,
      std: self.std,
      labels,
      exclusions: self.exclusions.into_iter().collect(),
    };

    debug!(
      "流水线配置: 置信度阈值 {}, IoU 阈值 {}, 输入 {}, 类别 {} 个, 排除 {} 个",
      config.confidence_threshold,
      config.iou_threshold,
      config.input,
      config.labels.len(),
      config.exclusions.len()
    );
    Ok(config)
  }
}

fn check_unit_range(key: &'static str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::OutOfRange { key, value })
  }
}
