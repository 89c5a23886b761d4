// 该文件是 Shanan （山南西风） 项目的一部分。
// src/decode.rs - 原始输出解码
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

use tracing::debug;

use crate::{
  config::PipelineConfig,
  model::Detection,
  tensor::{BOX_CHANNELS, RawOutput},
};

const UNKNOWN_LABEL: &str = "unknown";

/// 解码结果，`Candidates` 内的列表一定非空
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
  Empty,
  Candidates(Vec<Detection>),
}

impl Decoded {
  pub fn into_vec(self) -> Vec<Detection> {
    match self {
      Decoded::Empty => Vec::new(),
      Decoded::Candidates(items) => items,
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, Decoded::Empty)
  }
}

/// 把 `[1, num_channel, num_elements]` 输出解码为候选框
///
/// 每个候选框只看最高分类别：分数不超过阈值、类别在排除集合中、
/// 或任一角点落在 `[0, 1]` 之外时整体丢弃，不做裁剪，也不回退到次高类别。
pub fn decode(output: &RawOutput, config: &PipelineConfig) -> Decoded {
  let threshold = config.confidence_threshold();
  let labels = config.labels();
  let exclusions = config.exclusions();

  let mut items = Vec::new();
  let (mut low_score, mut excluded, mut out_of_range) = (0usize, 0usize, 0usize);

  for c in 0..output.num_elements() {
    let (class_index, score) = {
      let mut max_score = f32::MIN;
      let mut max_idx = 0usize;
      for j in BOX_CHANNELS..output.num_channel() {
        let value = output.get(j, c);
        if value > max_score {
          max_score = value;
          max_idx = j - BOX_CHANNELS;
        }
      }
      (max_idx, max_score)
    };

    // NaN 分数同样不会通过
    if !(score > threshold) {
      low_score += 1;
      continue;
    }

    let class_name = labels.get(class_index).unwrap_or(UNKNOWN_LABEL);
    if exclusions.contains(class_name) {
      excluded += 1;
      continue;
    }

    let cx = output.get(0, c);
    let cy = output.get(1, c);
    let w = output.get(2, c);
    let h = output.get(3, c);
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;

    if ![x1, y1, x2, y2].iter().all(|v| (0.0..=1.0).contains(v)) || x1 > x2 || y1 > y2 {
      out_of_range += 1;
      continue;
    }

    items.push(Detection {
      x1,
      y1,
      x2,
      y2,
      cx,
      cy,
      w,
      h,
      confidence: score,
      class_index,
      class_name: class_name.to_string(),
    });
  }

  debug!(
    "解码 {} 个候选框: 保留 {}, 低分 {}, 排除类别 {}, 越界 {}",
    output.num_elements(),
    items.len(),
    low_score,
    excluded,
    out_of_range
  );

  if items.is_empty() {
    Decoded::Empty
  } else {
    Decoded::Candidates(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::LabelTable;

  fn config_with(labels: &[&str], exclude: &[&str]) -> PipelineConfig {
    PipelineConfig::builder()
      .input_size(8, 8)
      .labels(labels.iter().copied().collect::<LabelTable>())
      .exclude(exclude.iter().copied())
      .build()
      .unwrap()
  }

  /// 按候选框逐列给出 [cx, cy, w, h, scores...]，转为通道优先布局
  fn raw(columns: &[&[f32]]) -> RawOutput {
    let num_channel = columns[0].len();
    let num_elements = columns.len();
    let mut data = vec![0.0; num_channel * num_elements];
    for (c, column) in columns.iter().enumerate() {
      for (j, &value) in column.iter().enumerate() {
        data[j * num_elements + c] = value;
      }
    }
    RawOutput::new(num_channel, num_elements, data).unwrap()
  }

  fn assert_invariants(items: &[Detection], threshold: f32) {
    for d in items {
      assert!(d.confidence > threshold);
      for v in [d.x1, d.y1, d.x2, d.y2] {
        assert!((0.0..=1.0).contains(&v));
      }
      assert!(d.x1 <= d.x2 && d.y1 <= d.y2);
    }
  }

  #[test]
  fn single_candidate_inside_unit_square() {
    let config = config_with(&["background", "person"], &[]);
    let output = raw(&[&[0.5, 0.5, 0.2, 0.4, 0.1, 0.9]]);

    let items = decode(&output, &config).into_vec();
    assert_eq!(items.len(), 1);
    let d = &items[0];
    assert_eq!(d.class_index, 1);
    assert_eq!(d.class_name, "person");
    assert_eq!(d.confidence, 0.9);
    assert!((d.x1 - 0.4).abs() < 1e-6 && (d.x2 - 0.6).abs() < 1e-6);
    assert!((d.y1 - 0.3).abs() < 1e-6 && (d.y2 - 0.7).abs() < 1e-6);
    assert_invariants(&items, config.confidence_threshold());
  }

  #[test]
  fn scores_at_or_below_threshold_are_empty() {
    let config = config_with(&["a", "b"], &[]);
    let output = raw(&[
      &[0.5, 0.5, 0.1, 0.1, 0.3, 0.2],
      &[0.2, 0.2, 0.1, 0.1, 0.05, 0.3],
    ]);
    assert_eq!(decode(&output, &config), Decoded::Empty);
  }

  #[test]
  fn out_of_range_corner_discards_candidate() {
    let config = config_with(&["a"], &[]);
    // x1 = 0.05 - 0.2 / 2 = -0.05
    let output = raw(&[&[0.05, 0.5, 0.2, 0.2, 0.95]]);
    assert!(decode(&output, &config).is_empty());
  }

  #[test]
  fn corners_on_the_boundary_are_kept() {
    let config = config_with(&["a"], &[]);
    let output = raw(&[&[0.5, 0.5, 1.0, 1.0, 0.8]]);
    let items = decode(&output, &config).into_vec();
    assert_eq!(items.len(), 1);
    assert_eq!((items[0].x1, items[0].y2), (0.0, 1.0));
  }

  #[test]
  fn excluded_winner_is_not_reclassified() {
    let config = config_with(&["person", "포장도로"], &["포장도로"]);
    let output = raw(&[
      // 排除类别胜出，次高类别 person 也超过阈值
      &[0.5, 0.5, 0.2, 0.2, 0.8, 0.99],
      &[0.3, 0.3, 0.1, 0.1, 0.6, 0.1],
    ]);
    let items = decode(&output, &config).into_vec();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_name, "person");
    assert_eq!(items[0].confidence, 0.6);
  }

  #[test]
  fn ties_pick_the_lowest_class_index() {
    let config = config_with(&["a", "b", "c"], &[]);
    let output = raw(&[&[0.5, 0.5, 0.2, 0.2, 0.4, 0.7, 0.7]]);
    let items = decode(&output, &config).into_vec();
    assert_eq!(items[0].class_index, 1);
  }

  #[test]
  fn missing_label_falls_back_to_unknown() {
    let config = config_with(&["a"], &[]);
    let output = raw(&[&[0.5, 0.5, 0.2, 0.2, 0.1, 0.9]]);
    let items = decode(&output, &config).into_vec();
    assert_eq!(items[0].class_name, UNKNOWN_LABEL);
  }

  #[test]
  fn emitted_detections_satisfy_invariants() {
    let config = config_with(&["a", "b"], &[]);
    let mut columns: Vec<Vec<f32>> = Vec::new();
    for i in 0..50 {
      let t = i as f32 / 50.0;
      columns.push(vec![t, 1.0 - t, 0.3 * t, 0.25, t, 1.0 - t]);
    }
    let refs: Vec<&[f32]> = columns.iter().map(Vec::as_slice).collect();
    let items = decode(&raw(&refs), &config).into_vec();
    assert!(!items.is_empty());
    assert_invariants(&items, config.confidence_threshold());
  }
}
