// 该文件是 Shanan （山南西风） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use crate::model::Detection;

/// 计算两个检测框的 IoU
///
/// 面积取解码得到的 `w * h`，交集按角点计算；并集为 0 时返回 0。
pub fn iou(a: &Detection, b: &Detection) -> f32 {
  let x1 = a.x1.max(b.x1);
  let y1 = a.y1.max(b.y1);
  let x2 = a.x2.min(b.x2);
  let y2 = a.y2.min(b.y2);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 不区分类别的贪心 NMS
///
/// 按置信度降序（同分保持原顺序）依次保留未被抑制的框，
/// 并抑制其后与之 IoU ≥ `iou_threshold` 的所有框。输出顺序即保留顺序。
pub fn non_max_suppression(candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  let total = candidates.len();

  let mut order: Vec<usize> = (0..total).collect();
  // sort_by 是稳定排序
  order.sort_by(|&a, &b| {
    candidates[b]
      .confidence
      .total_cmp(&candidates[a].confidence)
  });

  let mut suppressed = vec![false; total];
  let mut kept = Vec::with_capacity(total);

  for (rank, &current) in order.iter().enumerate() {
    if suppressed[current] {
      continue;
    }
    kept.push(current);

    for &other in &order[rank + 1..] {
      if !suppressed[other] && iou(&candidates[current], &candidates[other]) >= iou_threshold {
        suppressed[other] = true;
      }
    }
  }

  debug!("NMS: {} 个候选框, 保留 {}", total, kept.len());

  let mut slots: Vec<Option<Detection>> = candidates.into_iter().map(Some).collect();
  kept
    .into_iter()
    .filter_map(|index| slots[index].take())
    .collect()
}
