// 该文件是 Xunlu （巡路） 项目的一部分。
// src/model.rs - 推理模型
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

use std::path::PathBuf;

use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载失败 {}: {reason}", .path.display())]
  LoadFailed { path: PathBuf, reason: String },
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("模型输出无效: {0}")]
  UnexpectedOutput(String),
}

/// 一次分类推理的结果：各类别得分与得分最高的类别
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceResult {
  pub scores: Box<[f32]>,
  pub top: Option<usize>,
}

impl InferenceResult {
  /// 无检测结果（降级模式）
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn from_scores(scores: Vec<f32>) -> Self {
    // 与 argmax 一致：并列时取第一个，忽略 NaN
    let mut top: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
      if score.is_nan() {
        continue;
      }
      if top.is_none_or(|(_, best)| score > best) {
        top = Some((index, score));
      }
    }

    Self {
      scores: scores.into_boxed_slice(),
      top: top.map(|(index, _)| index),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.top.is_none()
  }

  pub fn top_score(&self) -> Option<f32> {
    self.top.map(|index| self.scores[index])
  }

  /// 检测到的对象数量，批大小固定为 1，所以只可能是 0 或 1
  pub fn object_count(&self) -> usize {
    usize::from(self.top.is_some())
  }
}

mod classifier;
pub use self::classifier::{Classifier, INPUT_SIZE, preprocess};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn top_is_first_maximum() {
    let result = InferenceResult::from_scores(vec![0.1, 0.7, 0.2, 0.7]);
    assert_eq!(result.top, Some(1));
    assert_eq!(result.top_score(), Some(0.7));
    assert_eq!(result.object_count(), 1);
  }

  #[test]
  fn nan_scores_are_ignored() {
    let result = InferenceResult::from_scores(vec![f32::NAN, 0.3, f32::NAN]);
    assert_eq!(result.top, Some(1));

    let result = InferenceResult::from_scores(vec![f32::NAN]);
    assert!(result.is_empty());
  }

  #[test]
  fn empty_result_has_no_objects() {
    let result = InferenceResult::empty();
    assert!(result.is_empty());
    assert_eq!(result.object_count(), 0);
    assert_eq!(result.top_score(), None);
  }
}
