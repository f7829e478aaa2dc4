// 该文件是 Xunlu （巡路） 项目的一部分。
// src/model/classifier.rs - ONNX 图像分类器
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

use std::path::Path;

use image::{RgbImage, imageops::FilterType};
use tracing::{debug, info, warn};
use tract_onnx::prelude::*;

use super::{InferenceResult, Model, ModelError};

/// 模型输入边长，NHWC [1, 224, 224, 3]
pub const INPUT_SIZE: u32 = 224;

type Plan = TypedRunnableModel<TypedModel>;

/// 图像分类器；没有模型时处于降级模式，推理结果恒为空
pub struct Classifier {
  plan: Option<Plan>,
}

impl Classifier {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
    let path = path.as_ref();
    info!("加载模型文件: {}", path.display());
    let load_failed = |e: TractError| ModelError::LoadFailed {
      path: path.to_path_buf(),
      reason: format!("{:#}", e),
    };

    let size = INPUT_SIZE as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(path)
      .map_err(load_failed)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, size, size, 3)),
      )
      .map_err(load_failed)?
      .into_optimized()
      .map_err(load_failed)?
      .into_runnable()
      .map_err(load_failed)?;
    info!("模型加载完成");

    Ok(Self { plan: Some(plan) })
  }

  /// 降级模式：不加载模型
  pub fn degraded() -> Self {
    Self { plan: None }
  }

  /// 加载失败时记录日志并退回降级模式
  pub fn load_or_degraded<P: AsRef<Path>>(path: P) -> Self {
    match Self::load(path) {
      Ok(classifier) => classifier,
      Err(e) => {
        warn!("{}，进入降级模式（无检测结果）", e);
        Self::degraded()
      }
    }
  }

  pub fn is_degraded(&self) -> bool {
    self.plan.is_none()
  }
}

/// 缩放到固定分辨率，归一化到 [0,1]，并加上大小为 1 的批维度
pub fn preprocess(image: &RgbImage) -> Tensor {
  let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
  let size = INPUT_SIZE as usize;
  tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
    resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
  })
  .into_tensor()
}

impl Model for Classifier {
  type Input = RgbImage;
  type Output = InferenceResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let Some(plan) = &self.plan else {
      return Ok(InferenceResult::empty());
    };

    let tensor = preprocess(input);
    let outputs = plan
      .run(tvec!(tensor.into()))
      .map_err(|e| ModelError::Inference(format!("{:#}", e)))?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::UnexpectedOutput("模型没有输出".to_string()))?;
    let scores = output
      .to_array_view::<f32>()
      .map_err(|e| ModelError::UnexpectedOutput(format!("{:#}", e)))?;

    let result = InferenceResult::from_scores(scores.iter().copied().collect());
    debug!("分类结果: {:?} ({:?})", result.top, result.top_score());
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn degraded_classifier_returns_empty_result() {
    let classifier = Classifier::degraded();
    assert!(classifier.is_degraded());
    let result = classifier.infer(&RgbImage::new(640, 480)).unwrap();
    assert!(result.is_empty());
    assert_eq!(result.object_count(), 0);
  }

  #[test]
  fn missing_model_fails_to_load() {
    let err = Classifier::load("/nonexistent/xunlu/model.onnx").err().unwrap();
    assert!(matches!(err, ModelError::LoadFailed { .. }));
    assert!(Classifier::load_or_degraded("/nonexistent/xunlu/model.onnx").is_degraded());
  }

  #[test]
  fn preprocess_produces_normalized_batch() {
    let image = RgbImage::from_pixel(320, 240, image::Rgb([255, 0, 51]));
    let tensor = preprocess(&image);
    assert_eq!(tensor.shape(), &[1, 224, 224, 3]);

    let view = tensor
      .to_array_view::<f32>()
      .unwrap()
      .into_dimensionality::<tract_ndarray::Ix4>()
      .unwrap();
    let step = 1.0 / 255.0 + 1e-6;
    assert!(view.iter().all(|v| (0.0..=1.0).contains(v)));
    assert!((view[[0, 100, 100, 0]] - 1.0).abs() < step);
    assert!(view[[0, 100, 100, 1]].abs() < step);
    assert!((view[[0, 100, 100, 2]] - 0.2).abs() < step);
  }
}
