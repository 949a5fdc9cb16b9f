// 该文件是 Hongwai （红外） 项目的一部分。
// src/adapter.rs - 模型适配器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  input::{ImageInput, InputError},
  model::{DetectResult, Model, Yolov8, Yolov8Builder, Yolov8Error},
};

/// 默认置信度阈值
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("图像输入错误: {0}")]
  Input(#[from] InputError),
  #[error("推理错误: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// 预训练检测模型的适配器。
/// 持有已加载的模型与构建后不可变的置信度阈值，暴露单一的 `detect` 操作。
pub struct ModelAdapter<M = Yolov8> {
  model: M,
  conf_threshold: f32,
}

impl ModelAdapter<Yolov8> {
  /// 从模型文件构建适配器。模型缺失或无效时构建直接失败。
  pub fn from_model_file(
    model_path: impl Into<String>,
    conf_threshold: f32,
  ) -> Result<Self, Yolov8Error> {
    let model = Yolov8Builder::new(model_path).build()?;
    Ok(ModelAdapter::new(model, conf_threshold))
  }
}

impl<M, E> ModelAdapter<M>
where
  M: Model<Input = image::RgbImage, Output = DetectResult, Error = E>,
  E: std::error::Error + Send + Sync + 'static,
{
  pub fn new(model: M, conf_threshold: f32) -> Self {
    info!("适配器已创建，置信度阈值 {}", conf_threshold);
    ModelAdapter {
      model,
      conf_threshold,
    }
  }

  pub fn conf_threshold(&self) -> f32 {
    self.conf_threshold
  }

  /// 对输入图像执行检测。
  ///
  /// 返回归一化中心形式的边界框序列 `[x_center, y_center, width, height]`，
  /// 仅包含置信度达到阈值的检测项，顺序与模型保留的候选顺序一致。
  /// 输入解析失败与推理失败以不同的错误变体返回，不会与“无检测”混淆。
  pub fn detect(&self, image: impl Into<ImageInput>) -> Result<Vec<[f32; 4]>, DetectError> {
    let image = image.into().resolve()?;

    debug!("开始检测...");
    let result = self
      .model
      .infer(&image, self.conf_threshold)
      .map_err(|e| DetectError::Inference(Box::new(e)))?;

    let boxes = result
      .items
      .iter()
      .map(|item| {
        let [xmin, ymin, xmax, ymax] = item.bbox;
        [
          (xmin + xmax) / 2.0,
          (ymin + ymax) / 2.0,
          xmax - xmin,
          ymax - ymin,
        ]
      })
      .collect::<Vec<_>>();

    info!("检测完成，共 {} 个物体", boxes.len());
    Ok(boxes)
  }

  /// 宽松版本：任何失败都记录日志并返回空序列。
  /// 调用方无法区分“无检测”与“检测失败”，需要区分时使用 `detect`。
  pub fn detect_or_empty(&self, image: impl Into<ImageInput>) -> Vec<[f32; 4]> {
    match self.detect(image) {
      Ok(boxes) => boxes,
      Err(e) => {
        error!("检测失败: {}", e);
        Vec::new()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;
  use ndarray::Array3;

  /// 返回固定结果的测试模型，按阈值过滤
  struct FakeModel {
    items: Vec<DetectItem>,
  }

  #[derive(Debug, thiserror::Error)]
  #[error("测试模型错误")]
  struct FakeError;

  impl Model for FakeModel {
    type Input = image::RgbImage;
    type Output = DetectResult;
    type Error = FakeError;

    fn infer(&self, _input: &Self::Input, conf_threshold: f32)
    -> Result<Self::Output, Self::Error> {
      let items = self
        .items
        .iter()
        .filter(|item| item.score >= conf_threshold)
        .cloned()
        .collect::<Vec<_>>();
      Ok(DetectResult {
        items: items.into_boxed_slice(),
      })
    }
  }

  /// 推理必定失败的测试模型
  struct FailingModel;

  impl Model for FailingModel {
    type Input = image::RgbImage;
    type Output = DetectResult;
    type Error = FakeError;

    fn infer(&self, _input: &Self::Input, _conf_threshold: f32)
    -> Result<Self::Output, Self::Error> {
      Err(FakeError)
    }
  }

  fn item(score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id: 0,
      score,
      bbox,
    }
  }

  fn blank_pixels() -> Array3<u8> {
    Array3::zeros((8, 8, 3))
  }

  #[test]
  fn detect_returns_center_form_boxes() {
    let adapter = ModelAdapter::new(
      FakeModel {
        items: vec![
          item(0.9, [0.25, 0.25, 0.75, 0.75]),
          item(0.5, [0.0, 0.0, 0.5, 1.0]),
        ],
      },
      DEFAULT_CONF_THRESHOLD,
    );

    let boxes = adapter.detect(blank_pixels()).unwrap();
    assert_eq!(boxes.len(), 2);
    assert_eq!(boxes[0], [0.5, 0.5, 0.5, 0.5]);
    assert_eq!(boxes[1], [0.25, 0.5, 0.5, 1.0]);
    for bbox in &boxes {
      for v in bbox {
        assert!(v.is_finite() && (0.0..=1.0).contains(v));
      }
    }
  }

  #[test]
  fn threshold_filters_detections() {
    let adapter = ModelAdapter::new(
      FakeModel {
        items: vec![
          item(0.9, [0.25, 0.25, 0.75, 0.75]),
          item(0.4, [0.0, 0.0, 0.5, 1.0]),
        ],
      },
      0.6,
    );

    let boxes = adapter.detect(blank_pixels()).unwrap();
    assert_eq!(boxes.len(), 1);
  }

  #[test]
  fn full_confidence_threshold_returns_empty() {
    let adapter = ModelAdapter::new(
      FakeModel {
        items: vec![
          item(0.99, [0.25, 0.25, 0.75, 0.75]),
          item(0.9, [0.0, 0.0, 0.5, 1.0]),
        ],
      },
      1.0,
    );
    assert!(adapter.detect(blank_pixels()).unwrap().is_empty());

    let adapter = ModelAdapter::new(
      FakeModel {
        items: vec![item(1.0, [0.25, 0.25, 0.75, 0.75])],
      },
      1.0,
    );
    assert_eq!(adapter.detect(blank_pixels()).unwrap().len(), 1);
  }

  #[test]
  fn missing_image_path_is_input_error() {
    let adapter = ModelAdapter::new(FakeModel { items: vec![] }, DEFAULT_CONF_THRESHOLD);
    let err = adapter.detect("no-such-dir/photo.jpg").unwrap_err();
    assert!(matches!(err, DetectError::Input(_)));
  }

  #[test]
  fn inference_failure_is_inference_error() {
    let adapter = ModelAdapter::new(FailingModel, DEFAULT_CONF_THRESHOLD);
    let err = adapter.detect(blank_pixels()).unwrap_err();
    assert!(matches!(err, DetectError::Inference(_)));
  }

  #[test]
  fn detect_or_empty_swallows_failures() {
    let adapter = ModelAdapter::new(FailingModel, DEFAULT_CONF_THRESHOLD);
    assert!(adapter.detect_or_empty(blank_pixels()).is_empty());

    let adapter = ModelAdapter::new(FakeModel { items: vec![] }, DEFAULT_CONF_THRESHOLD);
    assert!(adapter.detect_or_empty("no-such-dir/photo.jpg").is_empty());
  }

  #[test]
  fn detect_is_idempotent() {
    let adapter = ModelAdapter::new(
      FakeModel {
        items: vec![item(0.8, [0.1, 0.2, 0.3, 0.6])],
      },
      DEFAULT_CONF_THRESHOLD,
    );

    let first = adapter.detect(blank_pixels()).unwrap();
    let second = adapter.detect(blank_pixels()).unwrap();
    assert_eq!(first, second);
  }
}
