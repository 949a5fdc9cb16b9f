// 该文件是 Hongwai （红外） 项目的一部分。
// src/model/yolov8.rs - 模型定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array;
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::{Tensor, Value},
};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, Model},
};

const YOLOV8_INPUT_W: u32 = 640;
const YOLOV8_INPUT_H: u32 = 640;
const YOLOV8_CLASS_NUM: usize = 80;
const YOLOV8_NUM_FEATURES: usize = 4 + YOLOV8_CLASS_NUM;
const YOLOV8_NUM_BOXES: usize = 8400;
const YOLOV8_NMS_THRESH: f32 = 0.45;

#[derive(Debug)]
pub struct Yolov8 {
  session: Mutex<Session>,
}

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

pub struct Yolov8Builder {
  model_path: String,
  intra_threads: usize,
}

const YOLOV8_SCHEME: &str = "yolov8";

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = YOLOV8_SCHEME;
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != YOLOV8_SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLOV8_SCHEME
      )));
    }

    Ok(Yolov8Builder::new(url.path()))
  }
}

impl Yolov8Builder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Yolov8Builder {
      model_path: model_path.into(),
      intra_threads: 4,
    }
  }

  pub fn intra_threads(mut self, intra_threads: usize) -> Self {
    self.intra_threads = intra_threads;
    self
  }

  pub fn build(self) -> Result<Yolov8, Yolov8Error> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?
      .commit_from_memory(&model_data)?;
    info!("模型加载完成");

    let num_inputs = session.inputs.len();
    let num_outputs = session.outputs.len();

    if num_inputs != 1 {
      error!("预期模型输入数量为 1, 实际为 {}", num_inputs);
      return Err(Yolov8Error::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        num_inputs
      )));
    }

    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    Ok(Yolov8 {
      session: Mutex::new(session),
    })
  }
}

impl Yolov8 {
  /// 预处理：缩放到模型输入尺寸，归一化为 [0,1] 的 NCHW 浮点张量
  fn preprocess(image: &RgbImage) -> Result<Value, Yolov8Error> {
    let resized = image::imageops::resize(
      image,
      YOLOV8_INPUT_W,
      YOLOV8_INPUT_H,
      image::imageops::FilterType::Triangle,
    );

    let (w, h) = (YOLOV8_INPUT_W as usize, YOLOV8_INPUT_H as usize);
    let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
    for c in 0..3 {
      for y in 0..h {
        for x in 0..w {
          let pixel = resized.get_pixel(x as u32, y as u32);
          chw_data.push(pixel[c] as f32 / 255.0);
        }
      }
    }

    let shape = vec![1usize, 3, h, w];
    let tensor = Tensor::from_array((shape, chw_data.into_boxed_slice()))?;
    Ok(Value::from(tensor))
  }

  /// 解码输出头 [1, 84, 8400]：逐候选取最优类别，按阈值过滤，
  /// 类别内做非极大值抑制
  fn postprocess(raw: &[f32], conf_threshold: f32) -> Result<DetectResult, Yolov8Error> {
    if raw.len() != YOLOV8_NUM_FEATURES * YOLOV8_NUM_BOXES {
      return Err(Yolov8Error::ModelInvalid(format!(
        "预期输出大小为 {}, 实际为 {}",
        YOLOV8_NUM_FEATURES * YOLOV8_NUM_BOXES,
        raw.len()
      )));
    }

    let output = Array::from_shape_vec((YOLOV8_NUM_FEATURES, YOLOV8_NUM_BOXES), raw.to_vec())
      .map_err(|e| Yolov8Error::ModelInvalid(format!("输出张量形状无效: {}", e)))?;
    let output = output.t();

    let mut candidates = Vec::new();
    for i in 0..YOLOV8_NUM_BOXES {
      let (score, class_id) = {
        let mut max_score = 0.0f32;
        let mut cls_idx = 0usize;
        for c in 0..YOLOV8_CLASS_NUM {
          let s = output[[i, 4 + c]];
          if s > max_score {
            max_score = s;
            cls_idx = c;
          }
        }
        (max_score, cls_idx as u32)
      };

      if score < conf_threshold {
        continue;
      }

      let cx = output[[i, 0]];
      let cy = output[[i, 1]];
      let w = output[[i, 2]];
      let h = output[[i, 3]];

      let xmin = ((cx - w / 2.0) / YOLOV8_INPUT_W as f32).clamp(0.0, 1.0);
      let ymin = ((cy - h / 2.0) / YOLOV8_INPUT_H as f32).clamp(0.0, 1.0);
      let xmax = ((cx + w / 2.0) / YOLOV8_INPUT_W as f32).clamp(0.0, 1.0);
      let ymax = ((cy + h / 2.0) / YOLOV8_INPUT_H as f32).clamp(0.0, 1.0);

      if !(xmin.is_finite() && ymin.is_finite() && xmax.is_finite() && ymax.is_finite()) {
        continue;
      }
      if xmax <= xmin || ymax <= ymin {
        continue;
      }

      candidates.push(DetectItem {
        class_id,
        score,
        bbox: [xmin, ymin, xmax, ymax],
      });
    }

    let items = nms(candidates, YOLOV8_NMS_THRESH);
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

impl Model for Yolov8 {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = Yolov8Error;

  fn infer(&self, input: &Self::Input, conf_threshold: f32)
  -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let tensor = Self::preprocess(input)?;

    debug!("执行模型推理");
    let raw = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| Yolov8Error::ModelInvalid("推理会话锁中毒".to_string()))?;
      let outputs = session.run(ort::inputs![tensor])?;
      let output = outputs
        .get("output0")
        .ok_or_else(|| Yolov8Error::ModelInvalid("缺少 output0 输出张量".to_string()))?;
      let (_shape, data) = output.try_extract_tensor::<f32>()?;
      data.to_vec()
    };

    debug!("获取模型输出");
    Self::postprocess(&raw, conf_threshold)
  }
}

/// 类别内非极大值抑制
fn nms(mut detections: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  detections.sort_by(|a, b| {
    b.score
      .partial_cmp(&a.score)
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut keep: Vec<DetectItem> = Vec::new();
  let mut suppressed = vec![false; detections.len()];

  for i in 0..detections.len() {
    if suppressed[i] {
      continue;
    }
    keep.push(detections[i].clone());

    for j in (i + 1)..detections.len() {
      if suppressed[j] || detections[i].class_id != detections[j].class_id {
        continue;
      }
      if iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
        suppressed[j] = true;
      }
    }
  }

  keep
}

/// 计算两个归一化角点框的 IoU
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
