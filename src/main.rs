// 该文件是 Hongwai （红外） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use url::Url;

use hongwai::{FromUrl, adapter::ModelAdapter, input::ImageInput, model::Yolov8Builder};
use tracing::info;

/// Hongwai 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径 (yolov8:///path/to/model.onnx)
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像 (image:///path/to/photo.jpg)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.3", value_name = "THRESHOLD")]
  pub confidence: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("置信度阈值: {}", args.confidence);

  let model = Yolov8Builder::from_url(&args.model)?.build()?;
  let adapter = ModelAdapter::new(model, args.confidence);
  let input = ImageInput::from_url(&args.input)?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let boxes = adapter.detect(input)?;
  let elapsed = now.elapsed();
  info!("推理完成，耗时: {:.2?}", elapsed);
  info!("检测到 {} 个物体", boxes.len());

  println!("{}", serde_json::to_string(&boxes)?);

  Ok(())
}
