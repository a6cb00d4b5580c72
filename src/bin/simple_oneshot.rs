// 该文件是 Mianxiang （面相） 项目的一部分。
// src/bin/simple_oneshot.rs - 单帧人脸分析
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use mianxiang::{
  FromUrl,
  backend::ReplayBackend,
  detector::{DetectorConfig, FaceDetectionConfig, LANDMARKS_TOPO_NAME},
  input::ImageFileInput,
  output::JsonLinesOutput,
  pipeline::FacePipeline,
  task::{OneShotTask, Task},
};
use tracing::info;

/// Mianxiang 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 人脸检测模型，例如 face:///models/face.json?threshold=0.5
  #[arg(long, value_name = "FACE_MODEL")]
  pub face: Url,
  /// 人脸特征点模型，缺省时不做特征点检测
  #[arg(long, value_name = "LANDMARKS_MODEL")]
  pub landmarks: Option<Url>,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("人脸检测模型: {}", args.face);
  match &args.landmarks {
    Some(landmarks) => info!("人脸特征点模型: {}", landmarks),
    None => info!("未指定人脸特征点模型"),
  }
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let face_config = FaceDetectionConfig::from_url(&args.face)?;
  let landmarks_config = match &args.landmarks {
    Some(url) => DetectorConfig::from_url(url)?,
    None => DetectorConfig::disabled(LANDMARKS_TOPO_NAME),
  };

  let backend = ReplayBackend::new();
  let pipeline = FacePipeline::load(face_config, landmarks_config, &backend)?;
  let input = ImageFileInput::from_url(&args.input)?;
  let output = JsonLinesOutput::from_url(&args.output)?;

  OneShotTask.run_task(input, pipeline, output)?;

  Ok(())
}
