// 该文件是 Mianxiang （面相） 项目的一部分。
// src/detector/face.rs - 人脸检测器
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

use std::{io::ErrorKind, path::Path};

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
  backend::{Backend, InferRequest, LayerKind, ModelTopology, Precision},
  detector::{
    BaseDetection, Detection, DetectorError, FaceDetectionConfig, ValidationReason,
  },
  frame::Rect,
};

const FACE_NUM_INPUTS: usize = 1;
const FACE_NUM_OUTPUTS: usize = 1;
const FACE_OUTPUT_RANK: usize = 4;
/// 每个候选框: [image_id, label, confidence, x_min, y_min, x_max, y_max]
const FACE_OBJECT_SIZE: usize = 7;
const BACKGROUND_LABEL: &str = "fake";

/// 单个人脸检测结果，坐标为帧像素坐标（已扩为正方形）
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionResult {
  pub label: i32,
  pub confidence: f32,
  pub location: Rect,
}

pub struct FaceDetection<B: Backend> {
  base: BaseDetection<B>,
  detection_threshold: f32,
  bb_enlarge_coefficient: f32,
  raw_output: bool,
  enqueued_frames: usize,
  width: u32,
  height: u32,
  max_proposal_count: usize,
  object_size: usize,
  // 初始为 true：首次提交前没有可读取的结果
  results_fetched: bool,
  labels: Vec<String>,
  results: Vec<DetectionResult>,
}

impl<B: Backend> FaceDetection<B> {
  pub fn new(config: FaceDetectionConfig) -> Self {
    let detection_threshold = config.detection_threshold();
    let bb_enlarge_coefficient = config.bb_enlarge_coefficient();
    let raw_output = config.raw_output();

    Self {
      base: BaseDetection::new(config.into_base()),
      detection_threshold,
      bb_enlarge_coefficient,
      raw_output,
      enqueued_frames: 0,
      width: 0,
      height: 0,
      max_proposal_count: 0,
      object_size: FACE_OBJECT_SIZE,
      results_fetched: true,
      labels: Vec::new(),
      results: Vec::new(),
    }
  }

  pub fn enabled(&self) -> bool {
    self.base.enabled()
  }

  pub fn results(&self) -> &[DetectionResult] {
    &self.results
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn label_name(&self, label: i32) -> Option<&str> {
    usize::try_from(label)
      .ok()
      .and_then(|index| self.labels.get(index))
      .map(String::as_str)
  }

  pub fn enqueued_frames(&self) -> usize {
    self.enqueued_frames
  }

  pub fn frame_size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn max_proposal_count(&self) -> usize {
    self.max_proposal_count
  }

  /// 写入待检测帧。提交前再次调用会替换尚未提交的帧。
  pub fn enqueue(&mut self, frame: &RgbImage) -> Result<(), DetectorError> {
    if !self.base.enabled() {
      return Ok(());
    }

    self.width = frame.width();
    self.height = frame.height();
    self.base.bind_input(frame, 0)?;
    self.enqueued_frames = 1;
    Ok(())
  }

  pub fn submit_request(&mut self) -> Result<(), DetectorError> {
    if self.enqueued_frames == 0 {
      return Ok(());
    }
    self.enqueued_frames = 0;
    self.results_fetched = false;
    self.results.clear();
    self.base.submit_request()
  }

  pub fn wait(&mut self) -> Result<(), DetectorError> {
    self.base.wait()
  }

  pub fn print_performance_counts(&self) -> Result<(), DetectorError> {
    self.base.print_performance_counts()
  }

  /// 解析本轮推理输出。同一轮内重复调用不会重复解析。
  pub fn fetch_results(&mut self) -> Result<(), DetectorError> {
    if !self.base.enabled() || self.results_fetched {
      return Ok(());
    }
    let Some(request) = self.base.request() else {
      return Ok(());
    };

    let output = request.output(self.base.output_name())?;
    let detections = output.as_slice();

    for (i, proposal) in detections
      .chunks_exact(self.object_size)
      .take(self.max_proposal_count)
      .enumerate()
    {
      let image_id = proposal[0];
      if image_id < 0.0 {
        break;
      }

      let label = proposal[1] as i32;
      let confidence = proposal[2];
      if confidence <= self.detection_threshold {
        continue;
      }

      let location = square_enlarge(
        [proposal[3], proposal[4], proposal[5], proposal[6]],
        self.width,
        self.height,
        self.bb_enlarge_coefficient,
      );

      if self.raw_output {
        info!(
          "[{},{}] 元素, 置信度 = {}    ({},{})-({},{})",
          i, label, confidence, location.x, location.y, location.width, location.height
        );
      }

      self.results.push(DetectionResult {
        label,
        confidence,
        location,
      });
    }

    self.results_fetched = true;
    debug!("检测到 {} 张人脸", self.results.len());
    Ok(())
  }
}

/// 将归一化检测框 `[x_min, y_min, x_max, y_max]` 还原到帧坐标，
/// 再以原框中心为中心扩成边长为 `coefficient × max(w, h)` 的正方形
pub fn square_enlarge(bbox: [f32; 4], width: u32, height: u32, coefficient: f32) -> Rect {
  let (width, height) = (width as f32, height as f32);

  let x = (bbox[0] * width) as i32;
  let y = (bbox[1] * height) as i32;
  let bb_width = (bbox[2] * width - x as f32) as i32;
  let bb_height = (bbox[3] * height - y as f32) as i32;

  // 后端给出的坐标可能越界，饱和运算避免溢出
  let bb_center_x = x.saturating_add(bb_width / 2);
  let bb_center_y = y.saturating_add(bb_height / 2);

  let max_of_sizes = bb_width.max(bb_height);
  let bb_new_side = (coefficient * max_of_sizes as f32) as i32;

  Rect::new(
    bb_center_x.saturating_sub(bb_new_side / 2),
    bb_center_y.saturating_sub(bb_new_side / 2),
    bb_new_side,
    bb_new_side,
  )
}

/// 读取与模型同名的 `.labels` 文件，文件不存在时返回空列表
fn read_labels(model_path: &Path) -> Result<Vec<String>, std::io::Error> {
  let path = model_path.with_extension("labels");
  match std::fs::read_to_string(&path) {
    Ok(content) => {
      debug!("读取标签文件: {}", path.display());
      Ok(content.split_whitespace().map(str::to_string).collect())
    }
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
    Err(e) => Err(e),
  }
}

impl<B: Backend> Detection<B> for FaceDetection<B> {
  fn base(&self) -> &BaseDetection<B> {
    &self.base
  }

  fn base_mut(&mut self) -> &mut BaseDetection<B> {
    &mut self.base
  }

  fn read(&mut self, backend: &B) -> Result<ModelTopology, DetectorError> {
    let config = self.base.config().clone();
    info!("加载人脸检测网络文件");
    let mut topology = backend.read_network(config.model_path())?;
    info!("批大小设置为 {}", config.max_batch());
    topology.set_batch_size(config.max_batch());

    let mut labels = read_labels(config.model_path())?;

    info!("检查人脸检测网络输入");
    if topology.inputs.len() != FACE_NUM_INPUTS {
      return Err(DetectorError::invalid(
        ValidationReason::WrongInputCount,
        format!(
          "人脸检测网络应只有 {} 个输入, 实际为 {}",
          FACE_NUM_INPUTS,
          topology.inputs.len()
        ),
      ));
    }
    topology.inputs[0].precision = Precision::U8;

    info!("检查人脸检测网络输出");
    if topology.outputs.len() != FACE_NUM_OUTPUTS {
      return Err(DetectorError::invalid(
        ValidationReason::WrongOutputCount,
        format!(
          "人脸检测网络应只有 {} 个输出, 实际为 {}",
          FACE_NUM_OUTPUTS,
          topology.outputs.len()
        ),
      ));
    }

    let output = &topology.outputs[0];
    if output.layer.kind != LayerKind::DetectionOutput {
      return Err(DetectorError::invalid(
        ValidationReason::WrongLayerType,
        format!(
          "人脸检测网络输出层 ({}) 应为 DetectionOutput, 实际为 {}",
          output.layer.name, output.layer.kind
        ),
      ));
    }

    let Some(num_classes) = output.layer.param_usize("num_classes") else {
      return Err(DetectorError::invalid(
        ValidationReason::MissingAttribute,
        format!(
          "人脸检测网络输出层 ({}) 应带有整数属性 num_classes",
          output.layer.name
        ),
      ));
    };

    if labels.len() != num_classes {
      if labels.len() + 1 == num_classes {
        // 网络默认包含没有标签的背景类
        labels.insert(0, BACKGROUND_LABEL.to_string());
      } else {
        labels.clear();
      }
    }

    if output.dims.len() != FACE_OUTPUT_RANK {
      return Err(DetectorError::invalid(
        ValidationReason::WrongOutputRank,
        format!(
          "人脸检测网络输出层 ({}) 维度应为 {}, 实际为 {} ({:?})",
          output.layer.name,
          FACE_OUTPUT_RANK,
          output.dims.len(),
          output.dims
        ),
      ));
    }
    if output.dims[3] != FACE_OBJECT_SIZE {
      return Err(DetectorError::invalid(
        ValidationReason::WrongWidth,
        format!(
          "人脸检测网络输出层 ({}) 最后一维应为 {}, 实际为 {}",
          output.layer.name, FACE_OBJECT_SIZE, output.dims[3]
        ),
      ));
    }

    self.max_proposal_count = output.dims[2];
    self.object_size = output.dims[3];
    self.labels = labels;
    let (input_name, output_name) = (topology.inputs[0].name.clone(), output.name.clone());
    self.base.set_bindings(input_name, output_name);
    topology.outputs[0].precision = Precision::FP32;

    info!("将人脸检测模型加载到 {} 设备", config.device());
    Ok(topology)
  }
}
