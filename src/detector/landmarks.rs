// 该文件是 Mianxiang （面相） 项目的一部分。
// src/detector/landmarks.rs - 人脸特征点检测器
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

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
  backend::{Backend, InferRequest, LayerKind, ModelTopology, Precision},
  detector::{BaseDetection, Detection, DetectorConfig, DetectorError, ValidationReason},
};

/// 特征点输出层名
pub const LANDMARKS_OUTPUT: &str = "align_fc3";
/// 每张人脸 35 个点，按 (x, y) 交错排列
pub const LANDMARKS_WIDTH: usize = 70;

const LANDMARKS_NUM_INPUTS: usize = 1;
const LANDMARKS_NUM_OUTPUTS: usize = 1;

pub struct FacialLandmarksDetection<B: Backend> {
  base: BaseDetection<B>,
  enqueued_faces: usize,
  submitted_faces: usize,
}

impl<B: Backend> FacialLandmarksDetection<B> {
  pub fn new(config: DetectorConfig) -> Self {
    Self {
      base: BaseDetection::new(config),
      enqueued_faces: 0,
      submitted_faces: 0,
    }
  }

  pub fn enabled(&self) -> bool {
    self.base.enabled()
  }

  /// 当前批次中已写入的人脸数量
  pub fn enqueued_faces(&self) -> usize {
    self.enqueued_faces
  }

  /// 最近一次提交的批次中的人脸数量
  pub fn submitted_faces(&self) -> usize {
    self.submitted_faces
  }

  /// 写入一张人脸。批次已满时丢弃并记录警告。
  pub fn enqueue(&mut self, face: &RgbImage) -> Result<(), DetectorError> {
    if !self.base.enabled() {
      return Ok(());
    }

    let max_batch = self.base.config().max_batch();
    if self.enqueued_faces == max_batch {
      warn!(
        "检测到的人脸数量超过特征点检测器的最大处理数量 ({})",
        max_batch
      );
      return Ok(());
    }

    self.base.bind_input(face, self.enqueued_faces)?;
    self.enqueued_faces += 1;
    Ok(())
  }

  /// 提交当前批次。无论提交是否成功，已写入的人脸都不会留到下一批次。
  pub fn submit_request(&mut self) -> Result<(), DetectorError> {
    let batch = self.enqueued_faces;
    self.enqueued_faces = 0;
    // 空批次或提交失败时没有可读取的特征点
    self.submitted_faces = 0;
    if batch == 0 {
      return Ok(());
    }

    if self.base.config().dynamic_batch() {
      if let Some(request) = self.base.request_mut() {
        debug!("动态批大小设置为 {}", batch);
        request.set_batch(batch)?;
      }
    }

    self.base.submit_request()?;
    self.submitted_faces = batch;
    Ok(())
  }

  pub fn wait(&mut self) -> Result<(), DetectorError> {
    self.base.wait()
  }

  pub fn print_performance_counts(&self) -> Result<(), DetectorError> {
    self.base.print_performance_counts()
  }

  /// 第 `index` 张人脸的归一化特征点，须在本批次 `wait` 之后读取
  pub fn landmarks_for(&self, index: usize) -> Result<Vec<f32>, DetectorError> {
    if index >= self.submitted_faces {
      return Err(DetectorError::LandmarksIndexOutOfRange {
        index,
        count: self.submitted_faces,
      });
    }

    let request = self
      .base
      .request()
      .ok_or_else(|| DetectorError::NotLoaded(self.base.topo_name().to_string()))?;
    let output = request.output(self.base.output_name())?;

    // 每张人脸的特征点向量长度为最内层维度
    let n_lm = output.dims().last().copied().unwrap_or(0);
    let start = index * n_lm;
    output
      .as_slice()
      .get(start..start + n_lm)
      .filter(|landmarks| !landmarks.is_empty())
      .map(<[f32]>::to_vec)
      .ok_or_else(|| DetectorError::OutputShape {
        name: self.base.output_name().to_string(),
        dims: output.dims().to_vec(),
        index,
      })
  }
}

impl<B: Backend> Detection<B> for FacialLandmarksDetection<B> {
  fn base(&self) -> &BaseDetection<B> {
    &self.base
  }

  fn base_mut(&mut self) -> &mut BaseDetection<B> {
    &mut self.base
  }

  fn read(&mut self, backend: &B) -> Result<ModelTopology, DetectorError> {
    let config = self.base.config().clone();
    info!("加载人脸特征点网络文件");
    let mut topology = backend.read_network(config.model_path())?;
    topology.set_batch_size(config.max_batch());
    info!(
      "人脸特征点网络批大小设置为 {}",
      topology.batch_size()
    );

    info!("检查人脸特征点网络输入");
    if topology.inputs.len() != LANDMARKS_NUM_INPUTS {
      return Err(DetectorError::invalid(
        ValidationReason::WrongInputCount,
        format!(
          "人脸特征点网络应只有 {} 个输入, 实际为 {}",
          LANDMARKS_NUM_INPUTS,
          topology.inputs.len()
        ),
      ));
    }
    topology.inputs[0].precision = Precision::U8;

    info!("检查人脸特征点网络输出");
    if topology.outputs.len() != LANDMARKS_NUM_OUTPUTS {
      return Err(DetectorError::invalid(
        ValidationReason::WrongOutputCount,
        format!(
          "人脸特征点网络应只有 {} 个输出, 实际为 {}",
          LANDMARKS_NUM_OUTPUTS,
          topology.outputs.len()
        ),
      ));
    }

    let output = &topology.outputs[0];
    let layer = &output.layer;
    if layer.name != LANDMARKS_OUTPUT {
      return Err(DetectorError::invalid(
        ValidationReason::UnknownLayer,
        format!(
          "人脸特征点网络输出层未知: {}, 应为 {}",
          layer.name, LANDMARKS_OUTPUT
        ),
      ));
    }
    if layer.kind != LayerKind::FullyConnected {
      return Err(DetectorError::invalid(
        ValidationReason::WrongLayerType,
        format!(
          "人脸特征点网络输出层 ({}) 类型无效: {}, 应为 FullyConnected",
          layer.name, layer.kind
        ),
      ));
    }
    let Some(out_size) = layer.param_usize("out-size") else {
      return Err(DetectorError::invalid(
        ValidationReason::MissingAttribute,
        format!(
          "人脸特征点网络输出层 ({}) 缺少整数属性 out-size",
          layer.name
        ),
      ));
    };
    if out_size != LANDMARKS_WIDTH {
      return Err(DetectorError::invalid(
        ValidationReason::WrongWidth,
        format!(
          "人脸特征点网络输出层 ({}) 输出宽度无效: {}, 应为 {}",
          layer.name, out_size, LANDMARKS_WIDTH
        ),
      ));
    }

    let (input_name, output_name) = (topology.inputs[0].name.clone(), output.name.clone());
    self.base.set_bindings(input_name, output_name);
    for output in topology.outputs.iter_mut() {
      output.precision = Precision::FP32;
    }

    info!("将人脸特征点模型加载到 {} 设备", config.device());
    Ok(topology)
  }
}
