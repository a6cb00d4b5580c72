// 该文件是 Mianxiang （面相） 项目的一部分。
// src/backend.rs - 推理后端接口
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

use std::{
  collections::BTreeMap,
  fmt,
  path::{Path, PathBuf},
  time::Duration,
};

use thiserror::Error;

/// 加载配置中开启动态批处理的键
pub const KEY_DYN_BATCH_ENABLED: &str = "DYN_BATCH_ENABLED";
pub const YES: &str = "YES";

/// 传递给后端的加载配置
pub type LoadConfig = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型描述解析失败: {0}")]
  ModelParse(#[from] serde_json::Error),
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("不支持的精度 {precision}（张量 {tensor}）")]
  UnsupportedPrecision { tensor: String, precision: Precision },
  #[error("未找到名为 {0} 的张量")]
  UnknownTensor(String),
  #[error("上一次推理请求尚未完成")]
  RequestBusy,
  #[error("等待推理结果超时 ({0:?})")]
  WaitTimeout(Duration),
  #[error("批大小 {requested} 超出范围 (1..={max})")]
  BatchOutOfRange { requested: usize, max: usize },
  #[error("网络未开启动态批处理")]
  DynamicBatchDisabled,
  #[error("推理失败: {0}")]
  Inference(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
  U8,
  FP16,
  FP32,
}

impl fmt::Display for Precision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Precision::U8 => write!(f, "U8"),
      Precision::FP16 => write!(f, "FP16"),
      Precision::FP32 => write!(f, "FP32"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerKind {
  DetectionOutput,
  FullyConnected,
  Other(String),
}

impl From<&str> for LayerKind {
  fn from(kind: &str) -> Self {
    match kind {
      "DetectionOutput" => LayerKind::DetectionOutput,
      "FullyConnected" => LayerKind::FullyConnected,
      other => LayerKind::Other(other.to_string()),
    }
  }
}

impl fmt::Display for LayerKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LayerKind::DetectionOutput => write!(f, "DetectionOutput"),
      LayerKind::FullyConnected => write!(f, "FullyConnected"),
      LayerKind::Other(kind) => write!(f, "{}", kind),
    }
  }
}

/// 产生某个输出张量的网络层
#[derive(Debug, Clone)]
pub struct LayerInfo {
  pub name: String,
  pub kind: LayerKind,
  pub params: BTreeMap<String, String>,
}

impl LayerInfo {
  pub fn param_usize(&self, key: &str) -> Option<usize> {
    self.params.get(key).and_then(|v| v.trim().parse().ok())
  }
}

#[derive(Debug, Clone)]
pub struct InputInfo {
  pub name: String,
  /// NCHW 顺序
  pub dims: Vec<usize>,
  pub precision: Precision,
}

#[derive(Debug, Clone)]
pub struct OutputInfo {
  pub name: String,
  pub dims: Vec<usize>,
  pub precision: Precision,
  pub layer: LayerInfo,
}

/// 后端读取模型后得到的网络拓扑，检测器在加载前对其进行校验
#[derive(Debug, Clone)]
pub struct ModelTopology {
  pub source: PathBuf,
  pub inputs: Vec<InputInfo>,
  pub outputs: Vec<OutputInfo>,
}

impl ModelTopology {
  /// 批大小位于所有输入输出张量的第一维
  pub fn batch_size(&self) -> usize {
    self
      .inputs
      .first()
      .and_then(|input| input.dims.first().copied())
      .unwrap_or(1)
  }

  pub fn set_batch_size(&mut self, batch: usize) {
    let dims = self
      .inputs
      .iter_mut()
      .map(|input| &mut input.dims)
      .chain(self.outputs.iter_mut().map(|output| &mut output.dims));
    for dims in dims {
      if let Some(first) = dims.first_mut() {
        *first = batch;
      }
    }
  }
}

/// 只读输出张量视图
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
  dims: &'a [usize],
  data: &'a [f32],
}

impl<'a> TensorView<'a> {
  pub fn new(dims: &'a [usize], data: &'a [f32]) -> Self {
    Self { dims, data }
  }

  pub fn dims(&self) -> &'a [usize] {
    self.dims
  }

  pub fn as_slice(&self) -> &'a [f32] {
    self.data
  }
}

/// 可写输入张量视图（U8 精度）
#[derive(Debug)]
pub struct TensorViewMut<'a> {
  dims: &'a [usize],
  data: &'a mut [u8],
}

impl<'a> TensorViewMut<'a> {
  pub fn new(dims: &'a [usize], data: &'a mut [u8]) -> Self {
    Self { dims, data }
  }

  pub fn dims(&self) -> &[usize] {
    self.dims
  }

  pub fn as_mut_slice(&mut self) -> &mut [u8] {
    &mut *self.data
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerStatus {
  NotRun,
  OptimizedOut,
  Executed,
}

impl fmt::Display for LayerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LayerStatus::NotRun => write!(f, "NOT_RUN"),
      LayerStatus::OptimizedOut => write!(f, "OPTIMIZED_OUT"),
      LayerStatus::Executed => write!(f, "EXECUTED"),
    }
  }
}

/// 单层性能计数
#[derive(Debug, Clone)]
pub struct LayerProfile {
  pub layer_name: String,
  pub status: LayerStatus,
  pub layer_type: String,
  pub exec_type: String,
  pub real_time: Duration,
  pub cpu_time: Duration,
}

pub trait Backend {
  type Network: Network;

  /// 读取模型描述，返回尚未加载的网络拓扑
  fn read_network(&self, model_path: &Path) -> Result<ModelTopology, BackendError>;

  /// 将校验过的拓扑加载到指定设备
  fn load_network(
    &self,
    topology: &ModelTopology,
    device: &str,
    config: &LoadConfig,
  ) -> Result<Self::Network, BackendError>;
}

pub trait Network {
  type Request: InferRequest;

  fn create_request(&self) -> Result<Self::Request, BackendError>;
}

/// 后端推理请求。同一请求在任意时刻最多只有一次推理在执行。
pub trait InferRequest {
  fn input_mut(&mut self, name: &str) -> Result<TensorViewMut<'_>, BackendError>;
  fn output(&self, name: &str) -> Result<TensorView<'_>, BackendError>;

  /// 异步启动推理，立即返回
  fn start_async(&mut self) -> Result<(), BackendError>;
  /// 同步推理，阻塞至完成
  fn infer(&mut self) -> Result<(), BackendError>;
  /// 等待异步推理完成；`None` 表示无限等待
  fn wait(&mut self, timeout: Option<Duration>) -> Result<(), BackendError>;

  fn set_batch(&mut self, batch: usize) -> Result<(), BackendError>;
  fn performance_counts(&self) -> Result<Vec<LayerProfile>, BackendError>;
}

pub type RequestOf<B> = <<B as Backend>::Network as Network>::Request;

#[cfg(feature = "replay_backend")]
mod replay;
#[cfg(feature = "replay_backend")]
pub use self::replay::{
  ManifestInput, ManifestLayer, ManifestOutput, RecordedFrame, ReplayBackend, ReplayManifest,
  ReplayNetwork, ReplayRequest,
};

#[cfg(test)]
mod tests {
  use super::*;

  fn topology() -> ModelTopology {
    ModelTopology {
      source: PathBuf::from("lm.json"),
      inputs: vec![InputInfo {
        name: "data".to_string(),
        dims: vec![1, 3, 60, 60],
        precision: Precision::FP32,
      }],
      outputs: vec![OutputInfo {
        name: "align_fc3".to_string(),
        dims: vec![1, 70],
        precision: Precision::FP32,
        layer: LayerInfo {
          name: "align_fc3".to_string(),
          kind: LayerKind::FullyConnected,
          params: BTreeMap::from([("out-size".to_string(), " 70".to_string())]),
        },
      }],
    }
  }

  #[test]
  fn set_batch_size_reshapes_every_tensor() {
    let mut topology = topology();
    topology.set_batch_size(16);
    assert_eq!(topology.batch_size(), 16);
    assert_eq!(topology.inputs[0].dims, vec![16, 3, 60, 60]);
    assert_eq!(topology.outputs[0].dims, vec![16, 70]);
  }

  #[test]
  fn layer_params_parse_as_integers() {
    let topology = topology();
    assert_eq!(topology.outputs[0].layer.param_usize("out-size"), Some(70));
    assert_eq!(topology.outputs[0].layer.param_usize("num_classes"), None);
  }

  #[test]
  fn layer_kind_round_trips_names() {
    assert_eq!(LayerKind::from("DetectionOutput"), LayerKind::DetectionOutput);
    assert_eq!(
      LayerKind::from("Convolution").to_string(),
      "Convolution".to_string()
    );
  }
}
