// 该文件是 Mianxiang （面相） 项目的一部分。
// src/backend/replay.rs - 回放推理后端
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

//! 回放后端：从 JSON 模型描述中读取网络拓扑与预先录制的输出，
//! 每次提交按顺序回放下一帧输出。用于离线调试与测试。

use std::{
  collections::{BTreeMap, HashMap},
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    mpsc::{self, Receiver, RecvTimeoutError},
  },
  thread,
  time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
  Backend, BackendError, InferRequest, InputInfo, KEY_DYN_BATCH_ENABLED, LayerInfo, LayerProfile,
  LayerStatus, LoadConfig, ModelTopology, Network, OutputInfo, Precision, TensorView,
  TensorViewMut, YES,
};

/// 一次提交对应的输出，键为输出张量名
pub type RecordedFrame = BTreeMap<String, Vec<f32>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestInput {
  pub name: String,
  pub dims: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestLayer {
  pub name: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestOutput {
  pub name: String,
  pub dims: Vec<usize>,
  pub layer: ManifestLayer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayManifest {
  pub inputs: Vec<ManifestInput>,
  pub outputs: Vec<ManifestOutput>,
  #[serde(default)]
  pub frames: Vec<RecordedFrame>,
}

impl ReplayManifest {
  fn topology(&self, source: &Path) -> ModelTopology {
    ModelTopology {
      source: source.to_path_buf(),
      inputs: self
        .inputs
        .iter()
        .map(|input| InputInfo {
          name: input.name.clone(),
          dims: input.dims.clone(),
          precision: Precision::FP32,
        })
        .collect(),
      outputs: self
        .outputs
        .iter()
        .map(|output| OutputInfo {
          name: output.name.clone(),
          dims: output.dims.clone(),
          precision: Precision::FP32,
          layer: LayerInfo {
            name: output.layer.name.clone(),
            kind: output.layer.kind.as_str().into(),
            params: output.layer.params.clone(),
          },
        })
        .collect(),
    }
  }
}

#[derive(Debug, Default)]
pub struct ReplayBackend {
  manifests: Mutex<HashMap<PathBuf, Arc<ReplayManifest>>>,
}

impl ReplayBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// 在内存中注册模型描述，之后以 `model_path` 读取时不再访问文件系统
  pub fn register(&self, model_path: impl Into<PathBuf>, manifest: ReplayManifest) {
    self.lock().insert(model_path.into(), Arc::new(manifest));
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<ReplayManifest>>> {
    self.manifests.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn manifest(&self, model_path: &Path) -> Result<Arc<ReplayManifest>, BackendError> {
    if let Some(manifest) = self.lock().get(model_path) {
      return Ok(manifest.clone());
    }

    info!("读取回放模型描述: {}", model_path.display());
    let file = std::fs::File::open(model_path)?;
    let manifest: ReplayManifest = serde_json::from_reader(std::io::BufReader::new(file))?;
    debug!(
      "模型描述包含 {} 个输入, {} 个输出, {} 帧录制输出",
      manifest.inputs.len(),
      manifest.outputs.len(),
      manifest.frames.len()
    );

    let manifest = Arc::new(manifest);
    self
      .lock()
      .insert(model_path.to_path_buf(), manifest.clone());
    Ok(manifest)
  }
}

impl Backend for ReplayBackend {
  type Network = ReplayNetwork;

  fn read_network(&self, model_path: &Path) -> Result<ModelTopology, BackendError> {
    let manifest = self.manifest(model_path)?;
    Ok(manifest.topology(model_path))
  }

  fn load_network(
    &self,
    topology: &ModelTopology,
    device: &str,
    config: &LoadConfig,
  ) -> Result<Self::Network, BackendError> {
    let manifest = self.manifest(&topology.source)?;

    if let Some(input) = topology
      .inputs
      .iter()
      .find(|input| input.precision != Precision::U8)
    {
      return Err(BackendError::UnsupportedPrecision {
        tensor: input.name.clone(),
        precision: input.precision,
      });
    }
    if let Some(output) = topology
      .outputs
      .iter()
      .find(|output| output.precision != Precision::FP32)
    {
      return Err(BackendError::UnsupportedPrecision {
        tensor: output.name.clone(),
        precision: output.precision,
      });
    }

    let dynamic_batch = config
      .get(KEY_DYN_BATCH_ENABLED)
      .map(|value| value == YES)
      .unwrap_or(false);

    info!(
      "回放后端加载网络 {} 到设备 {}（批大小 {}, 动态批处理: {}）",
      topology.source.display(),
      device,
      topology.batch_size(),
      dynamic_batch
    );

    Ok(ReplayNetwork {
      topology: topology.clone(),
      manifest,
      dynamic_batch,
    })
  }
}

pub struct ReplayNetwork {
  topology: ModelTopology,
  manifest: Arc<ReplayManifest>,
  dynamic_batch: bool,
}

impl Network for ReplayNetwork {
  type Request = ReplayRequest;

  fn create_request(&self) -> Result<Self::Request, BackendError> {
    let inputs = self
      .topology
      .inputs
      .iter()
      .map(|input| (input.name.clone(), Buffer::zeroed(&input.dims)))
      .collect();
    let outputs = self
      .topology
      .outputs
      .iter()
      .map(|output| (output.name.clone(), Buffer::zeroed(&output.dims)))
      .collect();
    let layers = self
      .topology
      .outputs
      .iter()
      .map(|output| (output.layer.name.clone(), output.layer.kind.to_string()))
      .collect();
    let max_batch = self.topology.batch_size();

    Ok(ReplayRequest {
      inputs,
      outputs,
      layers,
      manifest: self.manifest.clone(),
      cursor: 0,
      submissions: 0,
      max_batch,
      batch: max_batch,
      dynamic_batch: self.dynamic_batch,
      pending: None,
      profile: Vec::new(),
    })
  }
}

struct Buffer<T> {
  dims: Vec<usize>,
  data: Vec<T>,
}

impl<T: Default + Clone> Buffer<T> {
  fn zeroed(dims: &[usize]) -> Self {
    Self {
      dims: dims.to_vec(),
      data: vec![T::default(); dims.iter().product()],
    }
  }
}

struct Completion {
  values: RecordedFrame,
  elapsed: Duration,
}

pub struct ReplayRequest {
  inputs: BTreeMap<String, Buffer<u8>>,
  outputs: BTreeMap<String, Buffer<f32>>,
  layers: Vec<(String, String)>,
  manifest: Arc<ReplayManifest>,
  cursor: usize,
  submissions: usize,
  max_batch: usize,
  batch: usize,
  dynamic_batch: bool,
  pending: Option<Receiver<Completion>>,
  profile: Vec<LayerProfile>,
}

impl ReplayRequest {
  /// 已提交的推理次数
  pub fn submissions(&self) -> usize {
    self.submissions
  }

  /// 当前生效的批大小
  pub fn batch(&self) -> usize {
    self.batch
  }

  pub fn input(&self, name: &str) -> Option<&[u8]> {
    self.inputs.get(name).map(|buffer| buffer.data.as_slice())
  }

  fn next_frame(&mut self) -> RecordedFrame {
    self.submissions += 1;
    let frames = &self.manifest.frames;
    if frames.is_empty() {
      return RecordedFrame::new();
    }
    let frame = frames[self.cursor % frames.len()].clone();
    self.cursor += 1;
    frame
  }

  fn complete(&mut self, completion: Completion) {
    for (name, buffer) in self.outputs.iter_mut() {
      let recorded = completion
        .values
        .get(name)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
      let n = recorded.len().min(buffer.data.len());
      buffer.data[..n].copy_from_slice(&recorded[..n]);
      buffer.data[n..].fill(0.0);
    }

    self.profile = self
      .layers
      .iter()
      .map(|(name, kind)| LayerProfile {
        layer_name: name.clone(),
        status: LayerStatus::Executed,
        layer_type: kind.clone(),
        exec_type: "replay".to_string(),
        real_time: completion.elapsed,
        cpu_time: completion.elapsed,
      })
      .collect();
  }
}

impl InferRequest for ReplayRequest {
  fn input_mut(&mut self, name: &str) -> Result<TensorViewMut<'_>, BackendError> {
    let buffer = self
      .inputs
      .get_mut(name)
      .ok_or_else(|| BackendError::UnknownTensor(name.to_string()))?;
    Ok(TensorViewMut::new(&buffer.dims, &mut buffer.data))
  }

  fn output(&self, name: &str) -> Result<TensorView<'_>, BackendError> {
    let buffer = self
      .outputs
      .get(name)
      .ok_or_else(|| BackendError::UnknownTensor(name.to_string()))?;
    Ok(TensorView::new(&buffer.dims, &buffer.data))
  }

  fn start_async(&mut self) -> Result<(), BackendError> {
    if self.pending.is_some() {
      return Err(BackendError::RequestBusy);
    }

    let frame = self.next_frame();
    let (tx, rx) = mpsc::channel();
    debug!("异步回放第 {} 次推理 (批大小 {})", self.submissions, self.batch);
    thread::spawn(move || {
      let now = Instant::now();
      let values = frame;
      let _ = tx.send(Completion {
        values,
        elapsed: now.elapsed(),
      });
    });
    self.pending = Some(rx);
    Ok(())
  }

  fn infer(&mut self) -> Result<(), BackendError> {
    if self.pending.is_some() {
      return Err(BackendError::RequestBusy);
    }

    let now = Instant::now();
    let values = self.next_frame();
    debug!("同步回放第 {} 次推理 (批大小 {})", self.submissions, self.batch);
    self.complete(Completion {
      values,
      elapsed: now.elapsed(),
    });
    Ok(())
  }

  fn wait(&mut self, timeout: Option<Duration>) -> Result<(), BackendError> {
    let Some(rx) = self.pending.take() else {
      return Ok(());
    };

    let completion = match timeout {
      None => rx
        .recv()
        .map_err(|_| BackendError::Inference("回放工作线程异常退出".to_string()))?,
      Some(timeout) => match rx.recv_timeout(timeout) {
        Ok(completion) => completion,
        Err(RecvTimeoutError::Timeout) => {
          self.pending = Some(rx);
          return Err(BackendError::WaitTimeout(timeout));
        }
        Err(RecvTimeoutError::Disconnected) => {
          return Err(BackendError::Inference(
            "回放工作线程异常退出".to_string(),
          ));
        }
      },
    };

    self.complete(completion);
    Ok(())
  }

  fn set_batch(&mut self, batch: usize) -> Result<(), BackendError> {
    if !self.dynamic_batch {
      return Err(BackendError::DynamicBatchDisabled);
    }
    if batch == 0 || batch > self.max_batch {
      return Err(BackendError::BatchOutOfRange {
        requested: batch,
        max: self.max_batch,
      });
    }
    self.batch = batch;
    Ok(())
  }

  fn performance_counts(&self) -> Result<Vec<LayerProfile>, BackendError> {
    Ok(self.profile.clone())
  }
}
