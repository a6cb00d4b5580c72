// 该文件是 Mianxiang （面相） 项目的一部分。
// src/detector/config.rs - 检测器配置
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
  path::{Path, PathBuf},
  str::FromStr,
  time::Duration,
};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub const FACE_SCHEME: &str = "face";
pub const LANDMARKS_SCHEME: &str = "landmarks";
pub const FACE_TOPO_NAME: &str = "Face Detection";
pub const LANDMARKS_TOPO_NAME: &str = "Facial Landmarks";

const DEFAULT_DEVICE: &str = "CPU";
const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;
const DEFAULT_BB_ENLARGE_COEFFICIENT: f32 = 1.2;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("URI 方案不匹配: 期望 {expected}, 实际为 {found}")]
  SchemeMismatch { expected: String, found: String },
  #[error("参数 {key} 的取值 {value} 无效")]
  InvalidValue { key: String, value: String },
  #[error("未知参数: {0}")]
  UnknownParameter(String),
  #[error("模型路径解码失败: {0}")]
  PathDecode(#[from] std::string::FromUtf8Error),
}

/// 单个检测阶段的配置，构造后不再修改。模型路径为空表示该阶段关闭。
#[derive(Debug, Clone)]
pub struct DetectorConfig {
  topo_name: String,
  model_path: PathBuf,
  device: String,
  max_batch: usize,
  dynamic_batch: bool,
  is_async: bool,
  wait_timeout: Option<Duration>,
}

impl DetectorConfig {
  pub fn new(topo_name: impl Into<String>, model_path: impl Into<PathBuf>) -> Self {
    Self {
      topo_name: topo_name.into(),
      model_path: model_path.into(),
      device: DEFAULT_DEVICE.to_string(),
      max_batch: 1,
      dynamic_batch: false,
      is_async: false,
      wait_timeout: None,
    }
  }

  pub fn disabled(topo_name: impl Into<String>) -> Self {
    Self::new(topo_name, PathBuf::new())
  }

  pub fn with_device(mut self, device: impl Into<String>) -> Self {
    self.device = device.into();
    self
  }

  pub fn with_max_batch(mut self, max_batch: usize) -> Self {
    self.max_batch = max_batch.max(1);
    self
  }

  pub fn with_dynamic_batch(mut self, dynamic_batch: bool) -> Self {
    self.dynamic_batch = dynamic_batch;
    self
  }

  pub fn with_async(mut self, is_async: bool) -> Self {
    self.is_async = is_async;
    self
  }

  pub fn with_wait_timeout(mut self, wait_timeout: Option<Duration>) -> Self {
    self.wait_timeout = wait_timeout;
    self
  }

  pub fn topo_name(&self) -> &str {
    &self.topo_name
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn device(&self) -> &str {
    &self.device
  }

  pub fn max_batch(&self) -> usize {
    self.max_batch
  }

  pub fn dynamic_batch(&self) -> bool {
    self.dynamic_batch
  }

  pub fn is_async(&self) -> bool {
    self.is_async
  }

  pub fn wait_timeout(&self) -> Option<Duration> {
    self.wait_timeout
  }

  /// 应用一个通用查询参数，返回该参数是否被识别
  fn apply(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
    match key {
      "device" => self.device = value.to_string(),
      "batch" => self.max_batch = parse_value::<usize>(key, value)?.max(1),
      "dynamic" => self.dynamic_batch = parse_flag(key, value)?,
      "async" => self.is_async = parse_flag(key, value)?,
      "timeout_ms" => {
        self.wait_timeout = Some(Duration::from_millis(parse_value(key, value)?));
      }
      _ => return Ok(false),
    }
    Ok(true)
  }

  fn from_stage_url(url: &Url, topo_name: &str) -> Result<Self, ConfigError> {
    let model_path = urlencoding::decode(url.path())?.into_owned();
    debug!("{} 模型路径: {}", topo_name, model_path);
    Ok(Self::new(topo_name, model_path))
  }
}

impl FromUrl for DetectorConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let topo_name = match url.scheme() {
      FACE_SCHEME => FACE_TOPO_NAME,
      LANDMARKS_SCHEME => LANDMARKS_TOPO_NAME,
      other => {
        return Err(ConfigError::SchemeMismatch {
          expected: format!("{} 或 {}", FACE_SCHEME, LANDMARKS_SCHEME),
          found: other.to_string(),
        });
      }
    };

    let mut config = Self::from_stage_url(url, topo_name)?;
    for (key, value) in url.query_pairs() {
      if !config.apply(&key, &value)? {
        return Err(ConfigError::UnknownParameter(key.into_owned()));
      }
    }
    Ok(config)
  }
}

/// 人脸检测阶段的配置
#[derive(Debug, Clone)]
pub struct FaceDetectionConfig {
  base: DetectorConfig,
  detection_threshold: f32,
  bb_enlarge_coefficient: f32,
  raw_output: bool,
}

impl FaceDetectionConfig {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self::from_base(DetectorConfig::new(FACE_TOPO_NAME, model_path))
  }

  pub fn from_base(base: DetectorConfig) -> Self {
    Self {
      base,
      detection_threshold: DEFAULT_DETECTION_THRESHOLD,
      bb_enlarge_coefficient: DEFAULT_BB_ENLARGE_COEFFICIENT,
      raw_output: false,
    }
  }

  pub fn with_detection_threshold(mut self, threshold: f32) -> Self {
    self.detection_threshold = threshold;
    self
  }

  pub fn with_bb_enlarge_coefficient(mut self, coefficient: f32) -> Self {
    self.bb_enlarge_coefficient = coefficient;
    self
  }

  pub fn with_raw_output(mut self, raw_output: bool) -> Self {
    self.raw_output = raw_output;
    self
  }

  pub fn base(&self) -> &DetectorConfig {
    &self.base
  }

  pub fn detection_threshold(&self) -> f32 {
    self.detection_threshold
  }

  pub fn bb_enlarge_coefficient(&self) -> f32 {
    self.bb_enlarge_coefficient
  }

  pub fn raw_output(&self) -> bool {
    self.raw_output
  }

  pub(crate) fn into_base(self) -> DetectorConfig {
    self.base
  }
}

impl FromUrlWithScheme for FaceDetectionConfig {
  const SCHEME: &'static str = FACE_SCHEME;
}

impl FromUrl for FaceDetectionConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        found: url.scheme().to_string(),
      });
    }

    let mut config = Self::from_base(DetectorConfig::from_stage_url(url, FACE_TOPO_NAME)?);
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "threshold" => config.detection_threshold = parse_value(&key, &value)?,
        "enlarge" => config.bb_enlarge_coefficient = parse_value(&key, &value)?,
        "raw" => config.raw_output = parse_flag(&key, &value)?,
        _ => {
          if !config.base.apply(&key, &value)? {
            return Err(ConfigError::UnknownParameter(key.to_string()));
          }
        }
      }
    }
    Ok(config)
  }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value {
    "" | "1" | "true" | "yes" => Ok(true),
    "0" | "false" | "no" => Ok(false),
    _ => Err(ConfigError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
    }),
  }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}
