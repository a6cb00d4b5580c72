// 该文件是 Mianxiang （面相） 项目的一部分。
// src/detector/error.rs - 检测器错误
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

use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::{backend::BackendError, frame::BindError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
  WrongInputCount,
  WrongOutputCount,
  WrongOutputRank,
  WrongLayerType,
  WrongWidth,
  UnknownLayer,
  MissingAttribute,
}

impl fmt::Display for ValidationReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      ValidationReason::WrongInputCount => "输入数量错误",
      ValidationReason::WrongOutputCount => "输出数量错误",
      ValidationReason::WrongOutputRank => "输出维度错误",
      ValidationReason::WrongLayerType => "输出层类型错误",
      ValidationReason::WrongWidth => "输出宽度错误",
      ValidationReason::UnknownLayer => "未知输出层",
      ValidationReason::MissingAttribute => "缺少层属性",
    };
    write!(f, "{}", text)
  }
}

/// 模型拓扑不符合检测器要求，加载流程就此中止
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}: {detail}")]
pub struct ValidationError {
  pub reason: ValidationReason,
  pub detail: String,
}

impl ValidationError {
  pub fn new(reason: ValidationReason, detail: impl Into<String>) -> Self {
    Self {
      reason,
      detail: detail.into(),
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("后端错误: {0}")]
  Backend(#[from] BackendError),
  #[error("模型校验失败: {0}")]
  Validation(#[from] ValidationError),
  #[error("输入绑定失败: {0}")]
  Bind(#[from] BindError),
  #[error("读取标签文件失败: {0}")]
  Labels(#[from] std::io::Error),
  #[error("{0} 尚未加载模型")]
  NotLoaded(String),
  #[error("特征点索引 {index} 超出当前批次范围（共 {count} 张人脸）")]
  LandmarksIndexOutOfRange { index: usize, count: usize },
  #[error("输出张量 {name} 的维度 {dims:?} 无法容纳第 {index} 个结果")]
  OutputShape {
    name: String,
    dims: Vec<usize>,
    index: usize,
  },
}

impl DetectorError {
  pub(crate) fn invalid(reason: ValidationReason, detail: String) -> Self {
    error!("{}", detail);
    DetectorError::Validation(ValidationError::new(reason, detail))
  }
}
