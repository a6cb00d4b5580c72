// 该文件是 Mianxiang （面相） 项目的一部分。
// src/detector.rs - 检测器
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

use crate::backend::{Backend, ModelTopology};

mod base;
mod config;
mod error;
mod face;
mod landmarks;
mod load;

pub use self::base::BaseDetection;
pub use self::config::{
  ConfigError, DetectorConfig, FACE_SCHEME, FACE_TOPO_NAME, FaceDetectionConfig, LANDMARKS_SCHEME,
  LANDMARKS_TOPO_NAME,
};
pub use self::error::{DetectorError, ValidationError, ValidationReason};
pub use self::face::{DetectionResult, FaceDetection, square_enlarge};
pub use self::landmarks::{FacialLandmarksDetection, LANDMARKS_OUTPUT, LANDMARKS_WIDTH};
pub use self::load::Load;

/// 可被 [`Load`] 绑定到后端的检测器
pub trait Detection<B: Backend> {
  fn base(&self) -> &BaseDetection<B>;
  fn base_mut(&mut self) -> &mut BaseDetection<B>;

  /// 读取并校验模型拓扑，记录输入输出绑定名，返回协商过精度的拓扑
  fn read(&mut self, backend: &B) -> Result<ModelTopology, DetectorError>;
}
