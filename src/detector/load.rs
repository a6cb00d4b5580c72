// 该文件是 Mianxiang （面相） 项目的一部分。
// src/detector/load.rs - 将检测器绑定到推理后端
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

use tracing::info;

use crate::{
  backend::{Backend, KEY_DYN_BATCH_ENABLED, LoadConfig, YES},
  detector::{Detection, DetectorError},
};

/// 模型只在这里被加载；关闭的检测器不会触碰后端
pub struct Load<'a, D> {
  detector: &'a mut D,
}

impl<'a, D> Load<'a, D> {
  pub fn new(detector: &'a mut D) -> Self {
    Self { detector }
  }

  pub fn bind<B>(self, backend: &B, enable_dynamic_batch: bool) -> Result<(), DetectorError>
  where
    B: Backend,
    D: Detection<B>,
  {
    if !self.detector.base().enabled() {
      return Ok(());
    }

    let mut config = LoadConfig::new();
    if enable_dynamic_batch {
      config.insert(KEY_DYN_BATCH_ENABLED.to_string(), YES.to_string());
    }

    let topology = self.detector.read(backend)?;
    let device = self.detector.base().config().device().to_string();
    let network = backend.load_network(&topology, &device, &config)?;
    self.detector.base_mut().attach(network);
    info!("{} 模型加载完成", self.detector.base().topo_name());
    Ok(())
  }
}
