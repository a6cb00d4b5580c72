// 该文件是 Mianxiang （面相） 项目的一部分。
// src/detector/base.rs - 检测器通用生命周期
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

use std::{cell::Cell, time::Duration};

use image::RgbImage;
use tracing::{debug, info};

use crate::{
  backend::{Backend, InferRequest, LayerProfile, LayerStatus, Network, RequestOf},
  detector::{DetectorConfig, DetectorError},
  frame,
};

const LAYER_NAME_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnablingState {
  Unchecked,
  Checked(bool),
}

/// 单个后端推理请求的生命周期封装：启用判断、提交、等待与性能统计
pub struct BaseDetection<B: Backend> {
  config: DetectorConfig,
  enabling: Cell<EnablingState>,
  network: Option<B::Network>,
  request: Option<RequestOf<B>>,
  input: String,
  output: String,
}

impl<B: Backend> BaseDetection<B> {
  pub fn new(config: DetectorConfig) -> Self {
    if config.is_async() {
      info!("{} 使用异步模式", config.topo_name());
    }

    Self {
      config,
      enabling: Cell::new(EnablingState::Unchecked),
      network: None,
      request: None,
      input: String::new(),
      output: String::new(),
    }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn topo_name(&self) -> &str {
    self.config.topo_name()
  }

  /// 模型路径非空即启用。只在第一次调用时计算，关闭状态只记录一次日志。
  pub fn enabled(&self) -> bool {
    match self.enabling.get() {
      EnablingState::Checked(enabled) => enabled,
      EnablingState::Unchecked => {
        let enabled = !self.config.model_path().as_os_str().is_empty();
        if !enabled {
          info!("{} 已关闭", self.topo_name());
        }
        self.enabling.set(EnablingState::Checked(enabled));
        enabled
      }
    }
  }

  pub fn is_loaded(&self) -> bool {
    self.network.is_some()
  }

  pub fn input_name(&self) -> &str {
    &self.input
  }

  pub fn output_name(&self) -> &str {
    &self.output
  }

  pub fn request(&self) -> Option<&RequestOf<B>> {
    self.request.as_ref()
  }

  pub(crate) fn request_mut(&mut self) -> Option<&mut RequestOf<B>> {
    self.request.as_mut()
  }

  pub(crate) fn set_bindings(&mut self, input: impl Into<String>, output: impl Into<String>) {
    self.input = input.into();
    self.output = output.into();
  }

  pub(crate) fn attach(&mut self, network: B::Network) {
    self.request = None;
    self.network = Some(network);
  }

  fn ensure_request(&mut self) -> Result<(), DetectorError> {
    if self.request.is_none() {
      let network = self
        .network
        .as_ref()
        .ok_or_else(|| DetectorError::NotLoaded(self.config.topo_name().to_string()))?;
      debug!("为 {} 创建推理请求", self.config.topo_name());
      self.request = Some(network.create_request()?);
    }
    Ok(())
  }

  /// 将图像写入输入张量的第 `slot` 个批次槽位，必要时先创建推理请求
  pub(crate) fn bind_input(&mut self, image: &RgbImage, slot: usize) -> Result<(), DetectorError> {
    self.ensure_request()?;
    let request = self
      .request
      .as_mut()
      .ok_or_else(|| DetectorError::NotLoaded(self.config.topo_name().to_string()))?;
    let mut tensor = request.input_mut(&self.input)?;
    frame::write_nchw(image, &mut tensor, slot)?;
    Ok(())
  }

  pub fn submit_request(&mut self) -> Result<(), DetectorError> {
    if !self.enabled() {
      return Ok(());
    }
    let Some(request) = self.request.as_mut() else {
      return Ok(());
    };

    if self.config.is_async() {
      request.start_async()?;
    } else {
      request.infer()?;
    }
    Ok(())
  }

  pub fn wait(&mut self) -> Result<(), DetectorError> {
    if !self.enabled() || !self.config.is_async() {
      return Ok(());
    }
    let Some(request) = self.request.as_mut() else {
      return Ok(());
    };

    request.wait(self.config.wait_timeout())?;
    Ok(())
  }

  /// 最近一次完成的推理的逐层耗时；关闭或尚未推理时为空
  pub fn performance_counts(&self) -> Result<Vec<LayerProfile>, DetectorError> {
    if !self.enabled() {
      return Ok(Vec::new());
    }
    match self.request.as_ref() {
      Some(request) => Ok(request.performance_counts()?),
      None => Ok(Vec::new()),
    }
  }

  pub fn print_performance_counts(&self) -> Result<(), DetectorError> {
    if !self.enabled() {
      return Ok(());
    }

    info!("{} 性能统计", self.topo_name());
    let profile = self.performance_counts()?;
    if profile.is_empty() {
      debug!("{} 尚无性能数据", self.topo_name());
      return Ok(());
    }

    let mut total = Duration::ZERO;
    for layer in &profile {
      let name: String = if layer.layer_name.chars().count() > LAYER_NAME_WIDTH {
        let head: String = layer
          .layer_name
          .chars()
          .take(LAYER_NAME_WIDTH - 5)
          .collect();
        format!("{} ...", head)
      } else {
        layer.layer_name.clone()
      };

      info!(
        "{:<50} {:<15} layerType: {:<30} execType: {:<25} realTime: {:<10} cpu: {}",
        name,
        layer.status.to_string(),
        layer.layer_type,
        layer.exec_type,
        layer.real_time.as_micros(),
        layer.cpu_time.as_micros()
      );
      if layer.status == LayerStatus::Executed {
        total += layer.real_time;
      }
    }
    info!("总耗时: {} 微秒", total.as_micros());
    Ok(())
  }
}
