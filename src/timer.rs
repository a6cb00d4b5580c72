// 该文件是 Mianxiang （面相） 项目的一部分。
// src/timer.rs - 分阶段计时
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

use std::{collections::BTreeMap, time::Instant};

use thiserror::Error;
use tracing::info;

const SMOOTHING_ALPHA: f64 = 0.1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
  #[error("不存在名为 {0} 的计时器")]
  UnknownTimer(String),
}

/// 单个命名操作的耗时统计，单位毫秒
#[derive(Debug, Clone)]
pub struct CallStat {
  number_of_calls: u64,
  total_duration: f64,
  last_call_duration: f64,
  // 尚无完整观测时为 None
  smoothed_duration: Option<f64>,
  last_call_start: Instant,
}

impl Default for CallStat {
  fn default() -> Self {
    Self::new()
  }
}

impl CallStat {
  pub fn new() -> Self {
    Self {
      number_of_calls: 0,
      total_duration: 0.0,
      last_call_duration: 0.0,
      smoothed_duration: None,
      last_call_start: Instant::now(),
    }
  }

  pub fn number_of_calls(&self) -> u64 {
    self.number_of_calls
  }

  pub fn total_duration(&self) -> f64 {
    self.total_duration
  }

  pub fn last_call_duration(&self) -> f64 {
    self.last_call_duration
  }

  /// 平滑耗时。第一次观测完成前返回自上次开始以来的实时耗时。
  pub fn smoothed_duration(&self) -> f64 {
    match self.smoothed_duration {
      Some(smoothed) => smoothed,
      None => self.last_call_start.elapsed().as_secs_f64() * 1000.0,
    }
  }

  pub fn set_start_time(&mut self) {
    self.last_call_start = Instant::now();
  }

  pub fn calculate_duration(&mut self) {
    let elapsed = self.last_call_start.elapsed().as_secs_f64() * 1000.0;
    self.record(elapsed);
  }

  fn record(&mut self, duration: f64) {
    self.last_call_duration = duration;
    self.number_of_calls += 1;
    self.total_duration += duration;
    self.smoothed_duration = Some(match self.smoothed_duration {
      None => duration,
      Some(smoothed) => smoothed * (1.0 - SMOOTHING_ALPHA) + duration * SMOOTHING_ALPHA,
    });
  }
}

/// 按名称管理的计时器集合
#[derive(Debug, Default)]
pub struct Timer {
  timers: BTreeMap<String, CallStat>,
}

impl Timer {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn start(&mut self, name: &str) {
    self
      .timers
      .entry(name.to_string())
      .or_default()
      .set_start_time();
  }

  pub fn finish(&mut self, name: &str) -> Result<(), TimerError> {
    self.stat_mut(name)?.calculate_duration();
    Ok(())
  }

  pub fn stat(&self, name: &str) -> Result<&CallStat, TimerError> {
    self
      .timers
      .get(name)
      .ok_or_else(|| TimerError::UnknownTimer(name.to_string()))
  }

  pub fn stat_mut(&mut self, name: &str) -> Result<&mut CallStat, TimerError> {
    self
      .timers
      .get_mut(name)
      .ok_or_else(|| TimerError::UnknownTimer(name.to_string()))
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &CallStat)> {
    self.timers.iter().map(|(name, stat)| (name.as_str(), stat))
  }

  pub fn log_summary(&self) {
    for (name, stat) in self.iter() {
      info!(
        "{}: 调用 {} 次, 总耗时 {:.2} ms, 平滑耗时 {:.2} ms, 最近一次 {:.2} ms",
        name,
        stat.number_of_calls(),
        stat.total_duration(),
        stat.smoothed_duration(),
        stat.last_call_duration()
      );
    }
  }
}
