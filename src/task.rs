// 该文件是 Mianxiang （面相） 项目的一部分。
// src/task.rs - 任务循环
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

use std::{thread, time::Duration};

use image::RgbImage;
use tracing::{info, warn};

use crate::{
  backend::Backend,
  output::Render,
  pipeline::{FacePipeline, FrameAnalysis, TIMER_TOTAL},
};

pub trait Task<I, P, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: P, output: O) -> Result<(), Self::Error>;
}

fn finish_report<B: Backend>(pipeline: &FacePipeline<B>) -> anyhow::Result<()> {
  pipeline.report_performance()?;
  info!("任务完成，退出");
  Ok(())
}

pub struct OneShotTask;

impl<
  B: Backend,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbImage>,
  O: Render<RgbImage, FrameAnalysis, Error = RE>,
> Task<I, FacePipeline<B>, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: FacePipeline<B>, output: O) -> anyhow::Result<()> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let analysis = pipeline.process(&frame)?;
    info!(
      "推理完成，检测到 {} 张人脸，耗时: {:.2} ms",
      analysis.faces.len(),
      pipeline.timer().stat(TIMER_TOTAL)?.last_call_duration()
    );
    output.render_result(&frame, &analysis)?;

    finish_report(&pipeline)
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  B: Backend,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbImage>,
  O: Render<RgbImage, FrameAnalysis, Error = RE>,
> Task<I, FacePipeline<B>, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut pipeline: FacePipeline<B>, output: O) -> anyhow::Result<()> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .expect("Error setting Ctrl-C handler");

    let mut frame_index = 0usize;
    for frame in input {
      frame_index = frame_index.saturating_add(1);
      info!("处理第 {} 帧图像", frame_index);
      let analysis = pipeline.process(&frame)?;
      output.render_result(&frame, &analysis)?;

      let total = pipeline.timer().stat(TIMER_TOTAL)?;
      info!(
        "检测到 {} 张人脸，耗时: {:.2} ms (平滑 {:.2} ms)",
        analysis.faces.len(),
        total.last_call_duration(),
        total.smoothed_duration()
      );
      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    finish_report(&pipeline)
  }
}
