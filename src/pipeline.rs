// 该文件是 Mianxiang （面相） 项目的一部分。
// src/pipeline.rs - 人脸检测与特征点检测的单帧处理流程
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
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  backend::Backend,
  detector::{
    DetectionResult, DetectorConfig, DetectorError, FaceDetection, FaceDetectionConfig,
    FacialLandmarksDetection, Load,
  },
  frame::crop_face,
  timer::{Timer, TimerError},
};

pub const TIMER_FACE_DETECTION: &str = "face_detection";
pub const TIMER_LANDMARKS: &str = "landmarks";
pub const TIMER_TOTAL: &str = "total";

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("检测器错误: {0}")]
  Detector(#[from] DetectorError),
  #[error("计时器错误: {0}")]
  Timer(#[from] TimerError),
}

/// 单张人脸的分析结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceAnalysis {
  pub detection: DetectionResult,
  pub label_name: Option<String>,
  /// 相对于人脸框的归一化 (x, y) 交错坐标；特征点阶段关闭或人脸被丢弃时为空
  pub landmarks: Option<Vec<f32>>,
}

impl FaceAnalysis {
  /// 特征点在帧像素坐标下的位置
  pub fn landmark_points(&self) -> Vec<(f32, f32)> {
    let Some(landmarks) = &self.landmarks else {
      return Vec::new();
    };
    let rect = &self.detection.location;
    landmarks
      .chunks_exact(2)
      .map(|point| {
        (
          point[0] * rect.width as f32 + rect.x as f32,
          point[1] * rect.height as f32 + rect.y as f32,
        )
      })
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameAnalysis {
  pub frame_width: u32,
  pub frame_height: u32,
  pub faces: Vec<FaceAnalysis>,
}

pub struct FacePipeline<B: Backend> {
  face: FaceDetection<B>,
  landmarks: FacialLandmarksDetection<B>,
  timer: Timer,
}

impl<B: Backend> FacePipeline<B> {
  pub fn new(face: FaceDetection<B>, landmarks: FacialLandmarksDetection<B>) -> Self {
    Self {
      face,
      landmarks,
      timer: Timer::new(),
    }
  }

  /// 根据两个阶段的配置创建并加载检测器
  pub fn load(
    face_config: FaceDetectionConfig,
    landmarks_config: DetectorConfig,
    backend: &B,
  ) -> Result<Self, DetectorError> {
    let dynamic_batch = landmarks_config.dynamic_batch();
    let mut face = FaceDetection::new(face_config);
    let mut landmarks = FacialLandmarksDetection::new(landmarks_config);

    Load::new(&mut face).bind(backend, false)?;
    Load::new(&mut landmarks).bind(backend, dynamic_batch)?;

    Ok(Self::new(face, landmarks))
  }

  pub fn face(&self) -> &FaceDetection<B> {
    &self.face
  }

  pub fn landmarks(&self) -> &FacialLandmarksDetection<B> {
    &self.landmarks
  }

  pub fn timer(&self) -> &Timer {
    &self.timer
  }

  pub fn process(&mut self, frame: &RgbImage) -> Result<FrameAnalysis, PipelineError> {
    self.timer.start(TIMER_TOTAL);

    self.timer.start(TIMER_FACE_DETECTION);
    self.face.enqueue(frame)?;
    self.face.submit_request()?;
    self.face.wait()?;
    self.face.fetch_results()?;
    self.timer.finish(TIMER_FACE_DETECTION)?;

    let detections = self.face.results().to_vec();

    self.timer.start(TIMER_LANDMARKS);
    let mut slots = Vec::with_capacity(detections.len());
    for detection in &detections {
      let slot = if self.landmarks.enabled() {
        self.enqueue_face(frame, detection)?
      } else {
        None
      };
      slots.push(slot);
    }
    self.landmarks.submit_request()?;
    self.landmarks.wait()?;

    let mut faces = Vec::with_capacity(detections.len());
    for (detection, slot) in detections.into_iter().zip(slots) {
      let landmarks = match slot {
        Some(slot) => Some(self.landmarks.landmarks_for(slot)?),
        None => None,
      };
      faces.push(FaceAnalysis {
        detection,
        label_name: self.face.label_name(detection.label).map(str::to_string),
        landmarks,
      });
    }
    self.timer.finish(TIMER_LANDMARKS)?;

    self.timer.finish(TIMER_TOTAL)?;
    debug!(
      "本帧处理完成，共 {} 张人脸，耗时 {:.2} ms",
      faces.len(),
      self.timer.stat(TIMER_TOTAL)?.last_call_duration()
    );

    Ok(FrameAnalysis {
      frame_width: frame.width(),
      frame_height: frame.height(),
      faces,
    })
  }

  // 返回人脸在特征点批次中的槽位，被裁剪掉或因批次已满被丢弃时为 None
  fn enqueue_face(
    &mut self,
    frame: &RgbImage,
    detection: &DetectionResult,
  ) -> Result<Option<usize>, DetectorError> {
    let Some(crop) = crop_face(frame, &detection.location) else {
      debug!("人脸框 {:?} 位于帧外，跳过特征点检测", detection.location);
      return Ok(None);
    };

    let slot = self.landmarks.enqueued_faces();
    self.landmarks.enqueue(&crop)?;
    if self.landmarks.enqueued_faces() > slot {
      Ok(Some(slot))
    } else {
      Ok(None)
    }
  }

  pub fn report_performance(&self) -> Result<(), DetectorError> {
    info!("性能统计");
    self.face.print_performance_counts()?;
    self.landmarks.print_performance_counts()?;
    self.timer.log_summary();
    Ok(())
  }
}
