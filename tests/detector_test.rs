// 该文件是 Mianxiang （面相） 项目的一部分。
// tests/detector_test.rs - 检测器生命周期测试
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

#![cfg(feature = "replay_backend")]

mod common;

use std::time::Duration;

use image::{Rgb, RgbImage};
use mianxiang::{
  backend::{BackendError, ReplayBackend},
  detector::{
    Detection, DetectorConfig, DetectorError, FACE_TOPO_NAME, FaceDetection, FaceDetectionConfig,
    FacialLandmarksDetection, LANDMARKS_TOPO_NAME, Load, ValidationReason, square_enlarge,
  },
};

use common::*;

fn frame() -> RgbImage {
  RgbImage::from_pixel(100, 100, Rgb([120, 80, 40]))
}

fn loaded_face(config: FaceDetectionConfig) -> (ReplayBackend, FaceDetection<ReplayBackend>) {
  let backend = ReplayBackend::new();
  backend.register(FACE_MODEL, face_manifest());
  let mut face = FaceDetection::new(config);
  Load::new(&mut face).bind(&backend, false).unwrap();
  (backend, face)
}

fn loaded_landmarks(
  config: DetectorConfig,
  dynamic: bool,
) -> (ReplayBackend, FacialLandmarksDetection<ReplayBackend>) {
  let backend = ReplayBackend::new();
  backend.register(LANDMARKS_MODEL, landmarks_manifest(config.max_batch()));
  let mut landmarks = FacialLandmarksDetection::new(config);
  Load::new(&mut landmarks).bind(&backend, dynamic).unwrap();
  (backend, landmarks)
}

fn validation_reason(err: DetectorError) -> ValidationReason {
  match err {
    DetectorError::Validation(e) => e.reason,
    other => panic!("expected validation error, got {other}"),
  }
}

#[test]
fn test_threshold_and_terminator() {
  let (_backend, mut face) = loaded_face(FaceDetectionConfig::new(FACE_MODEL));
  assert_eq!(face.max_proposal_count(), PROPOSALS);

  face.enqueue(&frame()).unwrap();
  assert_eq!(face.enqueued_frames(), 1);
  face.submit_request().unwrap();
  assert_eq!(face.enqueued_frames(), 0);
  face.wait().unwrap();
  face.fetch_results().unwrap();

  // 0.4 低于阈值，终止标记之后的 0.99 不会被读取
  let results = face.results();
  assert_eq!(results.len(), 2);
  assert_eq!(results[0].confidence, 0.9);
  assert_eq!(results[1].confidence, 0.6);
  assert_eq!(results[0].label, 1);
  assert_eq!(
    results[0].location,
    square_enlarge([0.1, 0.1, 0.3, 0.3], 100, 100, 1.2)
  );
  assert_eq!(
    results[1].location,
    square_enlarge([0.5, 0.5, 0.7, 0.7], 100, 100, 1.2)
  );
  assert_eq!(results[0].location.width, results[0].location.height);
}

#[test]
fn test_fetch_is_idempotent_within_cycle() {
  let (_backend, mut face) = loaded_face(FaceDetectionConfig::new(FACE_MODEL));
  face.enqueue(&frame()).unwrap();
  face.submit_request().unwrap();
  face.wait().unwrap();

  face.fetch_results().unwrap();
  let first = face.results().to_vec();
  face.fetch_results().unwrap();
  assert_eq!(face.results(), first.as_slice());

  // 下一轮重新解析
  face.enqueue(&frame()).unwrap();
  face.submit_request().unwrap();
  assert!(face.results().is_empty());
  face.wait().unwrap();
  face.fetch_results().unwrap();
  assert_eq!(face.results().len(), 2);
}

#[test]
fn test_fetch_before_first_submit_yields_nothing() {
  let (_backend, mut face) = loaded_face(FaceDetectionConfig::new(FACE_MODEL));
  face.fetch_results().unwrap();
  assert!(face.results().is_empty());

  // 没有入队时提交不会产生请求
  face.submit_request().unwrap();
  assert!(face.base().request().is_none());
}

#[test]
fn test_threshold_is_exclusive() {
  let config = FaceDetectionConfig::new(FACE_MODEL).with_detection_threshold(0.6);
  let (_backend, mut face) = loaded_face(config);
  face.enqueue(&frame()).unwrap();
  face.submit_request().unwrap();
  face.wait().unwrap();
  face.fetch_results().unwrap();
  assert_eq!(face.results().len(), 1);
  assert_eq!(face.results()[0].confidence, 0.9);
}

#[test]
fn test_async_request_with_timeout() {
  let config = FaceDetectionConfig::from_base(
    DetectorConfig::new(FACE_TOPO_NAME, FACE_MODEL)
      .with_async(true)
      .with_wait_timeout(Some(Duration::from_secs(5))),
  );
  let (_backend, mut face) = loaded_face(config);

  for _ in 0..3 {
    face.enqueue(&frame()).unwrap();
    face.submit_request().unwrap();
    face.wait().unwrap();
    face.fetch_results().unwrap();
    assert_eq!(face.results().len(), 2);
  }

  let request = face.base().request().unwrap();
  assert_eq!(request.submissions(), 3);
  let profile = face.base().performance_counts().unwrap();
  assert_eq!(profile.len(), 1);
  assert_eq!(profile[0].layer_name, FACE_OUTPUT);
}

#[test]
fn test_frame_is_resized_into_input_tensor() {
  let (_backend, mut face) = loaded_face(FaceDetectionConfig::new(FACE_MODEL));
  face.enqueue(&frame()).unwrap();
  assert_eq!(face.frame_size(), (100, 100));

  let input = face.base().request().unwrap().input("data").unwrap();
  assert_eq!(input.len(), 3 * 8 * 8);
  assert!(input[..64].iter().all(|&v| v == 120));
  assert!(input[64..128].iter().all(|&v| v == 80));
  assert!(input[128..].iter().all(|&v| v == 40));
}

#[test]
fn test_disabled_stage_is_a_no_op() {
  let backend = ReplayBackend::new();
  let mut face: FaceDetection<ReplayBackend> =
    FaceDetection::new(FaceDetectionConfig::from_base(DetectorConfig::disabled(
      FACE_TOPO_NAME,
    )));
  Load::new(&mut face).bind(&backend, false).unwrap();
  assert!(!face.enabled());
  assert!(!face.base().is_loaded());

  face.enqueue(&frame()).unwrap();
  face.submit_request().unwrap();
  face.wait().unwrap();
  face.fetch_results().unwrap();
  face.print_performance_counts().unwrap();
  assert!(face.results().is_empty());
  assert!(face.base().request().is_none());
  assert!(face.base().performance_counts().unwrap().is_empty());

  let mut landmarks: FacialLandmarksDetection<ReplayBackend> =
    FacialLandmarksDetection::new(DetectorConfig::disabled(LANDMARKS_TOPO_NAME));
  Load::new(&mut landmarks).bind(&backend, true).unwrap();
  landmarks.enqueue(&frame()).unwrap();
  assert_eq!(landmarks.enqueued_faces(), 0);
  landmarks.submit_request().unwrap();
  landmarks.wait().unwrap();
  assert!(landmarks.base().request().is_none());
}

#[test]
fn test_enqueue_on_unloaded_detector_fails() {
  let mut face: FaceDetection<ReplayBackend> =
    FaceDetection::new(FaceDetectionConfig::new(FACE_MODEL));
  let err = face.enqueue(&frame()).unwrap_err();
  assert!(matches!(err, DetectorError::NotLoaded(_)));
}

#[test]
fn test_labels_file_gets_background_label() {
  let dir = std::env::temp_dir().join(format!("mianxiang-labels-it-{}", std::process::id()));
  std::fs::create_dir_all(&dir).unwrap();
  let model = dir.join("face.json");
  std::fs::write(dir.join("face.labels"), "face\n").unwrap();

  let backend = ReplayBackend::new();
  backend.register(&model, face_manifest());
  let mut face = FaceDetection::new(FaceDetectionConfig::new(&model));
  Load::new(&mut face).bind(&backend, false).unwrap();

  assert_eq!(face.labels(), ["fake", "face"]);
  assert_eq!(face.label_name(1), Some("face"));
  assert_eq!(face.label_name(2), None);
  assert_eq!(face.label_name(-1), None);

  std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_landmarks_capacity_is_capped() {
  let config = DetectorConfig::new(LANDMARKS_TOPO_NAME, LANDMARKS_MODEL).with_max_batch(2);
  let (_backend, mut landmarks) = loaded_landmarks(config, false);

  landmarks
    .enqueue(&RgbImage::from_pixel(16, 16, Rgb([1, 1, 1])))
    .unwrap();
  landmarks
    .enqueue(&RgbImage::from_pixel(16, 16, Rgb([2, 2, 2])))
    .unwrap();
  let before = landmarks.base().request().unwrap().input("data").unwrap().to_vec();
  assert!(before[..48].iter().all(|&v| v == 1));
  assert!(before[48..].iter().all(|&v| v == 2));

  // 批次已满，第三张人脸被丢弃，已有槽位不变
  landmarks
    .enqueue(&RgbImage::from_pixel(16, 16, Rgb([3, 3, 3])))
    .unwrap();
  assert_eq!(landmarks.enqueued_faces(), 2);
  let after = landmarks.base().request().unwrap().input("data").unwrap();
  assert_eq!(after, before.as_slice());

  landmarks.submit_request().unwrap();
  assert_eq!(landmarks.enqueued_faces(), 0);
  assert_eq!(landmarks.submitted_faces(), 2);
  landmarks.wait().unwrap();

  let first = landmarks.landmarks_for(0).unwrap();
  let second = landmarks.landmarks_for(1).unwrap();
  assert_eq!(first.len(), 70);
  assert!(first.iter().all(|&v| v == 0.1));
  assert!(second.iter().all(|&v| v == 0.2));

  let err = landmarks.landmarks_for(2).unwrap_err();
  assert!(matches!(
    err,
    DetectorError::LandmarksIndexOutOfRange { index: 2, count: 2 }
  ));
}

#[test]
fn test_landmarks_index_requires_submission() {
  let config = DetectorConfig::new(LANDMARKS_TOPO_NAME, LANDMARKS_MODEL).with_max_batch(4);
  let (_backend, mut landmarks) = loaded_landmarks(config, false);
  landmarks.enqueue(&RgbImage::new(8, 8)).unwrap();
  assert!(landmarks.landmarks_for(0).is_err());

  // 空批次提交不调用后端
  let (_backend, mut idle) = loaded_landmarks(
    DetectorConfig::new(LANDMARKS_TOPO_NAME, LANDMARKS_MODEL),
    false,
  );
  idle.submit_request().unwrap();
  assert!(idle.base().request().is_none());
}

#[test]
fn test_dynamic_batch_follows_enqueued_faces() {
  let config = DetectorConfig::new(LANDMARKS_TOPO_NAME, LANDMARKS_MODEL)
    .with_max_batch(4)
    .with_dynamic_batch(true);
  let (_backend, mut landmarks) = loaded_landmarks(config, true);

  landmarks.enqueue(&RgbImage::new(8, 8)).unwrap();
  landmarks.enqueue(&RgbImage::new(8, 8)).unwrap();
  landmarks.submit_request().unwrap();
  landmarks.wait().unwrap();
  assert_eq!(landmarks.base().request().unwrap().batch(), 2);

  landmarks.enqueue(&RgbImage::new(8, 8)).unwrap();
  landmarks.submit_request().unwrap();
  assert_eq!(landmarks.base().request().unwrap().batch(), 1);
}

#[test]
fn test_empty_cycle_clears_previous_landmarks() {
  let config = DetectorConfig::new(LANDMARKS_TOPO_NAME, LANDMARKS_MODEL).with_max_batch(2);
  let (_backend, mut landmarks) = loaded_landmarks(config, false);

  landmarks.enqueue(&RgbImage::new(8, 8)).unwrap();
  landmarks.submit_request().unwrap();
  landmarks.wait().unwrap();
  assert!(landmarks.landmarks_for(0).is_ok());

  // 本帧没有人脸
  landmarks.submit_request().unwrap();
  landmarks.wait().unwrap();
  assert_eq!(landmarks.submitted_faces(), 0);
  let err = landmarks.landmarks_for(0).unwrap_err();
  assert!(matches!(
    err,
    DetectorError::LandmarksIndexOutOfRange { index: 0, count: 0 }
  ));
}

#[test]
fn test_failed_submit_discards_batch() {
  let config = DetectorConfig::new(LANDMARKS_TOPO_NAME, LANDMARKS_MODEL)
    .with_max_batch(2)
    .with_async(true);
  let (_backend, mut landmarks) = loaded_landmarks(config, false);

  landmarks.enqueue(&RgbImage::new(8, 8)).unwrap();
  landmarks.submit_request().unwrap();

  // 上一次异步推理尚未等待，再次提交被后端拒绝
  landmarks.enqueue(&RgbImage::new(8, 8)).unwrap();
  let err = landmarks.submit_request().unwrap_err();
  assert!(matches!(
    err,
    DetectorError::Backend(BackendError::RequestBusy)
  ));
  assert_eq!(landmarks.enqueued_faces(), 0);
  assert_eq!(landmarks.submitted_faces(), 0);
  assert!(landmarks.landmarks_for(0).is_err());

  landmarks.wait().unwrap();
  landmarks.enqueue(&RgbImage::new(8, 8)).unwrap();
  assert_eq!(landmarks.enqueued_faces(), 1);
  landmarks.submit_request().unwrap();
  landmarks.wait().unwrap();
  assert_eq!(landmarks.submitted_faces(), 1);
  assert!(landmarks.landmarks_for(0).is_ok());
}

#[test]
fn test_dynamic_batch_needs_backend_support() {
  let config = DetectorConfig::new(LANDMARKS_TOPO_NAME, LANDMARKS_MODEL)
    .with_max_batch(2)
    .with_dynamic_batch(true);
  let (_backend, mut landmarks) = loaded_landmarks(config, false);
  landmarks.enqueue(&RgbImage::new(8, 8)).unwrap();
  let err = landmarks.submit_request().unwrap_err();
  assert!(matches!(
    err,
    DetectorError::Backend(BackendError::DynamicBatchDisabled)
  ));
}

#[test]
fn test_face_validation_errors() {
  let load = |manifest| {
    let backend = ReplayBackend::new();
    backend.register(FACE_MODEL, manifest);
    let mut face = FaceDetection::new(FaceDetectionConfig::new(FACE_MODEL));
    Load::new(&mut face).bind(&backend, false).unwrap_err()
  };

  let mut manifest = face_manifest();
  manifest.outputs[0].layer.kind = "SoftMax".to_string();
  assert_eq!(validation_reason(load(manifest)), ValidationReason::WrongLayerType);

  let mut manifest = face_manifest();
  manifest.outputs[0].layer.params.clear();
  assert_eq!(validation_reason(load(manifest)), ValidationReason::MissingAttribute);

  let mut manifest = face_manifest();
  manifest.outputs[0].dims = vec![1, PROPOSALS, 7];
  assert_eq!(validation_reason(load(manifest)), ValidationReason::WrongOutputRank);

  let mut manifest = face_manifest();
  manifest.outputs[0].dims = vec![1, 1, PROPOSALS, 6];
  assert_eq!(validation_reason(load(manifest)), ValidationReason::WrongWidth);

  let mut manifest = face_manifest();
  manifest.inputs.push(input("extra", &[1, 3, 8, 8]));
  assert_eq!(validation_reason(load(manifest)), ValidationReason::WrongInputCount);

  let mut manifest = face_manifest();
  let extra = manifest.outputs[0].clone();
  manifest.outputs.push(extra);
  assert_eq!(validation_reason(load(manifest)), ValidationReason::WrongOutputCount);
}

#[test]
fn test_landmarks_validation_errors() {
  let load = |manifest| {
    let backend = ReplayBackend::new();
    backend.register(LANDMARKS_MODEL, manifest);
    let mut landmarks =
      FacialLandmarksDetection::new(DetectorConfig::new(LANDMARKS_TOPO_NAME, LANDMARKS_MODEL));
    Load::new(&mut landmarks).bind(&backend, false).unwrap_err()
  };

  let mut manifest = landmarks_manifest(1);
  manifest.outputs[0].layer.params.insert("out-size".to_string(), "68".to_string());
  let err = load(manifest);
  assert!(err.to_string().contains("68"));
  assert_eq!(validation_reason(err), ValidationReason::WrongWidth);

  let mut manifest = landmarks_manifest(1);
  manifest.outputs[0].layer.name = "fc_out".to_string();
  assert_eq!(validation_reason(load(manifest)), ValidationReason::UnknownLayer);

  let mut manifest = landmarks_manifest(1);
  manifest.outputs[0].layer.kind = "Convolution".to_string();
  assert_eq!(validation_reason(load(manifest)), ValidationReason::WrongLayerType);

  let mut manifest = landmarks_manifest(1);
  manifest.outputs[0].layer.params.clear();
  assert_eq!(validation_reason(load(manifest)), ValidationReason::MissingAttribute);
}

#[test]
fn test_missing_model_is_a_backend_error() {
  let backend = ReplayBackend::new();
  let mut face: FaceDetection<ReplayBackend> =
    FaceDetection::new(FaceDetectionConfig::new("/nonexistent/mianxiang/face.json"));
  let err = Load::new(&mut face).bind(&backend, false).unwrap_err();
  assert!(matches!(err, DetectorError::Backend(BackendError::Io(_))));
}
