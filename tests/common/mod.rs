// 该文件是 Mianxiang （面相） 项目的一部分。
// tests/common/mod.rs - 测试用回放模型
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

#![allow(dead_code)]

use std::collections::BTreeMap;

use mianxiang::backend::{
  ManifestInput, ManifestLayer, ManifestOutput, RecordedFrame, ReplayManifest,
};

pub const FACE_MODEL: &str = "/virtual/face.json";
pub const LANDMARKS_MODEL: &str = "/virtual/landmarks.json";
pub const FACE_OUTPUT: &str = "detection_out";
pub const PROPOSALS: usize = 5;

pub fn layer(name: &str, kind: &str, params: &[(&str, &str)]) -> ManifestLayer {
  ManifestLayer {
    name: name.to_string(),
    kind: kind.to_string(),
    params: params
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect(),
  }
}

pub fn input(name: &str, dims: &[usize]) -> ManifestInput {
  ManifestInput {
    name: name.to_string(),
    dims: dims.to_vec(),
  }
}

pub fn output(name: &str, dims: &[usize], layer: ManifestLayer) -> ManifestOutput {
  ManifestOutput {
    name: name.to_string(),
    dims: dims.to_vec(),
    layer,
  }
}

pub fn frame(name: &str, values: Vec<f32>) -> RecordedFrame {
  let mut frame = BTreeMap::new();
  frame.insert(name.to_string(), values);
  frame
}

/// 五个候选框: 0.9 / 0.4 / 0.6 / 终止标记 / 0.99
pub fn face_proposals() -> Vec<f32> {
  vec![
    0.0, 1.0, 0.9, 0.1, 0.1, 0.3, 0.3, //
    0.0, 1.0, 0.4, 0.2, 0.2, 0.4, 0.4, //
    0.0, 1.0, 0.6, 0.5, 0.5, 0.7, 0.7, //
    -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.99, 0.0, 0.0, 1.0, 1.0,
  ]
}

pub fn face_manifest() -> ReplayManifest {
  ReplayManifest {
    inputs: vec![input("data", &[1, 3, 8, 8])],
    outputs: vec![output(
      FACE_OUTPUT,
      &[1, 1, PROPOSALS, 7],
      layer(FACE_OUTPUT, "DetectionOutput", &[("num_classes", "2")]),
    )],
    frames: vec![frame(FACE_OUTPUT, face_proposals())],
  }
}

/// 第 `i` 张人脸的特征点全部取值为 `i + 1` 的十分之一
pub fn landmarks_values(faces: usize) -> Vec<f32> {
  (0..faces)
    .flat_map(|i| std::iter::repeat((i + 1) as f32 / 10.0).take(70))
    .collect()
}

pub fn landmarks_manifest(max_batch: usize) -> ReplayManifest {
  ReplayManifest {
    inputs: vec![input("data", &[1, 3, 4, 4])],
    outputs: vec![output(
      "align_fc3",
      &[1, 70],
      layer("align_fc3", "FullyConnected", &[("out-size", "70")]),
    )],
    frames: vec![frame("align_fc3", landmarks_values(max_batch))],
  }
}
