// 该文件是 Mianxiang （面相） 项目的一部分。
// src/output/json_lines.rs - 以 JSON Lines 形式记录分析结果
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
  fs::File,
  io::{BufWriter, Write},
  path::Path,
  sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{SecondsFormat, Utc};
use image::RgbImage;
use serde::Serialize;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{OutputError, Render},
  pipeline::FrameAnalysis,
};

const STDOUT_PATH: &str = "-";

#[derive(Serialize)]
struct Record<'a> {
  frame: u64,
  timestamp: String,
  #[serde(flatten)]
  analysis: &'a FrameAnalysis,
}

struct Sink {
  writer: Box<dyn Write + Send>,
  frame_counter: u64,
}

/// 每帧写出一行 JSON
pub struct JsonLinesOutput {
  sink: Mutex<Sink>,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 应为 '{}', 实际为 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(OutputError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    let path = urlencoding::decode(url.path())?;
    if path.is_empty() || path == STDOUT_PATH {
      info!("分析结果输出到标准输出");
      return Ok(Self::new(Box::new(std::io::stdout())));
    }

    let path = Path::new(path.as_ref());
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }
    info!("分析结果输出到 {}", path.display());
    let file = File::create(path)?;
    Ok(Self::new(Box::new(BufWriter::new(file))))
  }
}

impl JsonLinesOutput {
  pub fn new(writer: Box<dyn Write + Send>) -> Self {
    Self {
      sink: Mutex::new(Sink {
        writer,
        frame_counter: 0,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Sink> {
    self.sink.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Render<RgbImage, FrameAnalysis> for JsonLinesOutput {
  type Error = OutputError;

  fn render_result(&self, _frame: &RgbImage, result: &FrameAnalysis) -> Result<(), Self::Error> {
    let mut sink = self.lock();
    sink.frame_counter += 1;
    let record = Record {
      frame: sink.frame_counter,
      timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
      analysis: result,
    };

    serde_json::to_writer(&mut sink.writer, &record)?;
    sink.writer.write_all(b"\n")?;
    sink.writer.flush()?;
    debug!("已记录第 {} 帧, {} 张人脸", record.frame, result.faces.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{detector::DetectionResult, frame::Rect, pipeline::FaceAnalysis};
  use std::sync::Arc;

  #[derive(Clone, Default)]
  struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

  impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn writes_one_numbered_line_per_frame() {
    let buffer = SharedBuffer::default();
    let output = JsonLinesOutput::new(Box::new(buffer.clone()));
    let frame = RgbImage::new(64, 48);
    let analysis = FrameAnalysis {
      frame_width: 64,
      frame_height: 48,
      faces: vec![FaceAnalysis {
        detection: DetectionResult {
          label: 1,
          confidence: 0.75,
          location: Rect::new(1, 2, 30, 30),
        },
        label_name: Some("face".to_string()),
        landmarks: None,
      }],
    };

    output.render_result(&frame, &analysis).unwrap();
    output.render_result(&frame, &analysis).unwrap();

    let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<serde_json::Value> = text
      .lines()
      .map(|line| serde_json::from_str(line).unwrap())
      .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["frame"], 1);
    assert_eq!(lines[1]["frame"], 2);
    assert_eq!(lines[0]["frame_width"], 64);
    assert_eq!(lines[0]["faces"][0]["label_name"], "face");
    assert_eq!(lines[0]["faces"][0]["detection"]["location"]["width"], 30);
    assert!(lines[0]["timestamp"].as_str().unwrap().ends_with('Z'));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      JsonLinesOutput::from_url(&url),
      Err(OutputError::SchemeMismatch { .. })
    ));
  }
}
