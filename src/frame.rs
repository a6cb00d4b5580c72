// 该文件是 Mianxiang （面相） 项目的一部分。
// src/frame.rs - 帧绑定与人脸裁剪
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

use std::borrow::Cow;

use image::{RgbImage, imageops::FilterType};
use serde::Serialize;
use thiserror::Error;

use crate::backend::TensorViewMut;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
#[error("输入张量维度 {dims:?} 无法容纳第 {slot} 个批次槽位的 RGB 图像")]
pub struct BindError {
  pub dims: Vec<usize>,
  pub slot: usize,
}

/// 帧像素坐标下的矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Rect {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl Rect {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn center(&self) -> (i32, i32) {
    (self.x + self.width / 2, self.y + self.height / 2)
  }

  /// 与另一个矩形的交集，无交集时返回 `None`
  pub fn intersect(&self, other: &Rect) -> Option<Rect> {
    let x0 = self.x.max(other.x);
    let y0 = self.y.max(other.y);
    let x1 = self
      .x
      .saturating_add(self.width)
      .min(other.x.saturating_add(other.width));
    let y1 = self
      .y
      .saturating_add(self.height)
      .min(other.y.saturating_add(other.height));
    if x1 <= x0 || y1 <= y0 {
      return None;
    }
    Some(Rect::new(
      x0,
      y0,
      x1.saturating_sub(x0),
      y1.saturating_sub(y0),
    ))
  }
}

/// 将图像缩放到输入张量的空间尺寸，以平面 NCHW 布局写入第 `slot` 个批次槽位
pub fn write_nchw(
  image: &RgbImage,
  tensor: &mut TensorViewMut<'_>,
  slot: usize,
) -> Result<(), BindError> {
  let dims = tensor.dims().to_vec();
  let bind_error = || BindError {
    dims: dims.clone(),
    slot,
  };

  let &[batch, channels, height, width] = dims.as_slice() else {
    return Err(bind_error());
  };
  if slot >= batch || channels != RGB_CHANNELS || height == 0 || width == 0 {
    return Err(bind_error());
  }

  let plane = height * width;
  let offset = slot * channels * plane;
  let data = tensor.as_mut_slice();
  if data.len() < offset + channels * plane {
    return Err(bind_error());
  }

  let resized = if image.dimensions() == (width as u32, height as u32) {
    Cow::Borrowed(image)
  } else {
    Cow::Owned(image::imageops::resize(
      image,
      width as u32,
      height as u32,
      FilterType::Triangle,
    ))
  };

  for (x, y, pixel) in resized.enumerate_pixels() {
    let index = (y as usize) * width + (x as usize);
    for c in 0..channels {
      data[offset + c * plane + index] = pixel[c];
    }
  }

  Ok(())
}

/// 按检测框裁剪人脸，检测框先与帧边界求交
pub fn crop_face(frame: &RgbImage, location: &Rect) -> Option<RgbImage> {
  let bounds = Rect::new(0, 0, frame.width() as i32, frame.height() as i32);
  let area = location.intersect(&bounds)?;
  Some(
    image::imageops::crop_imm(
      frame,
      area.x as u32,
      area.y as u32,
      area.width as u32,
      area.height as u32,
    )
    .to_image(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn write_nchw_fills_requested_slot_only() {
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(1, 0, Rgb([10, 20, 30]));
    image.put_pixel(0, 1, Rgb([40, 50, 60]));

    let dims = [2, 3, 2, 2];
    let mut data = vec![0u8; 24];
    let mut tensor = TensorViewMut::new(&dims, &mut data);
    write_nchw(&image, &mut tensor, 1).unwrap();

    assert!(data[..12].iter().all(|&v| v == 0));
    // 平面布局: R 平面, G 平面, B 平面
    assert_eq!(&data[12..16], &[0, 10, 40, 0]);
    assert_eq!(&data[16..20], &[0, 20, 50, 0]);
    assert_eq!(&data[20..24], &[0, 30, 60, 0]);
  }

  #[test]
  fn write_nchw_resizes_to_tensor_shape() {
    let image = RgbImage::from_pixel(8, 6, Rgb([7, 7, 7]));
    let dims = [1, 3, 3, 4];
    let mut data = vec![0u8; 36];
    let mut tensor = TensorViewMut::new(&dims, &mut data);
    write_nchw(&image, &mut tensor, 0).unwrap();
    assert!(data.iter().all(|&v| v == 7));
  }

  #[test]
  fn write_nchw_rejects_out_of_range_slot() {
    let image = RgbImage::new(2, 2);
    let dims = [1, 3, 2, 2];
    let mut data = vec![0u8; 12];
    let mut tensor = TensorViewMut::new(&dims, &mut data);
    let err = write_nchw(&image, &mut tensor, 1).unwrap_err();
    assert_eq!(err.slot, 1);

    let dims = [1, 70];
    let mut data = vec![0u8; 70];
    let mut tensor = TensorViewMut::new(&dims, &mut data);
    assert!(write_nchw(&image, &mut tensor, 0).is_err());
  }

  #[test]
  fn crop_face_clamps_to_frame() {
    let frame = RgbImage::new(100, 80);
    let crop = crop_face(&frame, &Rect::new(-10, 60, 40, 40)).unwrap();
    assert_eq!(crop.dimensions(), (30, 20));

    assert!(crop_face(&frame, &Rect::new(120, 10, 20, 20)).is_none());
    assert!(crop_face(&frame, &Rect::new(10, 10, 0, 20)).is_none());
  }

  #[test]
  fn crop_face_handles_extreme_rects() {
    let frame = RgbImage::new(10, 10);
    assert!(crop_face(&frame, &Rect::new(i32::MAX - 5, 0, 100, 100)).is_none());

    assert!(crop_face(&frame, &Rect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX)).is_none());

    let crop = crop_face(&frame, &Rect::new(-5, -5, i32::MAX, i32::MAX)).unwrap();
    assert_eq!(crop.dimensions(), (10, 10));
  }

  #[test]
  fn rect_center_uses_integer_halves() {
    assert_eq!(Rect::new(10, 20, 41, 30).center(), (30, 35));
  }
}
