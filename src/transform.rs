// 该文件是 Deepometry 项目的一部分。
// src/transform.rs - 单通道图像的尺寸归一化与强度重映射
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

//! # 图像变换
//!
//! - [`resize`]：居中裁剪/填充到 `size × size`，填充区域使用从右下角采样得到的
//!   高斯背景噪声；
//! - [`rescale`]：按 0.5% / 99.5% 分位数截断后线性映射到 8 位。

use ndarray::{Array2, ArrayView2, ArrayViewMut2, s};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

/// 背景采样角块的边长
pub const BACKGROUND_PATCH: usize = 10;

const RESCALE_LOWER_PERCENTILE: f64 = 0.5;
const RESCALE_UPPER_PERCENTILE: f64 = 99.5;
const U8_MAX: f64 = u8::MAX as f64;

/// 单个轴上的调整量：先裁剪，再填充
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisAdjust {
  pub crop_start: usize,
  pub crop_end: usize,
  pub pad_start: usize,
  pub pad_end: usize,
}

impl AxisAdjust {
  /// 根据当前长度和目标长度计算调整量，差值按 floor/ceil 拆分到两端
  pub fn new(current: usize, target: usize) -> Self {
    let delta = target as i64 - current as i64;
    let start = delta.div_euclid(2);
    let end = delta - start;

    Self {
      crop_start: (-start.min(0)) as usize,
      crop_end: (-end.min(0)) as usize,
      pad_start: start.max(0) as usize,
      pad_end: end.max(0) as usize,
    }
  }

  fn needs_pad(&self) -> bool {
    self.pad_start > 0 || self.pad_end > 0
  }
}

/// 由角块估计的背景强度分布
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Background {
  pub mean: f64,
  pub std: f64,
}

impl Background {
  /// 使用右下角 [`BACKGROUND_PATCH`] × [`BACKGROUND_PATCH`] 区域估计均值与（总体）标准差。
  ///
  /// 图像小于角块时使用整幅图像；空图像得到 `0.0 ± 0.0`。
  // TODO: 四个角同时采样并剔除离群角块，避免角落里的伪影污染背景估计。
  pub fn estimate(image: ArrayView2<f64>) -> Self {
    let (rows, cols) = image.dim();
    let patch = image.slice(s![
      rows.saturating_sub(BACKGROUND_PATCH)..,
      cols.saturating_sub(BACKGROUND_PATCH)..
    ]);

    let count = patch.len();
    if count == 0 {
      return Self { mean: 0.0, std: 0.0 };
    }

    let mean = patch.sum() / count as f64;
    let variance = patch.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / count as f64;

    let mean = if mean.is_finite() { mean } else { 0.0 };
    let std = variance.sqrt();
    let std = if std.is_finite() { std } else { 0.0 };

    Self { mean, std }
  }

  /// 用独立采样的噪声填满整个区域
  pub fn fill<R: Rng + ?Sized>(&self, mut region: ArrayViewMut2<f64>, rng: &mut R) {
    match Normal::new(self.mean, self.std) {
      Ok(normal) => region.map_inplace(|v| *v = normal.sample(&mut *rng)),
      Err(_) => region.fill(self.mean),
    }
  }
}

/// 将单通道图像裁剪/填充到 `size × size`。
///
/// 每个轴先按差值的负部分裁剪，再按正部分填充；四条填充带分别独立采样。
/// 不需要填充时不会消耗随机数发生器。
pub fn resize<R: Rng + ?Sized>(image: ArrayView2<f64>, size: usize, rng: &mut R) -> Array2<f64> {
  let (rows, cols) = image.dim();
  let row_adjust = AxisAdjust::new(rows, size);
  let col_adjust = AxisAdjust::new(cols, size);

  let cropped = image.slice(s![
    row_adjust.crop_start..rows - row_adjust.crop_end,
    col_adjust.crop_start..cols - col_adjust.crop_end
  ]);

  if !row_adjust.needs_pad() && !col_adjust.needs_pad() {
    return cropped.to_owned();
  }

  let background = Background::estimate(cropped);
  debug!(
    "填充 {}x{} -> {}x{}, 背景均值 {:.3}, 标准差 {:.3}",
    rows, cols, size, size, background.mean, background.std
  );

  let (inner_rows, inner_cols) = cropped.dim();
  let row_end = row_adjust.pad_start + inner_rows;
  let col_end = col_adjust.pad_start + inner_cols;

  let mut resized = Array2::<f64>::zeros((size, size));
  resized
    .slice_mut(s![row_adjust.pad_start..row_end, col_adjust.pad_start..col_end])
    .assign(&cropped);

  // 上、下两条带覆盖整行（含角），左、右两条带只覆盖原图所在的行
  if row_adjust.pad_start > 0 {
    background.fill(resized.slice_mut(s![..row_adjust.pad_start, ..]), rng);
  }
  if row_adjust.pad_end > 0 {
    background.fill(resized.slice_mut(s![row_end.., ..]), rng);
  }
  if col_adjust.pad_start > 0 {
    background.fill(
      resized.slice_mut(s![row_adjust.pad_start..row_end, ..col_adjust.pad_start]),
      rng,
    );
  }
  if col_adjust.pad_end > 0 {
    background.fill(
      resized.slice_mut(s![row_adjust.pad_start..row_end, col_end..]),
      rng,
    );
  }

  resized
}

/// 线性插值分位数，`q` 取值 0..=100；空输入返回 0
pub fn percentile(values: &[f64], q: f64) -> f64 {
  if values.is_empty() {
    return 0.0;
  }

  let mut sorted = values.to_vec();
  sorted.sort_by(f64::total_cmp);

  let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
  let lower = rank.floor() as usize;
  let upper = rank.ceil() as usize;
  let fraction = rank - lower as f64;

  sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// 按 0.5% / 99.5% 分位数截断并线性映射到 `[0, 255]`。
///
/// 分位数相等（常数通道）时不做除法，直接把原值截断到 `[0, 255]`。
pub fn rescale(image: ArrayView2<f64>) -> Array2<u8> {
  let values: Vec<f64> = image.iter().copied().collect();
  let vmin = percentile(&values, RESCALE_LOWER_PERCENTILE);
  let vmax = percentile(&values, RESCALE_UPPER_PERCENTILE);

  if vmax > vmin {
    let range = vmax - vmin;
    image.mapv(|v| ((v.clamp(vmin, vmax) - vmin) / range * U8_MAX) as u8)
  } else {
    debug!("通道强度范围退化: {}", vmin);
    image.mapv(|v| v.clamp(0.0, U8_MAX) as u8)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array2;
  use rand::{RngCore, SeedableRng, rngs::StdRng};

  fn ramp(rows: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f64)
  }

  #[test]
  fn axis_adjust_splits_floor_ceil() {
    let pad = AxisAdjust::new(4, 7);
    assert_eq!((pad.pad_start, pad.pad_end), (1, 2));
    assert_eq!((pad.crop_start, pad.crop_end), (0, 0));

    let crop = AxisAdjust::new(9, 4);
    assert_eq!((crop.crop_start, crop.crop_end), (3, 2));
    assert_eq!((crop.pad_start, crop.pad_end), (0, 0));
  }

  #[test]
  fn resize_always_hits_target_shape() {
    let mut rng = StdRng::seed_from_u64(7);
    for (rows, cols) in [(1, 1), (5, 13), (48, 48), (60, 31), (3, 90)] {
      let image = ramp(rows, cols);
      for size in [0, 1, 2, 10, 32, 48, 64] {
        let resized = resize(image.view(), size, &mut rng);
        assert_eq!(resized.dim(), (size, size), "{rows}x{cols} -> {size}");
      }
    }
  }

  #[test]
  fn resize_same_size_is_identity() {
    let image = ramp(12, 12);
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(resize(image.view(), 12, &mut rng), image);
  }

  #[test]
  fn resize_crop_keeps_centered_region() {
    let image = ramp(7, 9);
    let mut rng = StdRng::seed_from_u64(1);
    let resized = resize(image.view(), 4, &mut rng);
    assert_eq!(resized, image.slice(s![2..6, 3..7]).to_owned());
  }

  #[test]
  fn resize_pad_keeps_original_content() {
    let image = ramp(4, 4) + 1000.0;
    let mut rng = StdRng::seed_from_u64(3);
    let resized = resize(image.view(), 7, &mut rng);
    assert_eq!(resized.slice(s![1..5, 1..5]), image);
  }

  #[test]
  fn resize_mixed_crop_and_pad() {
    let image = ramp(10, 3);
    let mut rng = StdRng::seed_from_u64(5);
    let resized = resize(image.view(), 6, &mut rng);
    // 行裁剪 2/2，列填充 1/2
    assert_eq!(resized.slice(s![.., 1..4]), image.slice(s![2..8, ..]));
  }

  #[test]
  fn resize_is_deterministic_for_seed() {
    let image = ramp(20, 25);
    let a = resize(image.view(), 40, &mut StdRng::seed_from_u64(42));
    let b = resize(image.view(), 40, &mut StdRng::seed_from_u64(42));
    assert_eq!(a, b);
  }

  #[test]
  fn padding_matches_corner_statistics() {
    // 角块为 100/120 交替，均值 110，标准差 10
    let image = Array2::from_shape_fn((20, 20), |(r, c)| if (r + c) % 2 == 0 { 100.0 } else { 120.0 });
    let background = Background::estimate(image.view());
    assert!((background.mean - 110.0).abs() < 1e-9);
    assert!((background.std - 10.0).abs() < 1e-9);

    let mut rng = StdRng::seed_from_u64(11);
    let resized = resize(image.view(), 200, &mut rng);
    let border: Vec<f64> = resized
      .indexed_iter()
      .filter(|((r, c), _)| !((90..110).contains(r) && (90..110).contains(c)))
      .map(|(_, &v)| v)
      .collect();

    let n = border.len() as f64;
    let mean = border.iter().sum::<f64>() / n;
    let std = (border.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    assert!((mean - 110.0).abs() < 0.5, "mean {mean}");
    assert!((std - 10.0).abs() < 0.5, "std {std}");

    let distinct = border.iter().filter(|&&v| v != border[0]).count();
    assert!(distinct > 0);
  }

  #[test]
  fn crop_only_does_not_touch_rng() {
    let image = ramp(30, 30);
    let mut rng = StdRng::seed_from_u64(9);
    let _ = resize(image.view(), 16, &mut rng);
    let mut fresh = StdRng::seed_from_u64(9);
    assert_eq!(rng.next_u64(), fresh.next_u64());
  }

  #[test]
  fn percentile_interpolates_linearly() {
    let values: Vec<f64> = (0..200).map(f64::from).collect();
    assert!((percentile(&values, 0.5) - 0.995).abs() < 1e-9);
    assert!((percentile(&values, 99.5) - 198.005).abs() < 1e-9);
    assert_eq!(percentile(&values, 0.0), 0.0);
    assert_eq!(percentile(&values, 100.0), 199.0);
    assert_eq!(percentile(&[], 50.0), 0.0);
  }

  #[test]
  fn rescale_maps_bounds_to_full_range() {
    let image = ramp(20, 10);
    let rescaled = rescale(image.view());
    assert_eq!(rescaled.iter().min(), Some(&0));
    assert_eq!(rescaled.iter().max(), Some(&255));
  }

  #[test]
  fn rescale_clips_outliers() {
    let mut image = Array2::from_shape_fn((20, 20), |(r, c)| 100.0 + ((r * 20 + c) % 50) as f64);
    image[[0, 0]] = -1.0e6;
    image[[19, 19]] = 1.0e6;
    let rescaled = rescale(image.view());
    assert_eq!(rescaled[[0, 0]], 0);
    assert_eq!(rescaled[[19, 19]], 255);
  }

  #[test]
  fn rescale_constant_channel_is_flat() {
    let image = Array2::from_elem((8, 8), 7.0);
    assert!(rescale(image.view()).iter().all(|&v| v == 7));

    let bright = Array2::from_elem((8, 8), 300.0);
    assert!(rescale(bright.view()).iter().all(|&v| v == 255));
  }
}
