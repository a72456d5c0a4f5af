// 该文件是 Deepometry 项目的一部分。
// src/parse.rs - CIF 转换为定长 NumPy 数组
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

//! # CIF 解析
//!
//! 逐帧读取容器，对选定通道做 [`resize`] 与 [`rescale`]，把每帧结果保存为
//! `(size, size, channels)` 的 `u8` 数组（`.npy`）。
//!
//! ```no_run
//! use deepometry::{FromUrl, container::ExecDecoder, parse::CifParser};
//! use rand::SeedableRng;
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut decoder = ExecDecoder::from_url(&Url::parse("exec:///opt/deepometry/cif-decoder")?)?;
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let written = CifParser::new(48)
//!   .with_channels(vec![0, 5, 6])
//!   .parse(&mut decoder, "cells.cif".as_ref(), "parsed".as_ref(), &mut rng)?;
//! println!("{} 个样本", written.len());
//! # Ok(())
//! # }
//! ```

use std::{
  iter::StepBy,
  ops::Range,
  path::{Path, PathBuf},
};

use chrono::Utc;
use ndarray::{Array3, Axis};
use ndarray_npy::{WriteNpyError, write_npy};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  container::{DecodeError, Decoder},
  transform::{rescale, resize},
};

/// 解码器读取第 190663 帧及以后会溢出
pub const MAX_IMAGE_COUNT: usize = 190_662;

/// CIF 中图像与掩膜交替存放，只取偶数帧
pub const FRAME_STEP: usize = 2;

const CIF_EXTENSION: &str = ".cif";

#[derive(Error, Debug)]
pub enum ParseError {
  #[error("Unsupported file format: {0}")]
  UnsupportedFormat(String),
  #[error("通道 {channel} 超出范围，容器共有 {count} 个通道")]
  ChannelOutOfRange { channel: usize, count: usize },
  #[error("解码错误: {0}")]
  DecodeError(#[from] DecodeError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("保存数组错误: {0}")]
  WriteNpyError(#[from] WriteNpyError),
}

/// 容器可安全读取的帧数
pub fn readable_image_count(image_count: usize) -> usize {
  image_count.min(MAX_IMAGE_COUNT)
}

/// 需要处理的帧索引
pub fn frame_indices(image_count: usize) -> StepBy<Range<usize>> {
  (0..readable_image_count(image_count)).step_by(FRAME_STEP)
}

/// 小写并带点号的扩展名，没有扩展名时为空串
fn extension_of(pathname: &Path) -> String {
  pathname
    .extension()
    .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
    .unwrap_or_default()
}

/// 生成与内容无关、本次运行内唯一的文件名
#[derive(Debug)]
pub struct SampleNamer {
  process: u32,
  counter: u64,
}

impl Default for SampleNamer {
  fn default() -> Self {
    Self {
      process: std::process::id(),
      counter: 0,
    }
  }
}

impl SampleNamer {
  pub fn next_name(&mut self) -> String {
    self.counter += 1;

    let now = Utc::now();
    let nanos = now
      .timestamp_nanos_opt()
      .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(self.process.to_le_bytes());
    hasher.update(self.counter.to_le_bytes());
    let digest = hasher.finalize();

    let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}.npy", hex)
  }
}

/// CIF 转换器
#[derive(Debug, Clone)]
pub struct CifParser {
  size: usize,
  channels: Option<Vec<usize>>,
}

impl CifParser {
  pub fn new(size: usize) -> Self {
    Self {
      size,
      channels: None,
    }
  }

  /// 只提取给定通道，顺序即输出数组中的通道顺序
  pub fn with_channels(mut self, channels: impl Into<Option<Vec<usize>>>) -> Self {
    self.channels = channels.into();
    self
  }

  pub fn size(&self) -> usize {
    self.size
  }

  /// 转换一个容器文件，返回写出的样本路径
  pub fn parse<D, R>(
    &self,
    decoder: &mut D,
    pathname: &Path,
    output_directory: &Path,
    rng: &mut R,
  ) -> Result<Vec<PathBuf>, ParseError>
  where
    D: Decoder + ?Sized,
    R: Rng + ?Sized,
  {
    let extension = extension_of(pathname);
    if extension != CIF_EXTENSION {
      warn!("不支持的文件格式: {} ({})", extension, pathname.display());
      return Err(ParseError::UnsupportedFormat(extension));
    }

    let mut reader = decoder.open(pathname)?;

    let image_count = reader.image_count();
    if image_count > MAX_IMAGE_COUNT {
      warn!(
        "容器报告 {} 帧，超过可读取上限，仅处理前 {} 帧",
        image_count, MAX_IMAGE_COUNT
      );
    }

    let channel_count = reader.channel_count();
    let channels = match &self.channels {
      Some(channels) => channels.clone(),
      None => (0..channel_count).collect(),
    };
    if let Some(&channel) = channels.iter().find(|&&c| c >= channel_count) {
      return Err(ParseError::ChannelOutOfRange {
        channel,
        count: channel_count,
      });
    }

    std::fs::create_dir_all(output_directory)?;

    let mut namer = SampleNamer::default();
    let mut written = Vec::new();
    for image_index in frame_indices(image_count) {
      let image = reader.read(image_index)?;

      let mut parsed = Array3::<u8>::zeros((self.size, self.size, channels.len()));
      for (slot, &channel) in channels.iter().enumerate() {
        let plane = image.index_axis(Axis(2), channel);
        let normalized = rescale(resize(plane, self.size, rng).view());
        parsed.index_axis_mut(Axis(2), slot).assign(&normalized);
      }

      let output_pathname = output_directory.join(namer.next_name());
      write_npy(&output_pathname, &parsed)?;
      debug!("第 {} 帧 -> {}", image_index, output_pathname.display());
      written.push(output_pathname);
    }

    info!(
      "{}: 写出 {} 个样本到 {}",
      pathname.display(),
      written.len(),
      output_directory.display()
    );

    Ok(written)
  }
}
