// 该文件是 Deepometry 项目的一部分。
// src/container.rs - 显微图像容器读取接口
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

use std::path::Path;

use ndarray::{Array3, ShapeError};
use thiserror::Error;

use crate::bridge::BridgeError;

mod exec_decoder;
pub use self::exec_decoder::ExecDecoder;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("外部解码器错误: {0}")]
  BridgeError(#[from] BridgeError),
  #[error("帧数据形状错误: {0}")]
  ShapeError(#[from] ShapeError),
  #[error("帧索引越界: {index} >= {count}")]
  IndexOutOfRange { index: usize, count: usize },
}

/// 已打开的多帧容器。帧按 `(height, width, channels)` 返回。
pub trait ContainerReader {
  fn image_count(&self) -> usize;
  fn channel_count(&self) -> usize;
  fn read(&mut self, index: usize) -> Result<Array3<f64>, DecodeError>;
}

/// 解码会话。由调用方创建一次并在整个批处理中复用，销毁即释放外部资源。
pub trait Decoder {
  fn open<'a>(&'a mut self, path: &Path) -> Result<Box<dyn ContainerReader + 'a>, DecodeError>;
}
