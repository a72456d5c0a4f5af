// 该文件是 Deepometry 项目的一部分。
// src/dataset/sample_file.rs - 样本文件读取
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
  io::Cursor,
  path::{Path, PathBuf},
};

use ndarray::{Array3, ArrayD, Axis, Ix3, ShapeError};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement};
use thiserror::Error;
use tracing::debug;

/// NumPy `.npy` 文件头的魔数
const NPY_MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Error, Debug)]
pub enum SampleFileError {
  #[error("无法识别的样本格式: {0}")]
  UnsupportedFormat(PathBuf),
  #[error("样本维度不支持: {0:?}")]
  UnsupportedShape(Vec<usize>),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("NumPy 数组读取错误: {0}")]
  ReadNpyError(#[from] ReadNpyError),
  #[error("形状错误: {0}")]
  ShapeError(#[from] ShapeError),
  #[cfg(feature = "read_image_file")]
  #[error("图像读取错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 读取一个样本为 `(height, width, channels)` 的 `u8` 数组。
///
/// 格式由文件内容判断，与扩展名无关：以 NumPy 魔数开头的按 `.npy` 解析，
/// 其余交给图像解码器识别。`.npy` 中的二维数组补一个长度为 1 的通道轴；
/// 非 `u8` 元素按 `as u8` 转换。
pub fn read_sample(path: &Path) -> Result<Array3<u8>, SampleFileError> {
  let bytes = std::fs::read(path)?;

  if bytes.starts_with(NPY_MAGIC) {
    return read_npy_sample(&bytes);
  }

  #[cfg(feature = "read_image_file")]
  {
    if let Ok(format) = image::guess_format(&bytes) {
      debug!("{}: 按 {:?} 图像读取", path.display(), format);
      return read_image_sample(&bytes, format);
    }
  }

  Err(SampleFileError::UnsupportedFormat(path.to_path_buf()))
}

fn read_npy_sample(bytes: &[u8]) -> Result<Array3<u8>, SampleFileError> {
  let array = decode_npy(bytes)?;

  match array.ndim() {
    2 => Ok(array.insert_axis(Axis(2)).into_dimensionality::<Ix3>()?),
    3 => Ok(array.into_dimensionality::<Ix3>()?),
    _ => Err(SampleFileError::UnsupportedShape(array.shape().to_vec())),
  }
}

fn try_decode<T>(bytes: &[u8], cast: fn(T) -> u8) -> Result<Option<ArrayD<u8>>, ReadNpyError>
where
  T: ReadableElement + Copy,
{
  match ArrayD::<T>::read_npy(Cursor::new(bytes)) {
    Ok(array) => Ok(Some(array.mapv(cast))),
    Err(ReadNpyError::WrongDescriptor(descr)) => {
      debug!("元素类型不匹配: {:?}", descr);
      Ok(None)
    }
    Err(e) => Err(e),
  }
}

/// 依次尝试所有可读的元素类型
fn decode_npy(bytes: &[u8]) -> Result<ArrayD<u8>, ReadNpyError> {
  let decoders: [fn(&[u8]) -> Result<Option<ArrayD<u8>>, ReadNpyError>; 10] = [
    |b| try_decode::<u8>(b, |v| v),
    |b| try_decode::<i8>(b, |v| v as u8),
    |b| try_decode::<u16>(b, |v| v as u8),
    |b| try_decode::<i16>(b, |v| v as u8),
    |b| try_decode::<u32>(b, |v| v as u8),
    |b| try_decode::<i32>(b, |v| v as u8),
    |b| try_decode::<u64>(b, |v| v as u8),
    |b| try_decode::<i64>(b, |v| v as u8),
    |b| try_decode::<f32>(b, |v| v as u8),
    |b| try_decode::<bool>(b, u8::from),
  ];

  for decode in decoders {
    if let Some(array) = decode(bytes)? {
      return Ok(array);
    }
  }
  ArrayD::<f64>::read_npy(Cursor::new(bytes)).map(|array| array.mapv(|v| v as u8))
}

#[cfg(feature = "read_image_file")]
fn read_image_sample(
  bytes: &[u8],
  format: image::ImageFormat,
) -> Result<Array3<u8>, SampleFileError> {
  let image = image::load_from_memory_with_format(bytes, format)?;
  let (width, height) = (image.width() as usize, image.height() as usize);

  let (channels, raw) = match image.color().channel_count() {
    1 => (1, image.into_luma8().into_raw()),
    2 => (2, image.into_luma_alpha8().into_raw()),
    3 => (3, image.into_rgb8().into_raw()),
    _ => (4, image.into_rgba8().into_raw()),
  };

  Ok(Array3::from_shape_vec((height, width, channels), raw)?)
}
