// 该文件是 Deepometry 项目的一部分。
// src/dataset.rs - 按目录组织的标注数据集
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

//! # 数据集
//!
//! 目录结构为 `<root>/<label>/<sample>`：每个根目录下的子目录名即类别标签，
//! 子目录中的每个文件是一个样本。只遍历两层，更深的目录会被忽略。

use std::{
  collections::BTreeSet,
  fs,
  path::{Path, PathBuf},
};

use ndarray::{Array1, Array4, Axis};
use thiserror::Error;
use tracing::{debug, info};

mod sample_file;
pub use self::sample_file::{SampleFileError, read_sample};

/// `u8` 标签向量能表示的类别数上限
pub const MAX_LABELS: usize = u8::MAX as usize + 1;

#[derive(Error, Debug)]
pub enum DatasetError {
  #[error("没有找到任何样本")]
  NoSamples,
  #[error("样本路径缺少有效的标签目录: {0}")]
  InvalidSamplePath(PathBuf),
  #[error("类别过多: {0}，最多支持 {MAX_LABELS} 个")]
  TooManyLabels(usize),
  #[error("未知标签: {0}")]
  UnknownLabel(String),
  #[error("样本 {path} 形状为 {actual:?}，期望 {expected:?}")]
  ShapeMismatch {
    path: PathBuf,
    expected: [usize; 3],
    actual: [usize; 3],
  },
  #[error("读取样本 {path} 失败: {source}")]
  SampleError {
    path: PathBuf,
    #[source]
    source: SampleFileError,
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 一个样本文件及其标签（父目录名）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePath {
  path: PathBuf,
  label: String,
}

impl SamplePath {
  /// 从文件路径构造，父目录名必须存在且是合法 UTF-8
  pub fn new(path: impl Into<PathBuf>) -> Result<Self, DatasetError> {
    let path = path.into();
    let label = path
      .parent()
      .and_then(Path::file_name)
      .and_then(|name| name.to_str())
      .map(str::to_string)
      .ok_or_else(|| DatasetError::InvalidSamplePath(path.clone()))?;

    Ok(Self { path, label })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn label(&self) -> &str {
    &self.label
  }
}

fn is_hidden(path: &Path) -> bool {
  path
    .file_name()
    .map(|name| name.to_string_lossy().starts_with('.'))
    .unwrap_or(true)
}

/// 按文件名排序列出目录项，跳过隐藏项
fn sorted_entries(directory: &Path) -> Result<Vec<PathBuf>, DatasetError> {
  let mut entries = fs::read_dir(directory)?
    .map(|entry| entry.map(|e| e.path()))
    .collect::<Result<Vec<_>, _>>()?;
  entries.retain(|path| !is_hidden(path));
  entries.sort();
  Ok(entries)
}

/// 收集所有根目录下 `<label>/<sample>` 两层结构中的样本文件
pub fn collect_pathnames<P: AsRef<Path>>(roots: &[P]) -> Result<Vec<SamplePath>, DatasetError> {
  let mut samples = Vec::new();

  for root in roots {
    let root = root.as_ref();
    for label_directory in sorted_entries(root)? {
      if !label_directory.is_dir() {
        continue;
      }

      for path in sorted_entries(&label_directory)? {
        if path.is_file() {
          samples.push(SamplePath::new(path)?);
        }
      }
    }
    debug!("{}: 累计 {} 个样本", root.display(), samples.len());
  }

  Ok(samples)
}

/// 排序去重后的标签表，下标即类别编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelIndex {
  labels: Vec<String>,
}

impl LabelIndex {
  pub fn new<I, S>(labels: I) -> Result<Self, DatasetError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let labels: BTreeSet<String> = labels.into_iter().map(Into::into).collect();
    if labels.len() > MAX_LABELS {
      return Err(DatasetError::TooManyLabels(labels.len()));
    }

    Ok(Self {
      labels: labels.into_iter().collect(),
    })
  }

  pub fn from_samples(samples: &[SamplePath]) -> Result<Self, DatasetError> {
    Self::new(samples.iter().map(|sample| sample.label()))
  }

  pub fn index_of(&self, label: &str) -> Option<u8> {
    self
      .labels
      .binary_search_by(|probe| probe.as_str().cmp(label))
      .ok()
      .map(|index| index as u8)
  }

  pub fn label_of(&self, index: u8) -> Option<&str> {
    self.labels.get(index as usize).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

/// 完全载入内存的数据集，`x` 为 `(N, height, width, channels)`
#[derive(Debug, Clone)]
pub struct Dataset {
  pub x: Array4<u8>,
  pub y: Array1<u8>,
  pub labels: LabelIndex,
}

impl Dataset {
  /// 载入样本，形状以第一个样本为准
  pub fn load(samples: &[SamplePath]) -> Result<Self, DatasetError> {
    let first = samples.first().ok_or(DatasetError::NoSamples)?;
    let labels = LabelIndex::from_samples(samples)?;

    let shape = load_sample(first)?.dim();
    let (height, width, channels) = shape;
    info!(
      "载入 {} 个样本, 形状 {}x{}x{}, {} 个类别",
      samples.len(),
      height,
      width,
      channels,
      labels.len()
    );

    let mut x = Array4::<u8>::zeros((samples.len(), height, width, channels));
    let mut y = Array1::<u8>::zeros(samples.len());

    for (index, sample) in samples.iter().enumerate() {
      let array = load_sample(sample)?;
      if array.dim() != shape {
        let (h, w, c) = array.dim();
        return Err(DatasetError::ShapeMismatch {
          path: sample.path().to_path_buf(),
          expected: [height, width, channels],
          actual: [h, w, c],
        });
      }

      x.index_axis_mut(Axis(0), index).assign(&array);
      y[index] = labels
        .index_of(sample.label())
        .ok_or_else(|| DatasetError::UnknownLabel(sample.label().to_string()))?;
    }

    Ok(Self { x, y, labels })
  }

  /// 收集并载入若干根目录
  pub fn from_directories<P: AsRef<Path>>(roots: &[P]) -> Result<Self, DatasetError> {
    let samples = collect_pathnames(roots)?;
    Self::load(&samples)
  }

  pub fn len(&self) -> usize {
    self.y.len()
  }

  pub fn is_empty(&self) -> bool {
    self.y.is_empty()
  }

  /// 单个样本的形状 `(height, width, channels)`
  pub fn sample_shape(&self) -> (usize, usize, usize) {
    let (_, height, width, channels) = self.x.dim();
    (height, width, channels)
  }
}

fn load_sample(sample: &SamplePath) -> Result<ndarray::Array3<u8>, DatasetError> {
  read_sample(sample.path()).map_err(|source| DatasetError::SampleError {
    path: sample.path().to_path_buf(),
    source,
  })
}
