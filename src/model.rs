// 该文件是 Deepometry 项目的一部分。
// src/model.rs - 分类模型评估
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

use std::{fmt, path::Path};

use ndarray::{Array2, Array4, ArrayView1, ArrayView2, ArrayView4, Axis, s};
use thiserror::Error;
use tracing::{debug, info};

use crate::dataset::Dataset;

mod exec_classifier;
pub use self::exec_classifier::ExecClassifier;

/// 交叉熵计算时概率的截断下界
pub const EPSILON: f32 = 1e-7;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("通道数不匹配: 均值 {means} 个, 样本 {samples} 个")]
  ChannelMismatch { means: usize, samples: usize },
  #[error("标签 {label} 超出类别数 {units}")]
  LabelOutOfRange { label: u8, units: usize },
  #[error("预测结果形状为 {actual:?}, 期望 {expected:?}")]
  PredictionShape {
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("批大小必须大于 0")]
  ZeroBatchSize,
  #[error("均值文件为空或格式错误")]
  EmptyMeans,
  #[error("CSV 错误: {0}")]
  CsvError(#[from] csv::Error),
  #[error("分类器错误: {0}")]
  ClassifierError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 外部分类网络：输入一批已中心化的样本，输出每个样本的类别概率
pub trait Classifier {
  type Error: std::error::Error + Send + Sync + 'static;

  fn predict(&mut self, batch: ArrayView4<f32>) -> Result<Array2<f32>, Self::Error>;
}

/// 每个通道的像素均值，保存为单行 CSV（`means.csv`）
#[derive(Debug, Clone, PartialEq)]
pub struct Means(Vec<f32>);

impl Means {
  pub fn new(values: Vec<f32>) -> Self {
    Self(values)
  }

  /// 对 `(N, height, width, channels)` 按通道求均值
  pub fn compute(x: ArrayView4<u8>) -> Self {
    let channels = x.len_of(Axis(3));
    let means = (0..channels)
      .map(|c| {
        let plane = x.index_axis(Axis(3), c);
        let count = plane.len().max(1) as f64;
        (plane.fold(0.0f64, |acc, &v| acc + v as f64) / count) as f32
      })
      .collect();
    Self(means)
  }

  pub fn load(path: &Path) -> Result<Self, ModelError> {
    let mut reader = csv::ReaderBuilder::new()
      .has_headers(false)
      .from_path(path)?;
    let record = reader
      .records()
      .next()
      .ok_or(ModelError::EmptyMeans)??;

    let values = record
      .iter()
      .map(|field| field.trim().parse::<f32>())
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| ModelError::EmptyMeans)?;
    if values.is_empty() {
      return Err(ModelError::EmptyMeans);
    }

    debug!("从 {} 读取均值: {:?}", path.display(), values);
    Ok(Self(values))
  }

  pub fn save(&self, path: &Path) -> Result<(), ModelError> {
    let mut writer = csv::WriterBuilder::new()
      .has_headers(false)
      .from_path(path)?;
    writer.write_record(self.0.iter().map(|v| v.to_string()))?;
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
  }

  pub fn values(&self) -> &[f32] {
    &self.0
  }

  /// 转为 `f32` 并逐通道减去均值
  pub fn center(&self, x: ArrayView4<u8>) -> Result<Array4<f32>, ModelError> {
    let channels = x.len_of(Axis(3));
    if channels != self.0.len() {
      return Err(ModelError::ChannelMismatch {
        means: self.0.len(),
        samples: channels,
      });
    }

    let mut centered = x.mapv(f32::from);
    for (c, &mean) in self.0.iter().enumerate() {
      centered
        .index_axis_mut(Axis(3), c)
        .mapv_inplace(|v| v - mean);
    }
    Ok(centered)
  }
}

/// 类别编号转为 one-hot 矩阵
pub fn to_categorical(y: ArrayView1<u8>, units: usize) -> Result<Array2<f32>, ModelError> {
  let mut categorical = Array2::<f32>::zeros((y.len(), units));
  for (row, &label) in y.iter().enumerate() {
    if label as usize >= units {
      return Err(ModelError::LabelOutOfRange { label, units });
    }
    categorical[[row, label as usize]] = 1.0;
  }
  Ok(categorical)
}

/// 有序的指标名与值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics(Vec<(String, f64)>);

impl Metrics {
  pub fn push(&mut self, name: impl Into<String>, value: f64) {
    self.0.push((name.into(), value));
  }

  pub fn get(&self, name: &str) -> Option<f64> {
    self.0.iter().find(|(n, _)| n == name).map(|&(_, v)| v)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self.0.iter().map(|(n, v)| (n.as_str(), *v))
  }
}

impl fmt::Display for Metrics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (name, value) in self.iter() {
      writeln!(f, "{}: {}", name, value)?;
    }
    Ok(())
  }
}

/// 按批次计算交叉熵损失与准确率
#[derive(Debug, Clone)]
pub struct Evaluator {
  batch_size: usize,
  verbose: bool,
}

impl Default for Evaluator {
  fn default() -> Self {
    Self {
      batch_size: 32,
      verbose: false,
    }
  }
}

impl Evaluator {
  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }

  pub fn with_verbose(mut self, verbose: bool) -> Self {
    self.verbose = verbose;
    self
  }

  pub fn evaluate<C: Classifier + ?Sized>(
    &self,
    classifier: &mut C,
    dataset: &Dataset,
    means: &Means,
  ) -> Result<Metrics, ModelError> {
    if self.batch_size == 0 {
      return Err(ModelError::ZeroBatchSize);
    }

    let units = dataset.labels.len();
    let samples = means.center(dataset.x.view())?;
    let targets = to_categorical(dataset.y.view(), units)?;

    let total = dataset.len();
    let batches = total.div_ceil(self.batch_size);
    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;

    for (batch_index, start) in (0..total).step_by(self.batch_size).enumerate() {
      let end = (start + self.batch_size).min(total);
      let batch = samples.slice(s![start..end, .., .., ..]);

      let predictions = classifier
        .predict(batch)
        .map_err(|e| ModelError::ClassifierError(Box::new(e)))?;
      if predictions.dim() != (end - start, units) {
        return Err(ModelError::PredictionShape {
          expected: (end - start, units),
          actual: predictions.dim(),
        });
      }

      let truth = targets.slice(s![start..end, ..]);
      let (batch_loss, batch_correct) = score_batch(predictions.view(), truth);
      loss_sum += batch_loss;
      correct += batch_correct;

      if self.verbose {
        info!(
          "批次 {}/{}: 累计损失 {:.4}, 累计准确率 {:.4}",
          batch_index + 1,
          batches,
          loss_sum / end as f64,
          correct as f64 / end as f64
        );
      }
    }

    let count = total.max(1) as f64;
    let mut metrics = Metrics::default();
    metrics.push("loss", loss_sum / count);
    metrics.push("acc", correct as f64 / count);
    Ok(metrics)
  }
}

fn argmax(row: ArrayView1<f32>) -> usize {
  row
    .iter()
    .enumerate()
    .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
      if v > max { (i, v) } else { (best, max) }
    })
    .0
}

/// 返回 (交叉熵之和, 正确个数)
fn score_batch(predictions: ArrayView2<f32>, truth: ArrayView2<f32>) -> (f64, usize) {
  let mut loss = 0.0f64;
  let mut correct = 0;

  for (predicted, expected) in predictions.outer_iter().zip(truth.outer_iter()) {
    loss -= predicted
      .iter()
      .zip(expected.iter())
      .map(|(&p, &t)| t as f64 * (p.clamp(EPSILON, 1.0 - EPSILON) as f64).ln())
      .sum::<f64>();

    if argmax(predicted) == argmax(expected) {
      correct += 1;
    }
  }

  (loss, correct)
}
