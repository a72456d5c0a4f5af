// 该文件是 Deepometry 项目的一部分。
// src/model/exec_classifier.rs - 基于外部进程的分类网络
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

use ndarray::{Array2, ArrayView4};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  bridge::{Bridge, BridgeError},
  model::Classifier,
};

#[derive(Error, Debug)]
pub enum ExecClassifierError {
  #[error("外部分类器错误: {0}")]
  BridgeError(#[from] BridgeError),
  #[error("预测结果形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
  Load { shape: [usize; 3], units: usize },
  Predict { shape: [usize; 4], data: &'a [f32] },
}

#[derive(Deserialize)]
struct Loaded {}

#[derive(Deserialize)]
struct Prediction {
  shape: [usize; 2],
  data: Vec<f32>,
}

/// 外部进程中运行的分类网络，构造时按输入形状和类别数加载权重
pub struct ExecClassifier {
  bridge: Bridge,
}

impl ExecClassifier {
  pub fn load(
    mut bridge: Bridge,
    shape: (usize, usize, usize),
    units: usize,
  ) -> Result<Self, ExecClassifierError> {
    let (height, width, channels) = shape;
    let _: Loaded = bridge.call(&Request::Load {
      shape: [height, width, channels],
      units,
    })?;
    info!(
      "分类器 {} 已加载: 输入 {}x{}x{}, {} 个类别",
      bridge.program(),
      height,
      width,
      channels,
      units
    );

    Ok(Self { bridge })
  }
}

impl Classifier for ExecClassifier {
  type Error = ExecClassifierError;

  fn predict(&mut self, batch: ArrayView4<f32>) -> Result<Array2<f32>, Self::Error> {
    let (n, height, width, channels) = batch.dim();
    let contiguous = batch.as_standard_layout();
    let data = contiguous.as_slice().unwrap_or_default();

    let prediction: Prediction = self.bridge.call(&Request::Predict {
      shape: [n, height, width, channels],
      data,
    })?;

    let [rows, cols] = prediction.shape;
    Ok(Array2::from_shape_vec((rows, cols), prediction.data)?)
  }
}
