// 该文件是 Deepometry 项目的一部分。
// src/container/exec_decoder.rs - 基于外部进程的 CIF 解码
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

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  bridge::{Bridge, BridgeError},
  container::{ContainerReader, DecodeError, Decoder},
};

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
  Open { path: &'a Path },
  Read { index: usize },
}

#[derive(Deserialize, Debug)]
struct Metadata {
  image_count: usize,
  channel_count: usize,
}

#[derive(Deserialize)]
struct FrameData {
  shape: [usize; 3],
  data: Vec<f64>,
}

/// 通过 [`Bridge`] 调用外部解码程序（例如封装了 Bio-Formats 的 JVM 进程）
pub struct ExecDecoder {
  bridge: Bridge,
}

impl ExecDecoder {
  pub fn new(bridge: Bridge) -> Self {
    Self { bridge }
  }
}

impl FromUrlWithScheme for ExecDecoder {
  const SCHEME: &'static str = Bridge::SCHEME;
}

impl FromUrl for ExecDecoder {
  type Error = BridgeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Bridge::from_url(url).map(Self::new)
  }
}

impl Decoder for ExecDecoder {
  fn open<'a>(&'a mut self, path: &Path) -> Result<Box<dyn ContainerReader + 'a>, DecodeError> {
    let metadata: Metadata = self.bridge.call(&Request::Open { path })?;
    info!(
      "打开容器 {}: {} 帧, {} 通道",
      path.display(),
      metadata.image_count,
      metadata.channel_count
    );

    Ok(Box::new(ExecContainer {
      bridge: &mut self.bridge,
      metadata,
    }))
  }
}

struct ExecContainer<'a> {
  bridge: &'a mut Bridge,
  metadata: Metadata,
}

impl ContainerReader for ExecContainer<'_> {
  fn image_count(&self) -> usize {
    self.metadata.image_count
  }

  fn channel_count(&self) -> usize {
    self.metadata.channel_count
  }

  fn read(&mut self, index: usize) -> Result<Array3<f64>, DecodeError> {
    if index >= self.metadata.image_count {
      return Err(DecodeError::IndexOutOfRange {
        index,
        count: self.metadata.image_count,
      });
    }

    let frame: FrameData = self.bridge.call(&Request::Read { index })?;
    debug!("读取第 {} 帧: {:?}", index, frame.shape);

    let [height, width, channels] = frame.shape;
    Ok(Array3::from_shape_vec((height, width, channels), frame.data)?)
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;

  const FAKE_DECODER: &str = r#"
while read line; do
  case "$line" in
    *'"open"'*) echo '{"image_count":3,"channel_count":2}' ;;
    *'"index":1'*) echo '{"error":"corrupt frame"}' ;;
    *) echo '{"shape":[2,2,2],"data":[0,1,2,3,4,5,6,7]}' ;;
  esac
done
"#;

  fn fake_decoder() -> ExecDecoder {
    let bridge = Bridge::spawn("sh", &["-c".to_string(), FAKE_DECODER.to_string()]).unwrap();
    ExecDecoder::new(bridge)
  }

  #[test]
  fn request_wire_format() {
    let open = serde_json::to_value(Request::Open {
      path: Path::new("cells.cif"),
    })
    .unwrap();
    assert_eq!(open, serde_json::json!({"op": "open", "path": "cells.cif"}));

    let read = serde_json::to_value(Request::Read { index: 4 }).unwrap();
    assert_eq!(read, serde_json::json!({"op": "read", "index": 4}));
  }

  #[test]
  fn reads_metadata_and_frames() {
    let mut decoder = fake_decoder();
    let mut reader = decoder.open(Path::new("cells.cif")).unwrap();
    assert_eq!(reader.image_count(), 3);
    assert_eq!(reader.channel_count(), 2);

    let frame = reader.read(0).unwrap();
    assert_eq!(frame.dim(), (2, 2, 2));
    assert_eq!(frame[[1, 1, 1]], 7.0);

    assert!(matches!(
      reader.read(1),
      Err(DecodeError::BridgeError(BridgeError::Remote(_)))
    ));
    assert!(matches!(
      reader.read(3),
      Err(DecodeError::IndexOutOfRange { index: 3, count: 3 })
    ));
  }
}
