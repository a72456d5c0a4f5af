// 该文件是 Deepometry 项目的一部分。
// src/bridge.rs - 外部进程桥接
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

//! # 外部进程桥接
//!
//! CIF 解码（Bio-Formats）与神经网络推理都运行在独立的子进程里。子进程在
//! [`Bridge`] 创建时启动一次，之后通过标准输入/输出逐行交换 JSON：
//!
//! ```text
//! -> {"op":"open","path":"cells.cif"}
//! <- {"image_count":1024,"channel_count":12}
//! -> {"op":"read","index":0}
//! <- {"error":"index out of range"}
//! ```
//!
//! 回复中包含 `error` 字段时视为远端错误。[`Bridge`] 被销毁时关闭子进程的
//! 标准输入，等待其退出，超时后强制结束。
//!
//! ## 基本用法
//!
//! ```no_run
//! use deepometry::{FromUrl, bridge::Bridge};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("exec:///opt/deepometry/cif-decoder?arg=--heap&arg=4g")?;
//! let bridge = Bridge::from_url(&url)?;
//! # Ok(())
//! # }
//! ```

use std::{
  io::{BufRead, BufReader, Write},
  process::{Child, ChildStdin, ChildStdout, Command, Stdio},
  thread,
  time::{Duration, Instant},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum BridgeError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("无法启动外部程序 {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("外部程序已关闭连接")]
  Closed,
  #[error("外部程序返回错误: {0}")]
  Remote(String),
  #[error("无效的程序路径: {0}")]
  InvalidProgram(Url),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply<T> {
  Failure { error: String },
  Success(T),
}

/// 以 JSON 行协议通信的子进程句柄
pub struct Bridge {
  program: String,
  child: Child,
  stdin: Option<ChildStdin>,
  stdout: BufReader<ChildStdout>,
}

impl Bridge {
  /// 启动外部程序
  pub fn spawn(program: &str, args: &[String]) -> Result<Self, BridgeError> {
    info!("启动外部程序: {} {:?}", program, args);
    let mut child = Command::new(program)
      .args(args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(|source| BridgeError::Spawn {
        program: program.to_string(),
        source,
      })?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
      let _ = child.kill();
      let _ = child.wait();
      return Err(BridgeError::Closed);
    };

    Ok(Self {
      program: program.to_string(),
      child,
      stdin: Some(stdin),
      stdout: BufReader::new(stdout),
    })
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  /// 发送一条请求并读取一条回复
  pub fn call<Q, A>(&mut self, request: &Q) -> Result<A, BridgeError>
  where
    Q: Serialize,
    A: DeserializeOwned,
  {
    let stdin = self.stdin.as_mut().ok_or(BridgeError::Closed)?;
    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    stdin.write_all(&line)?;
    stdin.flush()?;

    let mut reply = String::new();
    if self.stdout.read_line(&mut reply)? == 0 {
      return Err(BridgeError::Closed);
    }
    debug!("{} 回复 {} 字节", self.program, reply.len());

    match serde_json::from_str::<Reply<A>>(&reply)? {
      Reply::Success(value) => Ok(value),
      Reply::Failure { error } => Err(BridgeError::Remote(error)),
    }
  }
}

impl FromUrlWithScheme for Bridge {
  const SCHEME: &'static str = "exec";
}

impl FromUrl for Bridge {
  type Error = BridgeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(BridgeError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let args: Vec<String> = url
      .query_pairs()
      .filter(|(k, _)| k == "arg")
      .map(|(_, v)| v.into_owned())
      .collect();

    let program = program_path(url)?;
    Self::spawn(&program, &args)
  }
}

/// URL 路径按百分号编码解码后的程序路径，只接受本机
fn program_path(url: &Url) -> Result<String, BridgeError> {
  match url.host_str() {
    None | Some("") | Some("localhost") => {}
    Some(_) => return Err(BridgeError::InvalidProgram(url.clone())),
  }

  urlencoding::decode(url.path())
    .map(|path| path.into_owned())
    .map_err(|_| BridgeError::InvalidProgram(url.clone()))
}

impl Drop for Bridge {
  fn drop(&mut self) {
    // 关闭标准输入，子进程读到 EOF 后应自行退出
    self.stdin.take();

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    loop {
      match self.child.try_wait() {
        Ok(Some(status)) => {
          info!("外部程序 {} 已退出: {}", self.program, status);
          return;
        }
        Ok(None) if Instant::now() < deadline => thread::sleep(SHUTDOWN_POLL),
        Ok(None) => break,
        Err(e) => {
          warn!("等待外部程序 {} 退出失败: {}", self.program, e);
          break;
        }
      }
    }

    warn!("强制结束外部程序 {}", self.program);
    if let Err(e) = self.child.kill() {
      warn!("结束外部程序 {} 失败: {}", self.program, e);
    }
    let _ = self.child.wait();
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use serde_json::{Value, json};

  #[test]
  fn call_round_trips_json_lines() {
    // cat 原样回显请求
    let mut bridge = Bridge::spawn("cat", &[]).unwrap();
    let reply: Value = bridge.call(&json!({"op": "ping", "n": 3})).unwrap();
    assert_eq!(reply, json!({"op": "ping", "n": 3}));
  }

  #[test]
  fn error_reply_is_remote_error() {
    let mut bridge = Bridge::spawn("cat", &[]).unwrap();
    let err = bridge
      .call::<_, Value>(&json!({"error": "boom"}))
      .unwrap_err();
    assert!(matches!(err, BridgeError::Remote(msg) if msg == "boom"));
  }

  #[test]
  fn exited_program_is_closed() {
    let mut bridge = Bridge::spawn("true", &[]).unwrap();
    thread::sleep(Duration::from_millis(100));
    let err = bridge.call::<_, Value>(&json!({"op": "ping"})).unwrap_err();
    assert!(matches!(err, BridgeError::Closed | BridgeError::IoError(_)));
  }

  #[test]
  fn from_url_rejects_other_scheme() {
    let url = Url::parse("file:///bin/cat").unwrap();
    assert!(matches!(
      Bridge::from_url(&url),
      Err(BridgeError::SchemeMismatch { .. })
    ));
  }

  #[test]
  fn from_url_passes_arguments() {
    let url = Url::parse("exec:///bin/sh?arg=-c&arg=read%20line%3B%20echo%20%22%24line%22").unwrap();
    let mut bridge = Bridge::from_url(&url).unwrap();
    let reply: Value = bridge.call(&json!([1, 2, 3])).unwrap();
    assert_eq!(reply, json!([1, 2, 3]));
  }

  #[test]
  fn program_path_is_percent_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("echo back");
    std::os::unix::fs::symlink("/bin/cat", &program).unwrap();

    let encoded = Url::from_file_path(&program).unwrap();
    assert!(encoded.path().contains("%20"));
    let url = Url::parse(&format!("exec://{}", encoded.path())).unwrap();
    assert_eq!(program_path(&url).unwrap(), program.to_str().unwrap());

    let mut bridge = Bridge::from_url(&url).unwrap();
    let reply: Value = bridge.call(&json!({"n": 1})).unwrap();
    assert_eq!(reply, json!({"n": 1}));
  }

  #[test]
  fn remote_host_is_invalid_program() {
    let url = Url::parse("exec://decoder.example/opt/decoder").unwrap();
    assert!(matches!(
      Bridge::from_url(&url),
      Err(BridgeError::InvalidProgram(_))
    ));
  }
}
