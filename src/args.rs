// 该文件是 Deepometry 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

/// Deepometry 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 将 CIF 文件转换为 (size, size, channels) 的 NumPy 数组
  Parse(ParseArgs),
  /// 计算损失与准确率。
  ///
  /// INPUT 为一个或多个目录，其子目录名即类别标签，子目录中为 NPY 样本。
  Evaluate(EvaluateArgs),
  /// 由标注目录计算逐通道均值，保存为 CSV
  Means(MeansArgs),
}

#[derive(ClapArgs, Debug)]
pub struct ParseArgs {
  /// 外部解码程序，例如 exec:///opt/deepometry/cif-decoder
  #[arg(long, env = "DEEPOMETRY_DECODER", value_name = "URL")]
  pub decoder: Url,

  /// 输出目录
  #[arg(long, value_name = "DIR")]
  pub output: PathBuf,

  /// 输出图像边长
  #[arg(long, default_value = "48", value_name = "SIZE")]
  pub size: usize,

  /// 需要提取的通道，逗号分隔；缺省为全部通道
  #[arg(long, value_delimiter = ',', value_name = "CHANNELS")]
  pub channels: Option<Vec<usize>>,

  /// 背景噪声的随机种子
  #[arg(long, value_name = "SEED")]
  pub seed: Option<u64>,

  /// CIF 文件
  #[arg(required = true, value_parser = existing_path, value_name = "INPUT")]
  pub input: Vec<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct EvaluateArgs {
  /// 外部分类程序，例如 exec:///opt/deepometry/resnet50
  #[arg(long, env = "DEEPOMETRY_MODEL", value_name = "URL")]
  pub model: Url,

  /// 训练集均值文件（means.csv）；缺省时由待评估数据计算
  #[arg(long, value_parser = existing_path, value_name = "FILE")]
  pub means: Option<PathBuf>,

  /// 每批评估的样本数
  #[arg(long, default_value = "32", value_name = "COUNT")]
  pub batch_size: usize,

  /// 输出逐批进度与调试日志
  #[arg(long)]
  pub verbose: bool,

  /// 标注目录
  #[arg(required = true, value_parser = existing_path, value_name = "INPUT")]
  pub input: Vec<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct MeansArgs {
  /// 输出 CSV 文件
  #[arg(long, value_name = "FILE")]
  pub output: PathBuf,

  /// 标注目录
  #[arg(required = true, value_parser = existing_path, value_name = "INPUT")]
  pub input: Vec<PathBuf>,
}

fn existing_path(value: &str) -> Result<PathBuf, String> {
  let path = PathBuf::from(value);
  if path.exists() {
    Ok(path)
  } else {
    Err(format!("路径不存在: {}", value))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_evaluate_command() {
    let dir = std::env::temp_dir();
    let dir = dir.to_str().unwrap();
    let args = Args::try_parse_from([
      "deepometry",
      "evaluate",
      "--model",
      "exec:///opt/model",
      "--batch-size",
      "8",
      "--verbose",
      dir,
    ])
    .unwrap();

    let Command::Evaluate(evaluate) = args.command else {
      panic!("expected evaluate");
    };
    assert_eq!(evaluate.batch_size, 8);
    assert!(evaluate.verbose);
    assert_eq!(evaluate.input, vec![PathBuf::from(dir)]);
  }

  #[test]
  fn parses_channel_list() {
    let dir = std::env::temp_dir();
    let args = Args::try_parse_from([
      "deepometry",
      "parse",
      "--decoder",
      "exec:///opt/decoder",
      "--output",
      "out",
      "--channels",
      "0,5,6",
      dir.to_str().unwrap(),
    ])
    .unwrap();

    let Command::Parse(parse) = args.command else {
      panic!("expected parse");
    };
    assert_eq!(parse.channels, Some(vec![0, 5, 6]));
    assert_eq!(parse.size, 48);
  }

  #[test]
  fn missing_input_is_rejected() {
    let result = Args::try_parse_from([
      "deepometry",
      "means",
      "--output",
      "means.csv",
      "/definitely/not/here",
    ]);
    assert!(result.is_err());
  }
}
