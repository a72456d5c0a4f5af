// 该文件是 Deepometry 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use rand::{SeedableRng, rngs::StdRng};
use tracing::{Level, info, warn};

use args::{Args, Command, EvaluateArgs, MeansArgs, ParseArgs};
use deepometry::{
  FromUrl,
  bridge::Bridge,
  container::ExecDecoder,
  dataset::Dataset,
  model::{Evaluator, ExecClassifier, Means},
  parse::CifParser,
};

fn main() -> Result<()> {
  let args = Args::parse();

  let verbose = matches!(&args.command, Command::Evaluate(evaluate) if evaluate.verbose);
  tracing_subscriber::fmt()
    .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
    .init();

  match args.command {
    Command::Parse(parse) => run_parse(parse),
    Command::Evaluate(evaluate) => run_evaluate(evaluate),
    Command::Means(means) => run_means(means),
  }
}

fn run_parse(args: ParseArgs) -> Result<()> {
  info!("解码器: {}", args.decoder);
  info!("输出目录: {}", args.output.display());
  info!("输出尺寸: {}", args.size);

  let mut rng = match args.seed {
    Some(seed) => StdRng::seed_from_u64(seed),
    None => StdRng::from_entropy(),
  };

  // 解码进程在整个批处理期间只启动一次，离开作用域时关闭
  let mut decoder = ExecDecoder::from_url(&args.decoder)
    .with_context(|| format!("无法启动解码器: {}", args.decoder))?;
  let parser = CifParser::new(args.size).with_channels(args.channels);

  let mut total = 0;
  for input in &args.input {
    let written = parser
      .parse(&mut decoder, input, &args.output, &mut rng)
      .with_context(|| format!("无法转换: {}", input.display()))?;
    total += written.len();
  }

  println!("{}", total);
  Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
  let directories = args
    .input
    .iter()
    .map(|directory| {
      directory
        .canonicalize()
        .with_context(|| format!("无法解析路径: {}", directory.display()))
    })
    .collect::<Result<Vec<_>>>()?;

  let dataset = Dataset::from_directories(&directories)?;

  let means = match &args.means {
    Some(path) => Means::load(path).with_context(|| format!("无法读取均值: {}", path.display()))?,
    None => {
      warn!("未指定均值文件，使用待评估数据的均值");
      Means::compute(dataset.x.view())
    }
  };

  let bridge = Bridge::from_url(&args.model)
    .with_context(|| format!("无法启动分类器: {}", args.model))?;
  let mut classifier = ExecClassifier::load(bridge, dataset.sample_shape(), dataset.labels.len())?;

  let metrics = Evaluator::default()
    .with_batch_size(args.batch_size)
    .with_verbose(args.verbose)
    .evaluate(&mut classifier, &dataset, &means)?;

  print!("{}", metrics);
  Ok(())
}

fn run_means(args: MeansArgs) -> Result<()> {
  let dataset = Dataset::from_directories(&args.input)?;
  let means = Means::compute(dataset.x.view());
  means
    .save(&args.output)
    .with_context(|| format!("无法保存均值: {}", args.output.display()))?;

  info!("均值 {:?} 已保存到 {}", means.values(), args.output.display());
  Ok(())
}
