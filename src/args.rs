// 该文件是 Xunlu （巡路） 项目的一部分。
// src/args.rs - 命令行参数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Xunlu 项目参数配置，全部使用默认值即可直接运行
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 分类模型文件路径，加载失败时进入降级模式
  #[arg(long, value_name = "FILE", default_value = "model.onnx")]
  pub model: PathBuf,

  /// 输入来源
  /// 支持格式:
  /// - V4L2: v4l:///dev/video0
  /// - 图片: image:///path/to/road.png
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video0")]
  pub input: Url,

  /// 两次迭代之间的间隔（毫秒）
  #[arg(long, value_name = "MILLIS", default_value_t = 30)]
  pub interval_ms: u64,
}
