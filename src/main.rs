// 该文件是 Xunlu （巡路） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xunlu::{
  FromUrl,
  control::ControlSurface,
  input::{FrameSource, InputWrapper},
  model::Classifier,
  output::draw::Overlay,
  task::LoopController,
  ui::App,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.input);
  info!("迭代间隔: {}ms", args.interval_ms);

  // 模型加载失败不影响程序运行
  let classifier = Classifier::load_or_degraded(&args.model);
  let overlay = Overlay::new().context("无法加载叠加层字体")?;
  let source = FrameSource::new(InputWrapper::from_url(&args.input)?);

  let (update_tx, update_rx) = crossbeam_channel::unbounded();
  let controller = LoopController::new(source, classifier, overlay, update_tx.clone())
    .with_interval(Duration::from_millis(args.interval_ms));
  let controls = ControlSurface::new(update_tx);

  let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = quit_tx.try_send(());
  })
  .context("无法设置 Ctrl-C 处理器")?;

  let mut app = App::new(controller, controls, update_rx, quit_rx).context("无法创建窗口")?;
  // 启动即开始采集
  app.start_capture();
  app.run()?;

  info!("程序退出");
  Ok(())
}
