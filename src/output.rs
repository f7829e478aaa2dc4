// 该文件是 Xunlu （巡路） 项目的一部分。
// src/output.rs - 渲染输出与界面更新消息
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

use crossbeam_channel::Receiver;
use thiserror::Error;

use crate::{
  control::{LaneStatus, ObstacleStatus},
  frame::Frame,
};

pub mod draw;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("字体加载失败: {0}")]
  FontError(#[from] ab_glyph::InvalidFont),
  #[error("窗口错误: {0}")]
  WindowError(#[from] minifb::Error),
}

/// 每次成功迭代整体覆盖的指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
  pub fps: f64,
  pub object_count: usize,
}

/// 渲染目标，只能在持有显示表面的线程上调用
pub trait Render {
  fn present(&mut self, frame: Frame);
  fn update_metrics(&mut self, metrics: Metrics);
  fn set_lane_status(&mut self, status: LaneStatus);
  fn set_obstacle_status(&mut self, status: ObstacleStatus);
  fn clear_video(&mut self);
}

/// 工作线程发往界面线程的更新
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
  Frame(Frame),
  Metrics(Metrics),
  Lane(LaneStatus),
  Obstacle(ObstacleStatus),
  ClearVideo,
}

impl UiUpdate {
  pub fn apply_to<R: Render>(self, sink: &mut R) {
    match self {
      UiUpdate::Frame(frame) => sink.present(frame),
      UiUpdate::Metrics(metrics) => sink.update_metrics(metrics),
      UiUpdate::Lane(status) => sink.set_lane_status(status),
      UiUpdate::Obstacle(status) => sink.set_obstacle_status(status),
      UiUpdate::ClearVideo => sink.clear_video(),
    }
  }
}

/// 在界面线程上取出所有待处理的更新并应用，返回处理的数量
pub fn drain_updates<R: Render>(updates: &Receiver<UiUpdate>, sink: &mut R) -> usize {
  let mut count = 0;
  for update in updates.try_iter() {
    update.apply_to(sink);
    count += 1;
  }
  count
}
