// 该文件是 Xunlu （巡路） 项目的一部分。
// src/control.rs - 控制面板：模拟状态标签与交通密度
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

use std::{fmt, thread, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::output::UiUpdate;

/// 变道标签保持 "Switching" 的时长
pub const LANE_SWITCH_DURATION: Duration = Duration::from_secs(1);
/// 障碍标签保持 "Detected" 的时长
pub const OBSTACLE_DURATION: Duration = Duration::from_secs(2);

pub const TRAFFIC_DENSITY_MIN: f32 = 0.0;
pub const TRAFFIC_DENSITY_MAX: f32 = 10.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LaneStatus {
  #[default]
  Clear,
  Switching,
}

impl fmt::Display for LaneStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LaneStatus::Clear => write!(f, "Clear"),
      LaneStatus::Switching => write!(f, "Switching"),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ObstacleStatus {
  #[default]
  None,
  Detected,
}

impl fmt::Display for ObstacleStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ObstacleStatus::None => write!(f, "None"),
      ObstacleStatus::Detected => write!(f, "Detected"),
    }
  }
}

/// 控制面板
///
/// 变道与障碍模拟都是一次性的定时序列：立即把标签设为激活状态，
/// 到时后恢复空闲状态。所有标签更新都经由界面队列发送。
/// `shutdown()` 之后挂起的定时器不会再发出任何更新。
pub struct ControlSurface {
  updates: Sender<UiUpdate>,
  cancel_tx: Option<Sender<()>>,
  cancel_rx: Receiver<()>,
  timers: Vec<thread::JoinHandle<()>>,
  traffic_density: f32,
}

impl ControlSurface {
  pub fn new(updates: Sender<UiUpdate>) -> Self {
    let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(0);
    Self {
      updates,
      cancel_tx: Some(cancel_tx),
      cancel_rx,
      timers: Vec::new(),
      traffic_density: TRAFFIC_DENSITY_MIN,
    }
  }

  pub fn trigger_lane_switch(&mut self) {
    info!("模拟变道");
    self.run_timed(
      UiUpdate::Lane(LaneStatus::Switching),
      LANE_SWITCH_DURATION,
      UiUpdate::Lane(LaneStatus::Clear),
    );
  }

  pub fn trigger_obstacle(&mut self) {
    info!("模拟障碍物");
    self.run_timed(
      UiUpdate::Obstacle(ObstacleStatus::Detected),
      OBSTACLE_DURATION,
      UiUpdate::Obstacle(ObstacleStatus::None),
    );
  }

  /// 设置交通密度，返回截断到 [0, 10] 后的值
  pub fn set_traffic_density(&mut self, value: f32) -> f32 {
    let value = if value.is_nan() {
      TRAFFIC_DENSITY_MIN
    } else {
      value.clamp(TRAFFIC_DENSITY_MIN, TRAFFIC_DENSITY_MAX)
    };
    if value != self.traffic_density {
      info!("交通密度: {}", value);
    }
    self.traffic_density = value;
    value
  }

  pub fn traffic_density(&self) -> f32 {
    self.traffic_density
  }

  /// 取消所有挂起的定时器并等待其退出
  pub fn shutdown(&mut self) {
    // 丢弃发送端会唤醒所有等待中的定时器
    if self.cancel_tx.take().is_some() {
      debug!("取消 {} 个定时器", self.timers.len());
    }
    for timer in self.timers.drain(..) {
      if timer.join().is_err() {
        warn!("定时器线程异常退出");
      }
    }
  }

  fn run_timed(&mut self, active: UiUpdate, delay: Duration, idle: UiUpdate) {
    if self.cancel_tx.is_none() {
      debug!("控制面板已关闭，忽略触发");
      return;
    }
    self.timers.retain(|timer| !timer.is_finished());

    let _ = self.updates.send(active);

    let cancel = self.cancel_rx.clone();
    let updates = self.updates.clone();
    self.timers.push(thread::spawn(move || {
      match cancel.recv_timeout(delay) {
        Err(RecvTimeoutError::Timeout) => {
          let _ = updates.send(idle);
        }
        _ => debug!("定时器已取消"),
      }
    }));
  }
}

impl Drop for ControlSurface {
  fn drop(&mut self) {
    self.shutdown();
  }
}
