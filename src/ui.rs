// 该文件是 Xunlu （巡路） 项目的一部分。
// src/ui.rs - 仪表盘窗口
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

use std::fmt::Display;

use ab_glyph::{FontArc, PxScale};
use crossbeam_channel::Receiver;
use image::{Rgb, RgbImage, imageops::FilterType};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use minifb::{Key, KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};
use tracing::{error, info};

use crate::{
  control::{
    ControlSurface, LaneStatus, ObstacleStatus, TRAFFIC_DENSITY_MAX, TRAFFIC_DENSITY_MIN,
  },
  frame::Frame,
  input::OpenDevice,
  model::{InferenceResult, Model},
  output::{Metrics, OutputError, Render, UiUpdate, draw::load_font, drain_updates},
  task::LoopController,
};

pub const WINDOW_TITLE: &str = "Autonomous Vehicle Simulation Interface";

// 布局：左侧控制栏，中间指标栏，右侧视频
pub const WINDOW_WIDTH: usize = 1240;
pub const WINDOW_HEIGHT: usize = 640;
const SIDEBAR_WIDTH: u32 = 200;
const METRICS_X: i32 = 200;
const METRICS_WIDTH: u32 = 220;
pub const VIDEO_X: i32 = 420;
pub const VIDEO_Y: i32 = 20;
pub const VIDEO_WIDTH: u32 = 800;
pub const VIDEO_HEIGHT: u32 = 600;

const WIDGET_X: i32 = 10;
const WIDGET_WIDTH: u32 = 180;
const BUTTON_HEIGHT: u32 = 32;
const START_Y: i32 = 60;
const STOP_Y: i32 = 102;
const SLIDER_LABEL_Y: i32 = 148;
const SLIDER_Y: i32 = 176;
const SLIDER_HEIGHT: u32 = 16;
const LANE_Y: i32 = 210;
const OBSTACLE_Y: i32 = 252;

const TITLE_SIZE: f32 = 22.0;
const LABEL_SIZE: f32 = 17.0;

const BACKGROUND: Rgb<u8> = Rgb([36, 36, 36]);
const PANEL: Rgb<u8> = Rgb([43, 43, 43]);
const BUTTON: Rgb<u8> = Rgb([31, 106, 165]);
const TRACK: Rgb<u8> = Rgb([80, 80, 80]);
const KNOB: Rgb<u8> = Rgb([220, 220, 220]);
const VIDEO_BLANK: Rgb<u8> = Rgb([20, 20, 20]);
const TEXT: Rgb<u8> = Rgb([235, 235, 235]);
const ERROR_TEXT: Rgb<u8> = Rgb([230, 90, 80]);

/// 控制栏上的交互控件
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Control {
  Start,
  Stop,
  TrafficDensity(f32),
  LaneSwitch,
  Obstacle,
}

fn contains(x: f32, y: f32, top: i32, height: u32) -> bool {
  let left = WIDGET_X as f32;
  let right = left + WIDGET_WIDTH as f32;
  let top = top as f32;
  let bottom = top + height as f32;
  x >= left && x < right && y >= top && y < bottom
}

/// 把窗口坐标映射为控件
pub fn hit_test(x: f32, y: f32) -> Option<Control> {
  if contains(x, y, START_Y, BUTTON_HEIGHT) {
    Some(Control::Start)
  } else if contains(x, y, STOP_Y, BUTTON_HEIGHT) {
    Some(Control::Stop)
  } else if contains(x, y, SLIDER_Y, SLIDER_HEIGHT) {
    let ratio = (x - WIDGET_X as f32) / WIDGET_WIDTH as f32;
    let value = TRAFFIC_DENSITY_MIN + ratio * (TRAFFIC_DENSITY_MAX - TRAFFIC_DENSITY_MIN);
    Some(Control::TrafficDensity(value))
  } else if contains(x, y, LANE_Y, BUTTON_HEIGHT) {
    Some(Control::LaneSwitch)
  } else if contains(x, y, OBSTACLE_Y, BUTTON_HEIGHT) {
    Some(Control::Obstacle)
  } else {
    None
  }
}

/// 仪表盘状态，只在界面线程上修改
pub struct Dashboard {
  font: FontArc,
  video: Option<RgbImage>,
  metrics: Option<Metrics>,
  lane: LaneStatus,
  obstacle: ObstacleStatus,
  traffic_density: f32,
  device_error: Option<String>,
}

impl Dashboard {
  pub fn new() -> Result<Self, OutputError> {
    Ok(Self {
      font: load_font()?,
      video: None,
      metrics: None,
      lane: LaneStatus::default(),
      obstacle: ObstacleStatus::default(),
      traffic_density: TRAFFIC_DENSITY_MIN,
      device_error: None,
    })
  }

  pub fn has_video(&self) -> bool {
    self.video.is_some()
  }

  pub fn fps_label(&self) -> String {
    match self.metrics {
      Some(metrics) => format!("FPS: {:.0}", metrics.fps),
      None => "FPS: --".to_string(),
    }
  }

  pub fn objects_label(&self) -> String {
    match self.metrics {
      Some(metrics) => format!("Objects Detected: {}", metrics.object_count),
      None => "Objects Detected: --".to_string(),
    }
  }

  pub fn lane_label(&self) -> String {
    format!("Lane Status: {}", self.lane)
  }

  pub fn obstacle_label(&self) -> String {
    format!("Obstacle: {}", self.obstacle)
  }

  pub fn set_traffic_density(&mut self, value: f32) {
    self.traffic_density = value;
  }

  /// 设备错误显示在空白的视频面板中，`None` 清除
  pub fn set_device_error(&mut self, message: Option<String>) {
    self.device_error = message;
  }

  pub fn device_error(&self) -> Option<&str> {
    self.device_error.as_deref()
  }

  /// 绘制整个窗口
  pub fn compose(&self) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(WINDOW_WIDTH as u32, WINDOW_HEIGHT as u32, BACKGROUND);

    // 控制栏
    fill(&mut canvas, 0, 0, SIDEBAR_WIDTH, WINDOW_HEIGHT as u32, PANEL);
    self.text(&mut canvas, WIDGET_X, 20, TITLE_SIZE, "Controls");
    self.button(&mut canvas, START_Y, "Start Simulation");
    self.button(&mut canvas, STOP_Y, "Stop Simulation");
    self.text(&mut canvas, WIDGET_X, SLIDER_LABEL_Y, LABEL_SIZE, "Traffic Density");
    self.slider(&mut canvas);
    self.button(&mut canvas, LANE_Y, "Simulate Lane Switching");
    self.button(&mut canvas, OBSTACLE_Y, "Simulate Obstacle");

    // 指标栏
    let x = METRICS_X + WIDGET_X;
    fill(&mut canvas, METRICS_X, 0, METRICS_WIDTH, WINDOW_HEIGHT as u32, BACKGROUND);
    self.text(&mut canvas, x, 20, TITLE_SIZE, "Performance Metrics");
    self.text(&mut canvas, x, 60, LABEL_SIZE, self.fps_label());
    self.text(&mut canvas, x, 90, LABEL_SIZE, self.objects_label());
    self.text(&mut canvas, x, 120, LABEL_SIZE, self.lane_label());
    self.text(&mut canvas, x, 150, LABEL_SIZE, self.obstacle_label());

    // 视频
    match &self.video {
      Some(video) => image::imageops::replace(&mut canvas, video, VIDEO_X as i64, VIDEO_Y as i64),
      None => {
        fill(&mut canvas, VIDEO_X, VIDEO_Y, VIDEO_WIDTH, VIDEO_HEIGHT, VIDEO_BLANK);
        if let Some(message) = &self.device_error {
          let scale = PxScale::from(LABEL_SIZE);
          draw_text_mut(
            &mut canvas,
            ERROR_TEXT,
            VIDEO_X + 20,
            VIDEO_Y + 20,
            scale,
            &self.font,
            message,
          );
        }
      }
    }

    canvas
  }

  fn text(&self, canvas: &mut RgbImage, x: i32, y: i32, size: f32, text: impl Display) {
    let text = text.to_string();
    draw_text_mut(canvas, TEXT, x, y, PxScale::from(size), &self.font, &text);
  }

  fn button(&self, canvas: &mut RgbImage, y: i32, label: &str) {
    fill(canvas, WIDGET_X, y, WIDGET_WIDTH, BUTTON_HEIGHT, BUTTON);
    self.text(canvas, WIDGET_X + 8, y + 8, 14.0, label);
  }

  fn slider(&self, canvas: &mut RgbImage) {
    let y = SLIDER_Y + SLIDER_HEIGHT as i32 / 2 - 2;
    fill(canvas, WIDGET_X, y, WIDGET_WIDTH, 4, TRACK);

    let ratio = (self.traffic_density - TRAFFIC_DENSITY_MIN)
      / (TRAFFIC_DENSITY_MAX - TRAFFIC_DENSITY_MIN);
    let filled = (ratio.clamp(0.0, 1.0) * WIDGET_WIDTH as f32) as u32;
    if filled > 0 {
      fill(canvas, WIDGET_X, y, filled, 4, BUTTON);
    }
    fill(canvas, WIDGET_X + filled as i32 - 4, SLIDER_Y, 8, SLIDER_HEIGHT, KNOB);
  }
}

fn fill(canvas: &mut RgbImage, x: i32, y: i32, width: u32, height: u32, color: Rgb<u8>) {
  if width == 0 || height == 0 {
    return;
  }
  draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(width, height), color);
}

/// minifb 使用 0RGB 像素
pub fn to_argb_buffer(image: &RgbImage, buffer: &mut Vec<u32>) {
  buffer.clear();
  buffer.extend(
    image
      .pixels()
      .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32),
  );
}

impl Render for Dashboard {
  fn present(&mut self, frame: Frame) {
    let image = if frame.image.dimensions() == (VIDEO_WIDTH, VIDEO_HEIGHT) {
      frame.image
    } else {
      image::imageops::resize(&frame.image, VIDEO_WIDTH, VIDEO_HEIGHT, FilterType::Triangle)
    };
    self.video = Some(image);
  }

  fn update_metrics(&mut self, metrics: Metrics) {
    self.metrics = Some(metrics);
  }

  fn set_lane_status(&mut self, status: LaneStatus) {
    self.lane = status;
  }

  fn set_obstacle_status(&mut self, status: ObstacleStatus) {
    self.obstacle = status;
  }

  fn clear_video(&mut self) {
    self.video = None;
  }
}

/// 桌面应用：窗口事件循环运行在主线程上
pub struct App<O: OpenDevice, M> {
  window: Window,
  dashboard: Dashboard,
  controller: LoopController<O, M>,
  controls: ControlSurface,
  updates: Receiver<UiUpdate>,
  quit: Receiver<()>,
  buffer: Vec<u32>,
  mouse_was_down: bool,
}

impl<O, M> App<O, M>
where
  O: OpenDevice,
  M: Model<Input = RgbImage, Output = InferenceResult> + Send + Sync + 'static,
  M::Error: Display,
{
  pub fn new(
    controller: LoopController<O, M>,
    controls: ControlSurface,
    updates: Receiver<UiUpdate>,
    quit: Receiver<()>,
  ) -> Result<Self, OutputError> {
    let mut window = Window::new(
      WINDOW_TITLE,
      WINDOW_WIDTH,
      WINDOW_HEIGHT,
      WindowOptions::default(),
    )?;
    window.set_target_fps(60);

    Ok(Self {
      window,
      dashboard: Dashboard::new()?,
      controller,
      controls,
      updates,
      quit,
      buffer: Vec::with_capacity(WINDOW_WIDTH * WINDOW_HEIGHT),
      mouse_was_down: false,
    })
  }

  /// 启动采集；设备不可用时记录错误，并在空白的视频面板中提示
  pub fn start_capture(&mut self) {
    match self.controller.start() {
      Ok(()) => self.dashboard.set_device_error(None),
      Err(e) => {
        error!("无法启动采集: {}", e);
        self.dashboard.clear_video();
        // 内置字体只覆盖西文，完整错误见日志
        let source = self.controller.frame_source().describe();
        self.dashboard
          .set_device_error(Some(format!("Camera unavailable: {}", source)));
      }
    }
  }

  pub fn run(mut self) -> Result<(), OutputError> {
    info!("进入界面事件循环");
    while self.window.is_open() && !self.window.is_key_down(Key::Escape) {
      if self.quit.try_recv().is_ok() {
        info!("收到退出请求");
        break;
      }

      for control in self.poll_controls() {
        self.handle(control);
      }
      drain_updates(&self.updates, &mut self.dashboard);

      let canvas = self.dashboard.compose();
      to_argb_buffer(&canvas, &mut self.buffer);
      self
        .window
        .update_with_buffer(&self.buffer, WINDOW_WIDTH, WINDOW_HEIGHT)?;
    }

    // 先停止后台任务，避免窗口关闭后仍有回调
    self.controls.shutdown();
    self.controller.shutdown();
    info!("界面已关闭");
    Ok(())
  }

  fn poll_controls(&mut self) -> Vec<Control> {
    let mut controls = Vec::new();

    for key in self.window.get_keys_pressed(KeyRepeat::No) {
      let density = self.controls.traffic_density();
      match key {
        Key::S => controls.push(Control::Start),
        Key::X => controls.push(Control::Stop),
        Key::L => controls.push(Control::LaneSwitch),
        Key::O => controls.push(Control::Obstacle),
        Key::Up => controls.push(Control::TrafficDensity(density + 1.0)),
        Key::Down => controls.push(Control::TrafficDensity(density - 1.0)),
        _ => {}
      }
    }

    let mouse_down = self.window.get_mouse_down(MouseButton::Left);
    if let Some((x, y)) = self.window.get_mouse_pos(MouseMode::Discard) {
      match hit_test(x, y) {
        // 滑块拖动时持续回调
        Some(control @ Control::TrafficDensity(_)) if mouse_down => controls.push(control),
        Some(control) if mouse_down && !self.mouse_was_down => controls.push(control),
        _ => {}
      }
    }
    self.mouse_was_down = mouse_down;

    controls
  }

  fn handle(&mut self, control: Control) {
    match control {
      Control::Start => self.start_capture(),
      Control::Stop => self.controller.stop(),
      Control::TrafficDensity(value) => {
        let value = self.controls.set_traffic_density(value);
        self.dashboard.set_traffic_density(value);
      }
      Control::LaneSwitch => self.controls.trigger_lane_switch(),
      Control::Obstacle => self.controls.trigger_obstacle(),
    }
  }
}
