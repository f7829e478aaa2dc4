// 该文件是 Xunlu （巡路） 项目的一部分。
// src/task.rs - 采集/推理/渲染循环控制器
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

use std::{
  fmt::Display,
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  input::{FrameSource, InputError, OpenDevice},
  model::{InferenceResult, Model},
  output::{Metrics, UiUpdate, draw::Overlay},
};

/// 两次迭代之间的固定间隔，与处理耗时无关
pub const FRAME_INTERVAL: Duration = Duration::from_millis(30);

const FPS_SMOOTHING: f64 = 0.2;

#[derive(Error, Debug)]
pub enum TaskError {
  #[error(transparent)]
  Input(#[from] InputError),
  #[error("无法创建工作线程: {0}")]
  Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  Stopped,
  Running,
}

/// 一次运行的开关，由控制器持有并按句柄交给对应的工作线程
#[derive(Debug, Clone)]
pub struct RunState(Arc<AtomicBool>);

impl RunState {
  fn new() -> Self {
    Self(Arc::new(AtomicBool::new(true)))
  }

  pub fn is_running(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }

  fn stop(&self) {
    self.0.store(false, Ordering::Release);
  }
}

/// 按成功帧之间的间隔估计帧率（指数平滑）
#[derive(Debug, Default)]
pub struct FpsMeter {
  last: Option<Instant>,
  estimate: Option<f64>,
}

impl FpsMeter {
  pub fn tick(&mut self, now: Instant) -> f64 {
    let Some(previous) = self.last.replace(now) else {
      return 0.0;
    };
    let elapsed = now.saturating_duration_since(previous).as_secs_f64();
    if elapsed <= 0.0 {
      return self.estimate.unwrap_or(0.0);
    }
    let instant = 1.0 / elapsed;
    let estimate = match self.estimate {
      Some(estimate) => estimate + FPS_SMOOTHING * (instant - estimate),
      None => instant,
    };
    self.estimate = Some(estimate);
    estimate
  }
}

/// 单次迭代的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
  Presented,
  Skipped,
}

struct Worker<O: OpenDevice, M> {
  source: FrameSource<O>,
  model: Arc<M>,
  overlay: Arc<Overlay>,
  updates: Sender<UiUpdate>,
  interval: Duration,
  run: RunState,
  lease: Arc<Mutex<()>>,
}

impl<O, M> Worker<O, M>
where
  O: OpenDevice,
  M: Model<Input = RgbImage, Output = InferenceResult>,
  M::Error: Display,
{
  fn run(self) {
    // 持有租约期间才迭代，保证同一时刻只有一个工作线程在运行循环
    let _lease = self.lease.lock().unwrap_or_else(PoisonError::into_inner);
    if !self.run.is_running() {
      debug!("工作线程在启动前已被停止");
      return;
    }

    info!("开始采集循环: {}", self.source.describe());
    let mut fps = FpsMeter::default();
    let mut frame_index = 0u64;
    while self.run.is_running() {
      if self.iterate(&mut fps) == Iteration::Presented {
        frame_index += 1;
      }
      thread::sleep(self.interval);
    }
    info!("采集循环退出，共显示 {} 帧", frame_index);
  }

  fn iterate(&self, fps: &mut FpsMeter) -> Iteration {
    // 睡眠期间可能已被停止，设备也可能已被下一次运行重新打开
    if !self.run.is_running() {
      return Iteration::Skipped;
    }
    let frame = match self.source.read_frame() {
      Ok(frame) => frame,
      Err(e) => {
        debug!("跳过本次迭代: {}", e);
        return Iteration::Skipped;
      }
    };
    if !self.run.is_running() {
      debug!("读取期间已停止，丢弃第 {} 帧", frame.index);
      return Iteration::Skipped;
    }

    let now = Instant::now();
    let result = match self.model.infer(&frame.image) {
      Ok(result) => result,
      Err(e) => {
        warn!("第 {} 帧推理失败: {}", frame.index, e);
        InferenceResult::empty()
      }
    };
    debug!("第 {} 帧推理耗时: {:.2?}", frame.index, now.elapsed());

    let metrics = Metrics {
      fps: fps.tick(Instant::now()),
      object_count: result.object_count(),
    };
    let frame = self.overlay.annotate(frame, &result);

    if self.updates.send(UiUpdate::Frame(frame)).is_err()
      || self.updates.send(UiUpdate::Metrics(metrics)).is_err()
    {
      debug!("界面队列已关闭");
    }
    Iteration::Presented
  }
}

/// 循环控制器：持有运行开关与工作线程
///
/// `start()` 打开设备并启动一个工作线程；`stop()` 关闭开关并释放设备，
/// 工作线程在当前迭代结束后自行退出。
pub struct LoopController<O: OpenDevice, M> {
  source: FrameSource<O>,
  model: Arc<M>,
  overlay: Arc<Overlay>,
  updates: Sender<UiUpdate>,
  interval: Duration,
  run: Option<RunState>,
  lease: Arc<Mutex<()>>,
  workers: Vec<thread::JoinHandle<()>>,
}

impl<O, M> LoopController<O, M>
where
  O: OpenDevice,
  M: Model<Input = RgbImage, Output = InferenceResult> + Send + Sync + 'static,
  M::Error: Display,
{
  pub fn new(source: FrameSource<O>, model: M, overlay: Overlay, updates: Sender<UiUpdate>) -> Self {
    Self {
      source,
      model: Arc::new(model),
      overlay: Arc::new(overlay),
      updates,
      interval: FRAME_INTERVAL,
      run: None,
      lease: Arc::new(Mutex::new(())),
      workers: Vec::new(),
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn frame_source(&self) -> &FrameSource<O> {
    &self.source
  }

  /// 开关打开且最近的工作线程仍存活时为 `Running`
  pub fn state(&self) -> LoopState {
    let flag = self.run.as_ref().is_some_and(RunState::is_running);
    let alive = self.workers.last().is_some_and(|worker| !worker.is_finished());
    if flag && alive {
      LoopState::Running
    } else {
      LoopState::Stopped
    }
  }

  pub fn start(&mut self) -> Result<(), TaskError> {
    if self.state() == LoopState::Running {
      debug!("采集循环已在运行");
      return Ok(());
    }
    self.reap_workers();

    // 上一次运行的工作线程可能已异常退出，开关需要先关闭
    if let Some(run) = self.run.take() {
      run.stop();
    }

    self.source.open()?;

    let run = RunState::new();
    let worker = Worker {
      source: self.source.clone(),
      model: Arc::clone(&self.model),
      overlay: Arc::clone(&self.overlay),
      updates: self.updates.clone(),
      interval: self.interval,
      run: run.clone(),
      lease: Arc::clone(&self.lease),
    };
    let handle = thread::Builder::new()
      .name("xunlu-worker".to_string())
      .spawn(move || worker.run())?;

    self.run = Some(run);
    self.workers.push(handle);
    info!("采集循环已启动");
    Ok(())
  }

  pub fn stop(&mut self) {
    if let Some(run) = &self.run {
      run.stop();
    }
    self.source.close();
    self.reap_workers();
    info!("采集循环已停止");
  }

  /// 停止循环并等待所有工作线程退出
  pub fn shutdown(&mut self) {
    self.stop();
    for worker in self.workers.drain(..) {
      if worker.join().is_err() {
        warn!("工作线程异常退出");
      }
    }
  }

  fn reap_workers(&mut self) {
    let (finished, running): (Vec<_>, Vec<_>) = self
      .workers
      .drain(..)
      .partition(|worker| worker.is_finished());
    for worker in finished {
      if worker.join().is_err() {
        warn!("工作线程异常退出");
      }
    }
    self.workers = running;
  }
}

impl<O: OpenDevice, M> Drop for LoopController<O, M> {
  fn drop(&mut self) {
    if let Some(run) = &self.run {
      run.stop();
    }
    self.source.close();
    for worker in self.workers.drain(..) {
      let _ = worker.join();
    }
  }
}
