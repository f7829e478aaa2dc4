// 该文件是 Xunlu （巡路） 项目的一部分。
// tests/loop_controller.rs - 循环控制器集成测试
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
  collections::VecDeque,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use image::RgbImage;

use xunlu::{
  input::{CaptureDevice, FrameSource, InputError, OpenDevice},
  model::{Classifier, InferenceResult, Model, ModelError},
  output::{UiUpdate, draw::Overlay},
  task::{LoopController, LoopState, TaskError},
};

const TEST_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct Stats {
  opens: AtomicUsize,
  reads: AtomicUsize,
}

/// 按脚本返回成功或失败的模拟摄像头，脚本用完后按 `exhausted_ok` 决定
struct ScriptedCamera {
  script: Arc<Mutex<VecDeque<bool>>>,
  exhausted_ok: bool,
  fail_open: bool,
  stats: Arc<Stats>,
}

impl ScriptedCamera {
  fn new(script: &[bool], exhausted_ok: bool) -> (Self, Arc<Stats>) {
    let stats = Arc::new(Stats::default());
    let camera = Self {
      script: Arc::new(Mutex::new(script.iter().copied().collect())),
      exhausted_ok,
      fail_open: false,
      stats: Arc::clone(&stats),
    };
    (camera, stats)
  }

  fn unplugged() -> (Self, Arc<Stats>) {
    let (mut camera, stats) = Self::new(&[], true);
    camera.fail_open = true;
    (camera, stats)
  }
}

struct ScriptedDevice {
  script: Arc<Mutex<VecDeque<bool>>>,
  exhausted_ok: bool,
  stats: Arc<Stats>,
}

impl CaptureDevice for ScriptedDevice {
  fn capture(&mut self) -> Result<RgbImage, InputError> {
    self.stats.reads.fetch_add(1, Ordering::SeqCst);
    let ok = self
      .script
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or(self.exhausted_ok);
    if ok {
      Ok(RgbImage::new(320, 240))
    } else {
      Err(InputError::CaptureFailed("scripted failure".to_string()))
    }
  }
}

impl OpenDevice for ScriptedCamera {
  type Device = ScriptedDevice;

  fn open(&self) -> Result<Self::Device, InputError> {
    if self.fail_open {
      return Err(InputError::DeviceUnavailable("unplugged".to_string()));
    }
    self.stats.opens.fetch_add(1, Ordering::SeqCst);
    Ok(ScriptedDevice {
      script: Arc::clone(&self.script),
      exhausted_ok: self.exhausted_ok,
      stats: Arc::clone(&self.stats),
    })
  }

  fn describe(&self) -> String {
    "scripted".to_string()
  }
}

/// 记录并发推理数量的模型，用来观察同时在迭代的工作线程数
#[derive(Default)]
struct CountingModel {
  in_flight: Arc<AtomicUsize>,
  max_in_flight: Arc<AtomicUsize>,
  fail: bool,
}

impl Model for CountingModel {
  type Input = RgbImage;
  type Output = InferenceResult;
  type Error = ModelError;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(2));
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    if self.fail {
      Err(ModelError::Inference("scripted failure".to_string()))
    } else {
      Ok(InferenceResult::from_scores(vec![0.2, 0.8]))
    }
  }
}

/// 每次采集都会卡住数秒的摄像头
struct StalledCamera {
  stall: Duration,
  stats: Arc<Stats>,
}

struct StalledDevice {
  stall: Duration,
  stats: Arc<Stats>,
}

impl CaptureDevice for StalledDevice {
  fn capture(&mut self) -> Result<RgbImage, InputError> {
    self.stats.reads.fetch_add(1, Ordering::SeqCst);
    thread::sleep(self.stall);
    Ok(RgbImage::new(320, 240))
  }
}

impl OpenDevice for StalledCamera {
  type Device = StalledDevice;

  fn open(&self) -> Result<Self::Device, InputError> {
    self.stats.opens.fetch_add(1, Ordering::SeqCst);
    Ok(StalledDevice {
      stall: self.stall,
      stats: Arc::clone(&self.stats),
    })
  }

  fn describe(&self) -> String {
    "stalled".to_string()
  }
}

fn build<M>(camera: ScriptedCamera, model: M) -> (LoopController<ScriptedCamera, M>, Receiver<UiUpdate>)
where
  M: Model<Input = RgbImage, Output = InferenceResult, Error = ModelError> + Send + Sync + 'static,
{
  let (tx, rx) = crossbeam_channel::unbounded();
  let controller = LoopController::new(FrameSource::new(camera), model, Overlay::new().unwrap(), tx)
    .with_interval(TEST_INTERVAL);
  (controller, rx)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(1));
  }
  condition()
}

#[test]
fn metrics_follow_only_successful_captures() {
  let script = [true, false].repeat(5);
  let (camera, stats) = ScriptedCamera::new(&script, false);
  let (mut controller, rx) = build(camera, Classifier::degraded());

  controller.start().unwrap();
  assert!(wait_until(Duration::from_secs(5), || stats.reads.load(Ordering::SeqCst) >= 14));
  // 失败的迭代不会结束循环
  assert_eq!(controller.state(), LoopState::Running);
  controller.shutdown();

  let updates: Vec<UiUpdate> = rx.try_iter().collect();
  assert_eq!(updates.len(), 10);
  for pair in updates.chunks(2) {
    assert!(matches!(pair[0], UiUpdate::Frame(_)));
    assert!(matches!(pair[1], UiUpdate::Metrics(_)));
  }
}

#[test]
fn degraded_model_still_presents_frames() {
  let (camera, _stats) = ScriptedCamera::new(&[], true);
  let (mut controller, rx) = build(camera, Classifier::degraded());

  controller.start().unwrap();
  let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
  let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
  controller.shutdown();

  match first {
    UiUpdate::Frame(frame) => {
      assert_eq!(frame.image.dimensions(), (320, 240));
      // 叠加层与推理结果无关
      assert_eq!(frame.image.get_pixel(50, 50), &image::Rgb([0, 255, 0]));
    }
    other => panic!("expected frame, got {other:?}"),
  }
  match second {
    UiUpdate::Metrics(metrics) => assert_eq!(metrics.object_count, 0),
    other => panic!("expected metrics, got {other:?}"),
  }
}

#[test]
fn inference_failure_does_not_stop_the_loop() {
  let (camera, stats) = ScriptedCamera::new(&[], true);
  let model = CountingModel {
    fail: true,
    ..Default::default()
  };
  let (mut controller, rx) = build(camera, model);

  controller.start().unwrap();
  assert!(wait_until(Duration::from_secs(5), || stats.reads.load(Ordering::SeqCst) >= 3));
  assert_eq!(controller.state(), LoopState::Running);
  controller.shutdown();

  let metrics: Vec<_> = rx
    .try_iter()
    .filter_map(|update| match update {
      UiUpdate::Metrics(metrics) => Some(metrics),
      _ => None,
    })
    .collect();
  assert!(metrics.len() >= 3);
  assert!(metrics.iter().all(|m| m.object_count == 0));
}

#[test]
fn successful_inference_counts_one_object() {
  let (camera, _stats) = ScriptedCamera::new(&[], true);
  let (mut controller, rx) = build(camera, CountingModel::default());

  controller.start().unwrap();
  let metrics = loop {
    match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
      UiUpdate::Metrics(metrics) => break metrics,
      _ => continue,
    }
  };
  controller.shutdown();
  assert_eq!(metrics.object_count, 1);
}

#[test]
fn unavailable_device_is_never_read() {
  let (camera, stats) = ScriptedCamera::unplugged();
  let (mut controller, rx) = build(camera, Classifier::degraded());

  let err = controller.start().unwrap_err();
  assert!(matches!(err, TaskError::Input(InputError::DeviceUnavailable(_))));
  assert_eq!(controller.state(), LoopState::Stopped);

  thread::sleep(Duration::from_millis(50));
  assert_eq!(stats.reads.load(Ordering::SeqCst), 0);
  assert!(rx.try_recv().is_err());
}

#[test]
fn start_while_running_is_a_no_op() {
  let (camera, stats) = ScriptedCamera::new(&[], true);
  let model = CountingModel::default();
  let max_in_flight = Arc::clone(&model.max_in_flight);
  let (mut controller, _rx) = build(camera, model);

  controller.start().unwrap();
  controller.start().unwrap();
  controller.start().unwrap();
  thread::sleep(Duration::from_millis(50));
  assert_eq!(stats.opens.load(Ordering::SeqCst), 1);
  assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
  controller.shutdown();
}

#[test]
fn stop_releases_the_device() {
  let (camera, stats) = ScriptedCamera::new(&[], true);
  let (mut controller, _rx) = build(camera, Classifier::degraded());

  controller.start().unwrap();
  assert!(controller.frame_source().is_open());
  controller.stop();
  assert!(!controller.frame_source().is_open());
  assert_eq!(controller.state(), LoopState::Stopped);

  // 最多完成当前迭代，之后不再读取
  thread::sleep(Duration::from_millis(30));
  let reads = stats.reads.load(Ordering::SeqCst);
  thread::sleep(Duration::from_millis(50));
  assert_eq!(stats.reads.load(Ordering::SeqCst), reads);
  controller.shutdown();
}

#[test]
fn restart_after_stop_resumes_with_a_single_worker() {
  let (camera, stats) = ScriptedCamera::new(&[], true);
  let model = CountingModel::default();
  let max_in_flight = Arc::clone(&model.max_in_flight);
  let (mut controller, rx) = build(camera, model);

  controller.start().unwrap();
  for _ in 0..20 {
    thread::sleep(Duration::from_millis(3));
    // 旧工作线程可能还没看到开关变化
    controller.stop();
    controller.start().unwrap();
  }
  assert_eq!(controller.state(), LoopState::Running);

  let before = stats.reads.load(Ordering::SeqCst);
  assert!(wait_until(Duration::from_secs(5), || {
    stats.reads.load(Ordering::SeqCst) >= before + 5
  }));
  assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
  controller.shutdown();

  assert!(rx.try_iter().any(|update| matches!(update, UiUpdate::Frame(_))));
  assert_eq!(stats.opens.load(Ordering::SeqCst), 21);
}

#[test]
fn stop_does_not_wait_for_a_stalled_read() {
  let stats = Arc::new(Stats::default());
  let camera = StalledCamera {
    stall: Duration::from_secs(3),
    stats: Arc::clone(&stats),
  };
  let (tx, rx) = crossbeam_channel::unbounded();
  let mut controller = LoopController::new(
    FrameSource::new(camera),
    Classifier::degraded(),
    Overlay::new().unwrap(),
    tx,
  )
  .with_interval(TEST_INTERVAL);

  controller.start().unwrap();
  assert!(wait_until(Duration::from_secs(5), || stats.reads.load(Ordering::SeqCst) >= 1));

  let started = Instant::now();
  controller.stop();
  let stalled = started.elapsed();
  assert!(stalled < Duration::from_millis(500), "stop() blocked for {stalled:?}");
  assert!(!controller.frame_source().is_open());
  assert_eq!(controller.state(), LoopState::Stopped);

  // 卡住的读取结束后，其结果不会被显示
  controller.shutdown();
  assert_eq!(stats.reads.load(Ordering::SeqCst), 1);
  assert!(rx.try_recv().is_err());
}
