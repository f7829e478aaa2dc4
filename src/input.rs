// 该文件是 Xunlu （巡路） 项目的一部分。
// src/input.rs - 帧源与设备生命周期
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

use std::sync::{
  Arc, Mutex, MutexGuard, PoisonError,
  atomic::{AtomicU64, Ordering},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, frame::Frame};

mod read_image_file;
pub use self::read_image_file::{ImageFileDevice, ImageFileOpener};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lDevice, V4lOpener};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("设备不可用: {0}")]
  DeviceUnavailable(String),
  #[error("采集失败: {0}")]
  CaptureFailed(String),
  #[error("设备已释放")]
  DeviceReleased,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 已打开的采集设备
pub trait CaptureDevice: Send {
  fn capture(&mut self) -> Result<RgbImage, InputError>;
}

/// 按需打开设备，`FrameSource` 在 `open()` 时调用
pub trait OpenDevice: Send + Sync + 'static {
  type Device: CaptureDevice + 'static;

  fn open(&self) -> Result<Self::Device, InputError>;

  fn describe(&self) -> String;
}

/// 设备槽位：`generation` 在每次释放时递增
struct Slot<D> {
  device: Option<D>,
  open: bool,
  generation: u64,
}

/// 帧源：独占设备句柄，负责打开、读取与释放
///
/// 读取时把设备从槽位中取出，采集期间不持有锁，`close()` 因此不会等待
/// 卡住的采集。采集结束后只有在期间没有发生释放时才放回设备，否则直接丢弃，
/// 之后的读取只会得到 [`InputError::DeviceReleased`]。
pub struct FrameSource<O: OpenDevice> {
  opener: Arc<O>,
  slot: Arc<Mutex<Slot<O::Device>>>,
  frame_index: Arc<AtomicU64>,
}

impl<O: OpenDevice> Clone for FrameSource<O> {
  fn clone(&self) -> Self {
    Self {
      opener: Arc::clone(&self.opener),
      slot: Arc::clone(&self.slot),
      frame_index: Arc::clone(&self.frame_index),
    }
  }
}

impl<O: OpenDevice> FrameSource<O> {
  pub fn new(opener: O) -> Self {
    Self {
      opener: Arc::new(opener),
      slot: Arc::new(Mutex::new(Slot {
        device: None,
        open: false,
        generation: 0,
      })),
      frame_index: Arc::new(AtomicU64::new(0)),
    }
  }

  fn slot(&self) -> MutexGuard<'_, Slot<O::Device>> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 打开设备；已打开时直接返回
  pub fn open(&self) -> Result<(), InputError> {
    let mut slot = self.slot();
    if slot.open {
      return Ok(());
    }
    info!("打开设备: {}", self.opener.describe());
    let device = self.opener.open()?;
    slot.device = Some(device);
    slot.open = true;
    self.frame_index.store(0, Ordering::Relaxed);
    Ok(())
  }

  pub fn read_frame(&self) -> Result<Frame, InputError> {
    let (mut device, generation) = {
      let mut slot = self.slot();
      if !slot.open {
        return Err(InputError::DeviceReleased);
      }
      let device = slot
        .device
        .take()
        .ok_or_else(|| InputError::CaptureFailed("设备正被另一次读取占用".to_string()))?;
      (device, slot.generation)
    };

    let captured = device.capture();

    {
      let mut slot = self.slot();
      if slot.open && slot.generation == generation {
        slot.device = Some(device);
      } else {
        drop(slot);
        debug!("读取期间设备已被释放，丢弃本次采集");
        drop(device);
        return Err(InputError::DeviceReleased);
      }
    }

    let image = captured?;
    let index = self.frame_index.fetch_add(1, Ordering::Relaxed);
    Ok(Frame::new(image, index))
  }

  /// 释放设备，不等待正在进行的读取；被读取占用的设备由读取方丢弃
  pub fn close(&self) {
    let device = {
      let mut slot = self.slot();
      if !slot.open {
        debug!("设备未打开，无需释放");
        return;
      }
      slot.open = false;
      slot.generation += 1;
      slot.device.take()
    };
    if device.is_none() {
      debug!("设备正在读取中，读取结束后释放");
    }
    drop(device);
    info!("设备已释放: {}", self.opener.describe());
  }

  pub fn is_open(&self) -> bool {
    self.slot().open
  }

  pub fn describe(&self) -> String {
    self.opener.describe()
  }
}

pub enum InputWrapper {
  #[cfg(feature = "v4l_input")]
  V4l(V4lOpener),
  ImageFile(ImageFileOpener),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    #[cfg(feature = "v4l_input")]
    {
      if url.scheme() == V4lOpener::SCHEME {
        return Ok(InputWrapper::V4l(V4lOpener::from_url(url)?));
      }
    }
    if url.scheme() == ImageFileOpener::SCHEME {
      return Ok(InputWrapper::ImageFile(ImageFileOpener::from_url(url)?));
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

pub enum DeviceWrapper {
  #[cfg(feature = "v4l_input")]
  V4l(V4lDevice),
  ImageFile(ImageFileDevice),
}

impl CaptureDevice for DeviceWrapper {
  fn capture(&mut self) -> Result<RgbImage, InputError> {
    match self {
      #[cfg(feature = "v4l_input")]
      DeviceWrapper::V4l(device) => device.capture(),
      DeviceWrapper::ImageFile(device) => device.capture(),
    }
  }
}

impl OpenDevice for InputWrapper {
  type Device = DeviceWrapper;

  fn open(&self) -> Result<Self::Device, InputError> {
    match self {
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(opener) => opener.open().map(DeviceWrapper::V4l),
      InputWrapper::ImageFile(opener) => opener.open().map(DeviceWrapper::ImageFile),
    }
  }

  fn describe(&self) -> String {
    match self {
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(opener) => opener.describe(),
      InputWrapper::ImageFile(opener) => opener.describe(),
    }
  }
}
