// 该文件是 Xunlu （巡路） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use std::{pin::Pin, time::Duration};

use image::{ImageFormat, RgbImage};
use tracing::{debug, error, info};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{CaptureDevice, InputError, OpenDevice};
use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_DEVICE_PATH: &str = "/dev/video0";
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;
/// 单次取帧的最长等待，超时后本次迭代按采集失败跳过
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

/// V4L2 设备描述，`open()` 时才真正打开设备
#[derive(Debug, Clone)]
pub struct V4lOpener {
  device_path: String,
}

impl Default for V4lOpener {
  fn default() -> Self {
    Self {
      device_path: DEFAULT_DEVICE_PATH.to_string(),
    }
  }
}

impl FromUrlWithScheme for V4lOpener {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lOpener {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    // v4l:///dev/video0，路径为空时使用默认设备
    let device_path = match url.path() {
      "" | "/" => DEFAULT_DEVICE_PATH.to_string(),
      path => path.to_string(),
    };

    Ok(V4lOpener { device_path })
  }
}

impl OpenDevice for V4lOpener {
  type Device = V4lDevice;

  fn open(&self) -> Result<Self::Device, InputError> {
    V4lDevice::new(&self.device_path)
  }

  fn describe(&self) -> String {
    format!("v4l://{}", self.device_path)
  }
}

/// 已打开的 V4L2 摄像头
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box<Device>> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4lDevice {
  /// 捕获流（生命周期与 device 关联）
  stream: Option<Stream<'static>>,
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  device: Pin<Box<Device>>,
  width: u32,
  height: u32,
  fourcc: FourCC,
}

fn unavailable(path: &str, err: std::io::Error) -> InputError {
  InputError::DeviceUnavailable(format!("{}: {}", path, err))
}

impl V4lDevice {
  pub fn new(device_path: &str) -> Result<Self, InputError> {
    let device = Box::pin(Device::with_path(device_path).map_err(|e| unavailable(device_path, e))?);

    // 优先请求 YUYV，驱动可能协商成其它格式
    let mut format = device.format().map_err(|e| unavailable(device_path, e))?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| unavailable(device_path, e))?;
    info!(
      "摄像头格式: {}x{} {}",
      format.width, format.height, format.fourcc
    );

    let mut source = Self {
      stream: None,
      device,
      width: format.width,
      height: format.height,
      fourcc: format.fourcc,
    };

    // SAFETY: device 被 Pin<Box> 固定，不会移动；stream 在 Drop 中先于 device 释放
    let device_ref: &Device = &source.device;
    let mut stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, CAPTURE_BUFFERS)
        .map_err(|e| unavailable(device_path, e))?
    };
    stream.set_timeout(CAPTURE_TIMEOUT);

    source.stream = Some(stream);
    Ok(source)
  }

  fn decode(&self, data: &[u8]) -> Result<RgbImage, InputError> {
    match &self.fourcc.repr {
      b"YUYV" => {
        let rgb = yuyv_to_rgb(data, self.width, self.height);
        RgbImage::from_raw(self.width, self.height, rgb)
          .ok_or_else(|| InputError::CaptureFailed("YUYV 缓冲区长度不足".to_string()))
      }
      b"MJPG" => image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map(|image| image.to_rgb8())
        .map_err(|e| InputError::CaptureFailed(format!("MJPG 解码失败: {}", e))),
      b"RGB3" => RgbImage::from_raw(self.width, self.height, data.to_vec())
        .ok_or_else(|| InputError::CaptureFailed("RGB3 缓冲区长度不足".to_string())),
      other => Err(InputError::CaptureFailed(format!(
        "不支持的像素格式: {}",
        String::from_utf8_lossy(other)
      ))),
    }
  }
}

impl Drop for V4lDevice {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
    debug!("V4L2 捕获流已关闭");
  }
}

impl CaptureDevice for V4lDevice {
  fn capture(&mut self) -> Result<RgbImage, InputError> {
    let stream = self.stream.as_mut().ok_or(InputError::DeviceReleased)?;
    let (buffer, meta) = stream
      .next()
      .map_err(|e| InputError::CaptureFailed(e.to_string()))?;
    let used = (meta.bytesused as usize).min(buffer.len());
    let data = if used == 0 { buffer } else { &buffer[..used] };
    let data = data.to_vec();
    self.decode(&data)
  }
}

/// 将 YUYV 格式转换为 RGB
pub(crate) fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let pixels = (width * height) as usize;
  let mut rgb = Vec::with_capacity(pixels * 3);

  for chunk in yuyv.chunks_exact(4).take(pixels / 2) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}
