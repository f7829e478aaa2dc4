// 该文件是 Xunlu （巡路） 项目的一部分。
// src/input/read_image_file.rs - 静态图片输入（模拟摄像头）
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

use std::path::PathBuf;

use image::{ImageReader, RgbImage};
use tracing::error;
use url::Url;

use super::{CaptureDevice, InputError, OpenDevice};
use crate::{FromUrl, FromUrlWithScheme};

/// 把一张图片当作摄像头反复输出，没有摄像头时用于演示
#[derive(Debug, Clone)]
pub struct ImageFileOpener {
  path: PathBuf,
}

impl ImageFileOpener {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl FromUrlWithScheme for ImageFileOpener {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileOpener {
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

    // image:///tmp/my%20road.png，路径需要先做百分号解码
    if url.host_str().is_some_and(|host| !host.is_empty()) {
      return Err(InputError::DeviceUnavailable(format!(
        "图片路径不能包含主机名: {}",
        url
      )));
    }
    let path = urlencoding::decode(url.path())
      .map_err(|e| InputError::DeviceUnavailable(format!("无效的图片路径 {}: {}", url, e)))?;
    Ok(ImageFileOpener::new(path.into_owned()))
  }
}

impl OpenDevice for ImageFileOpener {
  type Device = ImageFileDevice;

  fn open(&self) -> Result<Self::Device, InputError> {
    let unavailable = |e: &dyn std::fmt::Display| {
      InputError::DeviceUnavailable(format!("{}: {}", self.path.display(), e))
    };
    let image = ImageReader::open(&self.path)
      .map_err(|e| unavailable(&e))?
      .decode()
      .map_err(|e| unavailable(&e))?;

    Ok(ImageFileDevice {
      image: image.to_rgb8(),
    })
  }

  fn describe(&self) -> String {
    format!("image://{}", self.path.display())
  }
}

pub struct ImageFileDevice {
  image: RgbImage,
}

impl CaptureDevice for ImageFileDevice {
  fn capture(&mut self) -> Result<RgbImage, InputError> {
    Ok(self.image.clone())
  }
}
