// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 camera platform
//!
//! Captures YUYV (or GREY when the driver offers nothing better) through
//! memory-mapped buffers on a dedicated capture thread. Only the luma plane
//! matters for code detection, so no colour conversion happens here.

use super::capture_thread::{CaptureThread, LoopAction};
use super::types::*;
use super::{CameraPlatform, CameraStream};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;
use v4l::video::capture::Parameters;

/// Number of mmap buffers queued with the driver
const BUFFER_COUNT: u32 = 4;

/// Give up after this many consecutive dequeue failures (device unplugged)
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// Dequeue timeout, so the capture loop notices stop requests
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// V4L2 platform
pub struct V4l2Platform {
    origin: HostOrigin,
}

impl V4l2Platform {
    pub fn new(origin: HostOrigin) -> Self {
        Self { origin }
    }
}

impl CameraPlatform for V4l2Platform {
    fn platform_type(&self) -> CameraPlatformType {
        CameraPlatformType::V4l2
    }

    fn origin(&self) -> HostOrigin {
        self.origin.clone()
    }

    fn is_available(&self) -> bool {
        std::path::Path::new("/dev").exists()
    }

    fn enumerate_cameras(&self) -> BoxFuture<'_, BackendResult<Vec<CameraDevice>>> {
        async {
            tokio::task::spawn_blocking(enumerate_blocking)
                .await
                .map_err(|e| BackendError::Other(e.to_string()))
        }
        .boxed()
    }

    fn open_stream<'a>(
        &'a self,
        device: &'a CameraDevice,
        request: &'a StreamRequest,
    ) -> BoxFuture<'a, BackendResult<Box<dyn CameraStream>>> {
        async move {
            let stream = V4l2Stream::open(device.clone(), request.clone()).await?;
            Ok(Box::new(stream) as Box<dyn CameraStream>)
        }
        .boxed()
    }
}

fn enumerate_blocking() -> Vec<CameraDevice> {
    let mut devices = Vec::new();

    for node in v4l::context::enum_devices() {
        let path = node.path().to_string_lossy().to_string();
        let fallback_label = node.name().unwrap_or_else(|| path.clone());

        let dev = match Device::with_path(node.path()) {
            Ok(dev) => dev,
            Err(e) => {
                // An unreadable node is still a camera; access is decided at open
                debug!(path = %path, error = %e, "Listing V4L2 node without capabilities");
                devices.push(CameraDevice {
                    id: path,
                    label: fallback_label,
                    capabilities: DeviceCapabilities::default(),
                });
                continue;
            }
        };

        let caps = match dev.query_caps() {
            Ok(caps) => caps,
            Err(e) => {
                debug!(path = %path, error = %e, "Skipping V4L2 node: query_caps failed");
                continue;
            }
        };

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            debug!(path = %path, card = %caps.card, "Skipping non-capture V4L2 node");
            continue;
        }

        let formats = dev
            .enum_formats()
            .into_iter()
            .flatten()
            .map(|desc| CameraFormat {
                width: 0,
                height: 0,
                framerate: None,
                pixel_format: fourcc_name(desc.fourcc),
            })
            .collect();

        info!(path = %path, card = %caps.card, driver = %caps.driver, "Found V4L2 camera");
        devices.push(CameraDevice {
            id: path,
            label: caps.card.clone(),
            capabilities: DeviceCapabilities {
                driver: caps.driver.clone(),
                formats,
                supports_streaming: caps
                    .capabilities
                    .contains(v4l::capability::Flags::STREAMING),
            },
        });
    }

    devices
}

fn fourcc_name(fourcc: FourCC) -> String {
    fourcc
        .str()
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| format!("{:?}", fourcc))
}

/// Negotiate a format on `dev`, preferring YUYV then GREY
fn negotiate_format(
    dev: &Device,
    path: &str,
    request: &StreamRequest,
) -> BackendResult<(v4l::Format, PixelFormat)> {
    let mut format = dev.format().map_err(|e| BackendError::from_io(path, &e))?;
    format.width = request.width;
    format.height = request.height;

    for (code, pixel_format) in [(b"YUYV", PixelFormat::Yuyv), (b"GREY", PixelFormat::Gray8)] {
        format.fourcc = FourCC::new(code);
        match dev.set_format(&format) {
            Ok(actual) if actual.fourcc == format.fourcc => {
                info!(
                    width = actual.width,
                    height = actual.height,
                    fourcc = %fourcc_name(actual.fourcc),
                    "Set V4L2 format"
                );
                return Ok((actual, pixel_format));
            }
            Ok(actual) => {
                debug!(
                    wanted = %fourcc_name(format.fourcc),
                    got = %fourcc_name(actual.fourcc),
                    "Driver substituted format"
                );
            }
            Err(e) => {
                debug!(fourcc = %fourcc_name(format.fourcc), error = %e, "set_format failed");
            }
        }
    }

    Err(BackendError::FormatNotSupported(format!(
        "{} offers neither YUYV nor GREY",
        path
    )))
}

struct CaptureState {
    stream: MmapStream<'static>,
    sender: FrameSender,
    width: u32,
    height: u32,
    stride: u32,
    pixel_format: PixelFormat,
    consecutive_errors: u32,
    frames: u64,
}

impl CaptureState {
    fn step(&mut self) -> LoopAction {
        let buf = match self.stream.next() {
            Ok((buf, _meta)) => buf,
            Err(e) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(error = %e, "Too many capture errors, stopping stream");
                    return LoopAction::Stop;
                }
                debug!(error = %e, "Failed to dequeue frame");
                std::thread::sleep(Duration::from_millis(10));
                return LoopAction::Continue;
            }
        };
        self.consecutive_errors = 0;
        self.frames += 1;

        let expected = self.stride as usize * self.height as usize;
        if buf.len() < expected {
            if self.frames % 30 == 1 {
                warn!(got = buf.len(), expected, "Short V4L2 buffer, dropping frame");
            }
            return LoopAction::Continue;
        }

        let frame = CameraFrame {
            width: self.width,
            height: self.height,
            data: Arc::from(&buf[..expected]),
            format: self.pixel_format,
            stride: self.stride,
            captured_at: Instant::now(),
        };

        match self.sender.try_send(frame) {
            Ok(()) => LoopAction::Continue,
            Err(e) if e.is_disconnected() => {
                debug!("Frame receiver dropped, stopping capture");
                LoopAction::Stop
            }
            // Consumer is busy decoding; newer frames will follow
            Err(_) => LoopAction::Continue,
        }
    }
}

struct V4l2Stream {
    device: CameraDevice,
    format: CameraFormat,
    frames: Option<FrameReceiver>,
    thread: CaptureThread,
}

impl V4l2Stream {
    async fn open(device: CameraDevice, request: StreamRequest) -> BackendResult<Self> {
        let path = device.id.clone();
        info!(path = %path, width = request.width, height = request.height, "Opening V4L2 device");

        // Opening and negotiating block; do it off the async runtime
        let probe_path = path.clone();
        let probe_request = request.clone();
        let (format, pixel_format) = tokio::task::spawn_blocking(move || {
            let dev =
                Device::with_path(&probe_path).map_err(|e| BackendError::from_io(&probe_path, &e))?;
            let (format, pixel_format) = negotiate_format(&dev, &probe_path, &probe_request)?;
            let fps = probe_request.framerate.as_int().max(1);
            if let Err(e) = dev.set_params(&Parameters::with_fps(fps)) {
                debug!(fps, error = %e, "Could not set frame interval");
            }
            Ok::<_, BackendError>((format, pixel_format))
        })
        .await
        .map_err(|e| BackendError::Other(e.to_string()))??;

        let (sender, receiver) =
            futures::channel::mpsc::channel(crate::constants::capture::FRAME_QUEUE);
        let width = format.width;
        let height = format.height;
        let stride = if format.stride > 0 {
            format.stride
        } else {
            width * pixel_format.bytes_per_pixel() as u32
        };

        let init_path = path.clone();
        let init_format = format.clone();
        let mut thread = CaptureThread::start_with_init(
            &format!("v4l2-capture {}", path),
            move || {
                let dev = Device::with_path(&init_path)
                    .map_err(|e| BackendError::from_io(&init_path, &e).to_string())?;
                dev.set_format(&init_format)
                    .map_err(|e| format!("set_format: {}", e))?;
                let mut stream = MmapStream::with_buffers(&dev, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|e| format!("Failed to create buffer stream: {}", e))?;
                stream.set_timeout(DEQUEUE_TIMEOUT);
                info!(path = %init_path, "V4L2 capture stream started");
                Ok(CaptureState {
                    stream,
                    sender,
                    width,
                    height,
                    stride,
                    pixel_format,
                    consecutive_errors: 0,
                    frames: 0,
                })
            },
            CaptureState::step,
        );
        thread.wait_ready().await?;

        let framerate = Framerate::from_int(request.framerate.as_int());
        Ok(Self {
            format: CameraFormat {
                width,
                height,
                framerate: Some(framerate),
                pixel_format: fourcc_name(format.fourcc),
            },
            device,
            frames: Some(receiver),
            thread,
        })
    }
}

impl CameraStream for V4l2Stream {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn format(&self) -> &CameraFormat {
        &self.format
    }

    fn take_frames(&mut self) -> Option<FrameReceiver> {
        self.frames.take()
    }

    fn stop(&mut self) -> BoxFuture<'static, BackendResult<()>> {
        info!(path = %self.device.id, "Stopping V4L2 stream");
        self.thread.stop()
    }
}
