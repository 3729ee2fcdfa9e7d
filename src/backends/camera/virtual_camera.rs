// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera platform
//!
//! An in-process platform whose devices, permission answer, security context
//! and frame content are all scripted. Streams replay a list of frames (for
//! example images loaded from disk) at a fixed interval.
//!
//! The platform keeps counters of open streams so callers can verify that
//! no two streams were ever live at the same time.

use super::types::*;
use super::{CameraPlatform, CameraStream};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

/// Frames a virtual device replays once its stream is opened
#[derive(Debug, Clone, Default)]
pub struct FrameScript {
    pub frames: Vec<CameraFrame>,
    /// Delay between frames
    pub interval: Duration,
    /// Start over after the last frame
    pub looped: bool,
    /// Close the frame channel after the last frame. The device stays held
    /// until the stream is stopped either way.
    pub ends: bool,
}

impl FrameScript {
    /// Replay `frames` once, `interval` apart, then end the stream
    pub fn once(frames: Vec<CameraFrame>, interval: Duration) -> Self {
        Self {
            frames,
            interval,
            looped: false,
            ends: true,
        }
    }

    /// Replay `frames` forever, `interval` apart
    pub fn looped(frames: Vec<CameraFrame>, interval: Duration) -> Self {
        Self {
            frames,
            interval,
            looped: true,
            ends: false,
        }
    }
}

/// Load image files as grayscale frames
pub fn frames_from_images<P: AsRef<Path>>(paths: &[P]) -> BackendResult<Vec<CameraFrame>> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let img = image::open(path)
                .map_err(|e| BackendError::IoError(format!("{}: {}", path.display(), e)))?
                .to_luma8();
            let (width, height) = img.dimensions();
            debug!(path = %path.display(), width, height, "Loaded virtual frame");
            Ok(CameraFrame::gray(width, height, img.into_raw()))
        })
        .collect()
}

struct VirtualDevice {
    device: CameraDevice,
    script: FrameScript,
}

struct VirtualState {
    origin: HostOrigin,
    devices: Vec<VirtualDevice>,
    permission_granted: bool,
    open_delay: Duration,
    stop_delay: Duration,
    next_device: u32,
    active_streams: usize,
    max_concurrent_streams: usize,
    streams_opened: usize,
    permission_prompts: usize,
}

/// Scripted camera platform
///
/// Cloning shares the underlying state, so a test can keep one clone for
/// scripting while the arbiter owns another.
#[derive(Clone)]
pub struct VirtualPlatform {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualPlatform {
    /// Create a platform with no devices and permission granted
    pub fn new(origin: HostOrigin) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                origin,
                devices: Vec::new(),
                permission_granted: true,
                open_delay: Duration::ZERO,
                stop_delay: Duration::ZERO,
                next_device: 0,
                active_streams: 0,
                max_concurrent_streams: 0,
                streams_opened: 0,
                permission_prompts: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VirtualState> {
        // Poisoning only happens if a test panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a device that replays `script`; returns its id
    pub fn attach_device(&self, label: &str, script: FrameScript) -> String {
        let mut state = self.lock();
        let id = format!("virtual:{}", state.next_device);
        state.next_device += 1;
        let (width, height) = script
            .frames
            .first()
            .map(|f| (f.width, f.height))
            .unwrap_or((640, 480));
        info!(id = %id, label, "Attaching virtual camera");
        state.devices.push(VirtualDevice {
            device: CameraDevice {
                id: id.clone(),
                label: label.to_string(),
                capabilities: DeviceCapabilities {
                    driver: "virtual".to_string(),
                    formats: vec![CameraFormat {
                        width,
                        height,
                        framerate: None,
                        pixel_format: "GREY".to_string(),
                    }],
                    supports_streaming: true,
                },
            },
            script,
        });
        id
    }

    /// Detach every device (open streams keep running until stopped)
    pub fn detach_all(&self) {
        self.lock().devices.clear();
    }

    /// Decide what the next permission prompt answers
    pub fn set_permission(&self, granted: bool) {
        self.lock().permission_granted = granted;
    }

    /// Change the hosting origin
    pub fn set_origin(&self, origin: HostOrigin) {
        self.lock().origin = origin;
    }

    /// Delay before `open_stream` resolves (simulates a slow permission prompt)
    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = delay;
    }

    /// Delay between a stop request and the device being released
    pub fn set_stop_delay(&self, delay: Duration) {
        self.lock().stop_delay = delay;
    }

    /// Streams currently holding a device
    pub fn active_streams(&self) -> usize {
        self.lock().active_streams
    }

    /// Highest number of simultaneously live streams ever observed
    pub fn max_concurrent_streams(&self) -> usize {
        self.lock().max_concurrent_streams
    }

    /// Total streams opened
    pub fn streams_opened(&self) -> usize {
        self.lock().streams_opened
    }

    /// Number of times permission was requested
    pub fn permission_prompts(&self) -> usize {
        self.lock().permission_prompts
    }
}

impl CameraPlatform for VirtualPlatform {
    fn platform_type(&self) -> CameraPlatformType {
        CameraPlatformType::Virtual
    }

    fn origin(&self) -> HostOrigin {
        self.lock().origin.clone()
    }

    fn is_available(&self) -> bool {
        true
    }

    fn enumerate_cameras(&self) -> BoxFuture<'_, BackendResult<Vec<CameraDevice>>> {
        let devices = self
            .lock()
            .devices
            .iter()
            .map(|d| d.device.clone())
            .collect();
        futures::future::ready(Ok(devices)).boxed()
    }

    fn open_stream<'a>(
        &'a self,
        device: &'a CameraDevice,
        _request: &'a StreamRequest,
    ) -> BoxFuture<'a, BackendResult<Box<dyn CameraStream>>> {
        async move {
            let open_delay = {
                let mut state = self.lock();
                state.permission_prompts += 1;
                state.open_delay
            };
            if !open_delay.is_zero() {
                tokio::time::sleep(open_delay).await;
            }

            let (script, stop_delay) = {
                let mut state = self.lock();
                if !state.permission_granted {
                    return Err(BackendError::PermissionDenied(
                        "Permission denied by user".to_string(),
                    ));
                }
                let script = state
                    .devices
                    .iter()
                    .find(|d| d.device.id == device.id)
                    .map(|d| d.script.clone())
                    .ok_or_else(|| BackendError::DeviceNotFound(device.id.clone()))?;

                state.active_streams += 1;
                state.streams_opened += 1;
                state.max_concurrent_streams =
                    state.max_concurrent_streams.max(state.active_streams);
                (script, state.stop_delay)
            };

            let stream = VirtualStream::spawn(Arc::clone(&self.state), device.clone(), script, stop_delay);
            Ok(Box::new(stream) as Box<dyn CameraStream>)
        }
        .boxed()
    }
}

struct VirtualStream {
    device: CameraDevice,
    format: CameraFormat,
    frames: Option<FrameReceiver>,
    stop_tx: watch::Sender<bool>,
    done_rx: Option<oneshot::Receiver<()>>,
}

impl VirtualStream {
    fn spawn(
        state: Arc<Mutex<VirtualState>>,
        device: CameraDevice,
        script: FrameScript,
        stop_delay: Duration,
    ) -> Self {
        let (mut sender, receiver) = futures::channel::mpsc::channel::<CameraFrame>(4);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();
        let format = device
            .capabilities
            .formats
            .first()
            .cloned()
            .unwrap_or(CameraFormat {
                width: 0,
                height: 0,
                framerate: None,
                pixel_format: "GREY".to_string(),
            });
        let id = device.id.clone();

        tokio::spawn(async move {
            debug!(device = %id, frames = script.frames.len(), "Virtual stream started");
            let mut index = 0usize;
            loop {
                let next = if index < script.frames.len() {
                    let mut frame = script.frames[index].clone();
                    frame.captured_at = Instant::now();
                    Some(frame)
                } else {
                    None
                };

                tokio::select! {
                    _ = stop_rx.changed() => break,
                    sent = async {
                        match next {
                            Some(frame) => {
                                if !script.interval.is_zero() {
                                    tokio::time::sleep(script.interval).await;
                                }
                                sender.send(frame).await.is_ok()
                            }
                            None if script.ends => false,
                            // Script exhausted: keep the camera "on" until stopped
                            None => futures::future::pending::<bool>().await,
                        }
                    } => {
                        if !sent {
                            debug!(device = %id, "Virtual stream has no more frames to deliver");
                            sender.close_channel();
                            // Keep holding the device until stopped
                            let _ = stop_rx.changed().await;
                            break;
                        }
                    }
                }

                index += 1;
                if index >= script.frames.len() && script.looped {
                    index = 0;
                }
            }

            drop(sender);
            if !stop_delay.is_zero() {
                tokio::time::sleep(stop_delay).await;
            }
            {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.active_streams = state.active_streams.saturating_sub(1);
            }
            debug!(device = %id, "Virtual stream released device");
            let _ = done_tx.send(());
        });

        Self {
            device,
            format,
            frames: Some(receiver),
            stop_tx,
            done_rx: Some(done_rx),
        }
    }
}

impl CameraStream for VirtualStream {
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
        self.stop_tx.send_replace(true);
        match self.done_rx.take() {
            Some(done) => async move {
                done.await
                    .map_err(|_| BackendError::Crashed("virtual stream task vanished".into()))
            }
            .boxed(),
            None => futures::future::ready(Ok(())).boxed(),
        }
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}
