// SPDX-License-Identifier: GPL-3.0-only

//! Exclusive camera arbitration
//!
//! The arbiter provides:
//! - At most one outstanding [`CameraHandle`] process-wide
//! - Preempt-with-drain: a new request stops the current holder's stream and
//!   waits (bounded) for the device to be released before granting
//! - Idempotent release
//!
//! Every acquire and release runs under one async mutex, held across the
//! drain, so two requests can never interleave their device operations.

use super::types::*;
use super::{CameraPlatform, CameraStream};
use crate::errors::CameraError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

static NEXT_ARBITER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a granted handle, unique per arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who asked for the camera, and for which attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requestor {
    /// Owning scan session
    pub owner: String,
    /// Session generation at the time of the request
    pub generation: u64,
}

impl Requestor {
    pub fn new(owner: impl Into<String>, generation: u64) -> Self {
        Self {
            owner: owner.into(),
            generation,
        }
    }
}

impl std::fmt::Display for Requestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.owner, self.generation)
    }
}

/// Exclusive right to the camera
///
/// Not cloneable. Pass it back to [`CameraResourceArbiter::release`] when
/// done; a handle dropped without release is released in the background.
/// A handle becomes invalid once released or preempted.
pub struct CameraHandle {
    id: HandleId,
    requestor: Requestor,
    device: CameraDevice,
    format: CameraFormat,
    frames: Option<FrameReceiver>,
    revoked: watch::Receiver<bool>,
    arbiter_id: u64,
    arbiter: Weak<ArbiterInner>,
    released: bool,
}

impl CameraHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn requestor(&self) -> &Requestor {
        &self.requestor
    }

    /// Session generation this handle was granted for
    pub fn generation(&self) -> u64 {
        self.requestor.generation
    }

    pub fn device(&self) -> &CameraDevice {
        &self.device
    }

    pub fn format(&self) -> &CameraFormat {
        &self.format
    }

    /// Take the stream's frame receiver. Returns `None` after the first call.
    pub fn take_frames(&mut self) -> Option<FrameReceiver> {
        self.frames.take()
    }

    /// True once another requester preempted this handle
    pub fn is_revoked(&self) -> bool {
        *self.revoked.borrow()
    }

    /// A receiver that flips to `true` when the handle is preempted
    pub fn revocation(&self) -> watch::Receiver<bool> {
        self.revoked.clone()
    }
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("id", &self.id)
            .field("requestor", &self.requestor)
            .field("device", &self.device.id)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        if self.released || self.is_revoked() {
            return;
        }
        let Some(inner) = self.arbiter.upgrade() else {
            return;
        };
        let id = self.id;
        warn!(handle = %id, requestor = %self.requestor, "Camera handle dropped without release");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                inner.release_by_id(id).await;
            });
        }
    }
}

/// Arbiter settings
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// How long to wait for a preempted stream to confirm it stopped
    pub drain_grace: Duration,
    /// Device to prefer when several are present
    pub preferred_device: Option<String>,
    /// Stream parameters requested from the device
    pub stream: StreamRequest,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            drain_grace: crate::constants::DEFAULT_DRAIN_GRACE,
            preferred_device: None,
            stream: StreamRequest::default(),
        }
    }
}

struct Holder {
    id: HandleId,
    requestor: Requestor,
    stream: Box<dyn CameraStream>,
    revoke: watch::Sender<bool>,
}

struct ArbiterState {
    holder: Option<Holder>,
    devices: Vec<CameraDevice>,
    next_handle: u64,
}

struct ArbiterInner {
    id: u64,
    platform: Arc<dyn CameraPlatform>,
    config: ArbiterConfig,
    state: Mutex<ArbiterState>,
}

impl ArbiterInner {
    /// Stop a holder's stream, waiting at most `drain_grace`
    async fn drain(&self, mut holder: Holder, reason: &str) {
        holder.revoke.send_replace(true);
        let grace = self.config.drain_grace;
        match tokio::time::timeout(grace, holder.stream.stop()).await {
            Ok(Ok(())) => {
                debug!(handle = %holder.id, requestor = %holder.requestor, reason, "Camera stream drained");
            }
            Ok(Err(e)) => {
                warn!(handle = %holder.id, error = %e, reason, "Camera stream stopped with error");
            }
            Err(_) => {
                warn!(
                    handle = %holder.id,
                    grace_ms = grace.as_millis() as u64,
                    reason,
                    "Camera stream did not confirm stop within grace period"
                );
            }
        }
    }

    async fn release_by_id(&self, id: HandleId) {
        let mut state = self.state.lock().await;
        match state.holder.take() {
            Some(holder) if holder.id == id => {
                info!(handle = %id, requestor = %holder.requestor, "Releasing camera");
                self.drain(holder, "released").await;
            }
            other => {
                state.holder = other;
                debug!(handle = %id, "Release of stale or unknown handle ignored");
            }
        }
    }
}

/// Grants exclusive access to the camera
///
/// Cheap to clone; clones share the same arbitration state.
#[derive(Clone)]
pub struct CameraResourceArbiter {
    inner: Arc<ArbiterInner>,
}

impl CameraResourceArbiter {
    /// Create an arbiter over `platform`
    pub fn new(platform: Arc<dyn CameraPlatform>, config: ArbiterConfig) -> Self {
        info!(
            platform = %platform.platform_type(),
            drain_grace_ms = config.drain_grace.as_millis() as u64,
            "Creating camera arbiter"
        );
        Self {
            inner: Arc::new(ArbiterInner {
                id: NEXT_ARBITER_ID.fetch_add(1, Ordering::Relaxed),
                platform,
                config,
                state: Mutex::new(ArbiterState {
                    holder: None,
                    devices: Vec::new(),
                    next_handle: 1,
                }),
            }),
        }
    }

    /// The platform this arbiter controls
    pub fn platform(&self) -> &Arc<dyn CameraPlatform> {
        &self.inner.platform
    }

    /// Acquire the camera for `requestor`
    ///
    /// Fails fast, without disturbing the current holder, when the hosting
    /// context is insecure or no device is present. Otherwise the current
    /// holder (if any) is preempted and drained before the device is opened.
    pub async fn acquire(&self, requestor: Requestor) -> Result<CameraHandle, CameraError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        debug!(requestor = %requestor, "Camera acquire requested");

        let origin = inner.platform.origin();
        if !origin.is_secure() {
            warn!(origin = %origin, "Refusing camera access from insecure context");
            return Err(CameraError::InsecureContext);
        }

        let devices = inner.platform.enumerate_cameras().await?;
        state.devices = devices;
        let device = select_device(&state.devices, inner.config.preferred_device.as_deref())
            .cloned()
            .ok_or(CameraError::NoCameraFound)?;

        if let Some(holder) = state.holder.take() {
            info!(
                handle = %holder.id,
                holder = %holder.requestor,
                requestor = %requestor,
                "Preempting current camera holder"
            );
            inner.drain(holder, "preempted").await;
        }

        let mut stream = inner
            .platform
            .open_stream(&device, &inner.config.stream)
            .await
            .map_err(|e| {
                warn!(device = %device, error = %e, "Failed to open camera stream");
                CameraError::from(e)
            })?;

        let id = HandleId(state.next_handle);
        state.next_handle += 1;
        let frames = stream.take_frames();
        let format = stream.format().clone();
        let (revoke, revoked) = watch::channel(false);

        info!(handle = %id, requestor = %requestor, device = %device, format = %format, "Camera granted");

        state.holder = Some(Holder {
            id,
            requestor: requestor.clone(),
            stream,
            revoke,
        });

        Ok(CameraHandle {
            id,
            requestor,
            device,
            format,
            frames,
            revoked,
            arbiter_id: inner.id,
            arbiter: Arc::downgrade(inner),
            released: false,
        })
    }

    /// Release a handle
    ///
    /// Idempotent: a handle that was already preempted, or that belongs to
    /// another arbiter, is ignored. Resolves once the stream has stopped (or
    /// the drain grace period elapsed).
    pub async fn release(&self, mut handle: CameraHandle) {
        handle.released = true;
        if handle.arbiter_id != self.inner.id {
            debug!(handle = %handle.id, "Ignoring handle from another arbiter");
            return;
        }
        self.inner.release_by_id(handle.id).await;
    }

    /// Stop whatever stream is active, regardless of holder
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(holder) = state.holder.take() {
            self.inner.drain(holder, "shutdown").await;
        }
    }

    /// Re-enumerate devices
    pub async fn refresh_devices(&self) -> BackendResult<Vec<CameraDevice>> {
        let devices = self.inner.platform.enumerate_cameras().await?;
        self.inner.state.lock().await.devices = devices.clone();
        Ok(devices)
    }

    /// Devices seen by the last enumeration
    pub async fn devices(&self) -> Vec<CameraDevice> {
        self.inner.state.lock().await.devices.clone()
    }

    /// Whether a handle is currently outstanding
    pub async fn is_held(&self) -> bool {
        self.inner.state.lock().await.holder.is_some()
    }

    /// The current holder, if any
    pub async fn holder(&self) -> Option<(HandleId, Requestor)> {
        self.inner
            .state
            .lock()
            .await
            .holder
            .as_ref()
            .map(|h| (h.id, h.requestor.clone()))
    }
}

impl std::fmt::Debug for CameraResourceArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraResourceArbiter")
            .field("id", &self.inner.id)
            .field("platform", &self.inner.platform.platform_type())
            .finish()
    }
}

/// Pick the preferred device if present, else the first one
fn select_device<'a>(
    devices: &'a [CameraDevice],
    preferred: Option<&str>,
) -> Option<&'a CameraDevice> {
    preferred
        .and_then(|id| devices.iter().find(|d| d.id == id))
        .or_else(|| devices.first())
}
