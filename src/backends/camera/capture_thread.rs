// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for blocking capture loops
//!
//! Device capture APIs block, so each open stream runs its loop on a
//! dedicated OS thread. The controller reports start-up success back to the
//! async side, and `stop` resolves only after the thread has exited and the
//! device has been closed. That confirmation is what the arbiter's drain
//! waits on.

use super::types::{BackendError, BackendResult};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a capture loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let mut thread = CaptureThread::start_with_init(
///     "v4l2-capture",
///     move || open_stream(dev),
///     move |stream| match stream.next() {
///         Ok(frame) => { forward(frame); LoopAction::Continue }
///         Err(_) => LoopAction::Stop,
///     },
/// );
/// thread.wait_ready().await?;
/// // ...
/// thread.stop().await?;
/// ```
pub struct CaptureThread {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Initialization outcome, consumed by `wait_ready`
    ready: Option<oneshot::Receiver<Result<(), String>>>,
    /// Name for logging
    name: String,
}

impl CaptureThread {
    /// Start a capture loop with initialization
    ///
    /// `init_fn` runs once on the new thread. Its state never leaves that
    /// thread, so it does not need to be `Send`. If initialization fails the
    /// thread exits and `wait_ready` reports the error.
    pub fn start_with_init<S, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> Self
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();
        let (ready_tx, ready_rx) = oneshot::channel();

        info!(name = %name, "Starting capture thread");

        let thread_handle = thread::spawn(move || {
            debug!(name = %name_clone, "Capture thread started, initializing");

            let mut state = match init_fn() {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    warn!(name = %name_clone, error = %e, "Capture initialization failed");
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            loop {
                if stop_signal_clone.load(Ordering::SeqCst) {
                    debug!(name = %name_clone, "Stop signal received");
                    break;
                }

                match loop_fn(&mut state) {
                    LoopAction::Continue => {}
                    LoopAction::Stop => {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }
            }

            // Device state is dropped here, before the thread reports exit
            drop(state);
            info!(name = %name_clone, "Capture thread exiting");
        });

        Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            ready: Some(ready_rx),
            name: name.to_string(),
        }
    }

    /// Wait until initialization finished
    ///
    /// Returns immediately after the first call.
    pub async fn wait_ready(&mut self) -> BackendResult<()> {
        let Some(ready) = self.ready.take() else {
            return Ok(());
        };
        match ready.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BackendError::Crashed(e)),
            Err(_) => Err(BackendError::Crashed(format!(
                "{} exited before reporting readiness",
                self.name
            ))),
        }
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture thread stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop; the future resolves once the thread has exited
    ///
    /// Safe to call repeatedly: later calls resolve immediately.
    pub fn stop(&mut self) -> BoxFuture<'static, BackendResult<()>> {
        self.request_stop();
        let Some(handle) = self.thread_handle.take() else {
            return futures::future::ready(Ok(())).boxed();
        };
        let name = self.name.clone();

        async move {
            debug!(name = %name, "Waiting for capture thread to finish");
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            match joined {
                Ok(Ok(())) => {
                    debug!(name = %name, "Capture thread finished");
                    Ok(())
                }
                Ok(Err(e)) => {
                    warn!(name = %name, "Capture thread panicked: {:?}", e);
                    Err(BackendError::Crashed(format!("{} panicked", name)))
                }
                Err(e) => Err(BackendError::Crashed(e.to_string())),
            }
        }
        .boxed()
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            // Joining here could block an async worker; the thread exits on
            // its own once it sees the signal.
            debug!(name = %self.name, "CaptureThread dropped, signalling stop");
            self.request_stop();
        }
    }
}
