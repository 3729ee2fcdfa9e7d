// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Window in which a repeated scan of the same code is suppressed
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(2000);

/// Debounce entries older than `PRUNE_FACTOR × cooldown` are purged
pub const DEFAULT_PRUNE_FACTOR: u32 = 5;

/// How long a preempted stream gets to confirm it stopped
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How long the session stays in `Success` before scanning again
pub const DEFAULT_SUCCESS_PULSE: Duration = Duration::from_millis(2000);

/// Decode attempts per second for the camera-driven backends
pub const DEFAULT_DECODE_FPS: u32 = 10;

/// Side of the square region searched for codes, in pixels
pub const DEFAULT_DETECTION_BOX: u32 = 250;

/// Frames are downscaled so neither side exceeds this before decoding
pub const MAX_DECODE_DIMENSION: u32 = 640;

/// Origin assumed for a locally running scanner
pub const DEFAULT_ORIGIN: &str = "https://localhost";

/// Capture stream defaults
pub mod capture {
    /// Requested frame width
    pub const WIDTH: u32 = 1280;

    /// Requested frame height
    pub const HEIGHT: u32 = 720;

    /// Requested frame rate
    pub const FRAMERATE: u32 = 30;

    /// Frames buffered between the capture thread and the decoder
    pub const FRAME_QUEUE: usize = 2;
}

/// Timing constants for the virtual camera used by `decode`
pub mod virtual_camera {
    use super::Duration;

    /// Delay between replayed images
    pub const IMAGE_FRAME_INTERVAL: Duration = Duration::from_millis(33);

    /// Give up on an image set that produced no code after this long
    pub const DECODE_TIMEOUT: Duration = Duration::from_secs(5);
}

/// File format constants
pub mod file_formats {
    /// Image extensions accepted by `decode` when given a directory
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

    /// Whether `path` has one of [`IMAGE_EXTENSIONS`] (case-insensitive)
    pub fn is_image(path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("SCANNER_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_prune_window_exceeds_cooldown() {
        assert!(DEFAULT_PRUNE_FACTOR > 1);
        assert!(DEFAULT_SUCCESS_PULSE >= DEFAULT_DRAIN_GRACE);
    }

    #[test]
    fn test_image_extensions() {
        assert!(file_formats::is_image(Path::new("a/code.PNG")));
        assert!(file_formats::is_image(Path::new("code.jpeg")));
        assert!(!file_formats::is_image(Path::new("notes.txt")));
        assert!(!file_formats::is_image(Path::new("README")));
    }
}
