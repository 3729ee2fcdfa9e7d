// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use attendance_scanner::constants::{self, app_info, capture, file_formats};
use std::path::Path;

#[test]
fn test_version_is_set() {
    assert!(!app_info::version().is_empty());
}

#[test]
fn test_capture_defaults() {
    assert!(capture::WIDTH >= capture::HEIGHT);
    assert!(capture::FRAMERATE > 0);
    assert!(capture::FRAME_QUEUE > 0);
}

#[test]
fn test_decode_dimension_fits_detection_box() {
    // Downscaling must never shrink the frame below the search region
    assert!(constants::MAX_DECODE_DIMENSION >= constants::DEFAULT_DETECTION_BOX);
}

#[test]
fn test_image_files_are_recognized() {
    for ext in file_formats::IMAGE_EXTENSIONS {
        let name = format!("badge.{}", ext);
        assert!(file_formats::is_image(Path::new(&name)), "{} not recognized", name);
    }
    assert!(!file_formats::is_image(Path::new("roster.csv")));
}
