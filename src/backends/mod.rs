// SPDX-License-Identifier: GPL-3.0-only

//! Backend layer
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Scan session controller            │
//! └──────────┬───────────────────────┬──────────┘
//!            │ handle + frames       │ start / stop / rearm
//! ┌──────────┴──────────┐  ┌─────────┴──────────┐
//! │       Camera        │  │       Decode       │
//! │ arbiter, platforms  │  │ continuous, single │
//! │ (V4L2, virtual)     │  │ shot, manual input │
//! └─────────────────────┘  └────────────────────┘
//! ```
//!
//! - [`camera`]: device enumeration, capture and exclusive arbitration
//! - [`decode`]: turning frames (or operator input) into code text

pub mod camera;
pub mod decode;
