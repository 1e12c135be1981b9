//! Earshot - sound awareness for deaf and hard-of-hearing users
//!
//! This library provides the core of the earshot daemon:
//! - Audio capture with reconnection and bounded buffering
//! - Signal conditioning and ambient-noise tracking
//! - Sound classification behind a pluggable inference engine
//! - Event debouncing and single-slot alert arbitration
//! - Haptic, visual and smart-home alert channels
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  frames  ┌─────────────────────────────────────────────┐
//! │  capture   ├─────────►│                pipeline thread              │
//! │  thread    │  queue   │ condition → classify → debounce → arbitrate │
//! └────────────┘          └──────────────────────┬──────────────────────┘
//!                                                │ intents
//!                         ┌──────────────────────▼──────────────────────┐
//!                         │          notification dispatcher            │
//!                         │    haptic   │   visual   │   smart home     │
//!                         └─────────────────────────────────────────────┘
//! ```

pub mod alert;
pub mod audio;
pub mod classify;
pub mod config;
pub mod daemon;
pub mod detect;
pub mod error;
pub mod health;
pub mod notify;
pub mod pipeline;
pub mod signal;
pub mod speech;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineHandle, PipelineStats};
