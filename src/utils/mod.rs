//! Utility functions and helpers
//!
//! This module contains atomic file operations and time/identity helpers.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write_with, cleanup_temp_files, commit_staged, stage_copy, stage_write};
pub use time::{detect_agent_identity, now_millis};
