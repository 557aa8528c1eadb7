//! Engine module housing the top-level orchestration.
//!
//! `core` exposes the `SplitterHandle` the host keeps for the lifetime of
//! its audio layer.

pub mod core;

pub use core::{SplitterHandle, MUSIC_CONTEXT};
