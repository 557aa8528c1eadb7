// Managers Module
//
// Focused managers extracted from the top-level handle.
//
// - MirrorToggleManager: background enable/disable of a mirroring context

pub mod toggle_manager;

pub use toggle_manager::{MirrorState, MirrorToggleManager};
