//! Engine backends.
//!
//! Only the deterministic in-memory engine ships with the crate; hosts plug
//! their native engine in by implementing [`StudioSystem`](super::StudioSystem)
//! and [`SystemFactory`](super::SystemFactory).

mod library;
mod memory;

pub use library::{BankLibrary, BankManifest, EventManifest, ParameterManifest};
pub use memory::{MemoryStudioSystem, MemorySystemFactory};
