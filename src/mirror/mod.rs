// Mirror Module
//
// Instance mirroring core: the host adapter intercepts calls on the primary
// engine, observers replay them into secondary engines.
//
// - recursion: reentrancy filter keyed by operation name
// - bank_cache / event_cache: what a secondary engine has loaded
// - duplicator: primary -> shadow instance mapping
// - hooks: the adapter the host calls into

pub mod bank_cache;
pub mod callbacks;
pub mod catalog;
pub mod duplicator;
pub mod event_cache;
pub mod hooks;
pub mod observer;
pub mod ops;
pub mod recursion;

pub use bank_cache::{BankCache, BankEntry, BankLocator, BankRecord, ContentDirLocator};
pub use callbacks::{empty_callback, wrap_callback};
pub use catalog::{HostCatalog, PrimarySnapshot, PrimaryView};
pub use duplicator::InstanceDuplicator;
pub use event_cache::{is_silent_path, EventDescriptionCache};
pub use hooks::MirroredAudio;
pub use observer::{AudioEngineObserver, MirrorRegistry, ObserverList};
pub use ops::InstanceOp;
pub use recursion::{RecursionGuard, RecursionScope};
