// Audio Splitter Core - mirrors a primary audio engine onto secondary engines
// Instance mirroring with per-context output device binding

// Module declarations
pub mod config;
pub mod context;
pub mod devices;
pub mod engine;
pub mod error;
pub mod managers;
pub mod mirror;
pub mod studio;
pub mod telemetry;

// Re-exports for convenience
pub use config::{EngineSettings, SplitterConfig, SplitterSettings};
pub use context::{ContextStats, EngineContext};
pub use devices::{OutputDeviceInfo, OutputDeviceManager};
pub use engine::SplitterHandle;
pub use error::{EngineError, ErrorCode, MirrorError};
pub use managers::{MirrorState, MirrorToggleManager};
pub use mirror::{AudioEngineObserver, MirrorRegistry, MirroredAudio};

use tracing_subscriber::EnvFilter;

/// Initialize logging
///
/// Installs a fmt subscriber filtered by `level` (an env-filter directive
/// such as `info` or `audio_splitter=debug`); `log` records are bridged
/// into it. Calling it again is harmless.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|err| {
        eprintln!("Invalid log level {:?} ({}), using info", level, err);
        EnvFilter::new("info")
    });
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        log::debug!("Logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging("debug");
        init_logging("not a [valid filter");
    }
}
