// Error types for the audio splitter
//
// Engine errors mirror the result codes an audio engine call can report.
// Mirror errors describe failures of the mirroring layer itself; none of them
// is ever surfaced to a primary-engine caller.

mod engine;
mod mirror;

pub use engine::{log_engine_error, EngineError, EngineErrorCodes, EngineResult};
pub use mirror::{log_mirror_error, MirrorError, MirrorErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error reporting in logs
/// and telemetry.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
