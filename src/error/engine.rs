// Audio engine result codes

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Engine error code constants
///
/// Error code range: 1001-1008
pub struct EngineErrorCodes {}

impl EngineErrorCodes {
    /// Event, bus, VCA or parameter lookup found nothing
    pub const EVENT_NOT_FOUND: i32 = 1001;

    /// Bank or event data is already resident in the engine
    pub const ALREADY_LOADED: i32 = 1002;

    /// Handle does not refer to a live engine object
    pub const INVALID_HANDLE: i32 = 1003;

    /// Bank file could not be opened
    pub const FILE_NOT_FOUND: i32 = 1004;

    /// Argument rejected by the engine
    pub const INVALID_PARAM: i32 = 1005;

    /// Engine has not been initialized or was already released
    pub const NOT_INITIALIZED: i32 = 1006;

    /// Output driver could not be selected
    pub const OUTPUT_DRIVER: i32 = 1007;

    /// Any other engine failure
    pub const INTERNAL: i32 = 1008;
}

/// Result alias for calls into an audio engine
pub type EngineResult<T> = Result<T, EngineError>;

/// Log an engine error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_engine_error(err: &EngineError, context: &str) {
    error!(
        "Engine error in {}: code={}, component=StudioSystem, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors reported by an audio engine call
///
/// These map one-to-one onto the non-OK result codes of a studio-level
/// audio API. The mirroring layer inspects them to tell idempotency
/// conflicts (`AlreadyLoaded`) and expected absences (`EventNotFound`)
/// apart from genuine failures.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Lookup by path, id or name found nothing
    EventNotFound { what: String },

    /// Bank or sample data already resident
    AlreadyLoaded { what: String },

    /// Stale or foreign handle
    InvalidHandle { handle: u64 },

    /// Bank file missing
    FileNotFound { path: String },

    /// Rejected argument
    InvalidParam { reason: String },

    /// Engine not initialized or already released
    NotInitialized,

    /// Output driver selection failed
    OutputDriver { details: String },

    /// Catch-all engine failure
    Internal { details: String },
}

impl EngineError {
    /// True for the "not found" family of results
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::EventNotFound { .. })
    }

    /// True when the engine reports that the data is already resident
    pub fn is_already_loaded(&self) -> bool {
        matches!(self, EngineError::AlreadyLoaded { .. })
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> i32 {
        match self {
            EngineError::EventNotFound { .. } => EngineErrorCodes::EVENT_NOT_FOUND,
            EngineError::AlreadyLoaded { .. } => EngineErrorCodes::ALREADY_LOADED,
            EngineError::InvalidHandle { .. } => EngineErrorCodes::INVALID_HANDLE,
            EngineError::FileNotFound { .. } => EngineErrorCodes::FILE_NOT_FOUND,
            EngineError::InvalidParam { .. } => EngineErrorCodes::INVALID_PARAM,
            EngineError::NotInitialized => EngineErrorCodes::NOT_INITIALIZED,
            EngineError::OutputDriver { .. } => EngineErrorCodes::OUTPUT_DRIVER,
            EngineError::Internal { .. } => EngineErrorCodes::INTERNAL,
        }
    }

    fn message(&self) -> String {
        match self {
            EngineError::EventNotFound { what } => format!("Not found: {}", what),
            EngineError::AlreadyLoaded { what } => format!("Already loaded: {}", what),
            EngineError::InvalidHandle { handle } => {
                format!("Invalid handle: {:#x}", handle)
            }
            EngineError::FileNotFound { path } => format!("File not found: {}", path),
            EngineError::InvalidParam { reason } => format!("Invalid parameter: {}", reason),
            EngineError::NotInitialized => {
                "Engine not initialized. Call initialize() first.".to_string()
            }
            EngineError::OutputDriver { details } => {
                format!("Output driver error: {}", details)
            }
            EngineError::Internal { details } => format!("Internal engine error: {}", details),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EngineError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => EngineError::FileNotFound {
                path: err.to_string(),
            },
            _ => EngineError::Internal {
                details: err.to_string(),
            },
        }
    }
}
