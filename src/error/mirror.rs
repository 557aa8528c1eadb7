// Mirroring error types and constants

use crate::error::{EngineError, ErrorCode};
use crate::studio::InstanceHandle;
use log::error;
use std::fmt;

/// Mirror error code constants
///
/// Error code range: 2001-2009
pub struct MirrorErrorCodes {}

impl MirrorErrorCodes {
    /// Engine context has no secondary engine yet
    pub const CONTEXT_NOT_READY: i32 = 2001;

    /// Shadow event description could not be resolved
    pub const DESCRIPTION_UNRESOLVED: i32 = 2002;

    /// Shadow instance could not be created
    pub const INSTANCE_CREATE_FAILED: i32 = 2003;

    /// Bank could not be loaded into the secondary engine
    pub const BANK_LOAD_FAILED: i32 = 2004;

    /// Secondary engine call failed outside a per-instance path
    pub const ENGINE: i32 = 2005;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 2006;

    /// A mirroring toggle is already running
    pub const TOGGLE_IN_PROGRESS: i32 = 2007;

    /// Requested output device is not available
    pub const DEVICE_UNAVAILABLE: i32 = 2008;

    /// Background toggle worker vanished before replying
    pub const WORKER_FAILED: i32 = 2009;
}

/// Log a mirror error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_mirror_error(err: &MirrorError, context: &str) {
    error!(
        "Mirror error in {}: code={}, component=InstanceMirror, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by the mirroring layer
///
/// Everything here is recoverable from the primary engine's point of view:
/// the primary call has already completed by the time any of these occur.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorError {
    /// Context not initialized, or torn down mid-call
    ContextNotReady { context: String },

    /// Description lookup failed in the secondary engine
    DescriptionUnresolved { target: String, source: EngineError },

    /// Shadow instance creation failed
    InstanceCreateFailed {
        target: String,
        primary: InstanceHandle,
        source: EngineError,
    },

    /// Bank load failed with something other than "already loaded"
    BankLoadFailed { bank: String, source: EngineError },

    /// Other secondary engine failure
    Engine { context: String, source: EngineError },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Enable/disable requested while another toggle is running
    ToggleInProgress,

    /// Selected output device is not enumerated
    DeviceUnavailable { device: String },

    /// Toggle worker dropped its reply channel
    WorkerFailed { reason: String },
}

impl MirrorError {
    /// Wrap an engine error raised while doing `context`
    pub fn engine(context: impl Into<String>, source: EngineError) -> Self {
        MirrorError::Engine {
            context: context.into(),
            source,
        }
    }

    /// Underlying engine error, when there is one
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            MirrorError::DescriptionUnresolved { source, .. }
            | MirrorError::InstanceCreateFailed { source, .. }
            | MirrorError::BankLoadFailed { source, .. }
            | MirrorError::Engine { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl ErrorCode for MirrorError {
    fn code(&self) -> i32 {
        match self {
            MirrorError::ContextNotReady { .. } => MirrorErrorCodes::CONTEXT_NOT_READY,
            MirrorError::DescriptionUnresolved { .. } => MirrorErrorCodes::DESCRIPTION_UNRESOLVED,
            MirrorError::InstanceCreateFailed { .. } => MirrorErrorCodes::INSTANCE_CREATE_FAILED,
            MirrorError::BankLoadFailed { .. } => MirrorErrorCodes::BANK_LOAD_FAILED,
            MirrorError::Engine { .. } => MirrorErrorCodes::ENGINE,
            MirrorError::LockPoisoned { .. } => MirrorErrorCodes::LOCK_POISONED,
            MirrorError::ToggleInProgress => MirrorErrorCodes::TOGGLE_IN_PROGRESS,
            MirrorError::DeviceUnavailable { .. } => MirrorErrorCodes::DEVICE_UNAVAILABLE,
            MirrorError::WorkerFailed { .. } => MirrorErrorCodes::WORKER_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            MirrorError::ContextNotReady { context } => {
                format!("Engine context '{}' is not initialized", context)
            }
            MirrorError::DescriptionUnresolved { target, source } => {
                format!("Failed to resolve description {}: {}", target, source.message())
            }
            MirrorError::InstanceCreateFailed {
                target,
                primary,
                source,
            } => format!(
                "Failed to create a duplicate instance {}, orig={}: {}",
                target,
                primary,
                source.message()
            ),
            MirrorError::BankLoadFailed { bank, source } => {
                format!("Failed to load bank {}: {}", bank, source.message())
            }
            MirrorError::Engine { context, source } => {
                format!("Secondary engine call {} failed: {}", context, source.message())
            }
            MirrorError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            MirrorError::ToggleInProgress => {
                "Mirroring toggle already in progress. Wait for it to finish.".to_string()
            }
            MirrorError::DeviceUnavailable { device } => {
                format!("Output device unavailable: {}", device)
            }
            MirrorError::WorkerFailed { reason } => {
                format!("Toggle worker failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MirrorError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.engine_error()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}
