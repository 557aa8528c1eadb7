//! Telemetry event types describing mirroring activity, exposed to the CLI
//! and to any subscriber of the hub's broadcast stream.

use serde::{Deserialize, Serialize};

/// Lifecycle stages of an engine context and its toggle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Enabling,
    Initialized,
    Disabling,
    Terminated,
    InitializeFailed,
}

/// Mirroring events: context lifecycle, shadow bookkeeping and failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MirrorEvent {
    ContextLifecycle {
        context: String,
        phase: LifecyclePhase,
        timestamp_ms: u64,
    },
    BankLoaded {
        context: String,
        bank: String,
        strings: bool,
    },
    InstanceDuplicated {
        context: String,
        primary: u64,
        shadow: u64,
    },
    DuplicateDestroyed {
        context: String,
        primary: u64,
    },
    ReplayFailed {
        context: String,
        operation: String,
        code: i32,
    },
    DeviceBound {
        context: String,
        device: String,
        fallback: bool,
    },
    Error {
        code: i32,
        context: String,
    },
}
