//! Audio engine abstraction.
//!
//! `StudioSystem` is the narrow capability surface the mirroring core needs
//! from an audio engine; `backend` holds the implementations shipped with
//! the crate.

pub mod backend;
pub mod system;
pub mod types;

pub use backend::{BankLibrary, BankManifest, EventManifest, MemoryStudioSystem, MemorySystemFactory, ParameterManifest};
pub use system::{StudioSystem, SystemFactory};
pub use types::{
    parse_guid_path, Attributes3D, BankHandle, BusHandle, CallbackKind, CallbackMask,
    CallbackParameters, DescriptionHandle, DriverInfo, EventCallback, EventId, EventProperty,
    InstanceHandle, OutputType, PlaybackState, StopMode, UserData, VcaHandle, Vector3,
    GUID_PREFIX, REVERB_SENDS,
};
