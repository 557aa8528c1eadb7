//! Value types shared by every `StudioSystem` implementation.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineResult;

/// Stable identifier of an event description, identical across engines
/// that loaded the same bank.
pub type EventId = Uuid;

/// Prefix of textual event references that carry an [`EventId`].
pub const GUID_PREFIX: &str = "guid://";

/// Parse a `guid://` reference into an [`EventId`].
///
/// Returns `None` for plain event paths and for malformed ids.
pub fn parse_guid_path(path: &str) -> Option<EventId> {
    path.strip_prefix(GUID_PREFIX)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

macro_rules! engine_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw handle value as handed out by the engine.
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

engine_handle!(
    /// Loaded bank.
    BankHandle
);
engine_handle!(
    /// Resolved event description.
    DescriptionHandle
);
engine_handle!(
    /// Live event instance.
    InstanceHandle
);
engine_handle!(
    /// Mixer bus.
    BusHandle
);
engine_handle!(
    /// VCA.
    VcaHandle
);

/// Opaque per-instance user data slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserData(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Position and orientation of an instance or listener.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attributes3D {
    pub position: Vector3,
    pub velocity: Vector3,
    pub forward: Vector3,
    pub up: Vector3,
}

impl Attributes3D {
    /// Pose built from the three vectors a host listener update provides.
    pub fn from_pose(forward: Vector3, up: Vector3, position: Vector3) -> Self {
        Self {
            position,
            velocity: Vector3::default(),
            forward,
            up,
        }
    }
}

impl Default for Attributes3D {
    /// Origin, facing +Z with +Y up.
    fn default() -> Self {
        Self::from_pose(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::default(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Sustaining,
    Stopped,
    Starting,
    Stopping,
}

impl PlaybackState {
    /// States in which a freshly duplicated shadow must be started.
    pub fn is_audible(self) -> bool {
        matches!(
            self,
            PlaybackState::Playing | PlaybackState::Sustaining | PlaybackState::Starting
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    AllowFadeout,
    Immediate,
}

impl StopMode {
    pub fn from_immediate(immediate: bool) -> Self {
        if immediate {
            StopMode::Immediate
        } else {
            StopMode::AllowFadeout
        }
    }
}

/// Per-instance properties. A value of `-1.0` means "use the authored default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventProperty {
    ChannelPriority,
    ScheduleDelay,
    ScheduleLookahead,
    MinimumDistance,
    MaximumDistance,
    Cooldown,
}

impl EventProperty {
    pub const ALL: [EventProperty; 6] = [
        EventProperty::ChannelPriority,
        EventProperty::ScheduleDelay,
        EventProperty::ScheduleLookahead,
        EventProperty::MinimumDistance,
        EventProperty::MaximumDistance,
        EventProperty::Cooldown,
    ];

    /// Position of the property inside [`EventProperty::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Number of reverb sends an instance exposes.
pub const REVERB_SENDS: usize = 4;

bitflags! {
    /// Callback types a callback subscribes to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallbackMask: u32 {
        const CREATED = 0x0000_0001;
        const DESTROYED = 0x0000_0002;
        const STARTING = 0x0000_0004;
        const STARTED = 0x0000_0008;
        const RESTARTED = 0x0000_0010;
        const STOPPED = 0x0000_0020;
        const START_FAILED = 0x0000_0040;
        const TIMELINE_MARKER = 0x0000_0080;
        const TIMELINE_BEAT = 0x0000_0100;
        const SOUND_PLAYED = 0x0000_0200;
        const SOUND_STOPPED = 0x0000_0400;
    }
}

/// Discriminated callback type delivered to a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    Created,
    Destroyed,
    Starting,
    Started,
    Restarted,
    Stopped,
    StartFailed,
    TimelineMarker,
    TimelineBeat,
    SoundPlayed,
    SoundStopped,
}

impl CallbackKind {
    /// Mask bit subscribing to this kind.
    pub fn mask(self) -> CallbackMask {
        match self {
            CallbackKind::Created => CallbackMask::CREATED,
            CallbackKind::Destroyed => CallbackMask::DESTROYED,
            CallbackKind::Starting => CallbackMask::STARTING,
            CallbackKind::Started => CallbackMask::STARTED,
            CallbackKind::Restarted => CallbackMask::RESTARTED,
            CallbackKind::Stopped => CallbackMask::STOPPED,
            CallbackKind::StartFailed => CallbackMask::START_FAILED,
            CallbackKind::TimelineMarker => CallbackMask::TIMELINE_MARKER,
            CallbackKind::TimelineBeat => CallbackMask::TIMELINE_BEAT,
            CallbackKind::SoundPlayed => CallbackMask::SOUND_PLAYED,
            CallbackKind::SoundStopped => CallbackMask::SOUND_STOPPED,
        }
    }
}

/// Ancillary data delivered with a callback.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CallbackParameters {
    #[default]
    None,
    TimelineMarker {
        name: String,
        position: i32,
    },
    TimelineBeat {
        bar: i32,
        beat: i32,
        position: i32,
        tempo: f32,
    },
}

/// Event callback as registered on an instance or description.
pub type EventCallback =
    Arc<dyn Fn(CallbackKind, InstanceHandle, &CallbackParameters) -> EngineResult<()> + Send + Sync>;

/// Output mode of the low-level engine. Cycling through `NoSound` forces
/// the engine to reopen its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Auto,
    NoSound,
}

/// Driver description reported by the low-level engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guid_path() {
        let id = Uuid::new_v4();
        let path = format!("{}{}", GUID_PREFIX, id);
        assert_eq!(parse_guid_path(&path), Some(id));
        assert_eq!(parse_guid_path("event:/music/lvl1"), None);
        assert_eq!(parse_guid_path("guid://not-a-guid"), None);
    }

    #[test]
    fn test_audible_states() {
        assert!(PlaybackState::Playing.is_audible());
        assert!(PlaybackState::Sustaining.is_audible());
        assert!(PlaybackState::Starting.is_audible());
        assert!(!PlaybackState::Stopped.is_audible());
        assert!(!PlaybackState::Stopping.is_audible());
    }

    #[test]
    fn test_callback_kind_masks_are_distinct() {
        let kinds = [
            CallbackKind::Created,
            CallbackKind::Destroyed,
            CallbackKind::Starting,
            CallbackKind::Started,
            CallbackKind::Restarted,
            CallbackKind::Stopped,
            CallbackKind::StartFailed,
            CallbackKind::TimelineMarker,
            CallbackKind::TimelineBeat,
            CallbackKind::SoundPlayed,
            CallbackKind::SoundStopped,
        ];
        let mut union = CallbackMask::empty();
        for kind in kinds {
            assert!(!union.intersects(kind.mask()));
            union |= kind.mask();
        }
        assert_eq!(union, CallbackMask::all());
    }

    #[test]
    fn test_handle_display_is_hex() {
        assert_eq!(InstanceHandle(0x2a).to_string(), "0x2a");
    }

    #[test]
    fn test_property_indices_follow_all() {
        for (position, property) in EventProperty::ALL.iter().enumerate() {
            assert_eq!(property.index(), position);
        }
    }
}
