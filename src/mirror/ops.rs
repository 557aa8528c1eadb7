//! Mutating instance operations as values.
//!
//! The host adapter runs an operation on the primary engine, then hands the
//! same value to every observer so it can be replayed on shadows.

use std::fmt;

use crate::error::EngineResult;
use crate::studio::{
    Attributes3D, CallbackMask, EventCallback, EventProperty, InstanceHandle, StopMode,
    StudioSystem, UserData,
};

#[derive(Clone)]
pub enum InstanceOp {
    Start,
    Stop(StopMode),
    Release,
    TriggerCue,
    Set3DAttributes(Attributes3D),
    SetListenerMask(u32),
    SetParameter { name: String, value: f32 },
    SetParameterByIndex { index: usize, value: f32 },
    SetParametersByIndices { indices: Vec<usize>, values: Vec<f32> },
    SetPaused(bool),
    SetPitch(f32),
    SetProperty { property: EventProperty, value: f32 },
    SetReverbLevel { index: usize, level: f32 },
    SetTimelinePosition(i32),
    SetUserData(UserData),
    SetVolume(f32),
    SetCallback {
        callback: Option<EventCallback>,
        mask: CallbackMask,
    },
}

impl InstanceOp {
    /// Recursion guard key of the operation.
    pub fn key(&self) -> &'static str {
        match self {
            InstanceOp::Start => "instance.start",
            InstanceOp::Stop(_) => "instance.stop",
            InstanceOp::Release => "instance.release",
            InstanceOp::TriggerCue => "instance.trigger_cue",
            InstanceOp::Set3DAttributes(_) => "instance.set_3d_attributes",
            InstanceOp::SetListenerMask(_) => "instance.set_listener_mask",
            InstanceOp::SetParameter { .. } => "instance.set_parameter",
            InstanceOp::SetParameterByIndex { .. } => "instance.set_parameter_by_index",
            InstanceOp::SetParametersByIndices { .. } => "instance.set_parameters_by_indices",
            InstanceOp::SetPaused(_) => "instance.set_paused",
            InstanceOp::SetPitch(_) => "instance.set_pitch",
            InstanceOp::SetProperty { .. } => "instance.set_property",
            InstanceOp::SetReverbLevel { .. } => "instance.set_reverb_level",
            InstanceOp::SetTimelinePosition(_) => "instance.set_timeline_position",
            InstanceOp::SetUserData(_) => "instance.set_user_data",
            InstanceOp::SetVolume(_) => "instance.set_volume",
            InstanceOp::SetCallback { .. } => "instance.set_callback",
        }
    }

    /// Run the operation against `instance` in `system`.
    pub fn apply(&self, system: &mut dyn StudioSystem, instance: InstanceHandle) -> EngineResult<()> {
        match self {
            InstanceOp::Start => system.start(instance),
            InstanceOp::Stop(mode) => system.stop(instance, *mode),
            InstanceOp::Release => system.release_instance(instance),
            InstanceOp::TriggerCue => system.trigger_cue(instance),
            InstanceOp::Set3DAttributes(attributes) => system.set_3d_attributes(instance, *attributes),
            InstanceOp::SetListenerMask(mask) => system.set_listener_mask(instance, *mask),
            InstanceOp::SetParameter { name, value } => {
                system.set_parameter_value(instance, name, *value)
            }
            InstanceOp::SetParameterByIndex { index, value } => {
                system.set_parameter_value_by_index(instance, *index, *value)
            }
            InstanceOp::SetParametersByIndices { indices, values } => {
                system.set_parameter_values_by_indices(instance, indices, values)
            }
            InstanceOp::SetPaused(paused) => system.set_paused(instance, *paused),
            InstanceOp::SetPitch(pitch) => system.set_pitch(instance, *pitch),
            InstanceOp::SetProperty { property, value } => {
                system.set_property(instance, *property, *value)
            }
            InstanceOp::SetReverbLevel { index, level } => {
                system.set_reverb_level(instance, *index, *level)
            }
            InstanceOp::SetTimelinePosition(position) => {
                system.set_timeline_position(instance, *position)
            }
            InstanceOp::SetUserData(data) => system.set_user_data(instance, *data),
            InstanceOp::SetVolume(volume) => system.set_volume(instance, *volume),
            InstanceOp::SetCallback { callback, mask } => {
                system.set_instance_callback(instance, callback.clone(), *mask)
            }
        }
    }
}

impl fmt::Debug for InstanceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceOp::SetCallback { callback, mask } => f
                .debug_struct("SetCallback")
                .field("callback", &callback.as_ref().map(|_| "<fn>"))
                .field("mask", mask)
                .finish(),
            InstanceOp::Stop(mode) => f.debug_tuple("Stop").field(mode).finish(),
            InstanceOp::Set3DAttributes(a) => f.debug_tuple("Set3DAttributes").field(a).finish(),
            InstanceOp::SetListenerMask(m) => f.debug_tuple("SetListenerMask").field(m).finish(),
            InstanceOp::SetParameter { name, value } => f
                .debug_struct("SetParameter")
                .field("name", name)
                .field("value", value)
                .finish(),
            InstanceOp::SetParameterByIndex { index, value } => f
                .debug_struct("SetParameterByIndex")
                .field("index", index)
                .field("value", value)
                .finish(),
            InstanceOp::SetParametersByIndices { indices, values } => f
                .debug_struct("SetParametersByIndices")
                .field("indices", indices)
                .field("values", values)
                .finish(),
            InstanceOp::SetPaused(p) => f.debug_tuple("SetPaused").field(p).finish(),
            InstanceOp::SetPitch(p) => f.debug_tuple("SetPitch").field(p).finish(),
            InstanceOp::SetProperty { property, value } => f
                .debug_struct("SetProperty")
                .field("property", property)
                .field("value", value)
                .finish(),
            InstanceOp::SetReverbLevel { index, level } => f
                .debug_struct("SetReverbLevel")
                .field("index", index)
                .field("level", level)
                .finish(),
            InstanceOp::SetTimelinePosition(p) => {
                f.debug_tuple("SetTimelinePosition").field(p).finish()
            }
            InstanceOp::SetUserData(d) => f.debug_tuple("SetUserData").field(d).finish(),
            InstanceOp::SetVolume(v) => f.debug_tuple("SetVolume").field(v).finish(),
            other => f.write_str(other.key()),
        }
    }
}
