//! The studio-level engine surface consumed by the mirroring core.
//!
//! Both the primary engine (through the host adapter) and every secondary
//! engine are driven through this trait. Handles are only meaningful to the
//! system that produced them.

use std::path::Path;

use crate::config::EngineSettings;
use crate::error::EngineResult;

use super::types::{
    Attributes3D, BankHandle, BusHandle, CallbackMask, DescriptionHandle, DriverInfo,
    EventCallback, EventId, EventProperty, InstanceHandle, OutputType, PlaybackState, StopMode,
    UserData, VcaHandle,
};

/// Studio-level audio engine.
///
/// Getters take `&self`; anything that changes engine state takes `&mut self`.
/// Implementations may invoke registered callbacks synchronously from inside
/// `update`, `start`, `stop` and `release`.
pub trait StudioSystem: Send {
    // --- lifecycle -------------------------------------------------------

    /// Advance the engine by one step. Destroys released instances.
    fn update(&mut self) -> EngineResult<()>;

    /// Release the engine and everything it owns.
    fn release(&mut self) -> EngineResult<()>;

    // --- banks -----------------------------------------------------------

    fn load_bank_file(&mut self, path: &Path) -> EngineResult<BankHandle>;
    fn unload_bank(&mut self, bank: BankHandle) -> EngineResult<()>;
    fn bank_path(&self, bank: BankHandle) -> EngineResult<String>;
    fn bank_event_list(&self, bank: BankHandle) -> EngineResult<Vec<DescriptionHandle>>;

    // --- event descriptions ----------------------------------------------

    fn get_event(&self, path: &str) -> EngineResult<DescriptionHandle>;
    fn get_event_by_id(&self, id: EventId) -> EngineResult<DescriptionHandle>;
    fn description_id(&self, description: DescriptionHandle) -> EngineResult<EventId>;
    fn description_path(&self, description: DescriptionHandle) -> EngineResult<String>;
    fn description_parameter_count(&self, description: DescriptionHandle) -> EngineResult<usize>;
    fn description_instance_count(&self, description: DescriptionHandle) -> EngineResult<usize>;
    fn description_instance_list(
        &self,
        description: DescriptionHandle,
    ) -> EngineResult<Vec<InstanceHandle>>;
    fn load_sample_data(&mut self, description: DescriptionHandle) -> EngineResult<()>;
    fn unload_sample_data(&mut self, description: DescriptionHandle) -> EngineResult<()>;
    fn create_instance(&mut self, description: DescriptionHandle) -> EngineResult<InstanceHandle>;

    /// Callback inherited by every instance created from `description` afterwards.
    fn set_description_callback(
        &mut self,
        description: DescriptionHandle,
        callback: Option<EventCallback>,
        mask: CallbackMask,
    ) -> EngineResult<()>;

    // --- instances -------------------------------------------------------

    fn instance_description(&self, instance: InstanceHandle) -> EngineResult<DescriptionHandle>;
    fn playback_state(&self, instance: InstanceHandle) -> EngineResult<PlaybackState>;
    fn start(&mut self, instance: InstanceHandle) -> EngineResult<()>;
    fn stop(&mut self, instance: InstanceHandle, mode: StopMode) -> EngineResult<()>;
    fn release_instance(&mut self, instance: InstanceHandle) -> EngineResult<()>;
    fn trigger_cue(&mut self, instance: InstanceHandle) -> EngineResult<()>;

    fn get_3d_attributes(&self, instance: InstanceHandle) -> EngineResult<Attributes3D>;
    fn set_3d_attributes(
        &mut self,
        instance: InstanceHandle,
        attributes: Attributes3D,
    ) -> EngineResult<()>;

    fn get_listener_mask(&self, instance: InstanceHandle) -> EngineResult<u32>;
    fn set_listener_mask(&mut self, instance: InstanceHandle, mask: u32) -> EngineResult<()>;

    fn set_parameter_value(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        value: f32,
    ) -> EngineResult<()>;
    fn get_parameter_value_by_index(
        &self,
        instance: InstanceHandle,
        index: usize,
    ) -> EngineResult<f32>;
    fn set_parameter_value_by_index(
        &mut self,
        instance: InstanceHandle,
        index: usize,
        value: f32,
    ) -> EngineResult<()>;
    fn set_parameter_values_by_indices(
        &mut self,
        instance: InstanceHandle,
        indices: &[usize],
        values: &[f32],
    ) -> EngineResult<()>;

    fn get_paused(&self, instance: InstanceHandle) -> EngineResult<bool>;
    fn set_paused(&mut self, instance: InstanceHandle, paused: bool) -> EngineResult<()>;

    fn get_pitch(&self, instance: InstanceHandle) -> EngineResult<f32>;
    fn set_pitch(&mut self, instance: InstanceHandle, pitch: f32) -> EngineResult<()>;

    fn get_property(&self, instance: InstanceHandle, property: EventProperty) -> EngineResult<f32>;
    fn set_property(
        &mut self,
        instance: InstanceHandle,
        property: EventProperty,
        value: f32,
    ) -> EngineResult<()>;

    fn get_reverb_level(&self, instance: InstanceHandle, index: usize) -> EngineResult<f32>;
    fn set_reverb_level(
        &mut self,
        instance: InstanceHandle,
        index: usize,
        level: f32,
    ) -> EngineResult<()>;

    fn get_timeline_position(&self, instance: InstanceHandle) -> EngineResult<i32>;
    fn set_timeline_position(&mut self, instance: InstanceHandle, position: i32)
        -> EngineResult<()>;

    fn get_user_data(&self, instance: InstanceHandle) -> EngineResult<UserData>;
    fn set_user_data(&mut self, instance: InstanceHandle, data: UserData) -> EngineResult<()>;

    fn get_volume(&self, instance: InstanceHandle) -> EngineResult<f32>;
    fn set_volume(&mut self, instance: InstanceHandle, volume: f32) -> EngineResult<()>;

    fn set_instance_callback(
        &mut self,
        instance: InstanceHandle,
        callback: Option<EventCallback>,
        mask: CallbackMask,
    ) -> EngineResult<()>;

    // --- buses and VCAs --------------------------------------------------

    fn get_bus(&self, path: &str) -> EngineResult<BusHandle>;
    fn bus_get_mute(&self, bus: BusHandle) -> EngineResult<bool>;
    fn bus_set_mute(&mut self, bus: BusHandle, mute: bool) -> EngineResult<()>;
    fn bus_get_paused(&self, bus: BusHandle) -> EngineResult<bool>;
    fn bus_set_paused(&mut self, bus: BusHandle, paused: bool) -> EngineResult<()>;
    fn bus_stop_all_events(&mut self, bus: BusHandle, mode: StopMode) -> EngineResult<()>;

    fn get_vca(&self, path: &str) -> EngineResult<VcaHandle>;
    fn vca_get_volume(&self, vca: VcaHandle) -> EngineResult<f32>;
    fn vca_set_volume(&mut self, vca: VcaHandle, volume: f32) -> EngineResult<()>;

    // --- listener --------------------------------------------------------

    fn set_listener_attributes(
        &mut self,
        listener: usize,
        attributes: Attributes3D,
    ) -> EngineResult<()>;
    fn get_listener_attributes(&self, listener: usize) -> EngineResult<Attributes3D>;

    // --- low-level output ------------------------------------------------

    fn driver_count(&self) -> EngineResult<usize>;
    fn driver_info(&self, index: usize) -> EngineResult<DriverInfo>;
    fn get_driver(&self) -> EngineResult<usize>;
    fn set_driver(&mut self, index: usize) -> EngineResult<()>;
    fn get_output(&self) -> EngineResult<OutputType>;
    fn set_output(&mut self, output: OutputType) -> EngineResult<()>;
}

/// Allocates and initializes secondary engines.
pub trait SystemFactory: Send + Sync {
    fn create(&self, settings: &EngineSettings) -> EngineResult<Box<dyn StudioSystem>>;
}
