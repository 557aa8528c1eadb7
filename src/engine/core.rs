//! SplitterHandle: top-level orchestration of the audio splitter.
//!
//! Owns the host adapter around the primary engine, the registry of
//! mirroring contexts, the music context, the device manager and the toggle
//! manager. The host drives everything from its frame step through
//! [`SplitterHandle::update`].

use std::sync::Arc;

use crate::config::SplitterConfig;
use crate::context::{ContextStats, EngineContext};
use crate::devices::{DeviceEnumerator, OutputDeviceInfo, OutputDeviceManager, StaticDeviceEnumerator};
use crate::error::{log_mirror_error, EngineResult, MirrorError};
use crate::managers::{MirrorState, MirrorToggleManager};
use crate::mirror::{ContentDirLocator, MirrorRegistry, MirroredAudio};
use crate::studio::{
    BankLibrary, MemoryStudioSystem, MemorySystemFactory, StudioSystem, SystemFactory,
};

/// Name of the context mirroring music onto its own device.
pub const MUSIC_CONTEXT: &str = "music";

/// Top-level handle the host keeps for the lifetime of its audio layer.
pub struct SplitterHandle {
    config: SplitterConfig,
    audio: MirroredAudio,
    registry: Arc<MirrorRegistry>,
    music: Arc<EngineContext>,
    devices: OutputDeviceManager,
    toggle: MirrorToggleManager,
}

impl SplitterHandle {
    /// Wire the splitter around `primary`. Nothing is mirrored until
    /// mirroring is enabled.
    pub fn new(
        config: SplitterConfig,
        primary: Box<dyn StudioSystem>,
        factory: Arc<dyn SystemFactory>,
        enumerator: Arc<dyn DeviceEnumerator>,
    ) -> Self {
        let locator = Arc::new(ContentDirLocator::new(
            config.engine.content_dir.clone(),
            config.engine.mod_banks.clone(),
        ));
        let audio = MirroredAudio::new(
            primary,
            locator.clone(),
            config.engine.unload_unused_audio,
        );

        let music = Arc::new(EngineContext::new(
            MUSIC_CONTEXT,
            factory,
            locator,
            config.engine.clone(),
        ));
        let registry = Arc::new(MirrorRegistry::new());
        registry.register(Arc::clone(&music));
        audio.add_observer(registry.clone());

        let toggle = MirrorToggleManager::new(Arc::clone(&music));
        log::info!(
            "[SplitterHandle] Created (content: {:?}, enable on startup: {})",
            config.engine.content_dir,
            config.settings.enable_on_startup
        );

        Self {
            config,
            audio,
            registry,
            music,
            devices: OutputDeviceManager::new(enumerator),
            toggle,
        }
    }

    /// Splitter over the in-memory engine, for the simulator and tests.
    pub fn in_memory(config: SplitterConfig, library: Arc<BankLibrary>) -> Self {
        let primary = MemoryStudioSystem::new(Arc::clone(&library));
        let factory = Arc::new(MemorySystemFactory::new(library));
        let default_driver = MemoryStudioSystem::default_driver();
        let enumerator = Arc::new(StaticDeviceEnumerator::new(vec![OutputDeviceInfo::new(
            0,
            default_driver.id,
            default_driver.name,
        )]));
        Self::new(config, Box::new(primary), factory, enumerator)
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    pub fn audio(&self) -> &MirroredAudio {
        &self.audio
    }

    /// The host's audio calls go through here.
    pub fn audio_mut(&mut self) -> &mut MirroredAudio {
        &mut self.audio
    }

    pub fn registry(&self) -> &Arc<MirrorRegistry> {
        &self.registry
    }

    pub fn music(&self) -> &Arc<EngineContext> {
        &self.music
    }

    pub fn devices(&self) -> &OutputDeviceManager {
        &self.devices
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Host content is loaded. Refreshes devices, applies the persisted
    /// selections and, on the first load, enables mirroring when configured.
    pub fn load_content(&mut self, first_load: bool) -> Result<(), MirrorError> {
        if let Err(err) = self.devices.fetch_devices() {
            log_mirror_error(&err, "SplitterHandle::load_content");
        }
        let audio_device = self.devices.resolve(&self.config.settings.audio_output_device);
        self.bind_primary(&audio_device);
        let music_device = self.devices.resolve(&self.config.settings.music_output_device);
        self.music.set_device(&music_device);

        if first_load && self.config.settings.enable_on_startup {
            log::info!("[SplitterHandle] Enabling mirroring on startup");
            self.toggle.enable_blocking(self.audio.view())?;
            let sfx_device = self.devices.resolve(&self.config.settings.sfx_output_device);
            self.bind_primary(&sfx_device);
        }
        Ok(())
    }

    /// Flip mirroring in the background. The result lands in a later
    /// [`update`](Self::update).
    pub fn toggle_mirroring(&mut self) -> Result<MirrorState, MirrorError> {
        let state = self.toggle.toggle(self.audio.view())?;
        let device = match state {
            MirrorState::Enabling | MirrorState::Enabled => &self.config.settings.sfx_output_device,
            MirrorState::Disabling | MirrorState::Disabled => {
                &self.config.settings.audio_output_device
            }
        };
        let device = self.devices.resolve(device);
        self.bind_primary(&device);
        Ok(state)
    }

    /// Block until a pending toggle has finished.
    pub fn wait_for_toggle(&mut self) -> Result<MirrorState, MirrorError> {
        self.toggle.wait(self.audio.view())
    }

    pub fn is_enabled(&self) -> bool {
        self.music.is_ready()
    }

    pub fn mirror_state(&self) -> MirrorState {
        self.toggle.state()
    }

    /// Host frame step: pump the primary, then every secondary engine,
    /// then finish a pending toggle.
    pub fn update(&mut self) -> EngineResult<()> {
        let result = self.audio.update();
        if let Err(err) = self.toggle.poll(self.audio.view()) {
            log_mirror_error(&err, "SplitterHandle::update");
        }
        result
    }

    /// Deterministic teardown: every context terminates, then the primary
    /// is released.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        if let Err(err) = self.toggle.disable_blocking(self.audio.view()) {
            log_mirror_error(&err, "SplitterHandle::shutdown");
        }
        for context in self.registry.contexts() {
            if let Err(err) = context.terminate() {
                log_mirror_error(&err, "SplitterHandle::shutdown");
            }
        }
        log::info!("[SplitterHandle] Shut down");
        self.audio.release()
    }

    // ========================================================================
    // DEVICES
    // ========================================================================

    /// Output device of the primary while mirroring is off.
    pub fn set_audio_device(&mut self, device: OutputDeviceInfo) {
        self.config.settings.audio_output_device = device.clone();
        if !self.is_enabled() {
            self.bind_primary(&device);
        }
    }

    /// Output device of the primary while mirroring is on.
    pub fn set_sfx_device(&mut self, device: OutputDeviceInfo) {
        self.config.settings.sfx_output_device = device.clone();
        if self.is_enabled() {
            self.bind_primary(&device);
        }
    }

    pub fn set_music_device(&mut self, device: OutputDeviceInfo) {
        self.music.set_device(&device);
        self.config.settings.music_output_device = device;
    }

    fn bind_primary(&mut self, device: &OutputDeviceInfo) {
        match self.audio.set_output_device(device) {
            Ok(()) => log::info!("[SplitterHandle] Primary bound to {}", device.label()),
            Err(err) => {
                log::warn!(
                    "[SplitterHandle] Failed to bind primary to {}, falling back to default: {}",
                    device.label(),
                    err
                );
                if let Err(err) = self
                    .audio
                    .set_output_device(&OutputDeviceInfo::default_device())
                {
                    log::error!("[SplitterHandle] Failed to bind primary to default: {}", err);
                }
            }
        }
    }

    pub fn stats(&self) -> Vec<ContextStats> {
        self.registry
            .contexts()
            .iter()
            .map(|context| context.stats())
            .collect()
    }
}

// ========================================================================
// TEST HELPERS
// ========================================================================

#[cfg(test)]
mod tests;
