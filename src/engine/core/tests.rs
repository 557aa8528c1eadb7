use super::*;
use crate::studio::{InstanceHandle, PlaybackState};

impl SplitterHandle {
    pub fn new_test() -> Self {
        Self::in_memory(SplitterConfig::default(), Arc::new(BankLibrary::demo()))
    }

    pub fn new_test_enabled_on_startup() -> Self {
        let mut config = SplitterConfig::default();
        config.settings.enable_on_startup = true;
        Self::in_memory(config, Arc::new(BankLibrary::demo()))
    }

    /// Load the demo content the way the host does at startup.
    pub fn load_demo_banks(&mut self) {
        let audio = self.audio_mut();
        audio.load_bank("master", true).unwrap();
        audio.load_bank("music", false).unwrap();
        audio.load_bank("sfx", false).unwrap();
    }

    /// Create and start an instance of `path` at `volume`.
    pub fn play_for_test(&mut self, path: &str, volume: f32) -> InstanceHandle {
        let audio = self.audio_mut();
        let description = audio.get_event_description(path).unwrap().unwrap();
        let instance = audio.create_instance(description).unwrap();
        audio.set_volume(instance, volume).unwrap();
        audio.start(instance).unwrap();
        instance
    }

    pub fn shadow_state_for_test(&self, instance: InstanceHandle) -> Option<(f32, PlaybackState)> {
        let shadow = self.music().shadow_instance(instance)?;
        self.music()
            .inspect(|sys| (sys.get_volume(shadow).unwrap(), sys.playback_state(shadow).unwrap()))
    }
}

#[test]
fn test_disabled_by_default() {
    let mut handle = SplitterHandle::new_test();
    handle.load_demo_banks();
    handle.load_content(true).unwrap();
    assert!(!handle.is_enabled());
    assert_eq!(handle.mirror_state(), MirrorState::Disabled);

    let instance = handle.play_for_test("event:/music/lvl1", 0.8);
    assert_eq!(handle.shadow_state_for_test(instance), None);
}

#[test]
fn test_enable_on_startup_only_on_first_load() {
    let mut handle = SplitterHandle::new_test_enabled_on_startup();
    handle.load_demo_banks();
    handle.load_content(false).unwrap();
    assert!(!handle.is_enabled());

    handle.load_content(true).unwrap();
    assert!(handle.is_enabled());
    assert_eq!(
        handle.music().stats().banks,
        vec!["master".to_string(), "music".to_string(), "sfx".to_string()]
    );
}

#[test]
fn test_toggle_round_trip() {
    let mut handle = SplitterHandle::new_test();
    handle.load_demo_banks();
    let instance = handle.play_for_test("event:/music/lvl1", 0.5);

    handle.toggle_mirroring().unwrap();
    assert_eq!(handle.wait_for_toggle().unwrap(), MirrorState::Enabled);
    let (volume, state) = handle.shadow_state_for_test(instance).unwrap();
    assert_eq!(volume, 0.5);
    assert!(state.is_audible());

    assert_eq!(handle.toggle_mirroring().unwrap(), MirrorState::Disabling);
    assert_eq!(handle.wait_for_toggle().unwrap(), MirrorState::Disabled);
    assert_eq!(handle.shadow_state_for_test(instance), None);
}

#[test]
fn test_update_pumps_and_finishes_toggle() {
    let mut handle = SplitterHandle::new_test();
    handle.load_demo_banks();
    handle.toggle_mirroring().unwrap();

    for _ in 0..5000 {
        handle.update().unwrap();
        if handle.is_enabled() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert!(handle.is_enabled());
}

#[test]
fn test_music_device_persists_in_config() {
    let mut handle = SplitterHandle::new_test();
    let device = OutputDeviceInfo::new(0, "memory-default", "Default Output");
    handle.set_music_device(device.clone());
    assert_eq!(handle.config().settings.music_output_device, device);
    assert_eq!(handle.music().device(), device);
}

#[test]
fn test_shutdown_terminates_contexts() {
    let mut handle = SplitterHandle::new_test_enabled_on_startup();
    handle.load_demo_banks();
    handle.load_content(true).unwrap();
    handle.shutdown().unwrap();
    assert!(!handle.is_enabled());
    assert!(handle.stats().iter().all(|stats| !stats.ready));
}
