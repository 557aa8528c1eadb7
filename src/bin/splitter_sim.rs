use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use audio_splitter::context::ContextStats;
use audio_splitter::devices::{DeviceEnumerator, OutputDeviceInfo};
use audio_splitter::studio::{BankLibrary, InstanceHandle, PlaybackState, StudioSystem};
use audio_splitter::telemetry::{self, TelemetrySnapshot};
use audio_splitter::{init_logging, MirrorState, SplitterConfig, SplitterHandle};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "splitter_sim",
    about = "Run the audio splitter against the in-memory engine"
)]
struct Cli {
    /// Splitter configuration (JSON); defaults are used when missing
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load every bank, enable mirroring, play an event and report primary
    /// and shadow state as JSON
    Simulate {
        /// Bank library manifest (JSON); the built-in demo library otherwise
        #[arg(long)]
        library: Option<PathBuf>,
        #[arg(long, default_value = "event:/music/lvl1")]
        event: String,
        #[arg(long, default_value_t = 0.8)]
        volume: f32,
        #[arg(long, default_value_t = 1.0)]
        pitch: f32,
        /// VCA volume to set after mirroring is on
        #[arg(long)]
        vca: Option<String>,
        #[arg(long, default_value_t = 0.5)]
        vca_volume: f32,
        /// Frames to pump after starting the event
        #[arg(long, default_value_t = 3)]
        frames: u32,
    },
    /// List output devices
    Devices,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .as_ref()
        .map(SplitterConfig::load_from_file)
        .unwrap_or_default();
    init_logging(&config.log_level);

    match cli.command {
        Commands::Simulate {
            library,
            event,
            volume,
            pitch,
            vca,
            vca_volume,
            frames,
        } => {
            let library = match library {
                Some(path) => BankLibrary::load_from_file(&path)
                    .with_context(|| format!("loading bank library {}", path.display()))?,
                None => BankLibrary::demo(),
            };
            let options = SimulateOptions {
                event,
                volume,
                pitch,
                vca,
                vca_volume,
                frames,
            };
            run_simulate(config, library, &options)
        }
        Commands::Devices => run_devices(),
    }
}

struct SimulateOptions {
    event: String,
    volume: f32,
    pitch: f32,
    vca: Option<String>,
    vca_volume: f32,
    frames: u32,
}

fn run_simulate(
    config: SplitterConfig,
    library: BankLibrary,
    options: &SimulateOptions,
) -> Result<ExitCode> {
    let banks: Vec<(String, bool)> = library
        .banks
        .iter()
        .map(|bank| (bank.name.clone(), bank.strings))
        .collect();
    let mut handle = SplitterHandle::in_memory(config, Arc::new(library));

    for (name, strings) in &banks {
        handle
            .audio_mut()
            .load_bank(name, *strings)
            .with_context(|| format!("loading bank {}", name))?;
    }
    handle.load_content(true)?;

    if !handle.is_enabled() {
        handle.toggle_mirroring()?;
    }
    let state = handle.wait_for_toggle()?;
    if state != MirrorState::Enabled {
        return Err(anyhow!("mirroring did not come up: {:?}", state));
    }

    let audio = handle.audio_mut();
    let description = audio
        .get_event_description(&options.event)?
        .ok_or_else(|| anyhow!("event {} not found", options.event))?;
    let instance = audio.create_instance(description)?;
    audio.set_volume(instance, options.volume)?;
    audio.set_pitch(instance, options.pitch)?;
    audio.start(instance)?;

    let vca = options.vca.as_ref().map(|path| VcaReport {
        path: path.clone(),
        primary: handle.audio_mut().vca_volume(path, Some(options.vca_volume)),
        shadow: handle.music().vca_volume(path, None),
    });

    for _ in 0..options.frames {
        handle.update()?;
    }

    let report = SimulationReport {
        event: options.event.clone(),
        primary: instance_report(&handle, instance, false),
        shadow: instance_report(&handle, instance, true),
        vca,
        contexts: handle.stats(),
        telemetry: telemetry::hub().snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    handle.shutdown()?;
    Ok(ExitCode::from(0))
}

fn instance_report(
    handle: &SplitterHandle,
    instance: InstanceHandle,
    shadow: bool,
) -> Option<InstanceReport> {
    if !shadow {
        return read_instance(handle.audio().primary(), instance);
    }
    let duplicate = handle.music().shadow_instance(instance)?;
    handle
        .music()
        .inspect(|system| read_instance(system, duplicate))
        .flatten()
}

fn read_instance(
    system: &dyn StudioSystem,
    instance: InstanceHandle,
) -> Option<InstanceReport> {
    Some(InstanceReport {
        handle: instance.to_string(),
        state: system.playback_state(instance).ok()?,
        volume: system.get_volume(instance).ok()?,
        pitch: system.get_pitch(instance).ok()?,
    })
}

fn run_devices() -> Result<ExitCode> {
    let devices = enumerator()
        .enumerate()
        .context("enumerating output devices")?;
    let mut listed = vec![OutputDeviceInfo::default_device()];
    listed.extend(devices);
    println!("{}", serde_json::to_string_pretty(&listed)?);
    Ok(ExitCode::from(0))
}

#[cfg(feature = "cpal_devices")]
fn enumerator() -> Box<dyn DeviceEnumerator> {
    Box::new(audio_splitter::devices::CpalDeviceEnumerator::new())
}

#[cfg(not(feature = "cpal_devices"))]
fn enumerator() -> Box<dyn DeviceEnumerator> {
    use audio_splitter::devices::StaticDeviceEnumerator;
    use audio_splitter::studio::MemoryStudioSystem;

    let driver = MemoryStudioSystem::default_driver();
    Box::new(StaticDeviceEnumerator::new(vec![OutputDeviceInfo::new(
        0, driver.id, driver.name,
    )]))
}

#[derive(Serialize)]
struct SimulationReport {
    event: String,
    primary: Option<InstanceReport>,
    shadow: Option<InstanceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vca: Option<VcaReport>,
    contexts: Vec<ContextStats>,
    telemetry: TelemetrySnapshot,
}

#[derive(Serialize)]
struct InstanceReport {
    handle: String,
    state: PlaybackState,
    volume: f32,
    pitch: f32,
}

#[derive(Serialize)]
struct VcaReport {
    path: String,
    primary: f32,
    shadow: Option<f32>,
}
