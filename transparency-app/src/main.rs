//! Transparency headless host.
//!
//! Loads persisted settings, bridges the selected capture device to the
//! selected playback device through cpal, and logs engine status until
//! Ctrl-C or a device disconnect.
//!
//! ## Runtime note
//!
//! Engine lifecycle calls block while the cpal worker opens or closes
//! devices, so they run under `spawn_blocking`; the async side only waits
//! on signals, the status ticker and the engine event channel.

mod cli;
mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use transparency_core::{
    list_capture_devices, list_playback_devices, CpalBackend, EngineController, EngineEvent,
};

use cli::{Cli, Command, Overrides};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};

#[tokio::main]
async fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("transparency=info")),
        )
        .init();

    let cli = match cli::parse(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}\n\n{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Help => {
            println!("{}", cli::USAGE);
            Ok(())
        }
        Command::Devices => {
            let devices = json!({
                "capture": list_capture_devices(),
                "playback": list_playback_devices(),
            });
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }
        Command::Run => {
            let settings_path = cli.settings_path.unwrap_or_else(default_settings_path);
            let mut app_settings = load_settings(&settings_path);
            apply_overrides(&mut app_settings, &cli.overrides);
            if cli.save {
                save_settings(&settings_path, &app_settings)
                    .with_context(|| format!("saving {}", settings_path.display()))?;
            }
            info!(
                settings_path = ?settings_path,
                input = app_settings.input_device.as_deref().unwrap_or("default"),
                output = app_settings.output_device.as_deref().unwrap_or("default"),
                sample_rate = app_settings.sample_rate,
                channels = app_settings.channels,
                period_frames = app_settings.period_frames,
                "runtime settings loaded"
            );
            run_bridge(app_settings).await
        }
    }
}

fn apply_overrides(settings: &mut AppSettings, overrides: &Overrides) {
    if let Some(input) = &overrides.input_device {
        settings.input_device = Some(input.clone());
    }
    if let Some(output) = &overrides.output_device {
        settings.output_device = Some(output.clone());
    }
    if let Some(volume) = overrides.volume {
        settings.volume = volume;
    }
    if let Some(period) = overrides.period_frames {
        settings.period_frames = period;
    }
    if let Some(ring) = overrides.ring_buffer_frames {
        settings.ring_buffer_frames = ring;
    }
    if let Some(exclusive) = overrides.exclusive_mode {
        settings.exclusive_mode = exclusive;
    }
    settings.normalize();
}

async fn run_bridge(app_settings: AppSettings) -> anyhow::Result<()> {
    let engine = Arc::new(EngineController::new(CpalBackend::new()));
    let mut events = engine.subscribe_events();

    let config = app_settings.to_engine_config();
    let starting = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || {
        starting.initialize(config)?;
        starting.start()
    })
    .await
    .context("engine start task")?
    .context("starting engine")?;

    info!("Transparency running, press Ctrl-C to stop");

    let mut ticker =
        tokio::time::interval(Duration::from_secs(app_settings.status_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!("ctrl-c handler failed: {e}");
                }
                info!("shutdown requested");
                break Ok(());
            }
            _ = ticker.tick() => {
                let status = engine.status();
                info!(
                    fill = format!("{:.0}%", status.buffer_fill * 100.0).as_str(),
                    latency_ms = format!("{:.1}", status.latency_ms).as_str(),
                    underruns = status.underrun_count,
                    overruns = status.overrun_count,
                    drift_corrections = status.drift_correction_count,
                    "engine status"
                );
            }
            event = events.recv() => match event {
                Ok(EngineEvent::DeviceDisconnected { role, device_id }) => {
                    break Err(anyhow::anyhow!("{role} device '{device_id}' disconnected"));
                }
                Ok(other) => debug!(?other, "engine event"),
                Err(RecvError::Lagged(n)) => warn!("event receiver lagged by {n} messages"),
                Err(RecvError::Closed) => break Ok(()),
            }
        }
    };

    let stopping = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || stopping.uninitialize())
        .await
        .context("engine shutdown task")?
        .context("stopping engine")?;

    let status = engine.status();
    info!(
        underruns = status.underrun_count,
        overruns = status.overrun_count,
        drift_corrections = status.drift_correction_count,
        "Transparency stopped"
    );
    outcome
}
