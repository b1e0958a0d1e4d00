//! cpal device layer.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), while `AudioBackend` must be `Send` so the controller can live
//! behind a mutex. `CpalBackend` therefore owns a dedicated worker thread that
//! creates, plays, pauses and drops both streams; the backend itself only
//! holds the command sender and the join handle.
//!
//! ```text
//! EngineController ──bind──► spawn "transparency-audio" ──► open both streams
//!        │                                   ▲                    │
//!        └─start/stop/release─► Command ─────┘      reply ◄───────┘
//! ```
//!
//! Streams are built paused and only ever carry f32 samples at the
//! configured rate and channel count; format or rate conversion is not done.
//!
//! # Warnings raised
//!
//! `DeviceFallback`, `ExclusiveModeUnavailable`, `PeriodSizeIgnored` and
//! `StreamFault`. cpal manages its callback threads and exposes no priority
//! result, so `PriorityNotElevated` never comes from this backend.

use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, DeviceEvents, DeviceRole, DeviceTiming, StreamCallbacks};
use crate::engine::{EngineConfig, PerformanceProfile, ShareMode};
use crate::error::{Result, TransparencyError};
use crate::ipc::events::EngineWarning;

/// Period assumed when the device picks its own: 10 ms, the usual shared-mode
/// default on WASAPI and PulseAudio.
const DEFAULT_PERIOD_DIVISOR: u32 = 100;

enum Command {
    Start {
        role: DeviceRole,
        reply: Sender<Result<()>>,
    },
    Stop {
        role: DeviceRole,
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

struct Worker {
    commands: Sender<Command>,
    handle: JoinHandle<()>,
}

/// Backend driving real hardware through the default cpal host.
#[derive(Default)]
pub struct CpalBackend {
    worker: Option<Worker>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn request(
        &self,
        role: DeviceRole,
        make: impl FnOnce(Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let worker = self.worker.as_ref().ok_or(TransparencyError::NotInitialized)?;
        let (reply_tx, reply_rx) = bounded(1);
        worker
            .commands
            .send(make(reply_tx))
            .map_err(|_| worker_gone(role))?;
        reply_rx.recv().map_err(|_| worker_gone(role))?
    }
}

fn worker_gone(role: DeviceRole) -> TransparencyError {
    TransparencyError::Other(anyhow::anyhow!(
        "audio worker thread exited while handling a {role} request"
    ))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn bind(
        &mut self,
        config: &EngineConfig,
        callbacks: StreamCallbacks,
        events: DeviceEvents,
    ) -> Result<DeviceTiming> {
        self.release();

        let (ready_tx, ready_rx) = bounded(1);
        let (commands, command_rx) = unbounded();
        let config = config.clone();

        let handle = std::thread::Builder::new()
            .name("transparency-audio".into())
            .spawn(move || run_worker(config, callbacks, events, ready_tx, command_rx))
            .map_err(|e| TransparencyError::BackendInit(format!("spawn audio worker: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(timing)) => {
                self.worker = Some(Worker { commands, handle });
                Ok(timing)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(TransparencyError::BackendInit(
                    "audio worker exited before opening devices".into(),
                ))
            }
        }
    }

    fn start(&mut self, role: DeviceRole) -> Result<()> {
        self.request(role, |reply| Command::Start { role, reply })
    }

    fn stop(&mut self, role: DeviceRole) -> Result<()> {
        self.request(role, |reply| Command::Stop { role, reply })
    }

    fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(Command::Shutdown);
            if worker.handle.join().is_err() {
                warn!("audio worker thread panicked");
            }
            debug!("audio worker joined");
        }
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Worker thread ─────────────────────────────────────────────────────────────

struct OpenStreams {
    capture: Stream,
    playback: Stream,
}

impl OpenStreams {
    fn get(&self, role: DeviceRole) -> &Stream {
        match role {
            DeviceRole::Capture => &self.capture,
            DeviceRole::Playback => &self.playback,
        }
    }
}

fn run_worker(
    config: EngineConfig,
    callbacks: StreamCallbacks,
    events: DeviceEvents,
    ready: Sender<Result<DeviceTiming>>,
    commands: Receiver<Command>,
) {
    let streams = match open_streams(&config, callbacks, &events) {
        Ok((streams, timing)) => {
            let _ = ready.send(Ok(timing));
            streams
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    for command in commands.iter() {
        match command {
            Command::Start { role, reply } => {
                let result = streams
                    .get(role)
                    .play()
                    .map_err(|e| TransparencyError::DeviceStart {
                        role,
                        message: e.to_string(),
                    });
                let _ = reply.send(result);
            }
            Command::Stop { role, reply } => {
                let result = streams
                    .get(role)
                    .pause()
                    .map_err(|e| TransparencyError::DeviceStop {
                        role,
                        message: e.to_string(),
                    });
                let _ = reply.send(result);
            }
            Command::Shutdown => break,
        }
    }

    // Dropping the streams closes both devices on the thread that opened them.
    drop(streams);
}

fn open_streams(
    config: &EngineConfig,
    callbacks: StreamCallbacks,
    events: &DeviceEvents,
) -> Result<(OpenStreams, DeviceTiming)> {
    let host = cpal::default_host();
    info!(host = host.id().name(), "opening audio devices");

    let StreamCallbacks {
        mut capture,
        mut playback,
    } = callbacks;

    let input = resolve_device(&host, DeviceRole::Capture, config, events)?;
    let output = resolve_device(&host, DeviceRole::Playback, config, events)?;

    if config.share_mode == ShareMode::Exclusive {
        // cpal only opens shared-mode streams.
        events.warn(EngineWarning::ExclusiveModeUnavailable {
            role: DeviceRole::Capture,
        });
        events.warn(EngineWarning::ExclusiveModeUnavailable {
            role: DeviceRole::Playback,
        });
    }

    let input_id = input.name().unwrap_or_default();
    let (capture_config, capture_period) =
        stream_config(&input, DeviceRole::Capture, config, events)?;
    let capture_events = events.clone();
    let capture_stream = input
        .build_input_stream(
            &capture_config,
            move |data: &[f32], _info| {
                capture.process(data);
            },
            move |err| report_stream_error(&capture_events, DeviceRole::Capture, &input_id, err),
            None,
        )
        .map_err(|e| TransparencyError::DeviceOpen {
            role: DeviceRole::Capture,
            message: e.to_string(),
        })?;

    let output_id = output.name().unwrap_or_default();
    let (playback_config, playback_period) =
        stream_config(&output, DeviceRole::Playback, config, events)?;
    let playback_events = events.clone();
    let playback_stream = output
        .build_output_stream(
            &playback_config,
            move |data: &mut [f32], _info| {
                playback.render(data);
            },
            move |err| {
                report_stream_error(&playback_events, DeviceRole::Playback, &output_id, err)
            },
            None,
        )
        .map_err(|e| TransparencyError::DeviceOpen {
            role: DeviceRole::Playback,
            message: e.to_string(),
        })?;

    // Some hosts start streams on creation; the engine starts them explicitly.
    for (role, stream) in [
        (DeviceRole::Capture, &capture_stream),
        (DeviceRole::Playback, &playback_stream),
    ] {
        if let Err(e) = stream.pause() {
            debug!(%role, "pause after build not supported: {e}");
        }
    }

    let timing = DeviceTiming {
        capture_period_frames: capture_period,
        playback_period_frames: playback_period,
    };
    info!(
        input = input.name().unwrap_or_default().as_str(),
        output = output.name().unwrap_or_default().as_str(),
        capture_period,
        playback_period,
        "audio devices opened"
    );

    Ok((
        OpenStreams {
            capture: capture_stream,
            playback: playback_stream,
        },
        timing,
    ))
}

/// Find the configured device by name, falling back to the host default.
fn resolve_device(
    host: &cpal::Host,
    role: DeviceRole,
    config: &EngineConfig,
    events: &DeviceEvents,
) -> Result<cpal::Device> {
    let requested = match role {
        DeviceRole::Capture => config.input_device_id.as_deref(),
        DeviceRole::Playback => config.output_device_id.as_deref(),
    };

    if let Some(requested) = requested {
        let devices = match role {
            DeviceRole::Capture => host.input_devices(),
            DeviceRole::Playback => host.output_devices(),
        };
        match devices {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == requested).unwrap_or(false))
                {
                    return Ok(device);
                }
                events.warn(EngineWarning::DeviceFallback {
                    role,
                    requested_id: requested.to_string(),
                });
            }
            Err(e) => warn!(%role, "failed to list devices while resolving '{requested}': {e}"),
        }
    }

    let default = match role {
        DeviceRole::Capture => host.default_input_device(),
        DeviceRole::Playback => host.default_output_device(),
    };
    default.ok_or_else(|| TransparencyError::DeviceOpen {
        role,
        message: "no default device available".into(),
    })
}

/// Build the stream config and report the period it will run with.
fn stream_config(
    device: &cpal::Device,
    role: DeviceRole,
    config: &EngineConfig,
    events: &DeviceEvents,
) -> Result<(StreamConfig, u32)> {
    let open_err = |message: String| TransparencyError::DeviceOpen { role, message };

    let supported: Vec<_> = match role {
        DeviceRole::Capture => device
            .supported_input_configs()
            .map_err(|e| open_err(e.to_string()))?
            .collect(),
        DeviceRole::Playback => device
            .supported_output_configs()
            .map_err(|e| open_err(e.to_string()))?
            .collect(),
    };

    let rate = config.sample_rate;
    let matching = supported
        .iter()
        .find(|c| {
            c.sample_format() == SampleFormat::F32
                && c.channels() == config.channels
                && (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&rate)
        })
        .ok_or_else(|| {
            open_err(format!(
                "no f32 configuration with {} channels at {rate} Hz",
                config.channels
            ))
        })?;

    let default_period = (rate / DEFAULT_PERIOD_DIVISOR).max(1);
    let (buffer_size, period) = match config.performance_profile {
        PerformanceProfile::Conservative => (BufferSize::Default, default_period),
        PerformanceProfile::LowLatency => match matching.buffer_size() {
            SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&config.period_frames) =>
            {
                (BufferSize::Fixed(config.period_frames), config.period_frames)
            }
            _ => {
                events.warn(EngineWarning::PeriodSizeIgnored {
                    role,
                    requested_frames: config.period_frames,
                });
                (BufferSize::Default, default_period)
            }
        },
    };

    Ok((
        StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(rate),
            buffer_size,
        },
        period,
    ))
}

fn report_stream_error(
    events: &DeviceEvents,
    role: DeviceRole,
    device_id: &str,
    err: cpal::StreamError,
) {
    match err {
        cpal::StreamError::DeviceNotAvailable => events.disconnected(role, device_id),
        other => events.warn(EngineWarning::StreamFault {
            role,
            message: other.to_string(),
        }),
    }
}
