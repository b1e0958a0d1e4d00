//! Offline clock-drift simulation against the synthetic device layer.
//!
//! Playback pulls one period per tick; capture delivers the same period
//! scaled by `1 + ppm / 1e6`, carrying the fractional frame between ticks.
//! A positive offset models a capture clock running fast.

use std::path::PathBuf;

use serde::Serialize;
use transparency_core::{EngineConfig, EngineController, SyntheticBackend};

#[derive(Debug)]
struct Args {
    ppm: f64,
    seconds: f64,
    sample_rate: u32,
    channels: u16,
    period_frames: u32,
    ring_frames: usize,
    volume: f32,
    tone_hz: f32,
    wav: Option<PathBuf>,
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    ppm: f64,
    seconds: f64,
    sample_rate: u32,
    channels: u16,
    period_frames: u32,
    ring_frames: usize,
    callbacks: u64,
    frames_captured: u64,
    frames_from_ring: u64,
    underruns: u64,
    overruns: u64,
    drift_corrections: u64,
    min_fill: f32,
    max_fill: f32,
    final_fill: f32,
    final_latency_ms: f32,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("drift_sim failed: {e}");
        std::process::exit(1);
    }
}

fn parse_value<T: std::str::FromStr>(
    it: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<T, String> {
    let Some(v) = it.next() else {
        return Err(format!("missing value for {flag}"));
    };
    v.parse::<T>()
        .map_err(|_| format!("invalid value for {flag}: {v}"))
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        ppm: 100.0,
        seconds: 10.0,
        sample_rate: 48_000,
        channels: 2,
        period_frames: 128,
        ring_frames: 2048,
        volume: 1.0,
        tone_hz: 440.0,
        wav: None,
        output: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--ppm" => args.ppm = parse_value(&mut it, "--ppm")?,
            "--seconds" => args.seconds = parse_value(&mut it, "--seconds")?,
            "--sample-rate" => args.sample_rate = parse_value(&mut it, "--sample-rate")?,
            "--channels" => args.channels = parse_value(&mut it, "--channels")?,
            "--period" => args.period_frames = parse_value(&mut it, "--period")?,
            "--ring" => args.ring_frames = parse_value(&mut it, "--ring")?,
            "--volume" => args.volume = parse_value(&mut it, "--volume")?,
            "--tone" => args.tone_hz = parse_value(&mut it, "--tone")?,
            "--wav" => args.wav = Some(parse_value(&mut it, "--wav")?),
            "--output" => args.output = Some(parse_value(&mut it, "--output")?),
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p transparency-core --bin drift_sim -- \\
  [--ppm <offset>] [--seconds <n>] [--sample-rate <hz>] [--channels <n>] \\
  [--period <frames>] [--ring <frames>] [--volume <0..1>] [--tone <hz>] \\
  [--wav <out.wav>] [--output <summary.json>]"
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    if !(args.seconds.is_finite() && args.seconds > 0.0) {
        return Err("--seconds must be positive".into());
    }
    if !args.ppm.is_finite() || args.ppm <= -1e6 {
        return Err("--ppm must be greater than -1000000".into());
    }
    Ok(args)
}

fn run() -> Result<(), String> {
    let args = parse_args()?;

    let (backend, driver) = SyntheticBackend::new();
    let engine = EngineController::new(backend);
    engine
        .initialize(EngineConfig {
            sample_rate: args.sample_rate,
            channels: args.channels,
            period_frames: args.period_frames,
            volume: args.volume,
            ring_buffer_frames: Some(args.ring_frames),
            ..EngineConfig::default()
        })
        .map_err(|e| e.to_string())?;
    engine.start().map_err(|e| e.to_string())?;

    let mut wav = match &args.wav {
        Some(path) => {
            let spec = hound::WavSpec {
                channels: args.channels,
                sample_rate: args.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            };
            Some(hound::WavWriter::create(path, spec).map_err(|e| e.to_string())?)
        }
        None => None,
    };

    let ch = usize::from(args.channels);
    let period = args.period_frames as usize;
    let ratio = 1.0 + args.ppm / 1e6;
    let ticks = (args.seconds * f64::from(args.sample_rate) / period as f64).ceil() as u64;
    let phase_step = std::f32::consts::TAU * args.tone_hz / args.sample_rate as f32;

    let mut capture_block = Vec::with_capacity((period + 2) * ch);
    let mut output = vec![0.0f32; period * ch];
    let mut carry = 0.0f64;
    let mut phase = 0.0f32;
    let mut frames_captured = 0u64;
    let mut frames_from_ring = 0u64;
    let mut min_fill = f32::MAX;
    let mut max_fill = 0.0f32;

    for _ in 0..ticks {
        carry += period as f64 * ratio;
        let frames = carry.floor() as usize;
        carry -= frames as f64;

        capture_block.clear();
        for _ in 0..frames {
            let sample = phase.sin() * 0.5;
            phase = (phase + phase_step) % std::f32::consts::TAU;
            capture_block.extend(std::iter::repeat(sample).take(ch));
        }
        frames_captured += driver.push_capture(&capture_block).unwrap_or(0) as u64;

        frames_from_ring += driver.pull_playback_into(&mut output).unwrap_or(0) as u64;
        if let Some(writer) = wav.as_mut() {
            for &sample in &output {
                writer.write_sample(sample).map_err(|e| e.to_string())?;
            }
        }

        let fill = engine.status().buffer_fill;
        min_fill = min_fill.min(fill);
        max_fill = max_fill.max(fill);
    }

    if let Some(writer) = wav {
        writer.finalize().map_err(|e| e.to_string())?;
    }

    let status = engine.status();
    let summary = Summary {
        ppm: args.ppm,
        seconds: args.seconds,
        sample_rate: args.sample_rate,
        channels: args.channels,
        period_frames: args.period_frames,
        ring_frames: args.ring_frames,
        callbacks: ticks,
        frames_captured,
        frames_from_ring,
        underruns: status.underrun_count,
        overruns: status.overrun_count,
        drift_corrections: status.drift_correction_count,
        min_fill,
        max_fill,
        final_fill: status.buffer_fill,
        final_latency_ms: status.latency_ms,
    };
    engine.uninitialize().map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    match &args.output {
        Some(path) => std::fs::write(path, json).map_err(|e| e.to_string())?,
        None => println!("{json}"),
    }
    Ok(())
}
