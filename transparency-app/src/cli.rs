//! Command-line parsing for the `transparency` host.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Bridge capture to playback until Ctrl-C.
    Run,
    /// Print capture and playback devices as JSON.
    Devices,
    Help,
}

/// Settings overrides given on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub volume: Option<f32>,
    pub period_frames: Option<u32>,
    pub ring_buffer_frames: Option<usize>,
    pub exclusive_mode: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cli {
    pub command: Command,
    pub settings_path: Option<PathBuf>,
    pub overrides: Overrides,
    /// Write the merged settings back to the settings file.
    pub save: bool,
}

pub const USAGE: &str = "\
Usage: transparency [run|devices] [options]

Options:
  --settings <file>   settings file (default: platform data directory)
  --input <name>      capture device name
  --output <name>     playback device name
  --volume <0..1>     initial volume
  --period <frames>   requested device period
  --ring <frames>     ring buffer capacity
  --exclusive         request exclusive device access
  --save              persist the options above to the settings file
  -h, --help          show this message";

fn value<T: std::str::FromStr>(
    it: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<T, String> {
    let Some(v) = it.next() else {
        return Err(format!("missing value for {flag}"));
    };
    v.parse::<T>()
        .map_err(|_| format!("invalid value for {flag}: {v}"))
}

pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Cli, String> {
    let mut cli = Cli {
        command: Command::Run,
        settings_path: None,
        overrides: Overrides::default(),
        save: false,
    };

    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "run" => cli.command = Command::Run,
            "devices" => cli.command = Command::Devices,
            "--settings" => cli.settings_path = Some(value(&mut it, "--settings")?),
            "--input" => cli.overrides.input_device = Some(value(&mut it, "--input")?),
            "--output" => cli.overrides.output_device = Some(value(&mut it, "--output")?),
            "--volume" => cli.overrides.volume = Some(value(&mut it, "--volume")?),
            "--period" => cli.overrides.period_frames = Some(value(&mut it, "--period")?),
            "--ring" => cli.overrides.ring_buffer_frames = Some(value(&mut it, "--ring")?),
            "--exclusive" => cli.overrides.exclusive_mode = Some(true),
            "--save" => cli.save = true,
            "--help" | "-h" => cli.command = Command::Help,
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_to_run_without_overrides() {
        let cli = parse(Vec::new()).unwrap();
        assert_eq!(cli.command, Command::Run);
        assert_eq!(cli.overrides, Overrides::default());
        assert!(!cli.save);
    }

    #[test]
    fn parses_command_and_overrides() {
        let cli = parse(args(&[
            "run",
            "--input",
            "USB Mic",
            "--volume",
            "0.5",
            "--exclusive",
            "--settings",
            "/tmp/t.json",
            "--save",
        ]))
        .unwrap();
        assert_eq!(cli.overrides.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(cli.overrides.volume, Some(0.5));
        assert_eq!(cli.overrides.exclusive_mode, Some(true));
        assert_eq!(cli.settings_path, Some(PathBuf::from("/tmp/t.json")));
        assert!(cli.save);

        assert_eq!(parse(args(&["devices"])).unwrap().command, Command::Devices);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(args(&["--volume"])).is_err());
        assert!(parse(args(&["--period", "many"])).is_err());
        assert!(parse(args(&["--bogus"])).is_err());
    }
}
