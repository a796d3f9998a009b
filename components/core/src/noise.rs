// Copyright (c) 2017 Chef Software Inc. and/or applicable contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Log verbosity handling.
//!
//! The log facade is configured once with an env_logger formatter whose
//! output goes through a switchable sink, so that the monitor can redirect
//! its logs to a file after daemonizing and the control channel can adjust
//! verbosity at run time.  Errors are always emitted; the noise level
//! gates everything below them.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use env_logger;
use log::LevelFilter;

use crate::error::{Error, Result};

pub const NOISE_ENVVAR: &str = "SYSVRUN_NOISE";
pub const LOG_FILE_ENVVAR: &str = "SYSVRUN_LOG_TO_FILE";

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Noise {
    Silent,
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl Noise {
    fn filter(self) -> LevelFilter {
        match self {
            Noise::Silent => LevelFilter::Error,
            Noise::Quiet => LevelFilter::Warn,
            Noise::Normal => LevelFilter::Info,
            Noise::Verbose => LevelFilter::Debug,
            Noise::Debug => LevelFilter::Trace,
        }
    }

    fn from_filter(filter: LevelFilter) -> Noise {
        match filter {
            LevelFilter::Off | LevelFilter::Error => Noise::Silent,
            LevelFilter::Warn => Noise::Quiet,
            LevelFilter::Info => Noise::Normal,
            LevelFilter::Debug => Noise::Verbose,
            LevelFilter::Trace => Noise::Debug,
        }
    }
}

enum SinkTarget {
    Stderr,
    File(File),
}

lazy_static! {
    static ref SINK: Mutex<SinkTarget> = Mutex::new(SinkTarget::Stderr);
}

/// A Write passed to env_logger that forwards to the current sink.
struct NoiseSink;

impl Write for NoiseSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *SINK.lock().unwrap() {
            SinkTarget::Stderr => io::stderr().write(buf),
            SinkTarget::File(ref mut f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *SINK.lock().unwrap() {
            SinkTarget::Stderr => io::stderr().flush(),
            SinkTarget::File(ref mut f) => f.flush(),
        }
    }
}

/// Initializes the logger at the given noise level.  Safe to call more
/// than once; later calls only adjust the level.
pub fn init(noise: Noise) {
    let _ = env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .format_timestamp_micros()
        .target(env_logger::Target::Pipe(Box::new(NoiseSink)))
        .try_init();
    log::set_max_level(noise.filter());
}

pub fn set(noise: Noise) {
    log::set_max_level(noise.filter());
}

pub fn level() -> Noise {
    Noise::from_filter(log::max_level())
}

/// Adjusts the noise level one option character at a time: 'd'ebug,
/// 'q'uiet, 's'ilent, 'v'erbose.
pub fn bump(ch: char) -> Result<()> {
    let noise = match ch.to_ascii_lowercase() {
        'd' => Noise::Debug,
        'q' => Noise::Quiet,
        's' => Noise::Silent,
        'v' => Noise::Verbose,
        _ => return Err(Error::InvalidNoise(ch.to_string())),
    };
    set(noise);
    Ok(())
}

/// Applies a noise override string: either one of the level names or a
/// sequence of option characters.  On error the level is unchanged.
pub fn apply_override(value: &str) -> Result<()> {
    let noise = match value.to_ascii_lowercase().as_str() {
        "debug" => Some(Noise::Debug),
        "verbose" => Some(Noise::Verbose),
        "normal" => Some(Noise::Normal),
        "quiet" => Some(Noise::Quiet),
        "silent" => Some(Noise::Silent),
        _ => None,
    };
    if let Some(noise) = noise {
        set(noise);
        return Ok(());
    }
    if value.is_empty() || !value.chars().all(|ch| "dqsv".contains(ch.to_ascii_lowercase())) {
        return Err(Error::InvalidNoise(value.to_string()));
    }
    for ch in value.chars() {
        bump(ch)?;
    }
    Ok(())
}

/// Applies the `SYSVRUN_NOISE` environment override, if set.
pub fn override_from_env() -> Result<()> {
    match std::env::var(NOISE_ENVVAR) {
        Ok(value) => apply_override(&value),
        Err(_) => Ok(()),
    }
}

/// Redirects all subsequent log output to the given file, appending.
pub fn log_to_file<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_ref())?;
    *SINK.lock().unwrap() = SinkTarget::File(file);
    Ok(())
}

/// Points log output back at stderr.
pub fn log_to_stderr() {
    *SINK.lock().unwrap() = SinkTarget::Stderr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_mapping_round_trips() {
        for &noise in &[
            Noise::Silent,
            Noise::Quiet,
            Noise::Normal,
            Noise::Verbose,
            Noise::Debug,
        ] {
            assert_eq!(Noise::from_filter(noise.filter()), noise);
        }
    }

    #[test]
    fn override_names() {
        init(Noise::Normal);
        apply_override("debug").unwrap();
        assert_eq!(level(), Noise::Debug);
        apply_override("QUIET").unwrap();
        assert_eq!(level(), Noise::Quiet);
        apply_override("v").unwrap();
        assert_eq!(level(), Noise::Verbose);
        assert!(apply_override("loud").is_err());
        assert_eq!(level(), Noise::Verbose);
    }
}
