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

//! The control protocol spoken between a running service monitor and its
//! clients.
//!
//! The transport is a stream socket bound to an abstract name derived
//! from the supervisor and service names.  Abstract sockets have no
//! filesystem representation, so there is no ownership or permission
//! bookkeeping (authorization relies entirely on SO_PEERCRED) and nothing
//! to unlink on exit.
//!
//! The protocol itself is line oriented with CR-LF terminators.  The
//! server opens each session with a one-line JSON banner carrying its
//! protocol version; the client then sends single-line requests, each
//! answered with a single-line response, until the session deadline.

use std::error;
use std::fmt;
use std::mem;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONTROL_VERSION: u32 = 20230811;

pub const DOT_SERVICE: &str = ".service";

/// How long a control session may last, measured from accept.
pub const SESSION_DEADLINE: Duration = Duration::from_millis(100);

pub mod response {
    pub const OK: &str = "ok";
    pub const DENIED: &str = "denied";
    pub const ERROR: &str = "error";
}

#[derive(Debug)]
pub enum Error {
    InvalidBanner(String),
    InvalidState(String),
    NameTooLong(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidBanner(ref line) => write!(f, "invalid banner: {}", line),
            Error::InvalidState(ref name) => write!(f, "invalid monitor state '{}'", name),
            Error::NameTooLong(ref name) => write!(f, "socket name too long: {}", name),
        }
    }
}

impl error::Error for Error {}

/// The monitor's view of the service lifecycle.  The order matters:
/// states before `Stopping` accept a stop order, and the outer monitor
/// loop runs while the state is below `Stopped`.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum MonitorState {
    Idle,
    Restarting,
    Starting,
    Running,
    Remaining,
    Stopping,
    Stopped,
    Failed,
    Dead,
}

impl MonitorState {
    pub fn all() -> &'static [MonitorState] {
        static ALL: &[MonitorState] = &[
            MonitorState::Idle,
            MonitorState::Restarting,
            MonitorState::Starting,
            MonitorState::Running,
            MonitorState::Remaining,
            MonitorState::Stopping,
            MonitorState::Stopped,
            MonitorState::Failed,
            MonitorState::Dead,
        ];
        ALL
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            MonitorState::Idle => "idle",
            MonitorState::Restarting => "restarting",
            MonitorState::Starting => "starting",
            MonitorState::Running => "running",
            MonitorState::Remaining => "remaining",
            MonitorState::Stopping => "stopping",
            MonitorState::Stopped => "stopped",
            MonitorState::Failed => "failed",
            MonitorState::Dead => "dead",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for MonitorState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for &state in MonitorState::all() {
            if s == state.to_string() {
                return Ok(state);
            }
        }
        Err(Error::InvalidState(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NoiseLevel {
    Debug,
    Verbose,
    Normal,
}

/// A single-line client request.  Commands are case sensitive; anything
/// unrecognized is answered with `error`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Request {
    Status,
    Stop,
    Restart,
    Noise(NoiseLevel),
}

impl Request {
    pub fn parse(line: &str) -> Option<Request> {
        match line {
            "status" => Some(Request::Status),
            "stop" => Some(Request::Stop),
            "restart" => Some(Request::Restart),
            "noise=debug" => Some(Request::Noise(NoiseLevel::Debug)),
            "noise=verbose" => Some(Request::Noise(NoiseLevel::Verbose)),
            "noise=normal" => Some(Request::Noise(NoiseLevel::Normal)),
            _ => None,
        }
    }
}

#[derive(Deserialize, Serialize)]
struct Banner {
    version: String,
}

/// Builds the banner line (without the CR-LF terminator).
pub fn banner() -> String {
    // serialization of a one-field string struct cannot fail
    serde_json::to_string(&Banner {
        version: CONTROL_VERSION.to_string(),
    })
    .unwrap_or_default()
}

/// Parses a received banner line and returns the server's version.
pub fn parse_banner(line: &str) -> Result<u32, Error> {
    let banner: Banner = serde_json::from_str(line.trim())
        .map_err(|_| Error::InvalidBanner(line.to_string()))?;
    banner
        .version
        .parse::<u32>()
        .map_err(|_| Error::InvalidBanner(line.to_string()))
}

/// The abstract socket name for a service's control channel.  The leading
/// NUL denotes the abstract namespace.
pub fn socket_name(supervisor: &str, service: &str) -> String {
    format!("\0{}/{}{}", supervisor, service, DOT_SERVICE)
}

/// Builds the sockaddr for a service's control channel.
pub fn socket_addr(
    supervisor: &str,
    service: &str,
) -> Result<(libc::sockaddr_un, libc::socklen_t), Error> {
    let name = socket_name(supervisor, service);
    let mut sun: libc::sockaddr_un = unsafe { mem::zeroed() };
    sun.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let bytes = name.as_bytes();
    if bytes.len() > sun.sun_path.len() {
        return Err(Error::NameTooLong(name));
    }
    for (i, b) in bytes.iter().enumerate() {
        sun.sun_path[i] = *b as libc::c_char;
    }
    let len = mem::size_of::<libc::sa_family_t>() + bytes.len();
    Ok((sun, len as libc::socklen_t))
}

/// Strips the `.service` suffix from a service name.  Returns None if the
/// suffix was not present.
pub fn strip_service_suffix(name: &str) -> Option<&str> {
    name.strip_suffix(DOT_SERVICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_round_trip() {
        for &state in MonitorState::all() {
            assert_eq!(state.to_string().parse::<MonitorState>().unwrap(), state);
        }
        assert!("bogus".parse::<MonitorState>().is_err());
        assert!("Running".parse::<MonitorState>().is_err());
    }

    #[test]
    fn state_ordering() {
        assert!(MonitorState::Idle < MonitorState::Stopping);
        assert!(MonitorState::Running < MonitorState::Stopping);
        assert!(MonitorState::Stopping < MonitorState::Stopped);
        assert!(MonitorState::Stopped < MonitorState::Dead);
    }

    #[test]
    fn banner_round_trip() {
        let line = banner();
        assert_eq!(parse_banner(&line).unwrap(), CONTROL_VERSION);
        assert_eq!(parse_banner("{\"version\": \"20220303\"}").unwrap(), 20220303);
        assert!(parse_banner("not json").is_err());
        assert!(parse_banner("{\"version\": \"eleven\"}").is_err());
    }

    #[test]
    fn request_parsing() {
        assert_eq!(Request::parse("status"), Some(Request::Status));
        assert_eq!(Request::parse("stop"), Some(Request::Stop));
        assert_eq!(Request::parse("restart"), Some(Request::Restart));
        assert_eq!(
            Request::parse("noise=debug"),
            Some(Request::Noise(NoiseLevel::Debug))
        );
        assert_eq!(Request::parse("STOP"), None);
        assert_eq!(Request::parse("halt"), None);
        assert_eq!(Request::parse(""), None);
    }

    #[test]
    fn socket_names() {
        let name = socket_name("sysvrun", "nginx");
        assert!(name.starts_with('\0'));
        assert_eq!(&name[1..], "sysvrun/nginx.service");
        let (_, len) = socket_addr("sysvrun", "nginx").unwrap();
        assert_eq!(len as usize, 2 + name.len());
    }

    #[test]
    fn suffix_stripping() {
        assert_eq!(strip_service_suffix("nginx.service"), Some("nginx"));
        assert_eq!(strip_service_suffix("nginx"), None);
    }
}
