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

use std::error;
use std::fmt;
use std::io;
use std::result;

use sysvrun_core as core;
use sysvrun_core::os::process::Pid;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// I/O failure on the kernel event connector.
    Connector(io::Error),
    /// I/O failure on the control socket.
    Control(io::Error),
    Core(core::Error),
    /// The process table holds only init and ourselves.
    NoChildren,
    /// Descendants remain but none has terminated.
    NoneReady,
    NotConnected,
    Poll(io::Error),
    /// Malformed event-connector message.
    Protocol(String),
    Timeout,
    UnknownProcess(Pid),
    /// An event contradicted the process model.
    Violation(String),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Connector(ref err) => write!(f, "process event connector error: {}", err),
            Error::Control(ref err) => write!(f, "control socket error: {}", err),
            Error::Core(ref err) => err.fmt(f),
            Error::NoChildren => write!(f, "no children"),
            Error::NoneReady => write!(f, "no children ready"),
            Error::NotConnected => write!(f, "not connected to process event connector"),
            Error::Poll(ref err) => write!(f, "poll error: {}", err),
            Error::Protocol(ref msg) => write!(f, "protocol error: {}", msg),
            Error::Timeout => write!(f, "timed out"),
            Error::UnknownProcess(pid) => write!(f, "process {} not found", pid),
            Error::Violation(ref msg) => write!(f, "process model violation: {}", msg),
            Error::Io(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Connector(ref err)
            | Error::Control(ref err)
            | Error::Poll(ref err)
            | Error::Io(ref err) => Some(err),
            Error::Core(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<core::Error> for Error {
    fn from(err: core::Error) -> Error {
        Error::Core(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
