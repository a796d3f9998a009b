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
use sysvrun_monitor as monitor;
use sysvrun_monitor_client as client;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Client(client::Error),
    CommandNotFound(String),
    Core(core::Error),
    EmptyCommandLine,
    ExecKeyMissing(String),
    GroupNotFound(String),
    InvalidUnitValue { key: String, value: String },
    Io(io::Error),
    Monitor(monitor::Error),
    NotAnInitScript(String),
    ServiceNotFound(String),
    UserNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Client(ref err) => err.fmt(f),
            Error::CommandNotFound(ref name) => write!(f, "command '{}' not found", name),
            Error::Core(ref err) => err.fmt(f),
            Error::EmptyCommandLine => write!(f, "command line empty"),
            Error::ExecKeyMissing(ref key) => write!(f, "{} not found in unit", key),
            Error::GroupNotFound(ref group) => write!(f, "group '{}' not found", group),
            Error::InvalidUnitValue { ref key, ref value } => {
                write!(f, "invalid or unsupported {} '{}'", key, value)
            }
            Error::Io(ref err) => err.fmt(f),
            Error::Monitor(ref err) => err.fmt(f),
            Error::NotAnInitScript(ref name) => {
                write!(f, "no embedded unit found in init script for '{}'", name)
            }
            Error::ServiceNotFound(ref name) => write!(f, "service '{}' not found", name),
            Error::UserNotFound(ref user) => write!(f, "user '{}' not found", user),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Client(ref err) => Some(err),
            Error::Core(ref err) => Some(err),
            Error::Io(ref err) => Some(err),
            Error::Monitor(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<core::Error> for Error {
    fn from(err: core::Error) -> Error {
        Error::Core(err)
    }
}

impl From<client::Error> for Error {
    fn from(err: client::Error) -> Error {
        Error::Client(err)
    }
}

impl From<monitor::Error> for Error {
    fn from(err: monitor::Error) -> Error {
        Error::Monitor(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
