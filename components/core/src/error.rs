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
use std::path::PathBuf;
use std::result;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A forked child reported a well-known exit code before it could exec.
    ChildFailed(i32),
    InvalidNoise(String),
    InvalidTimespan(String),
    Io(io::Error),
    PidFileCorrupt(PathBuf),
    PidFileIo(PathBuf, io::Error),
    Spawn(io::Error),
    UnitSyntax { line: usize, msg: String },
    Wait(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ChildFailed(code) => write!(f, "child reported exit code {}", code),
            Error::InvalidNoise(ref level) => write!(f, "invalid noise level '{}'", level),
            Error::InvalidTimespan(ref span) => write!(f, "invalid time span '{}'", span),
            Error::Io(ref err) => err.fmt(f),
            Error::PidFileCorrupt(ref path) => {
                write!(f, "PID file {} contents invalid", path.display())
            }
            Error::PidFileIo(ref path, ref err) => {
                write!(f, "failed to read PID file {}: {}", path.display(), err)
            }
            Error::Spawn(ref err) => write!(f, "failed to fork child process: {}", err),
            Error::UnitSyntax { line, ref msg } => {
                write!(f, "error in unit file line {}: {}", line, msg)
            }
            Error::Wait(ref err) => write!(f, "failed to wait for child process: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref err)
            | Error::PidFileIo(_, ref err)
            | Error::Spawn(ref err)
            | Error::Wait(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
