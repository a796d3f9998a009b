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

//! Reading and writing pid files.  A pid file contains the main process's
//! pid as a decimal number, optionally followed by whitespace.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::os::process::Pid;

/// Reads the pid from a pid file: the first whitespace-bounded word must
/// be a positive decimal number.
pub fn read<P: AsRef<Path>>(path: P) -> Result<Pid> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).map_err(|err| Error::PidFileIo(path.to_path_buf(), err))?;
    let word = contents
        .split_whitespace()
        .next()
        .ok_or_else(|| Error::PidFileCorrupt(path.to_path_buf()))?;
    match word.parse::<Pid>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(Error::PidFileCorrupt(path.to_path_buf())),
    }
}

pub fn write<P: AsRef<Path>>(path: P, pid: Pid) -> Result<()> {
    let path = path.as_ref();
    let mut file =
        fs::File::create(path).map_err(|err| Error::PidFileIo(path.to_path_buf(), err))?;
    writeln!(file, "{}", pid).map_err(|err| Error::PidFileIo(path.to_path_buf(), err))
}

/// Removes a pid file.  A file that is already gone is not an error.
pub fn remove<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(ref err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::PidFileIo(path.to_path_buf(), err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pid_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn plain_pid() {
        assert_eq!(read(pid_file("1234").path()).unwrap(), 1234);
        assert_eq!(read(pid_file("1234\n").path()).unwrap(), 1234);
        assert_eq!(read(pid_file("  1234  extra\n").path()).unwrap(), 1234);
    }

    #[test]
    fn rejects_junk() {
        assert!(read(pid_file("").path()).is_err());
        assert!(read(pid_file("\n").path()).is_err());
        assert!(read(pid_file("notapid").path()).is_err());
        assert!(read(pid_file("12a4").path()).is_err());
        assert!(read(pid_file("-5").path()).is_err());
        assert!(read(pid_file("0").path()).is_err());
        assert!(read(pid_file("99999999999999999999").path()).is_err());
    }

    #[test]
    fn missing_file() {
        assert!(read("/nonexistent/mockd.pid").is_err());
    }

    #[test]
    fn write_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        write(&path, 4321).unwrap();
        assert_eq!(read(&path).unwrap(), 4321);
        remove(&path).unwrap();
        assert!(read(&path).is_err());
        // removing again is fine
        remove(&path).unwrap();
    }
}
