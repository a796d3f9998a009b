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

//! Services from the front-end's point of view: an installed init
//! script, invoked with a verb, and enabled or disabled through
//! run-level symlinks that point at it.

use std::fs;
use std::io;
use std::os::unix::fs::{symlink, MetadataExt};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use sysvrun_core::noise::{self, Noise};

const START_PRIORITY: u32 = 20;
const STOP_PRIORITY: u32 = 80;

const DOT_SERVICE: &str = ".service";

/// An installed service, identified by its init script.  The script's
/// device and inode are remembered so that run-level symlinks can be
/// matched regardless of how they spell the target.
#[derive(Debug)]
pub struct InitService {
    pub name: String,
    pub path: PathBuf,
    dev: u64,
    ino: u64,
}

impl InitService {
    /// Locates a service by name under the given root.
    pub fn find(root: &str, name: &str) -> io::Result<InitService> {
        let name = name.strip_suffix(DOT_SERVICE).unwrap_or(name);
        if name.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty service name",
            ));
        }
        let path = PathBuf::from(format!("{}/etc/init.d/{}", root, name));
        let meta = fs::metadata(&path)?;
        Ok(InitService {
            name: name.to_string(),
            path,
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    /// Invokes the init script with the given verb.  Returns the
    /// script's exit status, or the negated signal number if it was
    /// killed.  Output is suppressed when `silent`, unless we are being
    /// verbose anyway.
    pub fn invoke(&self, verb: &str, silent: bool) -> io::Result<i32> {
        let mut command = Command::new(&self.path);
        command.arg(verb).stdin(Stdio::null());
        if silent && noise::level() < Noise::Verbose {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let status = command.status()?;
        match status.code() {
            Some(code) => Ok(code),
            None => Ok(-status.signal().unwrap_or(1)),
        }
    }

    fn link_name(&self, runlevel: u32) -> String {
        if (2..=5).contains(&runlevel) {
            format!("S{:02}{}", START_PRIORITY, self.name)
        } else {
            format!("K{:02}{}", STOP_PRIORITY, self.name)
        }
    }

    /// Scans one run-level directory for links to this service.  With
    /// `del`, removes them; with `add`, creates the canonical one if it
    /// is missing, removing any wrongly-named links to us and any link
    /// that stole our name.  Returns whether a link was found.
    fn manip_runlevel(
        &self,
        root: &str,
        runlevel: u32,
        del: bool,
        add: bool,
    ) -> io::Result<bool> {
        let wanted = self.link_name(runlevel);
        let rcdir = PathBuf::from(format!("{}/etc/rc{}.d", root, runlevel));
        let mut found = false;
        for entry in fs::read_dir(&rcdir)? {
            let entry = entry?;
            if !entry.file_type()?.is_symlink() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = match fs::metadata(entry.path()) {
                Ok(meta) => meta,
                // a dangling link; nothing we can learn from it
                Err(ref err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            if meta.dev() == self.dev && meta.ino() == self.ino {
                // this links to our service
                if add && name != wanted {
                    // wrong name; the right one is created below
                    debug!("deleting {}/{}", rcdir.display(), name);
                    remove_link(&entry.path())?;
                    continue;
                }
                found = true;
                if del && !add {
                    debug!("deleting {}/{}", rcdir.display(), name);
                    remove_link(&entry.path())?;
                }
            } else if add && name == wanted {
                // links somewhere else; someone stole our name
                debug!("deleting {}/{}", rcdir.display(), name);
                remove_link(&entry.path())?;
            }
        }
        if add && !found {
            let link = rcdir.join(&wanted);
            debug!("creating {} -> {}", link.display(), self.path.display());
            match symlink(&self.path, &link) {
                Ok(()) => (),
                Err(ref err) if err.kind() == io::ErrorKind::AlreadyExists => (),
                Err(err) => return Err(err),
            }
        }
        Ok(found)
    }

    /// Scans run levels 0 through 6.  Returns the number of links found.
    fn manip(&self, root: &str, del: bool, add: bool) -> io::Result<u32> {
        let mut result = Ok(());
        let mut total = 0;
        for runlevel in 0..=6 {
            match self.manip_runlevel(root, runlevel, del, add) {
                Ok(true) => total += 1,
                Ok(false) => (),
                Err(err) => result = Err(err),
            }
        }
        result.map(|_| total)
    }

    /// Whether the service is enabled at any run level.
    pub fn is_enabled(&self, root: &str) -> io::Result<bool> {
        Ok(self.manip(root, false, false)? > 0)
    }

    /// Enables the service at run levels 2 through 5 (with stop links at
    /// the others).
    pub fn enable(&self, root: &str) -> io::Result<()> {
        self.manip(root, false, true).map(|_| ())
    }

    /// Removes every run-level link to the service.
    pub fn disable(&self, root: &str) -> io::Result<()> {
        self.manip(root, true, false).map(|_| ())
    }
}

fn remove_link(path: &std::path::Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(ref err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::OpenOptionsExt;

    fn make_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc/init.d")).unwrap();
        for runlevel in 0..=6 {
            fs::create_dir_all(dir.path().join(format!("etc/rc{}.d", runlevel))).unwrap();
        }
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .mode(0o755)
            .open(dir.path().join("etc/init.d/mock"))
            .unwrap();
        dir
    }

    fn root_str(dir: &tempfile::TempDir) -> String {
        dir.path().to_string_lossy().into_owned()
    }

    #[test]
    fn find_strips_suffix_and_requires_script() {
        let dir = make_root();
        let root = root_str(&dir);
        let svc = InitService::find(&root, "mock.service").unwrap();
        assert_eq!(svc.name, "mock");
        assert!(InitService::find(&root, "other").is_err());
        assert!(InitService::find(&root, ".service").is_err());
    }

    #[test]
    fn enable_creates_start_and_stop_links() {
        let dir = make_root();
        let root = root_str(&dir);
        let svc = InitService::find(&root, "mock").unwrap();
        assert!(!svc.is_enabled(&root).unwrap());
        svc.enable(&root).unwrap();
        assert!(svc.is_enabled(&root).unwrap());
        for runlevel in 2..=5 {
            let link = dir.path().join(format!("etc/rc{}.d/S20mock", runlevel));
            assert!(fs::symlink_metadata(&link).is_ok(), "{:?}", link);
        }
        for runlevel in &[0, 1, 6] {
            let link = dir.path().join(format!("etc/rc{}.d/K80mock", runlevel));
            assert!(fs::symlink_metadata(&link).is_ok(), "{:?}", link);
        }
        svc.disable(&root).unwrap();
        assert!(!svc.is_enabled(&root).unwrap());
        assert!(fs::symlink_metadata(dir.path().join("etc/rc3.d/S20mock")).is_err());
    }

    #[test]
    fn enable_fixes_wrongly_named_links() {
        let dir = make_root();
        let root = root_str(&dir);
        let svc = InitService::find(&root, "mock").unwrap();
        symlink(&svc.path, dir.path().join("etc/rc3.d/S99mock")).unwrap();
        svc.enable(&root).unwrap();
        assert!(fs::symlink_metadata(dir.path().join("etc/rc3.d/S99mock")).is_err());
        assert!(fs::symlink_metadata(dir.path().join("etc/rc3.d/S20mock")).is_ok());
    }

    #[test]
    fn enable_reclaims_stolen_names() {
        let dir = make_root();
        let root = root_str(&dir);
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .mode(0o755)
            .open(dir.path().join("etc/init.d/thief"))
            .unwrap();
        symlink(
            dir.path().join("etc/init.d/thief"),
            dir.path().join("etc/rc3.d/S20mock"),
        )
        .unwrap();
        let svc = InitService::find(&root, "mock").unwrap();
        svc.enable(&root).unwrap();
        let target = fs::read_link(dir.path().join("etc/rc3.d/S20mock")).unwrap();
        assert_eq!(target, svc.path);
    }

    #[test]
    fn dangling_links_are_ignored() {
        let dir = make_root();
        let root = root_str(&dir);
        symlink(
            dir.path().join("etc/init.d/gone"),
            dir.path().join("etc/rc3.d/S20gone"),
        )
        .unwrap();
        let svc = InitService::find(&root, "mock").unwrap();
        svc.enable(&root).unwrap();
        assert!(svc.is_enabled(&root).unwrap());
    }
}
