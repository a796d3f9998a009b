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

//! Spawning the service's command: the child-side setup (root and
//! working directory, credentials, umask) followed by the exec.  Every
//! setup failure maps to its well-known exit code so the parent can tell
//! them apart in the wait status.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

use libc::{self, c_char};

use sysvrun_core::exitcode;
use sysvrun_core::os::fork::{fork_function, ForkIo};
use sysvrun_core::os::process::Pid;

use crate::error::{Error, Result};
use crate::service::CommandSpec;

fn cstring(bytes: &[u8]) -> Option<CString> {
    CString::new(bytes).ok()
}

/// Runs in the forked child.  Returns a well-known exit code on failure;
/// on success it does not return.
pub fn exec_command(cmd: &CommandSpec) -> i32 {
    let path = match cstring(cmd.path.as_os_str().as_bytes()) {
        Some(path) => path,
        None => return exitcode::EXIT_EXEC,
    };
    let mut argv = Vec::with_capacity(cmd.args.len());
    for arg in &cmd.args {
        match cstring(arg.as_bytes()) {
            Some(arg) => argv.push(arg),
            None => return exitcode::EXIT_EXEC,
        }
    }
    let mut envv = Vec::with_capacity(cmd.env.len());
    for var in &cmd.env {
        match cstring(var.as_bytes()) {
            Some(var) => envv.push(var),
            None => return exitcode::EXIT_EXEC,
        }
    }
    let mut argp: Vec<*const c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
    argp.push(std::ptr::null());
    let mut envp: Vec<*const c_char> = envv.iter().map(|var| var.as_ptr()).collect();
    envp.push(std::ptr::null());

    if let Some(ref rootdir) = cmd.rootdir {
        let root = match cstring(rootdir.as_os_str().as_bytes()) {
            Some(root) => root,
            None => return exitcode::EXIT_CHROOT,
        };
        let slash = CString::new("/").unwrap();
        if unsafe { libc::chroot(root.as_ptr()) } != 0
            || unsafe { libc::chdir(slash.as_ptr()) } != 0
        {
            error!("failed to chroot to {}", rootdir.display());
            return exitcode::EXIT_CHROOT;
        }
    }
    if let Some(ref workdir) = cmd.workdir {
        let dir = match cstring(workdir.as_os_str().as_bytes()) {
            Some(dir) => dir,
            None => return exitcode::EXIT_CHDIR,
        };
        if unsafe { libc::chdir(dir.as_ptr()) } != 0 {
            error!("failed to chdir to {}", workdir.display());
            return exitcode::EXIT_CHDIR;
        }
    }
    if cmd.gid != 0 && !cmd.keep_credentials {
        if unsafe { libc::setregid(cmd.gid, cmd.gid) } != 0 {
            error!("failed to set primary group to {}", cmd.gid);
            return exitcode::EXIT_GROUP;
        }
        let gid = cmd.gid as libc::gid_t;
        if unsafe { libc::setgroups(1, &gid) } != 0 {
            error!("failed to set supplemental groups");
            return exitcode::EXIT_GROUP;
        }
    }
    if cmd.uid != 0 && !cmd.keep_credentials {
        if unsafe { libc::setreuid(cmd.uid, cmd.uid) } != 0 {
            error!("failed to set uid to {}", cmd.uid);
            return exitcode::EXIT_USER;
        }
    }
    unsafe {
        libc::umask(cmd.umask);
        libc::execve(path.as_ptr(), argp.as_ptr(), envp.as_ptr());
    }
    error!("failed to execute {}", cmd.path.display());
    exitcode::EXIT_EXEC
}

/// Forks the service child with its stdio wired to the supervisor's
/// pipes.  Returns once the child has either exec'd or died.
pub fn spawn(cmd: &CommandSpec, io: &ForkIo) -> Result<Pid> {
    fork_function(|| exec_command(cmd), Some(io)).map_err(Error::Core)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysvrun_core::os::process;

    #[test]
    fn spawns_and_reaps_true() {
        let cmd = CommandSpec::new("/bin/true", vec!["true".to_string()]);
        let io = ForkIo::for_supervisor().unwrap();
        let pid = spawn(&cmd, &io).unwrap();
        let status = process::wait(pid).unwrap();
        assert!(process::exited(status));
        assert_eq!(process::exit_status(status), 0);
    }

    #[test]
    fn exec_failure_is_exit_exec() {
        let cmd = CommandSpec::new(
            "/nonexistent/binary",
            vec!["binary".to_string()],
        );
        let io = ForkIo::for_supervisor().unwrap();
        match spawn(&cmd, &io) {
            Err(Error::Core(sysvrun_core::Error::ChildFailed(code))) => {
                assert_eq!(code, exitcode::EXIT_EXEC);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
