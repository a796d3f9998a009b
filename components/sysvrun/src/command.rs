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

//! Building a runnable command from a service's exec keys: split the
//! command line, assemble the environment, resolve the binary and the
//! pid file, and look up credentials.

use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sysvrun_core::env::Environment;
use sysvrun_core::os::process::{self, Signal};
use sysvrun_core::os::users;
use sysvrun_core::os::fork;
use sysvrun_core::{pidfile, words};
use sysvrun_monitor::spawn;
use sysvrun_monitor::CommandSpec;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::service::Service;

bitflags! {
    /// Exec-line prefix characters.  `+` and `!` run the command with
    /// the supervisor's own credentials; `@` replaces argv[0]; `-` and
    /// `:` are accepted and recorded but have no effect here.
    pub struct ExecFlags: u32 {
        const AT = 0x0001;
        const DASH = 0x0002;
        const COLON = 0x0004;
        const PLUS = 0x0008;
        const BANG = 0x0010;
    }
}

fn prefix_flag(ch: char) -> Option<ExecFlags> {
    match ch {
        '@' => Some(ExecFlags::AT),
        '-' => Some(ExecFlags::DASH),
        ':' => Some(ExecFlags::COLON),
        '+' => Some(ExecFlags::PLUS),
        '!' => Some(ExecFlags::BANG),
        _ => None,
    }
}

const DEFAULT_UMASK: u32 = 0o022;

/// A fully resolved command from one of the unit's exec keys.
#[derive(Debug)]
pub struct ServiceCommand {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub env: Environment,
    pub rootdir: Option<PathBuf>,
    pub workdir: Option<PathBuf>,
    /// The pid file as seen from outside any chroot.
    pub pidfile: Option<PathBuf>,
    pub uid: u32,
    pub gid: u32,
    pub umask: u32,
    pub flags: ExecFlags,
}

impl ServiceCommand {
    /// Builds a command from the given exec key of the unit.  Returns
    /// Ok(None) when the key is not present.
    pub fn from_service(
        ctx: &Context,
        svc: &Service,
        key: &str,
    ) -> Result<Option<ServiceCommand>> {
        let value = match svc.unit.get("Service", key) {
            Some(value) => value.to_string(),
            None => return Ok(None),
        };
        if value.contains('$') {
            warn!("variable substitution not implemented");
        }
        if value.contains('%') {
            warn!("specifiers not implemented");
        }
        let mut args = words::split_quoted(&value);
        if args.is_empty() {
            return Err(Error::EmptyCommandLine);
        }

        // prepare the environment
        let mut env = ctx.env.clone();
        if let Some(value) = svc.unit.get("Service", "Environment") {
            for assignment in words::split_quoted(value) {
                env.put(&assignment, true);
            }
        }
        if let Some(value) = svc.unit.get("Service", "PassEnvironment") {
            for name in words::split_quoted(value) {
                if let Ok(value) = std::env::var(&name) {
                    env.set(&name, &value, true);
                }
            }
        }
        if let Some(value) = svc.unit.get("Service", "UnsetEnvironment") {
            env.remove_keys(words::split_quoted(value).iter().map(|s| s.as_str()));
        }
        env.remove_keys(ctx.unset.iter().map(|s| s.as_str()));

        // make sure our own directory is in the service's PATH
        if let Some(path) = env.get("PATH") {
            let path = format!("{}:{}", ctx.self_dir.display(), path);
            env.set("PATH", &path, true);
        }

        // root and working directories
        let rootdir = svc
            .unit
            .get("Service", "RootDirectory")
            .map(|dir| ctx.rooted(dir));
        let mut workdir = svc
            .unit
            .get("Service", "WorkingDirectory")
            .map(|dir| dir.to_string());

        let mut cmd = ServiceCommand {
            path: PathBuf::new(),
            args: Vec::new(),
            env,
            rootdir,
            workdir: None,
            pidfile: None,
            uid: 0,
            gid: 0,
            umask: DEFAULT_UMASK,
            flags: ExecFlags::empty(),
        };

        // pid file
        if let Some(value) = svc.unit.get("Service", "PIDFile") {
            cmd.pidfile = Some(cmd.outside_path(ctx, value));
            cmd.env.set("PIDFILE", value, true);
        }

        // find the binary
        let first = args[0].clone();
        let mut name = first.as_str();
        while let Some(flag) = name.chars().next().and_then(prefix_flag) {
            cmd.flags |= flag;
            name = &name[1..];
        }
        cmd.path = cmd.resolve_path(ctx, name, true)?;
        if cmd.flags.contains(ExecFlags::AT) {
            // the next word is the real argv[0]
            args.remove(0);
            if args.is_empty() {
                return Err(Error::EmptyCommandLine);
            }
        } else {
            args[0] = name.to_string();
        }
        cmd.args = args;

        // credentials
        if let Some(user) = svc.unit.get("Service", "User") {
            let info = users::get_user_by_name(user)
                .ok_or_else(|| Error::UserNotFound(user.to_string()))?;
            cmd.uid = info.uid;
            if workdir.as_deref() == Some("~") {
                workdir = Some(info.home.to_string_lossy().into_owned());
            }
            cmd.env.set("USER", &info.name, false);
            cmd.env.set("LOGNAME", &info.name, false);
            cmd.env
                .set("HOME", &info.home.to_string_lossy(), false);
            cmd.env
                .set("SHELL", &info.shell.to_string_lossy(), false);
        }
        if let Some(group) = svc.unit.get("Service", "Group") {
            // only the primary group for now
            cmd.gid = users::get_gid_by_name(group)
                .ok_or_else(|| Error::GroupNotFound(group.to_string()))?;
        }

        // file permission mask
        if let Some(value) = svc.unit.get("Service", "UMask") {
            match u32::from_str_radix(value, 8) {
                Ok(mask) if mask <= 0o777 => cmd.umask = mask,
                _ => {
                    return Err(Error::InvalidUnitValue {
                        key: "UMask".to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }

        cmd.workdir = match workdir {
            Some(dir) => Some(PathBuf::from(dir)),
            None => Some(ctx.rooted("/")),
        };

        Ok(Some(cmd))
    }

    /// A path as seen from outside the service's root directory.
    fn outside_path(&self, ctx: &Context, path: &str) -> PathBuf {
        match self.rootdir {
            Some(ref rootdir) => PathBuf::from(format!("{}{}", rootdir.display(), path)),
            None => ctx.rooted(path),
        }
    }

    /// Resolves a command name against the service's root and working
    /// directories, searching the service's PATH when the name is bare.
    fn resolve_path(&self, ctx: &Context, name: &str, search: bool) -> Result<PathBuf> {
        trace!("resolving {}", name);
        // simple case: no PATH search
        if !search || name.contains('/') {
            let candidate = if name.starts_with('/') {
                self.outside_path(ctx, name)
            } else {
                let workdir = self
                    .workdir
                    .clone()
                    .unwrap_or_else(|| ctx.rooted("/"));
                workdir.join(name)
            };
            return Ok(candidate);
        }
        // search the service's PATH
        let path = self.env.get("PATH").unwrap_or(crate::context::STDPATH);
        for dir in path.split(':') {
            if !dir.starts_with('/') {
                continue;
            }
            let candidate = self.outside_path(ctx, &format!("{}/{}", dir, name));
            trace!("trying {}", candidate.display());
            if is_executable(&candidate) {
                trace!("found {}", candidate.display());
                return Ok(candidate);
            }
        }
        Err(Error::CommandNotFound(name.to_string()))
    }

    /// The spawnable description handed to the monitor.
    pub fn spawn_spec(&self) -> CommandSpec {
        CommandSpec {
            path: self.path.clone(),
            args: self.args.clone(),
            env: self.env.to_vec(),
            uid: self.uid,
            gid: self.gid,
            umask: self.umask as libc::mode_t,
            rootdir: self.rootdir.clone(),
            workdir: self.workdir.clone(),
            pidfile: self.pidfile.clone(),
            keep_credentials: self.flags.contains(ExecFlags::PLUS),
        }
    }

    /// Executes the command and waits for it to terminate, returning the
    /// raw wait status.
    pub fn run(&self) -> Result<i32> {
        debug!("{}", self);
        let spec = self.spawn_spec();
        let pid = fork::fork_function(|| spawn::exec_command(&spec), None)
            .map_err(Error::Core)?;
        process::wait(pid).map_err(Error::Core)
    }

    pub fn read_pid(&self) -> Result<process::Pid> {
        match self.pidfile {
            Some(ref path) => {
                trace!("reading PID file {}", path.display());
                pidfile::read(path).map_err(Error::Core)
            }
            None => Err(Error::ExecKeyMissing("PIDFile".to_string())),
        }
    }

    pub fn remove_pid(&self) -> Result<()> {
        match self.pidfile {
            Some(ref path) => {
                trace!("removing PID file {}", path.display());
                pidfile::remove(path).map_err(Error::Core)
            }
            None => Err(Error::ExecKeyMissing("PIDFile".to_string())),
        }
    }

    /// Probes whether the process named by the pid file is alive.
    pub fn probe(&self) -> Result<bool> {
        Ok(process::is_alive(self.read_pid()?))
    }

    /// Signals the process referenced by the pid file, or with `pg` its
    /// whole process group, chasing the signal with SIGCONT.
    pub fn kill(&self, signal: Signal, pg: bool) -> Result<()> {
        let pid = self.read_pid()?;
        let target = if pg {
            -process::getpgid(pid).map_err(Error::Core)?
        } else {
            pid
        };
        process::signal_and_cont(target, signal).map_err(Error::Core)?;
        debug!("sent {} to {}", signal, target);
        Ok(())
    }
}

fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.env)?;
        write!(f, "exec {}", self.path.display())?;
        for arg in self.args.iter().skip(1) {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Service;
    use std::os::unix::fs::OpenOptionsExt;

    fn context() -> Context {
        Context::new("/usr/sbin/sysvrun", "")
    }

    fn service(body: &str) -> Service {
        let text = format!("[Service]\n{}", body);
        Service::from_unit_file("mock", &text).unwrap()
    }

    fn fake_bin(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .mode(0o755)
            .open(&path)
            .unwrap();
        path
    }

    #[test]
    fn missing_key_is_none() {
        let ctx = context();
        let svc = service("ExecStart=/bin/true\n");
        assert!(ServiceCommand::from_service(&ctx, &svc, "ExecStop")
            .unwrap()
            .is_none());
    }

    #[test]
    fn absolute_command_line() {
        let ctx = context();
        let svc = service("ExecStart=/bin/sh -c 'echo hello'\n");
        let cmd = ServiceCommand::from_service(&ctx, &svc, "ExecStart")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.path, PathBuf::from("/bin/sh"));
        assert_eq!(cmd.args, vec!["/bin/sh", "-c", "echo hello"]);
        assert_eq!(cmd.umask, 0o022);
        assert!(cmd.flags.is_empty());
    }

    #[test]
    fn path_search_uses_service_path() {
        let dir = tempfile::tempdir().unwrap();
        fake_bin(dir.path(), "mockd");
        let ctx = context();
        let svc = service(&format!(
            "ExecStart=mockd sleep:forever\nEnvironment=PATH={}\n",
            dir.path().display()
        ));
        let cmd = ServiceCommand::from_service(&ctx, &svc, "ExecStart")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.path, dir.path().join("mockd"));
        assert_eq!(cmd.args[0], "mockd");
    }

    #[test]
    fn unknown_command_fails() {
        let ctx = context();
        let svc = service("ExecStart=no-such-command-anywhere\n");
        match ServiceCommand::from_service(&ctx, &svc, "ExecStart") {
            Err(Error::CommandNotFound(name)) => assert_eq!(name, "no-such-command-anywhere"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn exec_prefixes() {
        let ctx = context();
        let svc = service("ExecStart=@/bin/sh dash -c true\n");
        let cmd = ServiceCommand::from_service(&ctx, &svc, "ExecStart")
            .unwrap()
            .unwrap();
        assert!(cmd.flags.contains(ExecFlags::AT));
        assert_eq!(cmd.path, PathBuf::from("/bin/sh"));
        // with @, the second word becomes argv[0]
        assert_eq!(cmd.args, vec!["dash", "-c", "true"]);

        let svc = service("ExecStart=+/bin/sh -c true\n");
        let cmd = ServiceCommand::from_service(&ctx, &svc, "ExecStart")
            .unwrap()
            .unwrap();
        assert!(cmd.flags.contains(ExecFlags::PLUS));
        assert!(cmd.spawn_spec().keep_credentials);
    }

    #[test]
    fn environment_assembly() {
        let ctx = context();
        let svc = service(
            "ExecStart=/bin/true\nEnvironment=A=1 B=2\nEnvironment=C=3\nUnsetEnvironment=B\n",
        );
        let cmd = ServiceCommand::from_service(&ctx, &svc, "ExecStart")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.env.get("A"), Some("1"));
        assert_eq!(cmd.env.get("B"), None);
        assert_eq!(cmd.env.get("C"), Some("3"));
        // our own directory is prepended to the service PATH
        assert!(cmd.env.get("PATH").unwrap().contains(':'));
    }

    #[test]
    fn undefines_from_context() {
        let mut ctx = context();
        ctx.env.put("DEBUG_LEVEL=9", true);
        ctx.unset.push("DEBUG_LEVEL".to_string());
        let svc = service("ExecStart=/bin/true\n");
        let cmd = ServiceCommand::from_service(&ctx, &svc, "ExecStart")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.env.get("DEBUG_LEVEL"), None);
    }

    #[test]
    fn pidfile_is_exported() {
        let ctx = context();
        let svc = service("ExecStart=/bin/true\nPIDFile=/run/mock.pid\n");
        let cmd = ServiceCommand::from_service(&ctx, &svc, "ExecStart")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.pidfile, Some(PathBuf::from("/run/mock.pid")));
        assert_eq!(cmd.env.get("PIDFILE"), Some("/run/mock.pid"));
    }

    #[test]
    fn umask_parsing() {
        let ctx = context();
        let svc = service("ExecStart=/bin/true\nUMask=027\n");
        let cmd = ServiceCommand::from_service(&ctx, &svc, "ExecStart")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.umask, 0o027);
        let svc = service("ExecStart=/bin/true\nUMask=999\n");
        assert!(ServiceCommand::from_service(&ctx, &svc, "ExecStart").is_err());
    }

    #[test]
    fn run_reports_wait_status() {
        let ctx = context();
        let svc = service("ExecStart=/bin/sh -c 'exit 3'\n");
        let cmd = ServiceCommand::from_service(&ctx, &svc, "ExecStart")
            .unwrap()
            .unwrap();
        let status = cmd.run().unwrap();
        assert!(process::exited(status));
        assert_eq!(process::exit_status(status), 3);
    }
}
