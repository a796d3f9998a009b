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

//! The service configuration the monitor consumes and the command
//! description it spawns.  Both are built by the launcher from the unit
//! file; the monitor only reads them.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartupType {
    Simple,
    Exec,
    Forking,
    Oneshot,
    Dbus,
    Notify,
    Idle,
}

impl StartupType {
    pub fn from_name(name: &str) -> Option<StartupType> {
        match name {
            "simple" => Some(StartupType::Simple),
            "exec" => Some(StartupType::Exec),
            "forking" => Some(StartupType::Forking),
            "oneshot" => Some(StartupType::Oneshot),
            "dbus" => Some(StartupType::Dbus),
            "notify" => Some(StartupType::Notify),
            "idle" => Some(StartupType::Idle),
            _ => None,
        }
    }
}

impl fmt::Display for StartupType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            StartupType::Simple => "simple",
            StartupType::Exec => "exec",
            StartupType::Forking => "forking",
            StartupType::Oneshot => "oneshot",
            StartupType::Dbus => "dbus",
            StartupType::Notify => "notify",
            StartupType::Idle => "idle",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KillMode {
    ControlGroup,
    Mixed,
    Process,
    None,
}

impl KillMode {
    pub fn from_name(name: &str) -> Option<KillMode> {
        match name {
            "control-group" => Some(KillMode::ControlGroup),
            "mixed" => Some(KillMode::Mixed),
            "process" => Some(KillMode::Process),
            "none" => Some(KillMode::None),
            _ => None,
        }
    }
}

impl fmt::Display for KillMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            KillMode::ControlGroup => "control-group",
            KillMode::Mixed => "mixed",
            KillMode::Process => "process",
            KillMode::None => "none",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RestartPolicy {
    No,
    Always,
    OnSuccess,
    OnFailure,
    OnAbnormal,
    OnAbort,
}

impl RestartPolicy {
    pub fn from_name(name: &str) -> Option<RestartPolicy> {
        match name {
            "no" => Some(RestartPolicy::No),
            "always" => Some(RestartPolicy::Always),
            "on-success" => Some(RestartPolicy::OnSuccess),
            "on-failure" => Some(RestartPolicy::OnFailure),
            "on-abnormal" => Some(RestartPolicy::OnAbnormal),
            "on-abort" => Some(RestartPolicy::OnAbort),
            _ => None,
        }
    }

    /// Decides whether the service should be restarted after its main
    /// process went away.  `ucexit` means it exited with a non-zero
    /// status; `ucsig` means it was terminated by a signal other than
    /// hang-up, interrupt, terminate, or pipe.
    pub fn should_restart(self, ucexit: bool, ucsig: bool) -> bool {
        match self {
            RestartPolicy::No => false,
            RestartPolicy::Always => true,
            RestartPolicy::OnSuccess => !ucexit && !ucsig,
            RestartPolicy::OnFailure => ucexit || ucsig,
            RestartPolicy::OnAbnormal => ucsig,
            RestartPolicy::OnAbort => ucsig,
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnSuccess => "on-success",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::OnAbnormal => "on-abnormal",
            RestartPolicy::OnAbort => "on-abort",
        };
        write!(f, "{}", name)
    }
}

/// The slice of the service definition the monitor acts on.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub name: String,
    pub startup: StartupType,
    pub kill_mode: KillMode,
    pub stop_timeout: Duration,
    pub restart_policy: RestartPolicy,
    pub restart_delay: Duration,
    pub start_limit_interval: Duration,
    pub start_limit_burst: u32,
    pub remain_after_exit: bool,
}

impl ServiceConfig {
    pub fn new(name: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            startup: StartupType::Simple,
            kill_mode: KillMode::ControlGroup,
            stop_timeout: Duration::from_secs(90),
            restart_policy: RestartPolicy::No,
            restart_delay: Duration::from_millis(100),
            start_limit_interval: Duration::from_secs(10),
            start_limit_burst: 5,
            remain_after_exit: false,
        }
    }
}

/// Everything needed to exec the service's command in a freshly forked
/// child.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub path: PathBuf,
    pub args: Vec<String>,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub uid: u32,
    pub gid: u32,
    pub umask: libc::mode_t,
    pub rootdir: Option<PathBuf>,
    pub workdir: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    /// Keep the supervisor's credentials (the `+`/`!` exec prefixes).
    pub keep_credentials: bool,
}

impl CommandSpec {
    pub fn new<P: Into<PathBuf>>(path: P, args: Vec<String>) -> CommandSpec {
        CommandSpec {
            path: path.into(),
            args,
            env: Vec::new(),
            uid: 0,
            gid: 0,
            umask: 0o022,
            rootdir: None,
            workdir: None,
            pidfile: None,
            keep_credentials: false,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for var in &self.env {
            writeln!(f, "{}", var)?;
        }
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

    #[test]
    fn names_round_trip() {
        for name in &["simple", "exec", "forking", "oneshot", "dbus", "notify", "idle"] {
            assert_eq!(
                StartupType::from_name(name).unwrap().to_string(),
                name.to_string()
            );
        }
        for name in &["control-group", "mixed", "process", "none"] {
            assert_eq!(
                KillMode::from_name(name).unwrap().to_string(),
                name.to_string()
            );
        }
        for name in &["no", "always", "on-success", "on-failure", "on-abnormal", "on-abort"] {
            assert_eq!(
                RestartPolicy::from_name(name).unwrap().to_string(),
                name.to_string()
            );
        }
        assert!(StartupType::from_name("notforking").is_none());
        assert!(KillMode::from_name("cgroup").is_none());
        assert!(RestartPolicy::from_name("sometimes").is_none());
    }

    #[test]
    fn restart_policy_matrix() {
        use super::RestartPolicy::*;
        // (policy, ucexit, ucsig, expected)
        let cases = [
            (No, false, false, false),
            (No, true, false, false),
            (No, false, true, false),
            (Always, false, false, true),
            (Always, true, false, true),
            (Always, false, true, true),
            (OnSuccess, false, false, true),
            (OnSuccess, true, false, false),
            (OnSuccess, false, true, false),
            (OnFailure, false, false, false),
            (OnFailure, true, false, true),
            (OnFailure, false, true, true),
            (OnAbnormal, true, false, false),
            (OnAbnormal, false, true, true),
            (OnAbort, true, false, false),
            (OnAbort, false, true, true),
        ];
        for &(policy, ucexit, ucsig, expected) in &cases {
            assert_eq!(
                policy.should_restart(ucexit, ucsig),
                expected,
                "{} ucexit={} ucsig={}",
                policy,
                ucexit,
                ucsig
            );
        }
    }

    #[test]
    fn command_display() {
        let mut cmd = CommandSpec::new(
            "/usr/sbin/mockd",
            vec!["mockd".to_string(), "sleep:forever".to_string()],
        );
        cmd.env.push("PATH=/usr/bin".to_string());
        assert_eq!(
            cmd.to_string(),
            "PATH=/usr/bin\nexec /usr/sbin/mockd sleep:forever"
        );
    }
}
