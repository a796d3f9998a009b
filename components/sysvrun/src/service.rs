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

//! A service as the launcher sees it: the parsed unit plus the handful
//! of `[Service]` keys that drive the monitor, and the verbs the CLI
//! exposes.

use std::fmt::Write as _;
use std::fs;
use std::io::{self, BufRead, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use sysvrun_core as core;
use sysvrun_core::os::process::Signal;
use sysvrun_core::timespan;
use sysvrun_core::unit::Unit;
use sysvrun_core::words;
use sysvrun_monitor as monitor;
use sysvrun_monitor::{KillMode, RestartPolicy, ServiceConfig, StartupType};
use sysvrun_monitor_client as client;
use sysvrun_monitor_protocol::{self as protocol, MonitorState};

use crate::command::ServiceCommand;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::sysvinit;

/// Search path for unit files.  There are many, many places a unit could
/// live; these are the likely ones.
pub static UNIT_PATH: &[&str] = &[
    "/etc/systemd/system",
    "/run/systemd/system",
    "/usr/lib/systemd/system",
    ".",
];

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_START_LIMIT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_START_LIMIT_BURST: u32 = 5;

const START_WAIT: Duration = Duration::from_secs(60);
const STOP_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Service {
    pub name: String,
    pub unit: Unit,
    pub startup: StartupType,
    pub kill_mode: KillMode,
    pub stop_timeout: Duration,
    pub restart_policy: RestartPolicy,
    pub restart_delay: Duration,
    pub start_limit_interval: Duration,
    pub start_limit_burst: u32,
    pub remain_after_exit: bool,
    /// Services that must be started before this one.
    pub required: Vec<String>,
    /// Services that should be started before this one if present.
    pub should: Vec<String>,
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidUnitValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_timespan(key: &str, value: &str) -> Result<Duration> {
    match timespan::from_str(value) {
        Ok(timespan::INFINITY) => Ok(Duration::from_micros(u64::max_value())),
        Ok(us) => Ok(Duration::from_micros(us)),
        Err(_) => Err(invalid(key, value)),
    }
}

/// Extracts dependency service names from a unit value, keeping only
/// entries with a `.service` suffix (targets and other unit kinds have
/// no init-script equivalent).
fn service_names(value: &str) -> Vec<String> {
    words::split_quoted(value)
        .iter()
        .filter_map(|name| protocol::strip_service_suffix(name))
        .map(|name| name.to_string())
        .collect()
}

impl Service {
    /// Builds a service from a unit file.
    pub fn from_unit_file(name: &str, text: &str) -> Result<Service> {
        let name = protocol::strip_service_suffix(name).unwrap_or(name);
        let unit = Unit::parse(name, text)?;
        debug!("extracting service info from unit");

        // Units required by this one; note that Requires does not imply
        // an ordering.
        let required = unit
            .get("Unit", "Requires")
            .map(service_names)
            .unwrap_or_default();
        // Units to be started first if present.  In the unit world,
        // dependency and ordering are strictly orthogonal; in the
        // run-level world, dependency implies ordering.  Required-Start
        // takes the Requires list and Should-Start the rest, so entries
        // in both lists are removed from the second.
        let mut should = unit
            .get("Unit", "After")
            .map(service_names)
            .unwrap_or_default();
        should.retain(|name| !required.contains(name));

        let startup = match unit.get("Service", "Type") {
            None => {
                trace!("startup type not specified, defaulting to simple");
                StartupType::Simple
            }
            Some(value) => {
                StartupType::from_name(value).ok_or_else(|| invalid("startup type", value))?
            }
        };
        let kill_mode = match unit.get("Service", "KillMode") {
            None => {
                trace!("kill mode not specified, defaulting to control-group");
                KillMode::ControlGroup
            }
            Some(value) => {
                KillMode::from_name(value).ok_or_else(|| invalid("kill mode", value))?
            }
        };
        let stop_timeout = match unit.get("Service", "TimeoutStopSec") {
            None => DEFAULT_STOP_TIMEOUT,
            Some(value) => parse_timespan("stop timeout", value)?,
        };
        let restart_policy = match unit.get("Service", "Restart") {
            None => {
                trace!("restart policy not specified, defaulting to no");
                RestartPolicy::No
            }
            Some(value) => {
                RestartPolicy::from_name(value).ok_or_else(|| invalid("restart policy", value))?
            }
        };
        let restart_delay = if restart_policy == RestartPolicy::No {
            DEFAULT_RESTART_DELAY
        } else {
            match unit.get("Service", "RestartSec") {
                None => DEFAULT_RESTART_DELAY,
                Some(value) => parse_timespan("restart delay", value)?,
            }
        };
        let remain_after_exit = unit.get_bool("Service", "RemainAfterExit").unwrap_or(false);
        let start_limit_interval = match unit.get("Service", "StartLimitInterval") {
            None => DEFAULT_START_LIMIT_INTERVAL,
            Some(value) => parse_timespan("start limit interval", value)?,
        };
        let start_limit_burst = match unit.get("Service", "StartLimitBurst") {
            None => DEFAULT_START_LIMIT_BURST,
            Some(value) => value
                .parse::<u32>()
                .map_err(|_| invalid("start limit burst", value))?,
        };

        Ok(Service {
            name: name.to_string(),
            unit,
            startup,
            kill_mode,
            stop_timeout,
            restart_policy,
            restart_delay,
            start_limit_interval,
            start_limit_burst,
            remain_after_exit,
            required,
            should,
        })
    }

    /// Builds a service from an init script with an embedded unit.
    pub fn from_init_script(name: &str, text: &str) -> Result<Service> {
        debug!("parsing init script for '{}' service", name);
        let embedded = sysvinit::extract_embedded_unit(name, text)?;
        Service::from_unit_file(name, &embedded)
    }

    /// Loads a service from a file, sniffing whether it is an init
    /// script or a unit file.
    pub fn from_file(name: &str, path: &Path) -> Result<Service> {
        debug!("loading '{}' service from {}", name, path.display());
        let text = fs::read_to_string(path)?;
        if text.starts_with("#!") {
            Service::from_init_script(name, &text)
        } else {
            Service::from_unit_file(name, &text)
        }
    }

    /// Locates a service by name, trying unit files first and init
    /// scripts second.
    pub fn find(ctx: &Context, name: &str) -> Result<Service> {
        let suffix = if name.ends_with(protocol::DOT_SERVICE) {
            ""
        } else {
            protocol::DOT_SERVICE
        };
        for dir in UNIT_PATH {
            let path = ctx.rooted(&format!("{}/{}{}", dir, name, suffix));
            trace!("looking for {} in {}", name, path.display());
            if path.is_file() {
                return Service::from_file(name, &path);
            }
        }
        let name = protocol::strip_service_suffix(name).unwrap_or(name);
        if let Some(path) = sysvinit::find_script(ctx, name) {
            return Service::from_file(name, &path);
        }
        Err(Error::ServiceNotFound(name.to_string()))
    }

    /// The slice of the configuration the monitor consumes.
    pub fn config(&self) -> ServiceConfig {
        ServiceConfig {
            name: self.name.clone(),
            startup: self.startup,
            kill_mode: self.kill_mode,
            stop_timeout: self.stop_timeout,
            restart_policy: self.restart_policy,
            restart_delay: self.restart_delay,
            start_limit_interval: self.start_limit_interval,
            start_limit_burst: self.start_limit_burst,
            remain_after_exit: self.remain_after_exit,
        }
    }

    /// Renders the init-script shim for this service.
    pub fn to_init_script(&self, ctx: &Context) -> String {
        let mut out = String::new();
        out.push_str("#!/bin/sh\n\n");
        out.push_str(sysvinit::LSB_BEGIN_INIT_INFO);
        out.push('\n');
        let _ = writeln!(out, "# {:<22}{}", "Provides:", self.name);
        if !self.required.is_empty() {
            let _ = write!(out, "# {:<21}", "Required-Start:");
            for name in &self.required {
                let _ = write!(out, " {}", name);
            }
            out.push('\n');
        }
        if !self.should.is_empty() {
            let _ = write!(out, "# {:<21}", "Should-Start:");
            for name in &self.should {
                let _ = write!(out, " {}", name);
            }
            out.push('\n');
        }
        let _ = writeln!(out, "# {:<22}{}", "Default-Start:", "2 3 4 5");
        if let Some(desc) = self.unit.get("Unit", "Description") {
            let _ = writeln!(out, "# {:<22}{}", "Short-Description:", desc);
        }
        out.push_str(sysvinit::LSB_END_INIT_INFO);
        out.push_str("\n\n");
        let _ = writeln!(
            out,
            "exec {} -u \"$0\" {} \"$@\"\n",
            ctx.self_path.display(),
            self.name
        );
        out.push_str(sysvinit::BEGIN_EMBED);
        out.push('\n');
        out.push_str(&self.unit.to_string());
        out.push_str(sysvinit::END_EMBED);
        out.push('\n');
        out
    }

    /// The convert verb: emit the init script.
    pub fn convert(&self, ctx: &Context) -> Result<i32> {
        debug!("generating init script for '{}' service", self.name);
        let script = self.to_init_script(ctx);
        match ctx.output {
            Some(ref path) => {
                write_file_atomic(path, script.as_bytes(), 0o755)?;
                info!("init script saved to {}", path.display());
            }
            None => print!("{}", script),
        }
        Ok(0)
    }

    /// The show verb: emit the unit file.
    pub fn show(&self, ctx: &Context) -> Result<i32> {
        debug!("generating unit file for '{}' service", self.name);
        let text = self.unit.to_string();
        match ctx.output {
            Some(ref path) => {
                write_file_atomic(path, text.as_bytes(), 0o644)?;
                info!("unit file saved to {}", path.display());
            }
            None => print!("{}", text),
        }
        Ok(0)
    }

    fn start_prerequisites(&self, ctx: &Context) -> Result<bool> {
        let mut ok = true;
        for name in &self.required {
            let svc = Service::find(ctx, name)?;
            if svc.start(ctx)? != 0 {
                error!("failed to start {}", name);
                ok = false;
            } else {
                info!("started {}", name);
            }
        }
        Ok(ok)
    }

    /// The start verb: wait out transitional states, start prerequisites,
    /// and daemonize a monitor for the service.
    pub fn start(&self, ctx: &Context) -> Result<i32> {
        let sup = &ctx.self_base;
        let mut state = client::get_state(sup, &self.name)?;
        if state == MonitorState::Starting || state == MonitorState::Restarting {
            state = match client::wait_for_state(
                sup,
                &self.name,
                Some(START_WAIT),
                &[
                    MonitorState::Running,
                    MonitorState::Remaining,
                    MonitorState::Stopped,
                ],
            ) {
                Ok(state) => state,
                Err(client::Error::Timeout) => {
                    error!("timed out waiting for service to start");
                    return Ok(1);
                }
                Err(err) => {
                    error!("error while waiting for service to start: {}", err);
                    return Ok(1);
                }
            };
        }
        if state == MonitorState::Running || state == MonitorState::Remaining {
            info!("service is already running");
            return Ok(0);
        }
        if state != MonitorState::Stopped {
            debug!("waiting for service to stop");
            if let Err(err) =
                client::wait_for_state(sup, &self.name, Some(STOP_WAIT), &[MonitorState::Stopped])
            {
                error!("error while waiting for service to stop: {}", err);
                return Ok(1);
            }
        }
        let cmd = ServiceCommand::from_service(ctx, self, "ExecStart")?
            .ok_or_else(|| Error::ExecKeyMissing("ExecStart".to_string()))?;
        if !self.required.is_empty() {
            debug!("checking prerequisites");
            if !self.start_prerequisites(ctx)? {
                error!("failed to start prerequisites");
                return Ok(1);
            }
        }
        debug!("starting {}", self.name);
        match monitor::run(sup, self.config(), cmd.spawn_spec(), ctx.foreground) {
            Ok(pid) => {
                trace!("daemon started: {}", pid);
                Ok(0)
            }
            Err(monitor::Error::Core(core::Error::ChildFailed(code))) => Ok(code),
            Err(err) => Err(err.into()),
        }
    }

    /// The stop verb.  Plan A is the unit's stop command; plan B is a
    /// stop order over the control channel; plan C is a signal to the
    /// process named by the pid file.
    pub fn stop(&self, ctx: &Context) -> Result<i32> {
        let sup = &ctx.self_base;
        let mut state = client::get_state(sup, &self.name)?;
        if state == MonitorState::Stopped {
            return Ok(0);
        }
        debug!("stopping {}", self.name);
        // plan A: run the stop command
        let stop_cmd = ServiceCommand::from_service(ctx, self, "ExecStop")?;
        if let Some(ref cmd) = stop_cmd {
            match cmd.run() {
                Ok(status) if status != 0 => {
                    warn!("stop command completed with exit status 0x{:x}", status);
                }
                Ok(_) => (),
                Err(err) => error!("failed to run stop command: {}", err),
            }
            match client::wait_for_state(sup, &self.name, Some(STOP_WAIT), &[MonitorState::Stopped])
            {
                Ok(_) => return Ok(0),
                Err(client::Error::Timeout) => {
                    warn!("timed out waiting for service to stop");
                    // fall through to plan B
                }
                Err(err) => {
                    error!("error while waiting for service to stop: {}", err);
                    return Ok(1);
                }
            }
        }
        // plan B: give the monitor a stop order and wait
        state = match client::stop(sup, &self.name, Some(STOP_WAIT)) {
            Ok(state) => state,
            Err(ref err) if err.is_not_running() => MonitorState::Stopped,
            Err(client::Error::Timeout) => {
                warn!("timed out waiting for service to stop");
                state
            }
            Err(err) => {
                error!("{}", err);
                state
            }
        };
        // Plan C: signal the process referenced by the pid file.  We
        // also come through here after a successful stop, to clean up
        // any stray pid file.
        if self.unit.get("Service", "PIDFile").is_some() {
            debug!("checking for PID file");
            let cmd = match stop_cmd {
                Some(cmd) => {
                    let _ = cmd.run();
                    Some(cmd)
                }
                // no stop command, but we still need one to carry the
                // pid file
                None => ServiceCommand::from_service(ctx, self, "ExecStart")?,
            };
            let cmd = match cmd {
                Some(cmd) => cmd,
                None => return Ok(1),
            };
            let res = match self.kill_mode {
                KillMode::ControlGroup | KillMode::Mixed => cmd.kill(Signal::TERM, true),
                KillMode::Process => cmd.kill(Signal::TERM, false),
                KillMode::None => Ok(()),
            };
            if kill_means_stopped(&res) {
                state = MonitorState::Stopped;
            }
            let _ = cmd.remove_pid();
        }
        if state == MonitorState::Stopped {
            Ok(0)
        } else {
            Ok(1)
        }
    }

    /// The restart verb: stop, then start.  A restart order over the
    /// control channel would not pick up unit-file changes, so the long
    /// way around is the only way.
    pub fn restart(&self, ctx: &Context) -> Result<i32> {
        let res = self.stop(ctx)?;
        if res != 0 {
            return Ok(res);
        }
        self.start(ctx)
    }

    /// The reload verb.  Without a reload command this reports
    /// "unimplemented"; the traditional SIGHUP would kill a process
    /// that does not expect it.
    pub fn reload(&self, ctx: &Context) -> Result<i32> {
        let cmd = match ServiceCommand::from_service(ctx, self, "ExecReload")? {
            Some(cmd) => cmd,
            None => return Ok(3),
        };
        let state = match client::get_state(&ctx.self_base, &self.name) {
            Ok(state) => state,
            Err(err) => {
                error!("{}", err);
                return Ok(1);
            }
        };
        debug!("service is {}", state);
        match state {
            MonitorState::Starting | MonitorState::Restarting => {
                // reloading is pointless
                return Ok(0);
            }
            MonitorState::Running | MonitorState::Remaining => (),
            _ => {
                error!("service is not running");
                return Ok(7);
            }
        }
        match cmd.run() {
            Ok(0) => Ok(0),
            Ok(_) | Err(_) => Ok(1),
        }
    }

    /// The status verb, with LSB exit codes.
    pub fn status(&self, ctx: &Context) -> Result<i32> {
        let state = match client::get_state(&ctx.self_base, &self.name) {
            Ok(state) => state,
            Err(_) => return Ok(4),
        };
        debug!("service state: {}", state);
        match state {
            MonitorState::Restarting
            | MonitorState::Starting
            | MonitorState::Running
            | MonitorState::Remaining
            | MonitorState::Stopping => {
                // program is running or service is OK
                return Ok(0);
            }
            _ => (),
        }
        // now check the pid file
        let cmd = match ServiceCommand::from_service(ctx, self, "ExecStart")? {
            Some(cmd) => cmd,
            None => return Ok(4),
        };
        match cmd.probe() {
            Ok(true) => {
                warn!("service is running but monitor is not");
                Ok(0)
            }
            // not running and a pid file exists
            Ok(false) => Ok(1),
            // not running and no pid file
            Err(Error::ExecKeyMissing(_)) => Ok(3),
            Err(Error::Core(core::Error::PidFileIo(_, ref err)))
                if err.kind() == io::ErrorKind::NotFound =>
            {
                Ok(3)
            }
            Err(_) => Ok(4),
        }
    }

    /// The control verb: forward request lines from stdin to the monitor
    /// and print the responses.
    pub fn control(&self, ctx: &Context) -> Result<i32> {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = line?;
            match client::control(&ctx.self_base, &self.name, line.trim_end()) {
                Ok(response) => println!("{}", response),
                Err(err) => {
                    error!("request failed: {}", err);
                    return Ok(1);
                }
            }
        }
        Ok(0)
    }
}

/// Whether the outcome of a pid-file kill means the service is down: a
/// delivered signal, a missing pid file, or a stale pid all qualify.
fn kill_means_stopped(res: &Result<()>) -> bool {
    match res {
        Ok(()) => true,
        Err(Error::Core(core::Error::PidFileIo(_, err)))
            if err.kind() == io::ErrorKind::NotFound =>
        {
            true
        }
        Err(Error::Core(core::Error::Io(err)))
            if err.raw_os_error() == Some(libc::ESRCH) =>
        {
            true
        }
        Err(Error::ExecKeyMissing(_)) => true,
        Err(_) => false,
    }
}

fn write_file_atomic(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".sysvrun.")
        .tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))?;
    tmp.persist(path)
        .map_err(|err| Error::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new("/usr/sbin/sysvrun", "")
    }

    const MINIMAL: &str = "[Service]\nExecStart=/bin/true\n";

    #[test]
    fn defaults() {
        let svc = Service::from_unit_file("mock", MINIMAL).unwrap();
        assert_eq!(svc.name, "mock");
        assert_eq!(svc.startup, StartupType::Simple);
        assert_eq!(svc.kill_mode, KillMode::ControlGroup);
        assert_eq!(svc.stop_timeout, Duration::from_secs(90));
        assert_eq!(svc.restart_policy, RestartPolicy::No);
        assert_eq!(svc.restart_delay, Duration::from_millis(100));
        assert_eq!(svc.start_limit_interval, Duration::from_secs(10));
        assert_eq!(svc.start_limit_burst, 5);
        assert!(!svc.remain_after_exit);
        assert!(svc.required.is_empty());
        assert!(svc.should.is_empty());
    }

    #[test]
    fn suffix_is_stripped() {
        let svc = Service::from_unit_file("mock.service", MINIMAL).unwrap();
        assert_eq!(svc.name, "mock");
    }

    #[test]
    fn explicit_values() {
        let text = "\
[Service]
Type=forking
KillMode=mixed
TimeoutStopSec=5s
Restart=on-failure
RestartSec=2s
RemainAfterExit=yes
StartLimitInterval=1min
StartLimitBurst=3
ExecStart=/usr/sbin/mockd daemon pidfile sleep:forever
PIDFile=/run/mockd.pid
";
        let svc = Service::from_unit_file("mockd", text).unwrap();
        assert_eq!(svc.startup, StartupType::Forking);
        assert_eq!(svc.kill_mode, KillMode::Mixed);
        assert_eq!(svc.stop_timeout, Duration::from_secs(5));
        assert_eq!(svc.restart_policy, RestartPolicy::OnFailure);
        assert_eq!(svc.restart_delay, Duration::from_secs(2));
        assert!(svc.remain_after_exit);
        assert_eq!(svc.start_limit_interval, Duration::from_secs(60));
        assert_eq!(svc.start_limit_burst, 3);
        let config = svc.config();
        assert_eq!(config.name, "mockd");
        assert_eq!(config.startup, StartupType::Forking);
        assert_eq!(config.stop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for text in &[
            "[Service]\nType=sideways\n",
            "[Service]\nKillMode=gently\n",
            "[Service]\nTimeoutStopSec=soon\n",
            "[Service]\nRestart=when-convenient\n",
            "[Service]\nStartLimitBurst=-1\n",
        ] {
            assert!(Service::from_unit_file("mock", text).is_err(), "{}", text);
        }
    }

    #[test]
    fn dependency_lists() {
        let text = "\
[Unit]
Requires=postgres.service network.target
After=postgres.service syslog.service network.target

[Service]
ExecStart=/bin/true
";
        let svc = Service::from_unit_file("mock", text).unwrap();
        // only .service dependencies survive, and After entries already
        // in Requires are dropped
        assert_eq!(svc.required, vec!["postgres"]);
        assert_eq!(svc.should, vec!["syslog"]);
    }

    #[test]
    fn init_script_round_trip() {
        let text = "\
[Unit]
Description=A mock daemon
Requires=postgres.service

[Service]
Type=oneshot
RemainAfterExit=yes
ExecStart=/bin/sh -c 'echo hello'
";
        let svc = Service::from_unit_file("mock", text).unwrap();
        let script = svc.to_init_script(&ctx());
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains(sysvinit::LSB_BEGIN_INIT_INFO));
        assert!(script.contains("# Provides:"));
        assert!(script.contains(" postgres\n"));
        assert!(script.contains(sysvinit::BEGIN_EMBED));
        let reparsed = Service::from_init_script("mock", &script).unwrap();
        assert_eq!(reparsed.startup, StartupType::Oneshot);
        assert!(reparsed.remain_after_exit);
        assert_eq!(
            reparsed.unit.get("Service", "ExecStart"),
            svc.unit.get("Service", "ExecStart")
        );
        assert_eq!(reparsed.required, vec!["postgres"]);
    }

    #[test]
    fn from_file_sniffs_format() {
        let dir = tempfile::tempdir().unwrap();
        let unit_path = dir.path().join("mock.service");
        fs::write(&unit_path, MINIMAL).unwrap();
        let svc = Service::from_file("mock", &unit_path).unwrap();
        let script_path = dir.path().join("mock");
        fs::write(&script_path, svc.to_init_script(&ctx())).unwrap();
        let svc = Service::from_file("mock", &script_path).unwrap();
        assert_eq!(svc.unit.get("Service", "ExecStart"), Some("/bin/true"));
    }

    #[test]
    fn atomic_write_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mock");
        write_file_atomic(&path, b"#!/bin/sh\n", 0o755).unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);
        assert_eq!(fs::read(&path).unwrap(), b"#!/bin/sh\n");
    }
}
