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

//! The monitor itself: the outer state machine that starts, restarts,
//! and stops the service, wrapped around an inner watch loop that
//! multiplexes the kernel event stream, the child's output pipes, the
//! control socket, and timed kill passes.

use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use errno::errno;
use libc::{self, c_int, c_void};

use sysvrun_core as core;
use sysvrun_core::noise::{self, Noise};
use sysvrun_core::os::fork::{self, ForkIo};
use sysvrun_core::os::process::{self, Pid};
use sysvrun_core::{pidfile, timespan, words};
use sysvrun_monitor_protocol as protocol;
use sysvrun_monitor_protocol::{MonitorState, NoiseLevel};

use crate::control::{self, ControlEffect, ControlListener, ControlSession};
use crate::error::{Error, Result};
use crate::kill::{self, KillOrder};
use crate::limiter::StartLimiter;
use crate::procwatch::{ProcWatch, WatchAction, WatchEvent};
use crate::service::{CommandSpec, KillMode, ServiceConfig, StartupType};
use crate::spawn;

/// Daemonizes (or forks, with `foreground`) a monitor for the given
/// service and command.  Returns the monitor's pid.  In the foreground
/// case this does not return until the monitor exits, and a non-zero
/// monitor exit surfaces as `ChildFailed`.
pub fn run(
    supervisor: &str,
    svc: ServiceConfig,
    cmd: CommandSpec,
    foreground: bool,
) -> Result<Pid> {
    let supervisor = supervisor.to_string();
    if foreground {
        let pid = fork::fork_function(move || monitor_main(&supervisor, svc, cmd, true), None)
            .map_err(Error::Core)?;
        let status = process::wait(pid).map_err(Error::Core)?;
        if process::exited(status) && process::exit_status(status) != 0 {
            return Err(Error::Core(core::Error::ChildFailed(process::exit_status(
                status,
            ))));
        }
        if process::signaled(status) {
            return Err(Error::Core(core::Error::ChildFailed(
                128 + process::term_signal(status),
            )));
        }
        Ok(pid)
    } else {
        fork::daemonize_function(move || monitor_main(&supervisor, svc, cmd, false), None)
            .map_err(Error::Core)
    }
}

fn monitor_main(supervisor: &str, svc: ServiceConfig, cmd: CommandSpec, foreground: bool) -> i32 {
    log_setup(&svc.name, foreground);
    let mut mon = match Monitor::new(supervisor, svc, cmd) {
        Ok(mon) => mon,
        Err(err) => {
            error!("failed to start monitor: {}", err);
            return 1;
        }
    };
    mon.run_loop()
}

/// Redirect logs to the file named by `SYSVRUN_LOG_TO_FILE`.  If the
/// value names a directory (or is merely a truthy word, which means
/// /var/log), logs go to sysvrun.<service>.log in that directory.  In
/// the foreground the logs stay on stderr.
fn log_setup(service: &str, foreground: bool) {
    if foreground {
        return;
    }
    let value = match env::var(noise::LOG_FILE_ENVVAR) {
        Ok(value) => value,
        Err(_) => return,
    };
    let path = if value.starts_with('/') {
        let path = PathBuf::from(&value);
        if path.is_dir() {
            path.join(format!("sysvrun.{}.log", service))
        } else {
            path
        }
    } else if words::parse_bool(&value) == Some(true) {
        PathBuf::from("/var/log").join(format!("sysvrun.{}.log", service))
    } else {
        return;
    };
    match noise::log_to_file(&path) {
        Ok(()) => info!("logging to {}", path.display()),
        Err(err) => error!("unable to log to {}: {}", path.display(), err),
    }
}

fn pollfd(fd: c_int, events: libc::c_short) -> libc::pollfd {
    libc::pollfd {
        fd,
        events,
        revents: 0,
    }
}

pub struct Monitor {
    svc: ServiceConfig,
    cmd: CommandSpec,
    watch: ProcWatch,
    control: ControlListener,
    limiter: Option<StartLimiter>,
    io: ForkIo,
    out_fd: c_int,
    err_fd: c_int,
    /// Direct child of the most recent fork; 0 once collected.
    child: Pid,
    /// The identified main process; 0 while unknown.
    pid: Pid,
    /// Session id observed for the service.
    sid: Pid,
    /// Wait status of the main process, once observed.
    wstatus: Option<i32>,
    state: MonitorState,
}

impl Monitor {
    pub fn new(supervisor: &str, svc: ServiceConfig, cmd: CommandSpec) -> Result<Monitor> {
        let io = ForkIo::for_supervisor()?;
        let control = ControlListener::bind(supervisor, &svc.name)?;
        let watch = ProcWatch::start()?;
        let mut limiter = StartLimiter::new(svc.start_limit_burst, svc.start_limit_interval);
        if let Some(ref mut limiter) = limiter {
            limiter.record(Instant::now());
        }
        let out_fd = io.stdout.parent;
        let err_fd = io.stderr.parent;
        debug!("monitor started");
        Ok(Monitor {
            svc,
            cmd,
            watch,
            control,
            limiter,
            io,
            out_fd,
            err_fd,
            child: 0,
            pid: 0,
            sid: 0,
            wstatus: None,
            state: MonitorState::Idle,
        })
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    fn set_state(&mut self, state: MonitorState) {
        if state != self.state {
            debug!("monitor state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn is_stopping(&self) -> bool {
        self.state == MonitorState::Restarting || self.state == MonitorState::Stopping
    }

    /// The outer loop: run and monitor the command, restarting it as
    /// needed, until the service reaches a terminal state.  Returns the
    /// monitor's exit code.
    pub fn run_loop(&mut self) -> i32 {
        self.set_state(MonitorState::Starting);
        while self.state < MonitorState::Stopped {
            match self.state {
                MonitorState::Restarting => {
                    if self.restart_gate() {
                        self.start_service();
                    }
                }
                MonitorState::Starting => self.start_service(),
                MonitorState::Running => self.run_service(),
                MonitorState::Stopping => {
                    // if we are here, everything has already stopped
                    self.set_state(MonitorState::Stopped);
                }
                MonitorState::Remaining => {
                    // keep serving control requests until a stop or
                    // restart order arrives
                    if self.wait_until(None).is_err() {
                        self.set_state(MonitorState::Dead);
                    }
                }
                state => {
                    error!("invalid monitor state {}", state);
                    self.set_state(MonitorState::Dead);
                }
            }
        }
        self.watch.stop();
        debug!("monitor stopped");
        match self.state {
            MonitorState::Dead => 1,
            MonitorState::Failed => match self.wstatus {
                Some(status) if process::exited(status) => process::exit_status(status),
                Some(status) if process::signaled(status) => 128 + process::term_signal(status),
                _ => 1,
            },
            _ => 0,
        }
    }

    /// Waits out the restart delay, gated by the start limiter.  Returns
    /// true if the service should proceed to start.
    fn restart_gate(&mut self) -> bool {
        let next_start = Instant::now() + self.svc.restart_delay;
        if let Some(ref mut limiter) = self.limiter {
            if !limiter.admit(next_start) {
                error!(
                    "start limit exceeded ({} starts in {})",
                    limiter.burst(),
                    timespan::to_string(limiter.interval().as_micros() as u64)
                );
                self.set_state(MonitorState::Failed);
                return false;
            }
        }
        debug!(
            "restarting (policy: {}) after {} delay",
            self.svc.restart_policy,
            timespan::to_string(self.svc.restart_delay.as_micros() as u64)
        );
        if self.wait_until(Some(next_start)).is_err() {
            self.set_state(MonitorState::Dead);
            return false;
        }
        // a stop order may have arrived during the wait
        self.state == MonitorState::Restarting
    }

    /// Forks the service child and runs the watch loop.
    fn start_service(&mut self) {
        debug!("{}", self.cmd);
        self.wstatus = None;
        match spawn::spawn(&self.cmd, &self.io) {
            Ok(child) => self.child = child,
            Err(err) => {
                error!("failed to start service: {}", err);
                self.set_state(MonitorState::Dead);
                return;
            }
        }
        // will be updated when the service calls setsid
        self.sid = process::current_sid();
        debug!("started service child {}", self.child);
        // For everything except forking and oneshot services, the
        // successful spawn is the readiness signal.  spawn() does not
        // return until the child has exec'd or died, which is late for
        // Type=simple, but all that matters is that we are not early.
        match self.svc.startup {
            StartupType::Forking | StartupType::Oneshot => {}
            _ => {
                self.set_state(MonitorState::Running);
                fork::report_ready();
            }
        }
        // for anything other than forking, the child is the main process
        if self.svc.startup != StartupType::Forking {
            self.pid = self.child;
        } else if self.cmd.pidfile.is_none() {
            // GuessMainPID is not implemented, so this is bad,
            // especially if KillMode is process or mixed
            warn!("forking service without PID file");
        }
        self.run_service();
    }

    /// Watches the running service to completion, then decides what the
    /// exit means: remain, restart, stop, or fail.
    fn run_service(&mut self) {
        if let Err(err) = self.watch_loop() {
            error!("{}", err);
            self.set_state(MonitorState::Dead);
            return;
        }
        let mut ucexit = false;
        let mut ucsig = false;
        match self.wstatus {
            Some(status) if process::exited(status) => {
                debug!(
                    "{} exited with status {}",
                    self.cmd.path.display(),
                    process::exit_status(status)
                );
                ucexit = process::exit_status(status) != 0;
            }
            Some(status) if process::signaled(status) => {
                let signal = process::term_signal(status);
                debug!(
                    "{} terminated by signal {}",
                    self.cmd.path.display(),
                    signal
                );
                ucsig = signal != libc::SIGHUP
                    && signal != libc::SIGINT
                    && signal != libc::SIGTERM
                    && signal != libc::SIGPIPE;
            }
            _ => {}
        }
        if self.state != MonitorState::Running {
            // already stopping or restarting
            return;
        }
        // remain after a successful exit?
        if self.svc.remain_after_exit && !ucexit && !ucsig {
            debug!("start command successful, remain after exit");
            self.set_state(MonitorState::Remaining);
            return;
        }
        if self.svc.restart_policy.should_restart(ucexit, ucsig) {
            self.set_state(MonitorState::Restarting);
            return;
        }
        debug!("restarting (policy: {}) not indicated", self.svc.restart_policy);
        if ucexit || ucsig {
            self.set_state(MonitorState::Failed);
        } else {
            self.set_state(MonitorState::Stopped);
        }
    }

    /// The inner loop: multiplexes the event stream, the child's output,
    /// the control socket, and timed kill passes until the service is
    /// done.  Returns Err only on unrecoverable errors.
    fn watch_loop(&mut self) -> Result<()> {
        let mut order = KillOrder::new();
        let mut collected_any = false;
        loop {
            let event_fd = self.watch.fd()?;
            // While a stop order is in progress the wait is bounded so
            // that the next kill pass fires on time; otherwise we sleep
            // until a descriptor wakes us.
            let timeout: c_int = if self.is_stopping() {
                match order.sent {
                    Some(sent) => {
                        let elapsed = Instant::now().duration_since(sent);
                        let remaining = self.svc.stop_timeout.saturating_sub(elapsed);
                        remaining.as_millis().min((i32::max_value() - 1) as u128) as c_int + 1
                    }
                    None => 0,
                }
            } else {
                -1
            };
            let mut fds = [
                pollfd(event_fd, libc::POLLIN),
                pollfd(self.out_fd, libc::POLLIN),
                pollfd(self.err_fd, libc::POLLIN),
                pollfd(self.control.fd(), libc::POLLIN),
            ];
            let res =
                unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if res < 0 && errno().0 != libc::EINTR {
                let err = io::Error::last_os_error();
                error!("unrecoverable poll error: {}", err);
                return Err(Error::Poll(err));
            }
            let now = Instant::now();
            // control socket connection
            if res > 0 && fds[3].revents != 0 {
                self.control_ingest();
            }
            // did we get a stop or restart order?
            if self.is_stopping() && order.due(now, self.svc.stop_timeout) {
                if !self.handle_kill_pass(&mut order, now) {
                    break;
                }
            }
            // data on stderr
            if res > 0 && fds[2].revents != 0 {
                if let Err(err) = forward_output(self.err_fd, true) {
                    error!("error reading from service stderr: {}", err);
                    self.err_fd = -1;
                }
            }
            // data on stdout
            if res > 0 && fds[1].revents != 0 {
                if let Err(err) = forward_output(self.out_fd, false) {
                    error!("error reading from service stdout: {}", err);
                    self.out_fd = -1;
                }
            }
            // process events
            if res <= 0 || fds[0].revents == 0 {
                continue;
            }
            self.drain_events()?;
            // Look for the main pid if we do not have it yet.  To keep
            // the log quiet, only check after the service child has
            // terminated.
            if self.pid <= 0 && self.child == 0 {
                self.find_main_pid();
            }
            // collect terminated processes
            let mut no_children = false;
            loop {
                let proc_ = match self.watch.table_mut().collect() {
                    Ok(proc_) => proc_,
                    Err(Error::NoneReady) => break,
                    Err(Error::NoChildren) => {
                        no_children = true;
                        break;
                    }
                    Err(err) => return Err(err),
                };
                match proc_.wstatus {
                    Some(status) if process::exited(status) => trace!(
                        "process {} (ppid {}) exited with status {}",
                        proc_.pid,
                        proc_.ppid,
                        process::exit_status(status)
                    ),
                    Some(status) if process::signaled(status) => trace!(
                        "process {} (ppid {}) terminated by signal {}",
                        proc_.pid,
                        proc_.ppid,
                        process::term_signal(status)
                    ),
                    _ => trace!("process {} (ppid {}) terminated!?", proc_.pid, proc_.ppid),
                }
                collected_any = true;
                if proc_.pid == self.child {
                    // the direct child; reap it
                    debug!("service child {} terminated", proc_.pid);
                    let _ = process::wait(proc_.pid);
                    // report readiness for forking services
                    if self.svc.startup == StartupType::Forking {
                        self.set_state(MonitorState::Running);
                        fork::report_ready();
                    }
                    self.child = 0;
                }
                if proc_.pid == self.pid {
                    // the main process exited
                    self.wstatus = proc_.wstatus;
                    if let Some(ref path) = self.cmd.pidfile {
                        let _ = pidfile::remove(path);
                    }
                }
            }
            // Once the main process of a one-shot service has
            // terminated, the service is ready; the outer loop will
            // transition to remaining.
            if self.svc.startup == StartupType::Oneshot && self.wstatus.is_some() {
                self.set_state(MonitorState::Running);
                fork::report_ready();
                break;
            }
            if self.wstatus.is_some() {
                debug!("main process {} terminated", self.pid);
                if !self.is_stopping() || self.svc.kill_mode == KillMode::Process {
                    // Either the main process self-terminated, or a stop
                    // with KillMode=process has succeeded.
                    break;
                }
            }
            // Events queued ahead of the one announcing our own child
            // can get us here before anything was tracked, so require at
            // least one collection before concluding the tree is empty.
            if no_children && collected_any {
                trace!("no descendants left");
                break;
            }
        }
        debug!("monitor watch loop terminated in state {}", self.state);
        self.watch.reset();
        Ok(())
    }

    /// One step of the stop order.  Returns false when the watch loop
    /// should end.
    fn handle_kill_pass(&mut self, order: &mut KillOrder, now: Instant) -> bool {
        if self.pid <= 0 {
            // Forking services only: we still have no main process.
            // This happens when a stop order arrives very shortly after
            // a start, so allow one stop-timeout interval for the main
            // process to make itself known before giving up.
            warn!("stop order received with no main process");
            if order.sent.is_some() {
                let target = if self.child > 0 { self.child } else { self.pid };
                let _ = self.watch.table_mut().drop_tree(target);
                return false;
            }
            order.sent = Some(now);
            return true;
        }
        if self.svc.kill_mode == KillMode::None {
            let target = if self.pid > 0 { self.pid } else { self.child };
            let _ = self.watch.table_mut().drop_tree(target);
            return false;
        }
        order.pass += 1;
        match kill::select(self.svc.kill_mode, order.pass) {
            Some((signal, all)) => {
                debug!(
                    "sending {} to {}",
                    signal,
                    if all { "all processes" } else { "main process" }
                );
                order.sent = Some(now);
                kill::dispatch(self.watch.table(), self.pid, signal, all);
                true
            }
            None => {
                error!(
                    "{} processes still running, giving up",
                    self.watch.table().count()
                );
                false
            }
        }
    }

    /// Serves control connections and ingests events until the deadline
    /// passes or the state changes.  With no deadline, waits until the
    /// state changes.
    fn wait_until(&mut self, deadline: Option<Instant>) -> Result<()> {
        let entry_state = self.state;
        if deadline.is_none() {
            trace!("waiting forever");
        }
        while self.state == entry_state {
            let timeout: c_int = match deadline {
                None => -1,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        trace!("wait over: timer expired");
                        break;
                    }
                    deadline
                        .duration_since(now)
                        .as_millis()
                        .min(i32::max_value() as u128) as c_int
                }
            };
            let mut fds = [
                pollfd(self.watch.fd()?, libc::POLLIN),
                pollfd(self.control.fd(), libc::POLLIN),
            ];
            let res =
                unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if res < 0 {
                if errno().0 == libc::EINTR {
                    continue;
                }
                let err = io::Error::last_os_error();
                error!("unrecoverable poll error: {}", err);
                return Err(Error::Poll(err));
            }
            if res == 0 {
                continue;
            }
            if fds[1].revents != 0 {
                self.control_ingest();
            }
            if fds[0].revents != 0 {
                self.drain_events()?;
                // there should be nothing to collect at this point
                while let Ok(proc_) = self.watch.table_mut().collect() {
                    trace!("discarding process {}", proc_.pid);
                }
            }
        }
        if self.state != entry_state {
            trace!(
                "wait over: state changed from {} to {}",
                entry_state,
                self.state
            );
        }
        Ok(())
    }

    /// Accepts and serves one control session.  Session errors close the
    /// session; the monitor itself carries on.
    fn control_ingest(&mut self) {
        let mut session = match self.control.accept() {
            Ok(session) => session,
            Err(err) => {
                error!("failed to accept control client connection: {}", err);
                return;
            }
        };
        let privileged = session.peer.uid == 0 || session.peer.uid == self.cmd.uid;
        if privileged {
            trace!("control client is privileged");
        }
        if let Err(err) = self.serve_session(&mut session, privileged) {
            debug!("control session error: {}", err);
        }
    }

    fn serve_session(&mut self, session: &mut ControlSession, privileged: bool) -> Result<()> {
        session.write_line(&protocol::banner())?;
        while let Some(line) = session.read_line()? {
            let (response, effect) = control::dispatch(self.state, privileged, &line);
            match effect {
                ControlEffect::SetState(state) => self.set_state(state),
                ControlEffect::SetNoise(level) => noise::set(match level {
                    NoiseLevel::Debug => Noise::Debug,
                    NoiseLevel::Verbose => Noise::Verbose,
                    NoiseLevel::Normal => Noise::Normal,
                }),
                ControlEffect::Nothing => {}
            }
            session.write_line(&response)?;
        }
        Ok(())
    }

    /// Ingests pending events until the stream runs dry, reconnecting on
    /// stream errors.
    fn drain_events(&mut self) -> Result<()> {
        loop {
            match self.ingest_one(0) {
                Ok(()) => continue,
                Err(Error::Timeout) => return Ok(()),
                Err(err) => {
                    error!("unrecoverable process event connector error: {}", err);
                    if self.watch.reconnect() {
                        return Ok(());
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Receives one event, applying the setsid tracking policy: a
    /// non-forking service that calls setsid has spawned a descendant
    /// service we must not track, and a forking service is expected to
    /// call setsid exactly once, while daemonizing.
    fn ingest_one(&mut self, timeout_ms: c_int) -> Result<()> {
        let startup = self.svc.startup;
        let own_sid = process::current_sid();
        let mut svc_sid = self.sid;
        let result = self.watch.ingest(timeout_ms, |event, proc_| match event {
            WatchEvent::SetSid => {
                trace!(
                    "descendant {} changed sid from {} to {}",
                    proc_.pid,
                    svc_sid,
                    proc_.sid
                );
                if startup != StartupType::Forking {
                    trace!("non-forking service changed sid: dropping {}", proc_.pid);
                    WatchAction::Drop
                } else if svc_sid != own_sid {
                    trace!("forking service changed sid again: dropping {}", proc_.pid);
                    WatchAction::Drop
                } else {
                    debug!("setting service sid to {}", proc_.sid);
                    svc_sid = proc_.sid;
                    WatchAction::Default
                }
            }
            WatchEvent::Exec => {
                report_exec(proc_.pid);
                WatchAction::Default
            }
        });
        self.sid = svc_sid;
        result
    }

    /// Tries to identify the main process of a forking service from its
    /// pid file.
    fn find_main_pid(&mut self) -> bool {
        if let Some(ref path) = self.cmd.pidfile {
            match pidfile::read(path) {
                Ok(pid) => {
                    if self.watch.table().get(pid).is_ok() {
                        self.pid = pid;
                    } else {
                        warn!("main service process {} not found", pid);
                    }
                }
                Err(err) => warn!("{}", err),
            }
        }
        // Without a pid file there is nothing to do; warning here would
        // flood the log, and one was already issued at start.
        if self.pid > 0 {
            debug!("main process identified as {}", self.pid);
            return true;
        }
        false
    }
}

/// Reads from a child output pipe and forwards whole lines to the log,
/// suppressing control characters.  If the child writes a line in
/// several pieces it may end up split over several log lines; looping
/// the read here is not an option because a chatty service could starve
/// everything else.
fn forward_output(fd: c_int, is_stderr: bool) -> io::Result<usize> {
    let mut buf = [0u8; 4096];
    let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if res < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(0);
        }
        return Err(err);
    }
    let mut forwarded = 0;
    for chunk in buf[..res as usize].split(|&b| b == b'\n' || b == 0) {
        if chunk.is_empty() {
            continue;
        }
        let line: String = String::from_utf8_lossy(chunk)
            .chars()
            .map(|ch| if (ch as u32) < 0x20 { ' ' } else { ch })
            .collect();
        if is_stderr {
            warn!("{}", line);
        } else {
            info!("{}", line);
        }
        forwarded += chunk.len();
    }
    Ok(forwarded)
}

fn report_exec(pid: Pid) {
    if !log_enabled!(log::Level::Trace) {
        return;
    }
    match fs::read_link(format!("/proc/{}/exe", pid)) {
        Ok(path) => trace!("pid {} executed {}", pid, path.display()),
        Err(_) => match fs::read_to_string(format!("/proc/{}/comm", pid)) {
            Ok(comm) => trace!("pid {} executed {}", pid, comm.trim_end()),
            Err(_) => trace!("pid {} executed unknown command", pid),
        },
    }
}
