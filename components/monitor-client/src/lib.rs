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

//! The client half of the monitor control protocol: connect to a
//! service's control socket, check the banner, send commands, and wait
//! for the service to reach a wanted state.

#[macro_use]
extern crate log;

use std::error;
use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixStream;
use std::result;
use std::thread;
use std::time::{Duration, Instant};

use libc::{self, c_void};

use sysvrun_core::os::process::Pid;
use sysvrun_monitor_protocol as protocol;
use sysvrun_monitor_protocol::MonitorState;

/// How often to re-query the monitor while waiting for a state change.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Could not reach the monitor.  Connection refused means there is
    /// no monitor listening.
    Connect(io::Error),
    Denied,
    InvalidState(String),
    Io(io::Error),
    Protocol(String),
    Timeout,
    VersionMismatch { server: u32, own: u32 },
}

impl Error {
    /// True when the error means "no monitor is running", as opposed to
    /// a monitor we failed to talk to.
    pub fn is_not_running(&self) -> bool {
        match *self {
            Error::Connect(ref err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Connect(ref err) => write!(f, "failed to connect to monitor: {}", err),
            Error::Denied => write!(f, "permission denied by monitor"),
            Error::InvalidState(ref state) => write!(f, "invalid monitor state '{}'", state),
            Error::Io(ref err) => err.fmt(f),
            Error::Protocol(ref msg) => write!(f, "control protocol error: {}", msg),
            Error::Timeout => write!(f, "timed out waiting for service"),
            Error::VersionMismatch { server, own } => write!(
                f,
                "control protocol version mismatch: {} > {}",
                server, own
            ),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Connect(ref err) | Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

/// A connection to a running monitor.
#[derive(Debug)]
pub struct MonitorClient {
    stream: UnixStream,
    monitor_pid: Pid,
    version: u32,
}

impl MonitorClient {
    /// Connects to the service's control socket, reads the monitor's
    /// credentials, and parses the banner.  A connection reset during
    /// the handshake means the monitor was shutting down, which is
    /// reported the same way as "not listening".
    pub fn connect(supervisor: &str, service: &str) -> Result<MonitorClient> {
        let (addr, addrlen) = protocol::socket_addr(supervisor, service)
            .map_err(|err| Error::Protocol(err.to_string()))?;
        trace!("opening control socket");
        let fd = unsafe {
            libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0)
        };
        if fd < 0 {
            return Err(Error::Connect(io::Error::last_os_error()));
        }
        let res = unsafe {
            libc::connect(
                fd,
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                addrlen,
            )
        };
        if res != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(Error::Connect(reset_means_refused(err)));
        }
        let mut cred: libc::ucred = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;
        let res = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut libc::ucred as *mut c_void,
                &mut len,
            )
        };
        if res != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(Error::Connect(err));
        }
        trace!(
            "monitor pid {} uid {} gid {}",
            cred.pid,
            cred.uid,
            cred.gid
        );
        let stream = unsafe { UnixStream::from_raw_fd(fd) };
        let mut client = MonitorClient {
            stream,
            monitor_pid: cred.pid,
            version: 0,
        };
        let banner = client
            .read_line()
            .map_err(|err| match err {
                Error::Io(err) => Error::Connect(reset_means_refused(err)),
                err => err,
            })?;
        trace!("banner received: {}", banner);
        client.version =
            protocol::parse_banner(&banner).map_err(|err| Error::Protocol(err.to_string()))?;
        trace!("monitor version: {}", client.version);
        Ok(client)
    }

    /// The monitor's pid, from its socket credentials.
    pub fn monitor_pid(&self) -> Pid {
        self.monitor_pid
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    fn read_line(&mut self) -> Result<String> {
        let mut buf = [0u8; 4096];
        let n = self.stream.read(&mut buf).map_err(Error::Io)?;
        if n == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "monitor closed the connection",
            )));
        }
        Ok(String::from_utf8_lossy(&buf[..n]).trim_end().to_string())
    }

    /// Sends one command and returns the single-line response.  Refuses
    /// to talk to a monitor newer than this client.
    pub fn command(&mut self, command: &str) -> Result<String> {
        if self.version > protocol::CONTROL_VERSION {
            return Err(Error::VersionMismatch {
                server: self.version,
                own: protocol::CONTROL_VERSION,
            });
        }
        trace!("control >{}", command);
        let mut line = String::with_capacity(command.len() + 2);
        line.push_str(command);
        line.push_str("\r\n");
        self.stream
            .write_all(line.as_bytes())
            .map_err(Error::Io)?;
        let response = self.read_line()?;
        trace!("control <{}", response);
        Ok(response)
    }
}

fn reset_means_refused(err: io::Error) -> io::Error {
    // A reset here means we connected just as the monitor was shutting
    // down; treat it like "nobody listening".
    if err.kind() == io::ErrorKind::ConnectionReset {
        io::Error::from_raw_os_error(libc::ECONNREFUSED)
    } else {
        err
    }
}

/// Sends a single command to a running monitor and returns the response.
pub fn control(supervisor: &str, service: &str, command: &str) -> Result<String> {
    let mut client = MonitorClient::connect(supervisor, service)?;
    client.command(command)
}

/// Connects to a running monitor and returns its pid and version.
pub fn identify(supervisor: &str, service: &str) -> Result<(Pid, u32)> {
    let client = MonitorClient::connect(supervisor, service)?;
    Ok((client.monitor_pid(), client.version()))
}

/// Interrogates a running monitor for the service's state.  Returns
/// `Stopped` when no monitor is running at all.
pub fn get_state(supervisor: &str, service: &str) -> Result<MonitorState> {
    match control(supervisor, service, "status") {
        Ok(response) => {
            if response == protocol::response::DENIED {
                return Err(Error::Denied);
            }
            response
                .parse::<MonitorState>()
                .map_err(|_| Error::InvalidState(response))
        }
        Err(ref err) if err.is_not_running() => Ok(MonitorState::Stopped),
        Err(err) => Err(err),
    }
}

/// Waits for the service to reach one of the wanted states, polling at
/// `POLL_INTERVAL`.  `None` means wait forever.
pub fn wait_for_state(
    supervisor: &str,
    service: &str,
    timeout: Option<Duration>,
    wanted: &[MonitorState],
) -> Result<MonitorState> {
    let state = get_state(supervisor, service)?;
    if wanted.contains(&state) {
        return Ok(state);
    }
    debug!("waiting for service to change state");
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
        }
        thread::sleep(POLL_INTERVAL);
        let state = get_state(supervisor, service)?;
        if wanted.contains(&state) {
            debug!("service reached state {}", state);
            return Ok(state);
        }
    }
}

/// Sends a stop command to a running monitor, then waits for the
/// service to stop.
pub fn stop(supervisor: &str, service: &str, timeout: Option<Duration>) -> Result<MonitorState> {
    // check the state first, in case it is already stopped or stopping
    let state = get_state(supervisor, service)?;
    match state {
        MonitorState::Stopped => {
            debug!("service is already stopped");
            return Ok(state);
        }
        MonitorState::Stopping => {
            debug!("service is already stopping");
        }
        _ => {
            debug!("sending stop command");
            let response = control(supervisor, service, "stop")?;
            match response.as_str() {
                r if r == protocol::response::OK => {}
                r if r == protocol::response::DENIED => return Err(Error::Denied),
                other => return Err(Error::Protocol(format!("unexpected response '{}'", other))),
            }
        }
    }
    wait_for_state(supervisor, service, timeout, &[MonitorState::Stopped])
}

/// Sends a restart command to a running monitor, then waits for the
/// service to come back up.
pub fn restart(
    supervisor: &str,
    service: &str,
    timeout: Option<Duration>,
) -> Result<MonitorState> {
    let state = get_state(supervisor, service)?;
    match state {
        MonitorState::Stopped | MonitorState::Stopping => {
            debug!("service is {}", state);
            return Ok(state);
        }
        MonitorState::Restarting => {
            debug!("service is already restarting");
        }
        _ => {
            debug!("sending restart command");
            let response = control(supervisor, service, "restart")?;
            match response.as_str() {
                r if r == protocol::response::OK => {}
                r if r == protocol::response::DENIED => return Err(Error::Denied),
                other => return Err(Error::Protocol(format!("unexpected response '{}'", other))),
            }
        }
    }
    wait_for_state(
        supervisor,
        service,
        timeout,
        &[MonitorState::Running, MonitorState::Remaining],
    )
}
