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

//! The server side of the control channel: an abstract stream socket,
//! short line-oriented sessions, and per-peer authorization via
//! SO_PEERCRED.

use std::io;
use std::mem;
use std::time::Instant;

use errno::errno;
use libc::{self, c_int, c_void};

use sysvrun_core::os::process::Pid;
use sysvrun_monitor_protocol as protocol;
use sysvrun_monitor_protocol::{MonitorState, NoiseLevel, Request};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct PeerCred {
    pub pid: Pid,
    pub uid: u32,
    pub gid: u32,
}

pub struct ControlListener {
    fd: c_int,
}

impl ControlListener {
    /// Binds and listens on the service's abstract control socket.
    pub fn bind(supervisor: &str, service: &str) -> Result<ControlListener> {
        let (addr, addrlen) = protocol::socket_addr(supervisor, service)
            .map_err(|err| Error::Protocol(err.to_string()))?;
        debug!(
            "creating control socket {}",
            &protocol::socket_name(supervisor, service)[1..]
        );
        let fd = unsafe {
            libc::socket(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if fd < 0 {
            return Err(Error::Control(io::Error::last_os_error()));
        }
        let res = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                addrlen,
            )
        };
        if res != 0 || unsafe { libc::listen(fd, 8) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(Error::Control(err));
        }
        Ok(ControlListener { fd })
    }

    pub fn fd(&self) -> c_int {
        self.fd
    }

    /// Accepts one client connection and reads its credentials.
    pub fn accept(&self) -> Result<ControlSession> {
        let fd = unsafe {
            libc::accept4(
                self.fd,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                libc::SOCK_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(Error::Control(io::Error::last_os_error()));
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
            return Err(Error::Control(err));
        }
        trace!(
            "control({}): peer pid {} uid {} gid {}",
            fd,
            cred.pid,
            cred.uid,
            cred.gid
        );
        Ok(ControlSession {
            fd,
            peer: PeerCred {
                pid: cred.pid,
                uid: cred.uid,
                gid: cred.gid,
            },
            deadline: Instant::now() + protocol::SESSION_DEADLINE,
        })
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

pub struct ControlSession {
    fd: c_int,
    pub peer: PeerCred,
    deadline: Instant,
}

impl ControlSession {
    /// Writes one CR-LF-terminated line.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        trace!("control({}): >\"{}\"", self.fd, line);
        let mut buf = Vec::with_capacity(line.len() + 2);
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\r\n");
        let mut off = 0;
        while off < buf.len() {
            let res = unsafe {
                libc::write(
                    self.fd,
                    buf[off..].as_ptr() as *const c_void,
                    buf.len() - off,
                )
            };
            if res < 0 {
                if errno().0 == libc::EINTR {
                    continue;
                }
                return Err(Error::Control(io::Error::last_os_error()));
            }
            off += res as usize;
        }
        Ok(())
    }

    /// Reads one request line, bounded by the session deadline.  Returns
    /// None when the peer closes or the deadline elapses.  Requests are
    /// short enough to arrive whole, so one read is one line; trailing
    /// whitespace (including the CR-LF) is trimmed.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                return Ok(None);
            }
            let remaining = self.deadline.duration_since(now);
            let timeout = remaining.as_millis() as c_int;
            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let res = unsafe { libc::poll(&mut pfd, 1, timeout.max(1)) };
            if res < 0 {
                if errno().0 == libc::EINTR {
                    continue;
                }
                return Err(Error::Control(io::Error::last_os_error()));
            }
            if res == 0 {
                return Ok(None);
            }
            let mut buf = [0u8; 4096];
            let res =
                unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
            if res < 0 {
                if errno().0 == libc::EINTR {
                    continue;
                }
                return Err(Error::Control(io::Error::last_os_error()));
            }
            if res == 0 {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&buf[..res as usize])
                .trim_end()
                .to_string();
            trace!("control({}): <\"{}\"", self.fd, line);
            return Ok(Some(line));
        }
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        trace!("control({}): closing", self.fd);
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// What a handled request asks the monitor to do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlEffect {
    Nothing,
    SetState(MonitorState),
    SetNoise(NoiseLevel),
}

/// Decides the response and effect of one request line.  Pure; the
/// caller applies the effect and writes the response.
pub fn dispatch(state: MonitorState, privileged: bool, line: &str) -> (String, ControlEffect) {
    let denied = || (protocol::response::DENIED.to_string(), ControlEffect::Nothing);
    match Request::parse(line) {
        Some(Request::Status) => (state.to_string(), ControlEffect::Nothing),
        Some(Request::Stop) => {
            if !privileged {
                return denied();
            }
            debug!("control: stop requested");
            let effect = if state < MonitorState::Stopping {
                ControlEffect::SetState(MonitorState::Stopping)
            } else {
                ControlEffect::Nothing
            };
            (protocol::response::OK.to_string(), effect)
        }
        Some(Request::Restart) => {
            if !privileged {
                return denied();
            }
            debug!("control: restart requested");
            (
                protocol::response::OK.to_string(),
                ControlEffect::SetState(MonitorState::Restarting),
            )
        }
        Some(Request::Noise(level)) => {
            if !privileged {
                return denied();
            }
            (protocol::response::OK.to_string(), ControlEffect::SetNoise(level))
        }
        None => (protocol::response::ERROR.to_string(), ControlEffect::Nothing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reports_state_name_for_anyone() {
        for &privileged in &[false, true] {
            let (response, effect) =
                dispatch(MonitorState::Remaining, privileged, "status");
            assert_eq!(response, "remaining");
            assert_eq!(effect, ControlEffect::Nothing);
        }
    }

    #[test]
    fn stop_requires_privilege() {
        let (response, effect) = dispatch(MonitorState::Running, false, "stop");
        assert_eq!(response, "denied");
        assert_eq!(effect, ControlEffect::Nothing);
        let (response, effect) = dispatch(MonitorState::Running, true, "stop");
        assert_eq!(response, "ok");
        assert_eq!(effect, ControlEffect::SetState(MonitorState::Stopping));
    }

    #[test]
    fn stop_does_not_regress_later_states() {
        let (response, effect) = dispatch(MonitorState::Stopped, true, "stop");
        assert_eq!(response, "ok");
        assert_eq!(effect, ControlEffect::Nothing);
    }

    #[test]
    fn restart_requires_privilege() {
        let (response, effect) = dispatch(MonitorState::Remaining, false, "restart");
        assert_eq!(response, "denied");
        assert_eq!(effect, ControlEffect::Nothing);
        let (response, effect) = dispatch(MonitorState::Remaining, true, "restart");
        assert_eq!(response, "ok");
        assert_eq!(effect, ControlEffect::SetState(MonitorState::Restarting));
    }

    #[test]
    fn noise_adjustment() {
        let (response, effect) = dispatch(MonitorState::Running, true, "noise=debug");
        assert_eq!(response, "ok");
        assert_eq!(effect, ControlEffect::SetNoise(NoiseLevel::Debug));
        let (response, _) = dispatch(MonitorState::Running, false, "noise=debug");
        assert_eq!(response, "denied");
    }

    #[test]
    fn unknown_commands_are_errors() {
        for line in &["halt", "", "Status", "noise=loud"] {
            let (response, effect) = dispatch(MonitorState::Running, true, line);
            assert_eq!(response, "error");
            assert_eq!(effect, ControlEffect::Nothing);
        }
    }
}
