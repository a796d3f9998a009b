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

//! The kernel process-event connector: a netlink datagram channel that
//! broadcasts fork, exec, setsid, and exit events for every process on
//! the system.
//!
//! Every delivery is an outer netlink header, an inner connector header,
//! and a payload whose first sixteen bytes are the opcode, the
//! originating CPU, and a kernel timestamp.  Per-opcode records follow at
//! fixed offsets.  Framing is validated strictly; any mismatch is a
//! protocol error.

use std::io;
use std::mem;

use byteorder::{ByteOrder, NativeEndian};
use errno::errno;
use libc::{self, c_int, c_void};

use sysvrun_core::os::process::Pid;

use crate::error::{Error, Result};

const CN_IDX_PROC: u32 = 1;
const CN_VAL_PROC: u32 = 1;

const PROC_CN_MCAST_LISTEN: u32 = 1;
const PROC_CN_MCAST_IGNORE: u32 = 2;

const NLMSG_HDRLEN: usize = 16;
const CN_MSG_LEN: usize = 20;
const EVENT_HDRLEN: usize = 16;

const PROC_EVENT_NONE: u32 = 0x0000_0000;
const PROC_EVENT_FORK: u32 = 0x0000_0001;
const PROC_EVENT_EXEC: u32 = 0x0000_0002;
const PROC_EVENT_UID: u32 = 0x0000_0004;
const PROC_EVENT_GID: u32 = 0x0000_0040;
const PROC_EVENT_SID: u32 = 0x0000_0080;
const PROC_EVENT_PTRACE: u32 = 0x0000_0100;
const PROC_EVENT_COMM: u32 = 0x0000_0200;
const PROC_EVENT_COREDUMP: u32 = 0x4000_0000;
const PROC_EVENT_EXIT: u32 = 0x8000_0000;

// The smallest event that can exist: header plus one tid/tgid pair.
const EVENT_MIN_SIZE: usize = EVENT_HDRLEN + 8;

const RECV_BUF_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProcId {
    pub tid: Pid,
    pub tgid: Pid,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// Acknowledgement of a listen/ignore control message, broadcast to
    /// every listener.
    Ack { err: u32 },
    Fork { parent: ProcId, child: ProcId },
    Exec { process: ProcId },
    Uid { process: ProcId, ruid: u32, euid: u32 },
    Gid { process: ProcId, rgid: u32, egid: u32 },
    Sid { process: ProcId },
    Ptrace { process: ProcId },
    Comm { process: ProcId, comm: String },
    Coredump { process: ProcId },
    /// A thread exit.  The signal field is the signal the parent receives
    /// when the whole process dies; SIGCHLD there means this was the last
    /// thread of the process.
    Exit { process: ProcId, code: i32, signal: u32 },
    Unknown { what: u32 },
}

fn proc_id(data: &[u8], off: usize) -> ProcId {
    ProcId {
        tid: NativeEndian::read_u32(&data[off..off + 4]) as Pid,
        tgid: NativeEndian::read_u32(&data[off + 4..off + 8]) as Pid,
    }
}

/// Decodes a connector payload into an event.  The payload must start at
/// the event header (opcode, cpu, timestamp).
pub fn decode_event(payload: &[u8]) -> Result<Event> {
    if payload.len() < EVENT_MIN_SIZE {
        return Err(Error::Protocol(format!(
            "process event too short ({} bytes)",
            payload.len()
        )));
    }
    let what = NativeEndian::read_u32(&payload[0..4]);
    let data = &payload[EVENT_HDRLEN..];
    let need = |len: usize| -> Result<()> {
        if data.len() < len {
            Err(Error::Protocol(format!(
                "event 0x{:08x} truncated ({} of {} bytes)",
                what,
                data.len(),
                len
            )))
        } else {
            Ok(())
        }
    };
    let event = match what {
        PROC_EVENT_NONE => Event::Ack {
            err: NativeEndian::read_u32(&data[0..4]),
        },
        PROC_EVENT_FORK => {
            need(16)?;
            Event::Fork {
                parent: proc_id(data, 0),
                child: proc_id(data, 8),
            }
        }
        PROC_EVENT_EXEC => Event::Exec {
            process: proc_id(data, 0),
        },
        PROC_EVENT_UID => {
            need(16)?;
            Event::Uid {
                process: proc_id(data, 0),
                ruid: NativeEndian::read_u32(&data[8..12]),
                euid: NativeEndian::read_u32(&data[12..16]),
            }
        }
        PROC_EVENT_GID => {
            need(16)?;
            Event::Gid {
                process: proc_id(data, 0),
                rgid: NativeEndian::read_u32(&data[8..12]),
                egid: NativeEndian::read_u32(&data[12..16]),
            }
        }
        PROC_EVENT_SID => Event::Sid {
            process: proc_id(data, 0),
        },
        PROC_EVENT_PTRACE => Event::Ptrace {
            process: proc_id(data, 0),
        },
        PROC_EVENT_COMM => {
            need(24)?;
            let raw = &data[8..24];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Event::Comm {
                process: proc_id(data, 0),
                comm: String::from_utf8_lossy(&raw[..end]).into_owned(),
            }
        }
        PROC_EVENT_COREDUMP => Event::Coredump {
            process: proc_id(data, 0),
        },
        PROC_EVENT_EXIT => {
            need(16)?;
            Event::Exit {
                process: proc_id(data, 0),
                code: NativeEndian::read_u32(&data[8..12]) as i32,
                signal: NativeEndian::read_u32(&data[12..16]),
            }
        }
        what => Event::Unknown { what },
    };
    Ok(event)
}

/// Validates the outer framing of a received datagram and returns the
/// connector payload.
pub fn check_framing(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < NLMSG_HDRLEN {
        return Err(Error::Protocol("incomplete netlink header".to_string()));
    }
    let nlmsg_len = NativeEndian::read_u32(&buf[0..4]) as usize;
    if nlmsg_len != buf.len() {
        return Err(Error::Protocol(format!(
            "netlink length mismatch ({} != {})",
            nlmsg_len,
            buf.len()
        )));
    }
    let rest = &buf[NLMSG_HDRLEN..];
    if rest.len() < CN_MSG_LEN {
        return Err(Error::Protocol("incomplete connector header".to_string()));
    }
    let idx = NativeEndian::read_u32(&rest[0..4]);
    let val = NativeEndian::read_u32(&rest[4..8]);
    if idx != CN_IDX_PROC || val != CN_VAL_PROC {
        return Err(Error::Protocol(format!(
            "invalid connector id {}:{}",
            idx, val
        )));
    }
    let payload_len = NativeEndian::read_u16(&rest[16..18]) as usize;
    let payload = &rest[CN_MSG_LEN..];
    if payload_len != payload.len() {
        return Err(Error::Protocol(
            "invalid process event message length".to_string(),
        ));
    }
    Ok(payload)
}

/// The connection to the process-event connector.  The `listening` flag
/// implements the asymmetric enable/disable accounting the kernel
/// requires: for every successful enable there must be at most one
/// successful disable.
pub struct EventSource {
    fd: c_int,
    listening: bool,
}

impl EventSource {
    pub fn new() -> EventSource {
        EventSource {
            fd: -1,
            listening: false,
        }
    }

    /// Connects to the process event connector.  Idempotent.
    pub fn connect(&mut self) -> Result<()> {
        if self.fd >= 0 {
            return Ok(());
        }
        let fd = unsafe {
            libc::socket(
                libc::PF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::NETLINK_CONNECTOR,
            )
        };
        if fd < 0 {
            return Err(Error::Connector(io::Error::last_os_error()));
        }
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = CN_IDX_PROC;
        addr.nl_pid = unsafe { libc::getpid() } as u32;
        let res = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if res != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(Error::Connector(err));
        }
        self.fd = fd;
        Ok(())
    }

    /// Disconnects, attempting a best-effort ignore message first.
    /// Idempotent.
    pub fn disconnect(&mut self) {
        if self.fd < 0 {
            return;
        }
        if self.listening {
            let _ = self.listen(false, 1000);
        }
        unsafe {
            libc::close(self.fd);
        }
        self.fd = -1;
    }

    /// The pollable descriptor.
    pub fn fd(&self) -> Result<c_int> {
        if self.fd < 0 {
            return Err(Error::NotConnected);
        }
        Ok(self.fd)
    }

    fn send_ctl(&self, op: u32) -> Result<()> {
        let total = NLMSG_HDRLEN + CN_MSG_LEN + 4;
        let mut buf = [0u8; NLMSG_HDRLEN + CN_MSG_LEN + 4];
        // netlink header
        NativeEndian::write_u32(&mut buf[0..4], total as u32);
        NativeEndian::write_u16(&mut buf[4..6], libc::NLMSG_DONE as u16);
        NativeEndian::write_u32(&mut buf[8..12], unsafe { libc::getpid() } as u32);
        // connector header
        NativeEndian::write_u32(&mut buf[16..20], CN_IDX_PROC);
        NativeEndian::write_u32(&mut buf[20..24], CN_VAL_PROC);
        NativeEndian::write_u16(&mut buf[32..34], 4);
        // operation
        NativeEndian::write_u32(&mut buf[36..40], op);
        let res = unsafe { libc::send(self.fd, buf.as_ptr() as *const c_void, total, 0) };
        if res < 0 {
            return Err(Error::Connector(io::Error::last_os_error()));
        }
        if res as usize != total {
            return Err(Error::Connector(io::Error::new(
                io::ErrorKind::Other,
                "short send",
            )));
        }
        Ok(())
    }

    /// Receives one validated connector payload.  The timeout is in
    /// milliseconds with the same semantics as for poll(2).
    fn receive(&self, timeout_ms: c_int) -> Result<Vec<u8>> {
        let fd = self.fd()?;
        loop {
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let res = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if res < 0 {
                if errno().0 == libc::EINTR {
                    continue;
                }
                return Err(Error::Connector(io::Error::last_os_error()));
            }
            if res == 0 {
                return Err(Error::Timeout);
            }
            if pfd.revents & libc::POLLERR != 0 {
                return Err(Error::Connector(io::Error::from_raw_os_error(libc::EPIPE)));
            }
            if pfd.revents & libc::POLLIN == 0 {
                return Err(Error::Connector(io::Error::from_raw_os_error(libc::EIO)));
            }
            break;
        }
        let mut buf = [0u8; RECV_BUF_SIZE];
        let res = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                return Err(Error::Timeout);
            }
            return Err(Error::Connector(err));
        }
        let payload = check_framing(&buf[..res as usize])?;
        Ok(payload.to_vec())
    }

    /// Awaits the next decoded event.
    pub fn receive_event(&self, timeout_ms: c_int) -> Result<Event> {
        let payload = self.receive(timeout_ms)?;
        decode_event(&payload)
    }

    /// Enables or disables the event stream and waits for the kernel's
    /// acknowledgement.
    ///
    /// The kernel keeps a bare reference count of listeners, checked
    /// after it has already been decremented, so the ack for the last
    /// unsubscriber is never sent.  A lost disable must therefore be
    /// treated as success (retrying would drive the count negative and
    /// shadow a later enable), while a lost enable must be treated as
    /// failure (or the cleanup path would decrement a count we never
    /// incremented).  In short: at most one successful disable per
    /// successful enable.
    pub fn listen(&mut self, enable: bool, timeout_ms: c_int) -> Result<()> {
        if enable == self.listening {
            return Ok(());
        }
        debug!(
            "{} process event stream",
            if enable { "enabling" } else { "disabling" }
        );
        self.send_ctl(if enable {
            PROC_CN_MCAST_LISTEN
        } else {
            PROC_CN_MCAST_IGNORE
        })?;
        loop {
            match self.receive_event(timeout_ms) {
                Ok(Event::Ack { err: 0 }) => {
                    trace!("event connector ack: success");
                    self.listening = enable;
                    return Ok(());
                }
                Ok(Event::Ack { err }) => {
                    trace!("event connector ack: error {}", err);
                    return Err(Error::Connector(io::Error::from_raw_os_error(err as i32)));
                }
                Ok(_) => continue,
                Err(Error::Timeout) => {
                    trace!(
                        "timed out waiting for event connector {} ack",
                        if enable { "enable" } else { "disable" }
                    );
                    break;
                }
                Err(err) => {
                    if !enable {
                        break;
                    }
                    return Err(err);
                }
            }
        }
        if !enable {
            // Assume the disable took effect; see above.
            self.listening = false;
            return Ok(());
        }
        Err(Error::Timeout)
    }
}

impl Default for EventSource {
    fn default() -> EventSource {
        EventSource::new()
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(idx: u32, val: u32, payload: &[u8]) -> Vec<u8> {
        let total = NLMSG_HDRLEN + CN_MSG_LEN + payload.len();
        let mut buf = vec![0u8; total];
        NativeEndian::write_u32(&mut buf[0..4], total as u32);
        NativeEndian::write_u32(&mut buf[16..20], idx);
        NativeEndian::write_u32(&mut buf[20..24], val);
        NativeEndian::write_u16(&mut buf[32..34], payload.len() as u16);
        buf[36..].copy_from_slice(payload);
        buf
    }

    fn event(what: u32, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; EVENT_HDRLEN + data.len()];
        NativeEndian::write_u32(&mut payload[0..4], what);
        payload[EVENT_HDRLEN..].copy_from_slice(data);
        payload
    }

    fn ids(pairs: &[(u32, u32)]) -> Vec<u8> {
        let mut data = Vec::new();
        for &(tid, tgid) in pairs {
            let mut word = [0u8; 8];
            NativeEndian::write_u32(&mut word[0..4], tid);
            NativeEndian::write_u32(&mut word[4..8], tgid);
            data.extend_from_slice(&word);
        }
        data
    }

    #[test]
    fn framing_accepts_valid_message() {
        let payload = event(PROC_EVENT_EXEC, &ids(&[(7, 7)]));
        let buf = message(CN_IDX_PROC, CN_VAL_PROC, &payload);
        assert_eq!(check_framing(&buf).unwrap(), payload.as_slice());
    }

    #[test]
    fn framing_rejects_length_mismatch() {
        let payload = event(PROC_EVENT_EXEC, &ids(&[(7, 7)]));
        let mut buf = message(CN_IDX_PROC, CN_VAL_PROC, &payload);
        let bad_len = (buf.len() + 4) as u32;
        NativeEndian::write_u32(&mut buf[0..4], bad_len);
        assert!(check_framing(&buf).is_err());
        let mut buf = message(CN_IDX_PROC, CN_VAL_PROC, &payload);
        NativeEndian::write_u16(&mut buf[32..34], (payload.len() + 1) as u16);
        assert!(check_framing(&buf).is_err());
    }

    #[test]
    fn framing_rejects_wrong_channel() {
        let payload = event(PROC_EVENT_EXEC, &ids(&[(7, 7)]));
        let buf = message(2, CN_VAL_PROC, &payload);
        assert!(check_framing(&buf).is_err());
        let buf = message(CN_IDX_PROC, 9, &payload);
        assert!(check_framing(&buf).is_err());
    }

    #[test]
    fn decode_fork() {
        let payload = event(PROC_EVENT_FORK, &ids(&[(100, 100), (101, 101)]));
        match decode_event(&payload).unwrap() {
            Event::Fork { parent, child } => {
                assert_eq!(parent.tgid, 100);
                assert_eq!(child.tgid, 101);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decode_exit() {
        let mut data = ids(&[(100, 100)]);
        let mut extra = [0u8; 8];
        NativeEndian::write_u32(&mut extra[0..4], 0x0100); // exit status 1
        NativeEndian::write_u32(&mut extra[4..8], libc::SIGCHLD as u32);
        data.extend_from_slice(&extra);
        match decode_event(&event(PROC_EVENT_EXIT, &data)).unwrap() {
            Event::Exit {
                process,
                code,
                signal,
            } => {
                assert_eq!(process.tgid, 100);
                assert_eq!(code, 0x0100);
                assert_eq!(signal, libc::SIGCHLD as u32);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decode_ack_and_unknown() {
        let payload = event(PROC_EVENT_NONE, &[0u8; 8]);
        assert_eq!(decode_event(&payload).unwrap(), Event::Ack { err: 0 });
        let payload = event(0x0080_0000, &[0u8; 8]);
        assert_eq!(
            decode_event(&payload).unwrap(),
            Event::Unknown { what: 0x0080_0000 }
        );
    }

    #[test]
    fn decode_comm() {
        let mut data = ids(&[(5, 5)]);
        let mut name = [0u8; 16];
        name[..4].copy_from_slice(b"sshd");
        data.extend_from_slice(&name);
        match decode_event(&event(PROC_EVENT_COMM, &data)).unwrap() {
            Event::Comm { comm, .. } => assert_eq!(comm, "sshd"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_short_event() {
        assert!(decode_event(&[0u8; 8]).is_err());
        // a fork event with only one procid
        let payload = event(PROC_EVENT_FORK, &ids(&[(1, 1)]));
        assert!(decode_event(&payload).is_err());
    }
}
