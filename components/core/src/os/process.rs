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

use std::fmt::{self, Display, Formatter};
use std::io;

use libc::{self, c_int, pid_t};

use crate::error::{Error, Result};

pub type Pid = pid_t;

#[allow(non_snake_case)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Signal {
    HUP,
    INT,
    QUIT,
    ILL,
    ABRT,
    FPE,
    KILL,
    USR1,
    SEGV,
    USR2,
    PIPE,
    ALRM,
    TERM,
    CHLD,
    CONT,
    STOP,
}

impl From<Signal> for c_int {
    fn from(value: Signal) -> c_int {
        match value {
            Signal::HUP => libc::SIGHUP,
            Signal::INT => libc::SIGINT,
            Signal::QUIT => libc::SIGQUIT,
            Signal::ILL => libc::SIGILL,
            Signal::ABRT => libc::SIGABRT,
            Signal::FPE => libc::SIGFPE,
            Signal::KILL => libc::SIGKILL,
            Signal::USR1 => libc::SIGUSR1,
            Signal::SEGV => libc::SIGSEGV,
            Signal::USR2 => libc::SIGUSR2,
            Signal::PIPE => libc::SIGPIPE,
            Signal::ALRM => libc::SIGALRM,
            Signal::TERM => libc::SIGTERM,
            Signal::CHLD => libc::SIGCHLD,
            Signal::CONT => libc::SIGCONT,
            Signal::STOP => libc::SIGSTOP,
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match *self {
            Signal::HUP => "SIGHUP",
            Signal::INT => "SIGINT",
            Signal::QUIT => "SIGQUIT",
            Signal::ILL => "SIGILL",
            Signal::ABRT => "SIGABRT",
            Signal::FPE => "SIGFPE",
            Signal::KILL => "SIGKILL",
            Signal::USR1 => "SIGUSR1",
            Signal::SEGV => "SIGSEGV",
            Signal::USR2 => "SIGUSR2",
            Signal::PIPE => "SIGPIPE",
            Signal::ALRM => "SIGALRM",
            Signal::TERM => "SIGTERM",
            Signal::CHLD => "SIGCHLD",
            Signal::CONT => "SIGCONT",
            Signal::STOP => "SIGSTOP",
        };
        write!(f, "{}", s)
    }
}

pub fn current_pid() -> Pid {
    unsafe { libc::getpid() }
}

pub fn current_sid() -> Pid {
    unsafe { libc::getsid(0) }
}

pub fn getpgid(pid: Pid) -> Result<Pid> {
    match unsafe { libc::getpgid(pid) } {
        -1 => Err(Error::Io(io::Error::last_os_error())),
        pgid => Ok(pgid),
    }
}

/// Sends a signal to a process.  A negative pid targets the process group.
pub fn signal(pid: Pid, signal: Signal) -> Result<()> {
    match unsafe { libc::kill(pid, signal.into()) } {
        0 => Ok(()),
        _ => Err(Error::Io(io::Error::last_os_error())),
    }
}

/// Sends a signal followed by SIGCONT, so that a stopped process wakes up
/// and can observe the first signal.
pub fn signal_and_cont(pid: Pid, sig: Signal) -> Result<()> {
    signal(pid, sig)?;
    if sig != Signal::CONT {
        let _ = signal(pid, Signal::CONT);
    }
    Ok(())
}

/// Probes for the existence of a process without signalling it.
pub fn is_alive(pid: Pid) -> bool {
    match unsafe { libc::kill(pid, 0) } {
        0 => true,
        _ => io::Error::last_os_error().raw_os_error() == Some(libc::EPERM),
    }
}

/// Non-blocking wait.  Returns the raw wait status if the child has
/// terminated.
pub fn try_wait(pid: Pid) -> Result<Option<c_int>> {
    let mut status = 0 as c_int;
    match unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } {
        0 => Ok(None),
        -1 => Err(Error::Wait(io::Error::last_os_error())),
        _ => Ok(Some(status)),
    }
}

/// Blocking wait.  Returns the raw wait status.
pub fn wait(pid: Pid) -> Result<c_int> {
    let mut status = 0 as c_int;
    match unsafe { libc::waitpid(pid, &mut status, 0) } {
        -1 => Err(Error::Wait(io::Error::last_os_error())),
        _ => Ok(status),
    }
}

pub fn exited(status: c_int) -> bool {
    libc::WIFEXITED(status)
}

pub fn exit_status(status: c_int) -> c_int {
    libc::WEXITSTATUS(status)
}

pub fn signaled(status: c_int) -> bool {
    libc::WIFSIGNALED(status)
}

pub fn term_signal(status: c_int) -> c_int {
    libc::WTERMSIG(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_is_alive() {
        assert!(is_alive(current_pid()));
    }

    #[test]
    fn own_sid_is_positive() {
        assert!(current_sid() > 0);
    }

    #[test]
    fn status_macros() {
        // exit status 3 as encoded by the kernel
        let status = 3 << 8;
        assert!(exited(status));
        assert_eq!(exit_status(status), 3);
        assert!(!signaled(status));
        // terminated by SIGTERM
        let status = libc::SIGTERM;
        assert!(signaled(status));
        assert_eq!(term_signal(status), libc::SIGTERM);
        assert!(!exited(status));
    }
}
