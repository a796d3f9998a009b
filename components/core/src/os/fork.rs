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

//! Forking and daemonizing with a readiness-report channel.
//!
//! Three processes are involved: the parent, an optional intermediate
//! (only when daemonizing, so that the real child is immediately
//! re-parented and cannot acquire a controlling tty), and the child.
//!
//! When the caller-provided function runs, descriptors 0/1/2 refer to
//! /dev/null or to the caller's I/O pipes, and `REPORT_FD` refers to a
//! pipe back to the parent.  The function must do exactly one of:
//!
//! * return zero to indicate success;
//! * return non-zero to indicate failure;
//! * never return, but close `REPORT_FD` to indicate success.  This
//!   happens automatically on a successful execve() because `REPORT_FD`
//!   is close-on-exec.

use std::ffi::CString;
use std::io;
use std::mem;
use std::thread;
use std::time::Duration;

use libc::{self, c_int, c_void, pid_t};

use crate::error::{Error, Result};
use crate::exitcode;
use crate::os::process::Pid;

pub const REPORT_FD: c_int = 3;

#[derive(Debug)]
pub struct ForkPipe {
    pub parent: c_int,
    pub child: c_int,
}

impl ForkPipe {
    pub fn new() -> io::Result<ForkPipe> {
        let mut fds: [c_int; 2] = [-1; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ForkPipe {
            parent: fds[0],
            child: fds[1],
        })
    }
}

/// Standard I/O plumbing for a spawned child: stdin from /dev/null, and
/// pipes for stdout and stderr whose parent ends are non-blocking.  The
/// pipes outlive any individual child so that a restarted service reuses
/// them.
#[derive(Debug)]
pub struct ForkIo {
    pub stdin: ForkPipe,
    pub stdout: ForkPipe,
    pub stderr: ForkPipe,
}

impl ForkIo {
    pub fn for_supervisor() -> Result<ForkIo> {
        let devnull = open_devnull(libc::O_RDONLY)?;
        let stdout = ForkPipe::new()?;
        let stderr = ForkPipe::new()?;
        for pipe in &[&stdout, &stderr] {
            if unsafe { libc::fcntl(pipe.parent, libc::F_SETFL, libc::O_NONBLOCK) } != 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
        }
        Ok(ForkIo {
            stdin: ForkPipe {
                parent: -1,
                child: devnull,
            },
            stdout,
            stderr,
        })
    }
}

impl Drop for ForkIo {
    fn drop(&mut self) {
        for fd in &[
            self.stdin.parent,
            self.stdin.child,
            self.stdout.parent,
            self.stdout.child,
            self.stderr.parent,
            self.stderr.child,
        ] {
            if *fd >= 0 {
                unsafe {
                    libc::close(*fd);
                }
            }
        }
    }
}

fn open_devnull(flags: c_int) -> Result<c_int> {
    let path = CString::new("/dev/null").unwrap();
    match unsafe { libc::open(path.as_ptr(), flags) } {
        -1 => Err(Error::Io(io::Error::last_os_error())),
        fd => Ok(fd),
    }
}

unsafe fn write_obj<T>(fd: c_int, val: &T) -> isize {
    libc::write(fd, val as *const T as *const c_void, mem::size_of::<T>())
}

unsafe fn read_obj<T>(fd: c_int, val: &mut T) -> isize {
    libc::read(fd, val as *mut T as *mut c_void, mem::size_of::<T>())
}

unsafe fn redirect(from: c_int, to: c_int) {
    if from != to {
        libc::dup2(from, to);
        libc::close(from);
    }
}

unsafe fn fd_setup(report: Option<&ForkPipe>, io: Option<&ForkIo>) {
    if let Some(io) = io {
        redirect(io.stdin.child, libc::STDIN_FILENO);
        redirect(io.stdout.child, libc::STDOUT_FILENO);
        redirect(io.stderr.child, libc::STDERR_FILENO);
    }
    if let Some(report) = report {
        if report.child != REPORT_FD {
            libc::dup3(report.child, REPORT_FD, libc::O_CLOEXEC);
            libc::close(report.child);
        }
    }
}

fn df_child<F>(func: F, report: Option<&ForkPipe>, io: Option<&ForkIo>) -> !
where
    F: FnOnce() -> i32,
{
    unsafe {
        fd_setup(report, io);
        // First report: just our PID.
        let pid = libc::getpid();
        if write_obj(REPORT_FD, &pid) < 0 {
            libc::_exit(1);
        }
    }
    let res = func();
    if res != 0 {
        // Second report: something went wrong.
        unsafe {
            let _ = write_obj(REPORT_FD, &(res as c_int));
        }
    }
    unsafe {
        if res >= 0 && res <= 255 {
            libc::_exit(res);
        }
        libc::_exit(1);
    }
}

fn df_inter<F>(func: F, report: &ForkPipe, io: Option<&ForkIo>) -> !
where
    F: FnOnce() -> i32,
{
    unsafe {
        // If the caller did not provide I/O pipes, point stdio at
        // /dev/null.
        let null_io;
        let io = match io {
            Some(io) => Some(io),
            None => {
                let stdin = match open_devnull(libc::O_RDONLY) {
                    Ok(fd) => fd,
                    Err(_) => libc::_exit(exitcode::EXIT_STDIN),
                };
                let stdout = match open_devnull(libc::O_WRONLY | libc::O_APPEND) {
                    Ok(fd) => fd,
                    Err(_) => libc::_exit(exitcode::EXIT_STDOUT),
                };
                let stderr = match open_devnull(libc::O_WRONLY | libc::O_APPEND) {
                    Ok(fd) => fd,
                    Err(_) => libc::_exit(exitcode::EXIT_STDERR),
                };
                null_io = ForkIo {
                    stdin: ForkPipe {
                        parent: -1,
                        child: stdin,
                    },
                    stdout: ForkPipe {
                        parent: -1,
                        child: stdout,
                    },
                    stderr: ForkPipe {
                        parent: -1,
                        child: stderr,
                    },
                };
                Some(&null_io)
            }
        };
        // Move to a known safe directory.
        let root = CString::new("/").unwrap();
        if libc::chdir(root.as_ptr()) < 0 {
            libc::_exit(exitcode::EXIT_CHDIR);
        }
        // Start a new session.
        if libc::setsid() < 0 {
            libc::_exit(exitcode::EXIT_SETSID);
        }
        fd_setup(Some(report), io);
        match libc::fork() {
            -1 => libc::_exit(1),
            0 => {
                // report and io are already set up
                df_child(func, None, None);
            }
            _ => libc::_exit(0),
        }
    }
}

fn df_parent<F>(func: F, io: Option<&ForkIo>, daemonize: bool) -> Result<Pid>
where
    F: FnOnce() -> i32,
{
    let report = ForkPipe::new().map_err(Error::Spawn)?;
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(report.parent);
            libc::close(report.child);
        }
        return Err(Error::Spawn(err));
    }
    if pid == 0 {
        if daemonize {
            df_inter(func, &report, io);
        } else {
            df_child(func, Some(&report), io);
        }
    }
    // Parent.
    unsafe {
        libc::close(report.child);
    }
    if daemonize {
        unsafe {
            libc::waitpid(pid, std::ptr::null_mut(), 0);
        }
    }
    // Wait for the first report.
    let mut child: pid_t = 0;
    let res = unsafe { read_obj(report.parent, &mut child) };
    if res != mem::size_of::<pid_t>() as isize {
        let err = if res < 0 {
            io::Error::last_os_error()
        } else {
            io::Error::new(io::ErrorKind::UnexpectedEof, "no child pid received")
        };
        unsafe {
            libc::close(report.parent);
        }
        return Err(Error::Spawn(err));
    }
    // Wait for the second report (only sent on failure).
    let mut code: c_int = 0;
    let res = unsafe { read_obj(report.parent, &mut code) };
    unsafe {
        libc::close(report.parent);
    }
    if res < 0 {
        return Err(Error::Spawn(io::Error::last_os_error()));
    }
    if res == 0 || code == 0 {
        return Ok(child);
    }
    // Try to collect the child, but not too hard.
    for i in 0..10 {
        thread::sleep(Duration::from_millis(1 << i));
        if unsafe { libc::waitpid(child, std::ptr::null_mut(), libc::WNOHANG) } != 0 {
            break;
        }
    }
    debug!("child reported exit code {}", code);
    Err(Error::ChildFailed(code))
}

/// Daemonizes and calls a function.  Returns the daemon's PID on success.
pub fn daemonize_function<F>(func: F, io: Option<&ForkIo>) -> Result<Pid>
where
    F: FnOnce() -> i32,
{
    df_parent(func, io, true)
}

/// Forks and calls a function.  Returns the child's PID on success; the
/// caller is responsible for collecting the child.  Does not return until
/// the child has either called execve() or terminated.
pub fn fork_function<F>(func: F, io: Option<&ForkIo>) -> Result<Pid>
where
    F: FnOnce() -> i32,
{
    df_parent(func, io, false)
}

/// Signals the ancestor process that the service is ready by closing the
/// report descriptor.  Rather than a plain close, the descriptor is
/// atomically replaced with a close-on-exec duplicate of stderr, so that
/// a stray later write to it cannot fail and the number cannot be handed
/// out again for some other purpose.
pub fn report_ready() {
    trace!("reporting service ready");
    unsafe {
        libc::dup3(libc::STDERR_FILENO, REPORT_FD, libc::O_CLOEXEC);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::process;

    #[test]
    fn fork_success_reports_pid() {
        let pid = fork_function(|| 0, None).unwrap();
        assert!(pid > 0);
        let status = process::wait(pid).unwrap();
        assert!(process::exited(status));
        assert_eq!(process::exit_status(status), 0);
    }

    #[test]
    fn fork_failure_reports_code() {
        match fork_function(|| 42, None) {
            Err(Error::ChildFailed(42)) => (),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
