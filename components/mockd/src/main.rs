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

//! A scriptable mock daemon for exercising the supervisor.  It executes
//! a sequence of `action[:parameter]` words from the command line:
//! daemonize, write a pid file, block or raise signals, sleep, exit.
//!
//!     mockd -v pidfile sleep:forever
//!     mockd daemon pidfile:/tmp/x.pid sleep:30s
//!     mockd block:15 sleep:forever

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use sysvrun_core::exitcode;
use sysvrun_core::noise::{self, Noise};
use sysvrun_core::os::process::Pid;
use sysvrun_core::{pidfile, timespan};

const DEFAULT_PIDFILE: &str = "/var/run/mockd.pid";

lazy_static! {
    static ref PIDFILE: Mutex<Option<PathBuf>> = Mutex::new(None);
}

extern "C" fn remove_pidfile() {
    if let Some(path) = PIDFILE.lock().ok().and_then(|mut p| p.take()) {
        debug!("deleting PID file");
        if let Err(err) = pidfile::remove(&path) {
            error!("{}", err);
        }
    }
}

fn arg_num(action: &str, arg: Option<&str>, min: i64, max: i64) -> Result<i64, ()> {
    let arg = match arg {
        Some(arg) if !arg.is_empty() => arg,
        _ => return Err(()),
    };
    match arg.parse::<i64>() {
        Ok(num) if num >= min && num <= max => Ok(num),
        Ok(_) => {
            error!("{}: argument out of range", action);
            Err(())
        }
        Err(_) => {
            error!("{}: invalid argument", action);
            Err(())
        }
    }
}

fn mockd_exit(action: &str, arg: Option<&str>) -> Result<(), ()> {
    let status = match arg {
        Some(_) => arg_num(action, arg, 0, 255)?,
        None => 0,
    };
    debug!("exiting with status {}", status);
    process::exit(status as i32);
}

fn mockd_sleep(action: &str, arg: Option<&str>) -> Result<(), ()> {
    let timeout: libc::c_int = match arg {
        None | Some("forever") => {
            debug!("sleeping forever");
            -1
        }
        Some(arg) => {
            let us = timespan::from_str(arg).map_err(|_| {
                error!("{}: invalid timespan", action);
            })?;
            if us / 1000 > i32::max_value() as u64 {
                error!("{}: timespan out of range", action);
                return Err(());
            }
            let ms = ((us + 999) / 1000) as libc::c_int;
            debug!("sleeping for {}.{:03}s", ms / 1000, ms % 1000);
            ms
        }
    };
    let res = unsafe { libc::poll(std::ptr::null_mut(), 0, timeout) };
    if res < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            error!("poll(): {}", err);
            return Err(());
        }
        debug!("interrupted");
    }
    Ok(())
}

fn mockd_block(action: &str, arg: Option<&str>) -> Result<(), ()> {
    let signo = match arg {
        Some(_) => arg_num(action, arg, 1, 15)?,
        None => libc::SIGTERM as i64,
    };
    debug!("blocking signal {}", signo);
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signo as libc::c_int);
        if libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) != 0 {
            return Err(());
        }
    }
    Ok(())
}

fn mockd_raise(action: &str, arg: Option<&str>) -> Result<(), ()> {
    let signo = match arg {
        Some(_) => arg_num(action, arg, 0, 15)?,
        None => libc::SIGTERM as i64,
    };
    debug!("raising signal {}", signo);
    if unsafe { libc::raise(signo as libc::c_int) } != 0 {
        return Err(());
    }
    Ok(())
}

fn mockd_pidfile(arg: Option<&str>) -> Result<(), ()> {
    let path = arg
        .map(PathBuf::from)
        .or_else(|| env::var("PIDFILE").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PIDFILE));
    debug!("writing PID file {}", path.display());
    let pid = unsafe { libc::getpid() } as Pid;
    if let Err(err) = pidfile::write(&path, pid) {
        error!("{}", err);
        return Err(());
    }
    *PIDFILE.lock().unwrap() = Some(path);
    unsafe {
        libc::atexit(remove_pidfile);
    }
    Ok(())
}

fn mockd_daemon(action: &str, arg: Option<&str>) -> Result<(), ()> {
    if arg.is_some() {
        error!("{}: no argument expected", action);
        return Err(());
    }
    debug!("daemonizing");
    unsafe {
        match libc::fork() {
            -1 => {
                error!("fork(): {}", std::io::Error::last_os_error());
                return Err(());
            }
            0 => (),
            pid => {
                let mut status = 0;
                libc::waitpid(pid, &mut status, 0);
                libc::_exit(libc::WEXITSTATUS(status));
            }
        }
        debug!("mockd intermediate {}", libc::getpid());
        if libc::setsid() < 0 {
            error!("setsid(): {}", std::io::Error::last_os_error());
            return Err(());
        }
        match libc::fork() {
            -1 => {
                error!("fork(): {}", std::io::Error::last_os_error());
                return Err(());
            }
            0 => (),
            _ => libc::_exit(0),
        }
        debug!("mockd daemon pid {}", libc::getpid());
    }
    Ok(())
}

fn mockd_action(action: &str, arg: Option<&str>) -> Result<(), ()> {
    match action {
        "block" => mockd_block(action, arg),
        "daemon" => mockd_daemon(action, arg),
        "exit" => mockd_exit(action, arg),
        "pidfile" => mockd_pidfile(arg),
        "raise" => mockd_raise(action, arg),
        "sleep" => mockd_sleep(action, arg),
        _ => {
            error!("unrecognized action: {}", action);
            Err(())
        }
    }
}

fn usage() -> ! {
    eprintln!(
        "usage: mockd [-dv] action[:parameter] [...]\n\
         \n\
         Available actions:\n\
         \x20   block[:signal]\n\
         \x20   daemon\n\
         \x20   exit[:status]\n\
         \x20   pidfile[:path]\n\
         \x20   raise[:signal]\n\
         \x20   sleep[:duration]"
    );
    process::exit(exitcode::EX_USAGE);
}

fn main() {
    let mut level = Noise::Normal;
    let mut actions = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-d" => level = Noise::Debug,
            "-v" => level = Noise::Verbose,
            arg if arg.starts_with('-') => usage(),
            arg => actions.push(arg.to_string()),
        }
    }
    noise::init(level);
    if actions.is_empty() {
        usage();
    }
    debug!("mockd pid {}", unsafe { libc::getpid() });
    for word in actions {
        let (action, arg) = match word.find(':') {
            Some(colon) => (&word[..colon], Some(&word[colon + 1..])),
            None => (word.as_str(), None),
        };
        if mockd_action(action, arg).is_err() {
            process::exit(1);
        }
    }
    process::exit(0);
}
