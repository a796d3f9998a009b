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

//! A small front-end shim covering the everyday service-management
//! verbs.  It operates entirely through installed init scripts and
//! run-level symlinks; the heavy lifting lives in the launcher that the
//! scripts exec.

#[macro_use]
extern crate log;

mod service;

use std::process;

use ansi_term::Colour::{Green, Red};
use clap::{Arg, ArgAction, ArgMatches, Command};

use sysvrun_core::exitcode;
use sysvrun_core::noise::{self, Noise};

use crate::service::InitService;

fn cli() -> Command {
    let services = Arg::new("services")
        .required(true)
        .num_args(1..)
        .value_name("SERVICE");
    Command::new("systemctl")
        .about("Manage services installed as init scripts")
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .global(true)
                .value_name("DIR"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("enable").arg(services.clone()))
        .subcommand(Command::new("disable").arg(services.clone()))
        .subcommand(Command::new("is-enabled").arg(services.clone()))
        .subcommand(Command::new("is-active").arg(services.clone()))
        .subcommand(Command::new("status").arg(services.clone()))
        .subcommand(Command::new("start").arg(services.clone()))
        .subcommand(Command::new("stop").arg(services.clone()))
        .subcommand(Command::new("restart").arg(services.clone()))
        .subcommand(Command::new("try-restart").arg(services.clone()))
        .subcommand(Command::new("reload").arg(services.clone()))
        .subcommand(Command::new("reload-or-restart").arg(services.clone()))
        .subcommand(Command::new("reload-or-try-restart").arg(services.clone()))
        .subcommand(Command::new("try-reload-or-restart").arg(services))
        .subcommand(Command::new("show").arg(
            Arg::new("services")
                .required(true)
                .num_args(1..)
                .value_name("SERVICE"),
        ))
        .subcommand(Command::new("daemon-reload"))
}

fn services(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("services")
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn find(root: &str, name: &str) -> Option<InitService> {
    match InitService::find(root, name) {
        Ok(svc) => Some(svc),
        Err(err) => {
            eprintln!("service '{}' not found: {}", name, err);
            None
        }
    }
}

/// start, stop, restart, try-restart
fn start_stop(verb: &str, svc: &InitService) -> i32 {
    let mut verb = verb;
    if verb == "start" || verb == "stop" || verb == "try-restart" {
        let running = match svc.invoke("status", true) {
            Ok(code) => code == 0,
            Err(err) => {
                eprintln!("{}: {}: {}", verb, svc.name, err);
                return 1;
            }
        };
        match verb {
            // already running, nothing to do
            "start" if running => return 0,
            // not running, nothing to do
            "stop" if !running => return 0,
            "try-restart" if !running => return 0,
            "try-restart" => verb = "restart",
            _ => (),
        }
    }
    match svc.invoke(verb, true) {
        // pass on the init script's exit status
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}: {}: {}", verb, svc.name, err);
            1
        }
    }
}

/// status, is-enabled, is-active
fn status(verb: &str, root: &str, svc: &InitService) -> i32 {
    let mut enabled = false;
    let mut running = false;
    if verb == "status" || verb == "is-enabled" {
        match svc.is_enabled(root) {
            Ok(value) => enabled = value,
            Err(err) => {
                eprintln!("{}: {}: {}", verb, svc.name, err);
                return 1;
            }
        }
    }
    if verb == "status" || verb == "is-active" {
        // This trusts the init script to exit non-zero when the service
        // is not running, which is not universally true; the scripts we
        // install ourselves do.
        match svc.invoke("status", true) {
            Ok(code) => running = code == 0,
            Err(err) => {
                eprintln!("status: {}: {}", svc.name, err);
                return 1;
            }
        }
    }
    let loud = noise::level() > Noise::Quiet;
    match verb {
        "status" => {
            if loud {
                println!(
                    "{} is {} and {}",
                    svc.name,
                    if enabled {
                        Green.paint("enabled")
                    } else {
                        Red.paint("disabled")
                    },
                    if running {
                        Green.paint("active")
                    } else {
                        Red.paint("inactive")
                    }
                );
            }
            // LSB-ish: there is no concept of enablement, so report
            // "status unknown" for a service that is neither enabled
            // nor running
            if running {
                0
            } else if enabled {
                3
            } else {
                4
            }
        }
        "is-enabled" => {
            if loud {
                println!("{}", if enabled { "enabled" } else { "disabled" });
            }
            if enabled {
                0
            } else {
                1
            }
        }
        _ => {
            if loud {
                println!("{}", if running { "active" } else { "inactive" });
            }
            if running {
                0
            } else {
                3
            }
        }
    }
}

fn enable_disable(verb: &str, root: &str, svc: &InitService) -> i32 {
    let res = if verb == "enable" {
        svc.enable(root)
    } else {
        svc.disable(root)
    };
    match res {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}: {}: {}", verb, svc.name, err);
            1
        }
    }
}

/// reload and its or-restart variants
fn reload(verb: &str, svc: &InitService) -> i32 {
    let mut verb = verb;
    if verb == "reload-or-try-restart" {
        verb = "try-reload-or-restart";
    }
    if verb == "try-reload-or-restart" {
        match svc.invoke("status", true) {
            // not running, nothing to do
            Ok(code) if code != 0 => return 0,
            Ok(_) => verb = "reload-or-restart",
            Err(err) => {
                eprintln!("{}: {}: {}", verb, svc.name, err);
                return 1;
            }
        }
    }
    let code = match svc.invoke("reload", true) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("reload: {}: {}", svc.name, err);
            return 1;
        }
    };
    if code == 0 || verb == "reload" {
        return code;
    }
    // reload-or-restart: the reload did not take, restart instead
    match svc.invoke("restart", true) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("restart: {}: {}", svc.name, err);
            1
        }
    }
}

fn show(svc: &InitService) -> i32 {
    match svc.invoke("show", false) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("show: {}: {}", svc.name, err);
            1
        }
    }
}

fn run() -> i32 {
    let matches = cli().get_matches();
    let level = if matches.get_flag("debug") {
        Noise::Debug
    } else if matches.get_flag("verbose") {
        Noise::Verbose
    } else if matches.get_flag("quiet") {
        Noise::Quiet
    } else {
        Noise::Normal
    };
    noise::init(level);
    if let Err(err) = noise::override_from_env() {
        error!("{}", err);
        return exitcode::EX_USAGE;
    }
    let root = matches
        .get_one::<String>("root")
        .map(|root| root.trim_end_matches('/').to_string())
        .unwrap_or_default();

    let (verb, sub) = match matches.subcommand() {
        Some(pair) => pair,
        None => return exitcode::EX_USAGE,
    };
    if verb == "daemon-reload" {
        // nothing to reload; kept for compatibility
        return 0;
    }

    // assume success and fail if any service fails, except the queries,
    // which assume failure and succeed if any service succeeds
    let query = verb == "is-enabled" || verb == "is-active";
    let mut ret = if query { 3 } else { 0 };
    for name in services(sub) {
        let svc = match find(&root, &name) {
            Some(svc) => svc,
            None => return 1,
        };
        let res = match verb {
            "enable" | "disable" => enable_disable(verb, &root, &svc),
            "status" | "is-enabled" | "is-active" => status(verb, &root, &svc),
            "start" | "stop" | "restart" | "try-restart" => start_stop(verb, &svc),
            "reload" | "reload-or-restart" | "reload-or-try-restart"
            | "try-reload-or-restart" => reload(verb, &svc),
            "show" => show(&svc),
            _ => exitcode::EX_USAGE,
        };
        if query {
            if res == 0 {
                ret = 0;
            }
        } else if res != 0 {
            ret = res;
        }
    }
    ret
}

fn main() {
    process::exit(run());
}
