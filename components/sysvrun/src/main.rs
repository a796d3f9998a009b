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

use std::env;
use std::path::PathBuf;
use std::process;

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::error;

use sysvrun::{Context, Service};
use sysvrun_core::exitcode;
use sysvrun_core::noise::{self, Noise};

fn cli() -> Command {
    Command::new("sysvrun")
        .about("Runs a systemd-style service unit under SysV init")
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Log debugging detail"),
        )
        .arg(
            Arg::new("define")
                .short('D')
                .long("define")
                .value_name("KEY=VALUE")
                .action(ArgAction::Append)
                .help("Define an environment variable for the service"),
        )
        .arg(
            Arg::new("foreground")
                .short('f')
                .long("foreground")
                .action(ArgAction::SetTrue)
                .help("Run the monitor in the foreground"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .help("Output file for the convert and show verbs"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Log warnings and errors only"),
        )
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .value_name("DIR")
                .help("Prefix well-known paths with this directory"),
        )
        .arg(
            Arg::new("undefine")
                .short('U')
                .long("undefine")
                .value_name("KEY")
                .action(ArgAction::Append)
                .help("Remove a variable from the service environment"),
        )
        .arg(
            Arg::new("unit-file")
                .short('u')
                .long("unit-file")
                .value_name("PATH")
                .help("Load the service from this file instead of searching"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log additional detail"),
        )
        .arg(Arg::new("service").required(true).value_name("SERVICE"))
        .arg(Arg::new("verb").required(true).value_name("VERB"))
}

fn noise_from_flags(matches: &ArgMatches) -> Noise {
    if matches.get_flag("debug") {
        Noise::Debug
    } else if matches.get_flag("verbose") {
        Noise::Verbose
    } else if matches.get_flag("quiet") {
        Noise::Quiet
    } else {
        Noise::Normal
    }
}

fn dispatch(svc: &Service, ctx: &Context, verb: &str) -> sysvrun::Result<i32> {
    match verb {
        "convert" => svc.convert(ctx),
        "show" => svc.show(ctx),
        "start" => svc.start(ctx),
        "stop" => svc.stop(ctx),
        "reload" => svc.reload(ctx),
        "restart" => svc.restart(ctx),
        "status" => svc.status(ctx),
        "control" => svc.control(ctx),
        verb => {
            eprintln!("unknown command: {}", verb);
            Ok(exitcode::EX_USAGE)
        }
    }
}

fn run() -> i32 {
    let arg0 = env::args().next().unwrap_or_else(|| "sysvrun".to_string());
    let matches = cli().get_matches();
    noise::init(noise_from_flags(&matches));
    if let Err(err) = noise::override_from_env() {
        error!("{}", err);
        return exitcode::EX_USAGE;
    }
    let root = matches
        .get_one::<String>("root")
        .map(|root| root.as_str())
        .unwrap_or("");
    let mut ctx = Context::new(&arg0, root);
    ctx.foreground = matches.get_flag("foreground");
    ctx.output = matches.get_one::<String>("output").map(PathBuf::from);
    if let Some(defines) = matches.get_many::<String>("define") {
        for define in defines {
            ctx.env.put(define, true);
        }
    }
    if let Some(undefines) = matches.get_many::<String>("undefine") {
        ctx.unset.extend(undefines.cloned());
    }

    let service = matches
        .get_one::<String>("service")
        .map(|s| s.as_str())
        .unwrap_or_default();
    let verb = matches
        .get_one::<String>("verb")
        .map(|s| s.as_str())
        .unwrap_or_default();
    if ctx.output.is_some() && verb != "convert" && verb != "show" {
        eprintln!("--output only applies to convert and show");
        return exitcode::EX_USAGE;
    }

    let svc = match matches.get_one::<String>("unit-file") {
        Some(path) => Service::from_file(service, &PathBuf::from(path)),
        None => Service::find(&ctx, service),
    };
    let svc = match svc {
        Ok(svc) => svc,
        Err(err) => {
            error!("{}", err);
            return 1;
        }
    };

    match dispatch(&svc, &ctx, verb) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            1
        }
    }
}

fn main() {
    process::exit(run());
}
