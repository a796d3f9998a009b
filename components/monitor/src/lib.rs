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

//! The service monitor: a long-lived process that owns a service
//! instance.  It daemonizes, launches the service's command, mirrors
//! kernel process-lifecycle events into an in-memory process table,
//! drives the service through its lifecycle, enforces stop policy across
//! the service's process tree, and answers control requests on an
//! abstract stream socket.

#[macro_use]
extern crate log;

pub mod connector;
pub mod control;
pub mod error;
pub mod kill;
pub mod limiter;
pub mod monitor;
pub mod procwatch;
pub mod service;
pub mod spawn;

pub use crate::error::{Error, Result};
pub use crate::monitor::run;
pub use crate::service::{CommandSpec, KillMode, RestartPolicy, ServiceConfig, StartupType};
