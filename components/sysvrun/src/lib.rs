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

//! The launcher: loads a service description (unit file or init script
//! with an embedded unit), builds the command to run, and either
//! daemonizes a monitor for it or talks to an already-running monitor.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub mod command;
pub mod context;
pub mod error;
pub mod service;
pub mod sysvinit;

pub use crate::context::Context;
pub use crate::error::{Error, Result};
pub use crate::service::Service;
