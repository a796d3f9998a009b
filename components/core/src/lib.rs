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

//! Shared plumbing for the sysvrun workspace: the unit-file model and
//! parser, time spans, environment templates, fork/daemonize machinery,
//! pid files, and thin wrappers over the process-related corners of libc.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod env;
pub mod error;
pub mod exitcode;
pub mod noise;
pub mod os;
pub mod pidfile;
pub mod timespan;
pub mod unit;
pub mod words;

pub use crate::error::{Error, Result};
