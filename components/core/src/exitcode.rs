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

//! Well-known exit codes reported by a service child that fails during
//! setup, before or at the exec boundary.  The values follow the LSB /
//! service-manager convention so that callers looking at a wait status can
//! tell a setup failure from a service failure.

/// Command line usage error (sysexits.h).
pub const EX_USAGE: i32 = 64;

pub const EXIT_CHDIR: i32 = 200;
pub const EXIT_EXEC: i32 = 203;
pub const EXIT_STDIN: i32 = 208;
pub const EXIT_STDOUT: i32 = 209;
pub const EXIT_CHROOT: i32 = 210;
pub const EXIT_GROUP: i32 = 216;
pub const EXIT_USER: i32 = 217;
pub const EXIT_SETSID: i32 = 220;
pub const EXIT_STDERR: i32 = 222;
