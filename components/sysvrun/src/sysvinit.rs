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

//! Reading init scripts.  An installed init script is a thin shim: an
//! LSB comment block, a single exec of the launcher, and the unit file
//! embedded in a heredoc that the shell never reads.

use std::path::PathBuf;

use crate::context::Context;
use crate::error::{Error, Result};

pub const LSB_BEGIN_INIT_INFO: &str = "### BEGIN INIT INFO";
pub const LSB_END_INIT_INFO: &str = "### END INIT INFO";
pub const LSB_PROVIDES: &str = "# Provides:";

pub const BEGIN_EMBED: &str = ":<<SYSVRUN";
pub const END_EMBED: &str = "SYSVRUN";

/// Search path for init scripts.
pub static SCRIPT_PATH: &[&str] = &["/etc/init.d", "."];

/// Extracts the embedded unit file from an init script, after checking
/// that the script's LSB block provides the expected facility.  This
/// will not work for scripts providing multiple facilities, but ours
/// never do.
pub fn extract_embedded_unit(name: &str, text: &str) -> Result<String> {
    let mut lines = text.lines();
    if !lines.any(|line| line == LSB_BEGIN_INIT_INFO) {
        debug!("failed to find start of LSB info block");
        return Err(Error::NotAnInitScript(name.to_string()));
    }
    let provides = lines
        .find(|line| line.starts_with(LSB_PROVIDES))
        .ok_or_else(|| {
            debug!("failed to find Provides line");
            Error::NotAnInitScript(name.to_string())
        })?;
    let facility = provides[LSB_PROVIDES.len()..].split_whitespace().next();
    if facility != Some(name) {
        debug!("service name mismatch");
        return Err(Error::ServiceNotFound(name.to_string()));
    }
    if !lines.any(|line| line == LSB_END_INIT_INFO) {
        debug!("failed to find end of LSB info block");
        return Err(Error::NotAnInitScript(name.to_string()));
    }
    if !lines.any(|line| line == BEGIN_EMBED) {
        debug!("failed to find start of embedded unit file");
        return Err(Error::NotAnInitScript(name.to_string()));
    }
    let mut embedded = String::new();
    for line in &mut lines {
        if line == END_EMBED {
            return Ok(embedded);
        }
        embedded.push_str(line);
        embedded.push('\n');
    }
    debug!("failed to find end of embedded unit file");
    Err(Error::NotAnInitScript(name.to_string()))
}

/// Locates a service's init script by name.
pub fn find_script(ctx: &Context, name: &str) -> Option<PathBuf> {
    for dir in SCRIPT_PATH {
        let path = ctx.rooted(&format!("{}/{}", dir, name));
        trace!("looking for {} in {}", name, path.display());
        if path.is_file() {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "\
#!/bin/sh

### BEGIN INIT INFO
# Provides:             mock
# Default-Start:        2 3 4 5
### END INIT INFO

exec /usr/sbin/sysvrun -u \"$0\" mock \"$@\"

:<<SYSVRUN
[Service]
ExecStart=/bin/true
SYSVRUN
";

    #[test]
    fn extracts_the_embedded_unit() {
        let unit = extract_embedded_unit("mock", SCRIPT).unwrap();
        assert_eq!(unit, "[Service]\nExecStart=/bin/true\n");
    }

    #[test]
    fn rejects_name_mismatch() {
        match extract_embedded_unit("other", SCRIPT) {
            Err(Error::ServiceNotFound(_)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn rejects_scripts_without_markers() {
        assert!(extract_embedded_unit("mock", "#!/bin/sh\ntrue\n").is_err());
        let truncated = SCRIPT.replace("SYSVRUN\n", "");
        assert!(extract_embedded_unit("mock", &truncated).is_err());
    }
}
