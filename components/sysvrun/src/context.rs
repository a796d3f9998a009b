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

//! The launcher context: everything the verbs need that would otherwise
//! be process-global state.  Constructed once in main() and passed
//! through the call chains.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use sysvrun_core::env::Environment;
use sysvrun_core::noise;

/// The default PATH for services, matching _PATH_STDPATH.
pub const STDPATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Environment variables passed on to services when present.
const PRESERVE_ENV: &[&str] = &[noise::NOISE_ENVVAR, noise::LOG_FILE_ENVVAR];

#[derive(Debug)]
pub struct Context {
    /// Prefix prepended to every well-known path, for testing and
    /// image-building.  Usually empty.
    pub root: String,
    /// Our own executable, its base name, and its directory.
    pub self_path: PathBuf,
    pub self_base: String,
    pub self_dir: PathBuf,
    pub foreground: bool,
    /// Output path for the convert and show verbs.
    pub output: Option<PathBuf>,
    /// The environment template commands start from: hardcoded defaults,
    /// preserved variables, and -D definitions.
    pub env: Environment,
    /// Variable names to remove from every command's environment (-U).
    pub unset: Vec<String>,
}

impl Context {
    pub fn new(arg0: &str, root: &str) -> Context {
        let mut root = root.to_string();
        while root.ends_with('/') {
            root.pop();
        }
        let self_path = fs::read_link("/proc/self/exe")
            .ok()
            .and_then(|path| fs::canonicalize(path).ok())
            .unwrap_or_else(|| PathBuf::from(arg0));
        // paths inside the root are reported relative to it
        let self_path = if !root.is_empty() {
            match self_path.strip_prefix(&root) {
                Ok(stripped) => Path::new("/").join(stripped),
                Err(_) => self_path,
            }
        } else {
            self_path
        };
        let self_base = self_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sysvrun".to_string());
        let self_dir = self_path
            .parent()
            .map(|dir| dir.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/"));
        let mut template = Environment::new();
        template.set("PATH", STDPATH, false);
        for key in PRESERVE_ENV {
            if let Ok(value) = env::var(key) {
                template.set(key, &value, false);
            }
        }
        Context {
            root,
            self_path,
            self_base,
            self_dir,
            foreground: false,
            output: None,
            env: template,
            unset: Vec::new(),
        }
    }

    /// Prefixes an absolute path with the root directory.
    pub fn rooted(&self, path: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.root, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_has_default_path() {
        let ctx = Context::new("/usr/sbin/sysvrun", "");
        assert_eq!(ctx.env.get("PATH"), Some(STDPATH));
        assert_eq!(ctx.rooted("/etc/init.d"), PathBuf::from("/etc/init.d"));
    }

    #[test]
    fn root_prefix_is_applied() {
        let ctx = Context::new("/usr/sbin/sysvrun", "/tmp/image/");
        assert_eq!(ctx.root, "/tmp/image");
        assert_eq!(
            ctx.rooted("/etc/init.d"),
            PathBuf::from("/tmp/image/etc/init.d")
        );
    }
}
