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

//! An environment template: a set of variables assembled from defaults,
//! the unit file, and command-line definitions, and finally turned into
//! the `KEY=VALUE` vector handed to the service child.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, Default)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment::default()
    }

    /// Adds a variable, replacing any prior value if and only if
    /// `overwrite` is true.  Returns true if the variable already existed,
    /// regardless of whether it was replaced.
    pub fn set(&mut self, name: &str, value: &str, overwrite: bool) -> bool {
        let existed = self.vars.contains_key(name);
        if !existed || overwrite {
            self.vars.insert(name.to_string(), value.to_string());
        }
        existed
    }

    /// Adds a variable given as a single `KEY=VALUE` string.  A string
    /// without an equal sign defines the variable with an empty value.
    pub fn put(&mut self, name_value: &str, overwrite: bool) -> bool {
        match name_value.find('=') {
            Some(eq) => self.set(&name_value[..eq], &name_value[eq + 1..], overwrite),
            None => self.set(name_value, "", overwrite),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|value| value.as_str())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn remove_keys<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            self.vars.remove(name);
        }
    }

    /// Merges another environment into this one.  Existing variables are
    /// replaced only if `overwrite` is true.
    pub fn merge(&mut self, other: &Environment, overwrite: bool) {
        for (name, value) in &other.vars {
            self.set(name, value, overwrite);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns the environment as a sorted vector of `KEY=VALUE` strings,
    /// suitable for handing to execve().
    pub fn to_vec(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, value) in &self.vars {
            writeln!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut env = Environment::new();
        assert!(!env.set("PATH", "/bin", false));
        assert_eq!(env.get("PATH"), Some("/bin"));
        assert!(env.set("PATH", "/sbin", false));
        assert_eq!(env.get("PATH"), Some("/bin"));
        assert!(env.set("PATH", "/sbin", true));
        assert_eq!(env.get("PATH"), Some("/sbin"));
    }

    #[test]
    fn put_splits_at_first_equals() {
        let mut env = Environment::new();
        env.put("A=b=c", true);
        assert_eq!(env.get("A"), Some("b=c"));
        env.put("EMPTY", true);
        assert_eq!(env.get("EMPTY"), Some(""));
    }

    #[test]
    fn remove_keys() {
        let mut env = Environment::new();
        env.put("A=1", true);
        env.put("B=2", true);
        env.put("C=3", true);
        env.remove_keys(vec!["A", "C", "D"]);
        assert_eq!(env.get("A"), None);
        assert_eq!(env.get("B"), Some("2"));
        assert_eq!(env.get("C"), None);
    }

    #[test]
    fn merge_respects_overwrite() {
        let mut base = Environment::new();
        base.put("A=1", true);
        let mut other = Environment::new();
        other.put("A=2", true);
        other.put("B=2", true);
        let mut env = base.clone();
        env.merge(&other, false);
        assert_eq!(env.get("A"), Some("1"));
        assert_eq!(env.get("B"), Some("2"));
        let mut env = base.clone();
        env.merge(&other, true);
        assert_eq!(env.get("A"), Some("2"));
    }

    #[test]
    fn vector_is_sorted() {
        let mut env = Environment::new();
        env.put("Z=26", true);
        env.put("A=1", true);
        env.put("M=13", true);
        assert_eq!(env.to_vec(), vec!["A=1", "M=13", "Z=26"]);
    }
}
