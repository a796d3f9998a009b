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

//! The in-memory unit representation and the unit-file parser.
//!
//! The syntax, briefly:
//!
//! * Lines beginning with `#` or `;` are comments and are discarded.
//! * A line ending in `\` continues on the next non-comment line; the
//!   backslash is replaced with a single space.  Comment lines may appear
//!   inside a continuation.
//! * Blank lines are discarded.
//! * A section header is a section name surrounded by `[` and `]`.  Any
//!   printable character except the brackets is allowed in the name.
//! * A key-value pair is a key (`A-Za-z0-9-`), an `=` with any amount of
//!   surrounding blanks, and a value running to the end of the line.
//! * Repeated assignments to the same key append, separated by a single
//!   space; assigning an empty value erases the key.
//! * Whitespace in values is normalized: tabs become spaces, runs of
//!   spaces collapse into one, and trailing space is removed.
//! * Quoting and substitution are not the parser's business; quotes, `$`,
//!   and `%` pass through untouched.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::words;

const MAX_SECTION_LEN: usize = 255;
const MAX_KEY_LEN: usize = 255;
const MAX_VALUE_LEN: usize = 1023;

#[derive(Clone, Debug, Default)]
struct Section {
    pairs: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct Unit {
    name: String,
    sections: BTreeMap<String, Section>,
}

impl Unit {
    pub fn new(name: &str) -> Unit {
        Unit {
            name: name.to_string(),
            sections: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .pairs
            .get(key)
            .map(|value| value.as_str())
    }

    /// Interprets the value of a key as a boolean.  Returns None if the
    /// key is absent or the value is not a recognizable boolean.
    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        let value = self.get(section, key)?;
        match words::parse_bool(value) {
            Some(b) => Some(b),
            None => {
                warn!("value '{}' for {}.{} is not a boolean", value, section, key);
                None
            }
        }
    }

    /// Sets a key, replacing any prior value.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_insert_with(Section::default)
            .pairs
            .insert(key.to_string(), value.to_string());
    }

    /// Appends to a key with an intervening space, or sets it if absent.
    pub fn append(&mut self, section: &str, key: &str, value: &str) {
        let pairs = &mut self
            .sections
            .entry(section.to_string())
            .or_insert_with(Section::default)
            .pairs;
        match pairs.get_mut(key) {
            Some(prior) => {
                prior.push(' ');
                prior.push_str(value);
            }
            None => {
                pairs.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Erases a key.
    pub fn erase(&mut self, section: &str, key: &str) {
        if let Some(s) = self.sections.get_mut(section) {
            s.pairs.remove(key);
        }
    }

    /// Parses a unit file.
    pub fn parse(name: &str, text: &str) -> Result<Unit> {
        let mut unit = Unit::new(name);
        let mut section: Option<String> = None;
        let lines: Vec<&str> = text.split('\n').collect();
        let mut lno = 0;
        while lno < lines.len() {
            let line = lines[lno];
            lno += 1;
            let errline = lno;
            let trimmed_end = line.trim_end_matches('\r');
            if trimmed_end.is_empty() {
                continue;
            }
            if trimmed_end.starts_with('#') || trimmed_end.starts_with(';') {
                continue;
            }
            if trimmed_end.starts_with('[') {
                section = Some(parse_section_header(trimmed_end, errline)?);
                continue;
            }
            let (key, first) = parse_key(trimmed_end, errline)?;
            // assemble the value across continuations
            let mut value = String::new();
            let mut cur = first;
            loop {
                if let Some(stripped) = cur.strip_suffix('\\') {
                    value.push_str(stripped);
                    value.push(' ');
                    // next non-comment line, if any
                    loop {
                        if lno >= lines.len() {
                            cur = "";
                            break;
                        }
                        let next = lines[lno].trim_end_matches('\r');
                        lno += 1;
                        if next.starts_with('#') || next.starts_with(';') {
                            continue;
                        }
                        cur = next;
                        break;
                    }
                    if cur.is_empty() {
                        break;
                    }
                } else {
                    value.push_str(cur);
                    break;
                }
            }
            let value = normalize_whitespace(&value);
            if value.len() > MAX_VALUE_LEN {
                return Err(Error::UnitSyntax {
                    line: errline,
                    msg: "value too long".to_string(),
                });
            }
            let section = match section {
                Some(ref s) => s,
                None => {
                    return Err(Error::UnitSyntax {
                        line: errline,
                        msg: "key-value pair before first section".to_string(),
                    });
                }
            };
            if value.is_empty() {
                unit.erase(section, &key);
            } else {
                unit.append(section, &key, &value);
            }
        }
        Ok(unit)
    }
}

fn is_section_name(ch: char) -> bool {
    ch.is_ascii_graphic() && ch != '[' && ch != ']' || ch == ' '
}

fn is_key(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-'
}

fn parse_section_header(line: &str, lno: usize) -> Result<String> {
    let body = &line[1..];
    let close = body.find(']').ok_or_else(|| Error::UnitSyntax {
        line: lno,
        msg: "expected ']'".to_string(),
    })?;
    let name = &body[..close];
    if name.is_empty() {
        return Err(Error::UnitSyntax {
            line: lno,
            msg: "expected section name".to_string(),
        });
    }
    if name.len() > MAX_SECTION_LEN {
        return Err(Error::UnitSyntax {
            line: lno,
            msg: "section name too long".to_string(),
        });
    }
    if !name.chars().all(is_section_name) {
        return Err(Error::UnitSyntax {
            line: lno,
            msg: "invalid character in section name".to_string(),
        });
    }
    if !body[close + 1..].is_empty() {
        return Err(Error::UnitSyntax {
            line: lno,
            msg: "expected end of line".to_string(),
        });
    }
    Ok(name.to_string())
}

fn parse_key<'a>(line: &'a str, lno: usize) -> Result<(String, &'a str)> {
    let keylen = line
        .find(|ch: char| !is_key(ch))
        .unwrap_or_else(|| line.len());
    if keylen == 0 {
        return Err(Error::UnitSyntax {
            line: lno,
            msg: "expected key".to_string(),
        });
    }
    if keylen > MAX_KEY_LEN {
        return Err(Error::UnitSyntax {
            line: lno,
            msg: "key too long".to_string(),
        });
    }
    let rest = line[keylen..].trim_start_matches(|ch| ch == ' ' || ch == '\t');
    let rest = match rest.strip_prefix('=') {
        Some(rest) => rest,
        None => {
            return Err(Error::UnitSyntax {
                line: lno,
                msg: "expected '='".to_string(),
            });
        }
    };
    let value = rest.trim_start_matches(|ch| ch == ' ' || ch == '\t');
    Ok((line[..keylen].to_string(), value))
}

fn normalize_whitespace(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        let ch = if ch == '\t' { ' ' } else { ch };
        if ch == ' ' && out.ends_with(' ') {
            continue;
        }
        out.push(ch);
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, section) in &self.sections {
            writeln!(f, "[{}]", name)?;
            for (key, value) in &section.pairs {
                writeln!(f, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[Unit]
Description=A sample service
After=network.target

[Service]
Type=simple
ExecStart=/usr/sbin/sampled --foreground
Restart=on-failure
";

    #[test]
    fn basic_parse() {
        let unit = Unit::parse("sample", SAMPLE).unwrap();
        assert_eq!(unit.get("Unit", "Description"), Some("A sample service"));
        assert_eq!(unit.get("Service", "Type"), Some("simple"));
        assert_eq!(
            unit.get("Service", "ExecStart"),
            Some("/usr/sbin/sampled --foreground")
        );
        assert_eq!(unit.get("Service", "Nonexistent"), None);
        assert_eq!(unit.get("Install", "WantedBy"), None);
    }

    #[test]
    fn comments_and_blank_lines() {
        let text = "# leading comment\n; another\n\n[Service]\n# inner\nType=oneshot\n";
        let unit = Unit::parse("x", text).unwrap();
        assert_eq!(unit.get("Service", "Type"), Some("oneshot"));
    }

    #[test]
    fn equals_with_blanks() {
        let unit = Unit::parse("x", "[Service]\nType  = \t forking\n").unwrap();
        assert_eq!(unit.get("Service", "Type"), Some("forking"));
    }

    #[test]
    fn repeated_keys_append() {
        let text = "[Service]\nEnvironment=A=1\nEnvironment=B=2\n";
        let unit = Unit::parse("x", text).unwrap();
        assert_eq!(unit.get("Service", "Environment"), Some("A=1 B=2"));
    }

    #[test]
    fn empty_value_erases() {
        let text = "[Service]\nExecStart=/bin/a\nExecStart=\nExecStart=/bin/b\n";
        let unit = Unit::parse("x", text).unwrap();
        assert_eq!(unit.get("Service", "ExecStart"), Some("/bin/b"));
    }

    #[test]
    fn line_continuation() {
        let text = "[Service]\nExecStart=/bin/daemon \\\n  --flag \\\n  --other\n";
        let unit = Unit::parse("x", text).unwrap();
        assert_eq!(
            unit.get("Service", "ExecStart"),
            Some("/bin/daemon --flag --other")
        );
    }

    #[test]
    fn comment_inside_continuation() {
        let text = "[Service]\nExecStart=/bin/daemon \\\n# not part of the value\n  --flag\n";
        let unit = Unit::parse("x", text).unwrap();
        assert_eq!(unit.get("Service", "ExecStart"), Some("/bin/daemon --flag"));
    }

    #[test]
    fn whitespace_normalization() {
        let unit = Unit::parse("x", "[Service]\nExecStart=/bin/a\t\t--b   --c  \n").unwrap();
        assert_eq!(unit.get("Service", "ExecStart"), Some("/bin/a --b --c"));
    }

    #[test]
    fn pair_before_section() {
        assert!(Unit::parse("x", "Type=simple\n").is_err());
    }

    #[test]
    fn bad_section_header() {
        assert!(Unit::parse("x", "[Service\nType=simple\n").is_err());
        assert!(Unit::parse("x", "[]\n").is_err());
        assert!(Unit::parse("x", "[Service] trailing\n").is_err());
    }

    #[test]
    fn bad_key() {
        assert!(Unit::parse("x", "[Service]\n=value\n").is_err());
        assert!(Unit::parse("x", "[Service]\nKey value\n").is_err());
    }

    #[test]
    fn booleans() {
        let text = "[Service]\nRemainAfterExit=yes\nOther=frobnicate\n";
        let unit = Unit::parse("x", text).unwrap();
        assert_eq!(unit.get_bool("Service", "RemainAfterExit"), Some(true));
        assert_eq!(unit.get_bool("Service", "Other"), None);
        assert_eq!(unit.get_bool("Service", "Missing"), None);
    }

    #[test]
    fn render_round_trip() {
        let unit = Unit::parse("sample", SAMPLE).unwrap();
        let rendered = unit.to_string();
        let reparsed = Unit::parse("sample", &rendered).unwrap();
        assert_eq!(
            reparsed.get("Service", "ExecStart"),
            unit.get("Service", "ExecStart")
        );
        assert_eq!(reparsed.get("Unit", "After"), unit.get("Unit", "After"));
    }
}
