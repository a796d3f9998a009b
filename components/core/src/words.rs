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

//! Word splitting and boolean parsing for unit-file values.

fn unescape(ch: char) -> Option<char> {
    match ch {
        'a' => Some('\x07'),
        'b' => Some('\x08'),
        'f' => Some('\x0c'),
        'n' => Some('\n'),
        'r' => Some('\r'),
        's' => Some(' '),
        't' => Some('\t'),
        'v' => Some('\x0b'),
        '\\' => Some('\\'),
        '"' => Some('"'),
        '\'' => Some('\''),
        _ => None,
    }
}

fn is_blank(ch: char) -> bool {
    ch == ' ' || ch == '\t'
}

/// Splits a string into words following the unit-file quoting rules:
/// blanks separate words, single and double quotes group, and C-style
/// escapes are recognized.  Quotes are tolerated in the middle of a word
/// and are treated the way a shell would treat them (`a"b"c` == `abc`).
///
/// Numeric character escapes and substitutions are not supported.
pub fn split_quoted(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = input.chars().peekable();
    loop {
        while chars.peek().map_or(false, |&ch| is_blank(ch)) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut word = String::new();
        let mut quote: Option<char> = None;
        while let Some(ch) = chars.next() {
            if ch == '"' || ch == '\'' {
                match quote {
                    Some(q) if ch != q => {
                        // the other kind of quote is literal inside
                    }
                    Some(_) => {
                        if chars.peek().map_or(false, |&next| !is_blank(next)) {
                            debug!("closing quote not at end of word");
                        }
                        quote = None;
                        continue;
                    }
                    None => {
                        if !word.is_empty() {
                            debug!("opening quote not at start of word");
                        }
                        quote = Some(ch);
                        continue;
                    }
                }
            }
            let ch = if ch == '\\' {
                match chars.next() {
                    Some(esc) => match unescape(esc) {
                        Some(real) => real,
                        None => {
                            warn!("invalid escape: '\\{}'", esc);
                            esc
                        }
                    },
                    None => break,
                }
            } else {
                ch
            };
            if is_blank(ch) && quote.is_none() {
                break;
            }
            word.push(ch);
        }
        words.push(word);
    }
    words
}

/// Interprets a string as a boolean: `1`, `yes`, `true`, and `on` are
/// true; `0`, `no`, `false`, and `off` are false; anything else is
/// neither.
pub fn parse_bool(input: &str) -> Option<bool> {
    if input == "1"
        || input.eq_ignore_ascii_case("yes")
        || input.eq_ignore_ascii_case("true")
        || input.eq_ignore_ascii_case("on")
    {
        return Some(true);
    }
    if input == "0"
        || input.eq_ignore_ascii_case("no")
        || input.eq_ignore_ascii_case("false")
        || input.eq_ignore_ascii_case("off")
    {
        return Some(false);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(input: &str) -> Vec<String> {
        split_quoted(input)
    }

    #[test]
    fn simple_words() {
        assert_eq!(split("a b  c"), vec!["a", "b", "c"]);
        assert_eq!(split("  leading and trailing  "), vec!["leading", "and", "trailing"]);
        assert!(split("").is_empty());
        assert!(split("   \t ").is_empty());
    }

    #[test]
    fn quoted_words() {
        assert_eq!(split("'a b' c"), vec!["a b", "c"]);
        assert_eq!(split("\"a b\" 'c d'"), vec!["a b", "c d"]);
        assert_eq!(split("\"it's\""), vec!["it's"]);
        assert_eq!(split("a\"b\"c"), vec!["abc"]);
    }

    #[test]
    fn escapes() {
        assert_eq!(split(r"a\sb"), vec!["a b"]);
        assert_eq!(split(r"a\tb"), vec!["a\tb"]);
        assert_eq!(split(r"c:\\path"), vec![r"c:\path"]);
        assert_eq!(split(r#"\"quoted\""#), vec![r#""quoted""#]);
        // unknown escapes keep the literal character
        assert_eq!(split(r"a\zb"), vec!["azb"]);
    }

    #[test]
    fn exec_line() {
        assert_eq!(
            split("/usr/sbin/mockd -v pidfile sleep:forever"),
            vec!["/usr/sbin/mockd", "-v", "pidfile", "sleep:forever"]
        );
    }

    #[test]
    fn booleans() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }
}
