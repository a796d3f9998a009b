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

//! Parsing and formatting of time spans as they appear in unit files,
//! e.g. `90s`, `5 min 30s`, `100ms`, or `infinity`.  All values are in
//! microseconds.

use crate::error::{Error, Result};

pub type Usec = u64;

pub const USEC: Usec = 1;
pub const MSEC: Usec = 1_000 * USEC;
pub const SEC: Usec = 1_000 * MSEC;
pub const MIN: Usec = 60 * SEC;
pub const HOUR: Usec = 60 * MIN;
pub const DAY: Usec = 24 * HOUR;
pub const WEEK: Usec = 7 * DAY;
pub const MONTH: Usec = 3_044 * DAY / 100;
pub const YEAR: Usec = 36_525 * DAY / 100;

pub const INFINITY: Usec = Usec::max_value();

const INFINITY_STR: &str = "infinity";

// Long forms first so that parsing can use exact matches; formatting picks
// the short form listed for each magnitude.
static UNITS: &[(&str, Usec)] = &[
    ("usec", USEC),
    ("us", USEC),
    ("msec", MSEC),
    ("ms", MSEC),
    ("seconds", SEC),
    ("second", SEC),
    ("sec", SEC),
    ("s", SEC),
    ("minutes", MIN),
    ("minute", MIN),
    ("min", MIN),
    ("m", MIN),
    ("hours", HOUR),
    ("hour", HOUR),
    ("hr", HOUR),
    ("h", HOUR),
    ("days", DAY),
    ("day", DAY),
    ("d", DAY),
    ("weeks", WEEK),
    ("week", WEEK),
    ("w", WEEK),
    ("months", MONTH),
    ("month", MONTH),
    ("M", MONTH),
    ("years", YEAR),
    ("year", YEAR),
    ("y", YEAR),
];

fn unit_value(name: &str) -> Option<Usec> {
    UNITS
        .iter()
        .find(|&&(unit, _)| unit == name)
        .map(|&(_, value)| value)
}

/// Parses a time span and returns its value in microseconds.  A bare
/// number is interpreted as seconds; otherwise the span is a sequence of
/// magnitude/unit pairs, optionally separated by blanks.
pub fn from_str(input: &str) -> Result<Usec> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::InvalidTimespan(input.to_string()));
    }
    if s == INFINITY_STR {
        return Ok(INFINITY);
    }
    // special case: unitless == seconds
    if let Ok(num) = s.parse::<Usec>() {
        return num
            .checked_mul(SEC)
            .filter(|&v| v < INFINITY)
            .ok_or_else(|| Error::InvalidTimespan(input.to_string()));
    }
    let mut total: Usec = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or_else(|| rest.len());
        if digits == 0 {
            return Err(Error::InvalidTimespan(input.to_string()));
        }
        let num = rest[..digits]
            .parse::<Usec>()
            .map_err(|_| Error::InvalidTimespan(input.to_string()))?;
        rest = rest[digits..].trim_start();
        let alpha = rest
            .find(|ch: char| !ch.is_ascii_alphabetic())
            .unwrap_or_else(|| rest.len());
        if alpha == 0 {
            return Err(Error::InvalidTimespan(input.to_string()));
        }
        let value = unit_value(&rest[..alpha])
            .ok_or_else(|| Error::InvalidTimespan(input.to_string()))?;
        total = num
            .checked_mul(value)
            .and_then(|v| total.checked_add(v))
            .filter(|&v| v < INFINITY)
            .ok_or_else(|| Error::InvalidTimespan(input.to_string()))?;
        rest = rest[alpha..].trim_start();
    }
    Ok(total)
}

/// Formats a microsecond value as a compound time span, largest unit
/// first, e.g. `1m30s`.
pub fn to_string(ts: Usec) -> String {
    static SHORT: &[(&str, Usec)] = &[
        ("y", YEAR),
        ("M", MONTH),
        ("w", WEEK),
        ("d", DAY),
        ("h", HOUR),
        ("m", MIN),
        ("s", SEC),
        ("ms", MSEC),
        ("us", USEC),
    ];
    if ts == 0 {
        return "0".to_string();
    }
    if ts == INFINITY {
        return INFINITY_STR.to_string();
    }
    let mut out = String::new();
    let mut rem = ts;
    for &(name, value) in SHORT {
        if rem >= value {
            out.push_str(&format!("{}{}", rem / value, name));
            rem %= value;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_invalid() {
        assert!(from_str("").is_err());
        assert!(from_str("   ").is_err());
    }

    #[test]
    fn infinity() {
        assert_eq!(from_str("infinity").unwrap(), INFINITY);
        assert_eq!(to_string(INFINITY), "infinity");
    }

    #[test]
    fn unitless_is_seconds() {
        assert_eq!(from_str("90").unwrap(), 90 * SEC);
        assert_eq!(from_str(" 5 ").unwrap(), 5 * SEC);
    }

    #[test]
    fn single_unit() {
        assert_eq!(from_str("100ms").unwrap(), 100 * MSEC);
        assert_eq!(from_str("10 s").unwrap(), 10 * SEC);
        assert_eq!(from_str("2 weeks").unwrap(), 2 * WEEK);
    }

    #[test]
    fn compound() {
        assert_eq!(from_str("1m30s").unwrap(), MIN + 30 * SEC);
        assert_eq!(from_str("1 h 30 min 10 sec").unwrap(), HOUR + 30 * MIN + 10 * SEC);
    }

    #[test]
    fn months_are_case_sensitive() {
        assert_eq!(from_str("1M").unwrap(), MONTH);
        assert_eq!(from_str("1m").unwrap(), MIN);
    }

    #[test]
    fn syntax_errors() {
        assert!(from_str("ten seconds").is_err());
        assert!(from_str("10 parsecs").is_err());
        assert!(from_str("10s 5").is_err());
    }

    #[test]
    fn overflow() {
        assert!(from_str("99999999999999999999s").is_err());
        assert!(from_str("584554y").is_err());
    }

    #[test]
    fn formatting() {
        assert_eq!(to_string(0), "0");
        assert_eq!(to_string(90 * SEC), "1m30s");
        assert_eq!(to_string(100 * MSEC), "100ms");
        assert_eq!(to_string(DAY + 1), "1d1us");
    }

    #[test]
    fn round_trip() {
        for &ts in &[1, 999, MSEC, SEC, 90 * SEC, HOUR + MIN, 3 * DAY] {
            assert_eq!(from_str(&to_string(ts)).unwrap(), ts);
        }
    }
}
