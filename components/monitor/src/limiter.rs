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

//! Start-rate limiting: a ring of the last `burst` start timestamps.  A
//! start is admitted only if the start `burst` starts ago is at least
//! `interval` in the past.

use std::time::{Duration, Instant};

pub const MAX_START_LIMIT_BURST: u32 = 100;

#[derive(Debug)]
pub struct StartLimiter {
    slots: Vec<Option<Instant>>,
    cursor: usize,
    interval: Duration,
}

impl StartLimiter {
    /// Returns None when rate limiting is disabled (burst of at most one
    /// or a zero interval).
    pub fn new(burst: u32, interval: Duration) -> Option<StartLimiter> {
        if burst <= 1 || interval == Duration::from_secs(0) {
            return None;
        }
        let burst = if burst > MAX_START_LIMIT_BURST {
            warn!("capping StartLimitBurst at {}", MAX_START_LIMIT_BURST);
            MAX_START_LIMIT_BURST
        } else {
            burst
        };
        Some(StartLimiter {
            slots: vec![None; burst as usize],
            cursor: 0,
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn burst(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Records a start without checking the limit.  Used for the very
    /// first start, which is never gated.
    pub fn record(&mut self, at: Instant) {
        self.slots[self.cursor] = Some(at);
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Checks whether a start at the given time would violate the limit.
    /// If it would not, the start is recorded and true is returned; if it
    /// would, nothing is recorded and false is returned.
    pub fn admit(&mut self, at: Instant) -> bool {
        // The slot under the cursor holds the time we started `burst`
        // starts ago, or None if we have not gotten that far yet.
        if let Some(then) = self.slots[self.cursor] {
            if at.duration_since(then) < self.interval {
                return false;
            }
        }
        self.record(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Instant {
        Instant::now()
    }

    #[test]
    fn disabled_configurations() {
        assert!(StartLimiter::new(1, Duration::from_secs(10)).is_none());
        assert!(StartLimiter::new(0, Duration::from_secs(10)).is_none());
        assert!(StartLimiter::new(5, Duration::from_secs(0)).is_none());
    }

    #[test]
    fn burst_is_capped() {
        let limiter = StartLimiter::new(1000, Duration::from_secs(10)).unwrap();
        assert_eq!(limiter.burst(), MAX_START_LIMIT_BURST);
    }

    #[test]
    fn burst_within_interval_is_rejected() {
        let t0 = base();
        let mut limiter = StartLimiter::new(3, Duration::from_secs(10)).unwrap();
        assert!(limiter.admit(t0));
        assert!(limiter.admit(t0 + Duration::from_secs(1)));
        assert!(limiter.admit(t0 + Duration::from_secs(2)));
        // the fourth start within the interval busts the limit
        assert!(!limiter.admit(t0 + Duration::from_secs(3)));
        // and a rejected start is not recorded, so waiting out the
        // interval lets us start again
        assert!(limiter.admit(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn slow_restarts_always_pass() {
        let t0 = base();
        let mut limiter = StartLimiter::new(3, Duration::from_secs(10)).unwrap();
        for i in 0..20 {
            assert!(limiter.admit(t0 + Duration::from_secs(5 * i)));
        }
    }

    #[test]
    fn window_property() {
        // In any window of length `interval`, at most `burst` starts are
        // admitted.
        let t0 = base();
        let burst = 4u32;
        let interval = Duration::from_secs(10);
        let mut limiter = StartLimiter::new(burst, interval).unwrap();
        let mut admitted: Vec<Instant> = Vec::new();
        // attempt a start every second for two minutes
        for i in 0..120 {
            let at = t0 + Duration::from_secs(i);
            if limiter.admit(at) {
                admitted.push(at);
            }
        }
        for (i, &start) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|&&other| other.duration_since(start) < interval)
                .count();
            assert!(
                in_window <= burst as usize,
                "{} starts within one interval",
                in_window
            );
        }
    }
}
