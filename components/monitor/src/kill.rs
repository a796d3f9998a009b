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

//! The kill orchestrator: two-pass signal delivery across the service's
//! process set, with the target set a function of the kill mode and the
//! pass.

use std::time::{Duration, Instant};

use sysvrun_core::os::process::{self, Pid, Signal};

use crate::procwatch::ProcessTable;
use crate::service::KillMode;

/// Progress of an ongoing stop order.
#[derive(Debug, Default)]
pub struct KillOrder {
    pub pass: u32,
    pub sent: Option<Instant>,
}

impl KillOrder {
    pub fn new() -> KillOrder {
        KillOrder::default()
    }

    /// Whether the next pass is due: either nothing has been sent yet, or
    /// the stop timeout has elapsed since the last pass.
    pub fn due(&self, now: Instant, stop_timeout: Duration) -> bool {
        match self.sent {
            Some(sent) => now.duration_since(sent) > stop_timeout,
            None => true,
        }
    }
}

/// The signal and target set for a given kill mode and pass, or None if
/// there is nothing (left) to send.  `KillMode::None` never signals; a
/// pass beyond the second means it is time to give up.
pub fn select(mode: KillMode, pass: u32) -> Option<(Signal, bool)> {
    match (mode, pass) {
        (KillMode::None, _) => None,
        (KillMode::ControlGroup, 1) => Some((Signal::TERM, true)),
        (KillMode::ControlGroup, 2) => Some((Signal::KILL, true)),
        (KillMode::Mixed, 1) => Some((Signal::TERM, false)),
        (KillMode::Mixed, 2) => Some((Signal::KILL, true)),
        (KillMode::Process, 1) => Some((Signal::TERM, false)),
        (KillMode::Process, 2) => Some((Signal::KILL, false)),
        _ => None,
    }
}

/// Delivers a signal to the selected processes: every tracked descendant
/// when `all`, otherwise only the main process.  Each signal is chased
/// with SIGCONT so that stopped processes wake up and observe it.
pub fn dispatch(table: &ProcessTable, main_pid: Pid, signal: Signal, all: bool) -> usize {
    let mut sent = 0;
    table.for_each(|proc_| {
        if all || proc_.pid == main_pid {
            trace!("sending {} to {}", signal, proc_.pid);
            let _ = process::signal_and_cont(proc_.pid, signal);
            sent += 1;
        } else {
            trace!("skipping {}", proc_.pid);
        }
    });
    sent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_group_targets_everything_both_passes() {
        assert_eq!(
            select(KillMode::ControlGroup, 1),
            Some((Signal::TERM, true))
        );
        assert_eq!(
            select(KillMode::ControlGroup, 2),
            Some((Signal::KILL, true))
        );
        assert_eq!(select(KillMode::ControlGroup, 3), None);
    }

    #[test]
    fn mixed_escalates_to_everything() {
        assert_eq!(select(KillMode::Mixed, 1), Some((Signal::TERM, false)));
        assert_eq!(select(KillMode::Mixed, 2), Some((Signal::KILL, true)));
        assert_eq!(select(KillMode::Mixed, 3), None);
    }

    #[test]
    fn process_only_touches_main() {
        assert_eq!(select(KillMode::Process, 1), Some((Signal::TERM, false)));
        assert_eq!(select(KillMode::Process, 2), Some((Signal::KILL, false)));
        assert_eq!(select(KillMode::Process, 3), None);
    }

    #[test]
    fn none_never_signals() {
        assert_eq!(select(KillMode::None, 1), None);
        assert_eq!(select(KillMode::None, 2), None);
    }

    #[test]
    fn order_due_tracking() {
        let order = KillOrder::new();
        let now = Instant::now();
        assert!(order.due(now, Duration::from_secs(1)));
        let order = KillOrder {
            pass: 1,
            sent: Some(now),
        };
        assert!(!order.due(now, Duration::from_secs(1)));
        assert!(order.due(now + Duration::from_secs(2), Duration::from_secs(1)));
    }
}
