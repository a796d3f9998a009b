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

//! The process table: an in-memory tree of the processes we know about,
//! fed by the kernel event connector.
//!
//! Two records are always present and never removable: the reserved init
//! record (pid 1) and our own.  Every other record descends from one of
//! them.  Records whose termination has been observed but not yet
//! consumed sit in a FIFO ready queue until collected.

use std::collections::{HashMap, VecDeque};

use libc;

use sysvrun_core::os::process::{self, Pid};

use crate::connector::{Event, EventSource};
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct Process {
    pub pid: Pid,
    pub ppid: Pid,
    pub sid: Pid,
    /// Child processes, in order of creation.
    pub children: Vec<Pid>,
    /// Wait status, present once the process has exited.
    pub wstatus: Option<i32>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchEvent {
    Exec,
    SetSid,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchAction {
    Default,
    /// Stop tracking the process and its descendants.
    Drop,
}

#[derive(Debug)]
pub struct ProcessTable {
    procs: HashMap<Pid, Process>,
    ready: VecDeque<Pid>,
    self_pid: Pid,
}

impl ProcessTable {
    pub fn new(self_pid: Pid, self_sid: Pid) -> ProcessTable {
        let mut table = ProcessTable {
            procs: HashMap::new(),
            ready: VecDeque::new(),
            self_pid,
        };
        table.procs.insert(
            1,
            Process {
                pid: 1,
                ppid: 1,
                sid: 1,
                children: Vec::new(),
                wstatus: None,
            },
        );
        table.procs.insert(
            self_pid,
            Process {
                pid: self_pid,
                ppid: self_pid,
                sid: self_sid,
                children: Vec::new(),
                wstatus: None,
            },
        );
        table
    }

    /// The number of tracked processes, not counting init and ourselves.
    pub fn count(&self) -> usize {
        self.procs.len() - 2
    }

    pub fn get(&self, pid: Pid) -> Result<&Process> {
        self.procs.get(&pid).ok_or(Error::UnknownProcess(pid))
    }

    fn unparent(&mut self, pid: Pid, ppid: Pid) {
        if let Some(parent) = self.procs.get_mut(&ppid) {
            parent.children.retain(|&child| child != pid);
        }
    }

    fn reparent_children_to_init(&mut self, pid: Pid) {
        let children = match self.procs.get_mut(&pid) {
            Some(proc_) => std::mem::replace(&mut proc_.children, Vec::new()),
            None => return,
        };
        for child in &children {
            if let Some(proc_) = self.procs.get_mut(child) {
                proc_.ppid = 1;
            }
        }
        if let Some(init) = self.procs.get_mut(&1) {
            init.children.extend(children);
        }
    }

    /// Inserts a process, or applies the only two legal mutations to an
    /// existing record: re-parenting (only to init) and setting the sid
    /// (only to the process's own pid).
    pub fn insert(&mut self, pid: Pid, ppid: Pid, sid: Pid) -> Result<()> {
        if self.procs.contains_key(&pid) {
            let (cur_ppid, cur_sid) = {
                let proc_ = &self.procs[&pid];
                (proc_.ppid, proc_.sid)
            };
            if ppid != 0 && ppid != cur_ppid {
                if ppid != 1 {
                    return Err(Error::Violation(format!(
                        "process {} reparented to non-init process {}",
                        pid, ppid
                    )));
                }
                self.unparent(pid, cur_ppid);
                if let Some(init) = self.procs.get_mut(&1) {
                    init.children.push(pid);
                }
                if let Some(proc_) = self.procs.get_mut(&pid) {
                    proc_.ppid = 1;
                }
            }
            if sid != 0 && sid != cur_sid {
                if sid != pid {
                    return Err(Error::Violation(format!(
                        "process {} moved from sid {} to {}",
                        pid, cur_sid, sid
                    )));
                }
                if let Some(proc_) = self.procs.get_mut(&pid) {
                    proc_.sid = sid;
                }
            }
            return Ok(());
        }
        // find the parent; init and self have pid == ppid
        let mut sid = sid;
        if ppid != pid {
            let parent_sid = match self.procs.get(&ppid) {
                Some(parent) => parent.sid,
                None => return Err(Error::UnknownProcess(ppid)),
            };
            // at creation, the sid must match the parent's
            if sid == 0 {
                sid = parent_sid;
            } else if sid != parent_sid {
                return Err(Error::Violation(format!(
                    "process {} sid {} does not match parent sid {}",
                    pid, sid, parent_sid
                )));
            }
            if let Some(parent) = self.procs.get_mut(&ppid) {
                parent.children.push(pid);
            }
        }
        self.procs.insert(
            pid,
            Process {
                pid,
                ppid,
                sid,
                children: Vec::new(),
                wstatus: None,
            },
        );
        trace!("process {} (ppid {}) inserted", pid, ppid);
        Ok(())
    }

    /// Removes a process, re-parenting any remaining children to init.
    /// Refuses to remove init or ourselves.
    pub fn remove(&mut self, pid: Pid) -> Result<()> {
        if pid == 1 || pid == self.self_pid {
            return Err(Error::Violation(format!(
                "attempted to remove {} from process table",
                if pid == 1 { "init" } else { "self" }
            )));
        }
        let ppid = match self.procs.get(&pid) {
            Some(proc_) => proc_.ppid,
            None => return Err(Error::UnknownProcess(pid)),
        };
        self.reparent_children_to_init(pid);
        self.unparent(pid, ppid);
        self.ready.retain(|&ready| ready != pid);
        self.procs.remove(&pid);
        trace!("process {} removed", pid);
        Ok(())
    }

    /// Stops tracking a process and all its descendants.  None of them
    /// will be collected.
    pub fn drop_tree(&mut self, pid: Pid) -> Result<()> {
        let ppid = match self.procs.get(&pid) {
            Some(proc_) => proc_.ppid,
            None => return Err(Error::UnknownProcess(pid)),
        };
        self.unparent(pid, ppid);
        let mut stack = vec![pid];
        while let Some(next) = stack.pop() {
            if let Some(proc_) = self.procs.remove(&next) {
                stack.extend(proc_.children);
                self.ready.retain(|&ready| ready != next);
                trace!("dropping process {}", next);
            }
        }
        Ok(())
    }

    /// Records a process exit: remembers the wait status, re-parents any
    /// children to init, and queues the record for collection.
    pub fn mark_exited(&mut self, pid: Pid, wstatus: i32) -> Result<()> {
        if !self.procs.contains_key(&pid) {
            return Err(Error::UnknownProcess(pid));
        }
        self.reparent_children_to_init(pid);
        if let Some(proc_) = self.procs.get_mut(&pid) {
            proc_.wstatus = Some(wstatus);
        }
        self.ready.push_back(pid);
        Ok(())
    }

    /// Pops and returns the oldest process whose termination has been
    /// observed.  Fails with `NoneReady` if descendants remain but none
    /// has exited, and with `NoChildren` if only init and ourselves are
    /// left.
    pub fn collect(&mut self) -> Result<Process> {
        if self.procs.len() == 2 {
            return Err(Error::NoChildren);
        }
        let pid = match self.ready.pop_front() {
            Some(pid) => pid,
            None => return Err(Error::NoneReady),
        };
        let proc_ = match self.procs.remove(&pid) {
            Some(proc_) => proc_,
            None => return Err(Error::UnknownProcess(pid)),
        };
        self.unparent(pid, proc_.ppid);
        trace!(
            "collect pid {} ppid {} status {:?}",
            proc_.pid,
            proc_.ppid,
            proc_.wstatus
        );
        Ok(proc_)
    }

    /// Iterates over all processes except init and ourselves.
    pub fn for_each<F>(&self, mut func: F)
    where
        F: FnMut(&Process),
    {
        for proc_ in self.procs.values() {
            if proc_.pid != 1 && proc_.pid != self.self_pid {
                func(proc_);
            }
        }
    }

    /// Applies one connector event to the table.  Events for processes
    /// we are not tracking are ignored; so are thread-level events.  The
    /// callback is consulted on exec and setsid and may ask for the
    /// process's subtree to be dropped.
    pub fn apply<F>(&mut self, event: &Event, mut callback: F)
    where
        F: FnMut(WatchEvent, &Process) -> WatchAction,
    {
        let actor = match *event {
            Event::Ack { err } => {
                // another listener subscribed or unsubscribed
                trace!("ack {}", err);
                return;
            }
            Event::Fork { parent, .. } => parent.tgid,
            Event::Exec { process }
            | Event::Uid { process, .. }
            | Event::Gid { process, .. }
            | Event::Sid { process }
            | Event::Ptrace { process }
            | Event::Comm { process, .. }
            | Event::Coredump { process }
            | Event::Exit { process, .. } => process.tgid,
            Event::Unknown { what } => {
                trace!("unhandled process event 0x{:08x}", what);
                return;
            }
        };
        if !self.procs.contains_key(&actor) {
            trace!("ignoring event for process {}", actor);
            return;
        }
        match *event {
            Event::Fork { parent, child } => {
                if child.tgid != child.tid {
                    // new thread in an existing process
                    return;
                }
                if parent.tgid == 1 {
                    trace!("ignoring process {} forked by init", child.tgid);
                    return;
                }
                trace!("proc {} fork {}", parent.tgid, child.tgid);
                // sid unknown, copied from the parent
                if let Err(err) = self.insert(child.tgid, parent.tgid, 0) {
                    warn!("failed to track process {}: {}", child.tgid, err);
                }
            }
            Event::Exec { process } => {
                trace!("proc {} exec", process.tgid);
                let action = match self.procs.get(&process.tgid) {
                    Some(proc_) => callback(WatchEvent::Exec, proc_),
                    None => return,
                };
                if action == WatchAction::Drop {
                    let _ = self.drop_tree(process.tgid);
                }
            }
            Event::Sid { process } => {
                // undocumented, but safe to assume sid == tgid
                trace!("proc {} sid {}", process.tgid, process.tgid);
                if let Err(err) = self.insert(process.tgid, 0, process.tgid) {
                    warn!("failed to update process {}: {}", process.tgid, err);
                    return;
                }
                let action = match self.procs.get(&process.tgid) {
                    Some(proc_) => callback(WatchEvent::SetSid, proc_),
                    None => return,
                };
                if action == WatchAction::Drop {
                    let _ = self.drop_tree(process.tgid);
                }
            }
            Event::Exit {
                process,
                code,
                signal,
            } => {
                if signal != libc::SIGCHLD as u32 {
                    // thread, not process
                    return;
                }
                trace!("proc {} exit 0x{:04x}", process.tgid, code);
                if let Err(err) = self.mark_exited(process.tgid, code) {
                    warn!("failed to record exit of {}: {}", process.tgid, err);
                }
            }
            Event::Uid { process, ruid, euid } => {
                // we do not track credentials
                trace!("proc {} euid {} ruid {}", process.tgid, euid, ruid);
            }
            Event::Gid { process, rgid, egid } => {
                trace!("proc {} egid {} rgid {}", process.tgid, egid, rgid);
            }
            Event::Comm {
                process, ref comm, ..
            } => {
                trace!("proc {} name {}", process.tgid, comm);
            }
            Event::Coredump { process } => {
                // purely informational; an exit event will follow
                trace!("proc {} core dumped", process.tgid);
            }
            Event::Ptrace { .. } | Event::Ack { .. } | Event::Unknown { .. } => {}
        }
    }
}

/// The process watcher: the event source plus the table it feeds.
pub struct ProcWatch {
    source: EventSource,
    table: ProcessTable,
}

impl ProcWatch {
    /// Connects to the event connector, enables the event stream, and
    /// initializes the table with init and ourselves.
    pub fn start() -> Result<ProcWatch> {
        let mut watch = ProcWatch {
            source: EventSource::new(),
            table: ProcessTable::new(process::current_pid(), process::current_sid()),
        };
        if !watch.reconnect() {
            return Err(Error::NotConnected);
        }
        Ok(watch)
    }

    /// Tears the connection down and drops every record.
    pub fn stop(&mut self) {
        self.source.disconnect();
    }

    pub fn reconnect(&mut self) -> bool {
        self.source.disconnect();
        if let Err(err) = self.source.connect() {
            error!("failed to connect to process event connector: {}", err);
            return false;
        }
        if let Err(err) = self.source.listen(true, 1000) {
            error!("failed to enable process events: {}", err);
            return false;
        }
        true
    }

    pub fn fd(&self) -> Result<libc::c_int> {
        self.source.fd()
    }

    /// Receives and applies a single event.  The timeout is in
    /// milliseconds with the same semantics as for poll(2).
    pub fn ingest<F>(&mut self, timeout_ms: libc::c_int, callback: F) -> Result<()>
    where
        F: FnMut(WatchEvent, &Process) -> WatchAction,
    {
        let event = self.source.receive_event(timeout_ms)?;
        self.table.apply(&event, callback);
        Ok(())
    }

    /// Forgets every tracked process, starting over from init and
    /// ourselves.
    pub fn reset(&mut self) {
        self.table = ProcessTable::new(process::current_pid(), process::current_sid());
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut ProcessTable {
        &mut self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ProcId;

    const SELF: Pid = 1000;

    fn table() -> ProcessTable {
        ProcessTable::new(SELF, SELF)
    }

    fn id(pid: Pid) -> ProcId {
        ProcId {
            tid: pid,
            tgid: pid,
        }
    }

    fn fork(parent: Pid, child: Pid) -> Event {
        Event::Fork {
            parent: id(parent),
            child: id(child),
        }
    }

    fn exit(pid: Pid, code: i32) -> Event {
        Event::Exit {
            process: id(pid),
            code,
            signal: libc::SIGCHLD as u32,
        }
    }

    fn no_callback(_: WatchEvent, _: &Process) -> WatchAction {
        WatchAction::Default
    }

    /// Checks the structural invariants: every non-root record has a
    /// present parent, and the sum of (1 + |children|) over all records
    /// matches expectations.
    fn check_invariants(table: &ProcessTable) {
        let mut edges = 0;
        for proc_ in table.procs.values() {
            if proc_.ppid != proc_.pid {
                assert!(
                    table.procs.contains_key(&proc_.ppid),
                    "parent {} of {} missing",
                    proc_.ppid,
                    proc_.pid
                );
            }
            for child in &proc_.children {
                assert_eq!(table.procs[child].ppid, proc_.pid);
            }
            edges += proc_.children.len();
        }
        // every process except the two roots hangs off exactly one parent
        assert_eq!(edges, table.procs.len() - 2);
        for ready in &table.ready {
            assert!(table.procs[ready].wstatus.is_some());
        }
    }

    #[test]
    fn starts_with_init_and_self() {
        let table = table();
        assert_eq!(table.count(), 0);
        assert!(table.get(1).is_ok());
        assert!(table.get(SELF).is_ok());
        check_invariants(&table);
    }

    #[test]
    fn fork_chain_builds_tree() {
        let mut table = table();
        table.apply(&fork(SELF, 1001), no_callback);
        table.apply(&fork(1001, 1002), no_callback);
        table.apply(&fork(1002, 1003), no_callback);
        assert_eq!(table.count(), 3);
        assert_eq!(table.get(1002).unwrap().ppid, 1001);
        // sid copied from the parent at creation
        assert_eq!(table.get(1003).unwrap().sid, SELF);
        check_invariants(&table);
    }

    #[test]
    fn thread_forks_are_ignored() {
        let mut table = table();
        table.apply(
            &Event::Fork {
                parent: id(SELF),
                child: ProcId {
                    tid: 1002,
                    tgid: 1001,
                },
            },
            no_callback,
        );
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn untracked_parents_are_ignored() {
        let mut table = table();
        table.apply(&fork(4242, 4243), no_callback);
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn exit_moves_to_ready_and_collect_is_fifo() {
        let mut table = table();
        table.apply(&fork(SELF, 1001), no_callback);
        table.apply(&fork(SELF, 1002), no_callback);
        assert!(matches!(table.collect(), Err(Error::NoneReady)));
        table.apply(&exit(1002, 0), no_callback);
        table.apply(&exit(1001, 0x0100), no_callback);
        check_invariants(&table);
        assert_eq!(table.collect().unwrap().pid, 1002);
        let second = table.collect().unwrap();
        assert_eq!(second.pid, 1001);
        assert_eq!(second.wstatus, Some(0x0100));
        assert!(matches!(table.collect(), Err(Error::NoChildren)));
        check_invariants(&table);
    }

    #[test]
    fn thread_exits_are_ignored() {
        let mut table = table();
        table.apply(&fork(SELF, 1001), no_callback);
        table.apply(
            &Event::Exit {
                process: id(1001),
                code: 0,
                signal: 0,
            },
            no_callback,
        );
        assert!(matches!(table.collect(), Err(Error::NoneReady)));
    }

    #[test]
    fn exit_reparents_children_to_init() {
        let mut table = table();
        table.apply(&fork(SELF, 1001), no_callback);
        table.apply(&fork(1001, 1002), no_callback);
        table.apply(&exit(1001, 0), no_callback);
        check_invariants(&table);
        assert_eq!(table.get(1002).unwrap().ppid, 1);
        let collected = table.collect().unwrap();
        assert_eq!(collected.pid, 1001);
        assert!(collected.children.is_empty());
        check_invariants(&table);
    }

    #[test]
    fn remove_refuses_roots() {
        let mut table = table();
        assert!(table.remove(1).is_err());
        assert!(table.remove(SELF).is_err());
    }

    #[test]
    fn remove_reparents_children() {
        let mut table = table();
        table.apply(&fork(SELF, 1001), no_callback);
        table.apply(&fork(1001, 1002), no_callback);
        table.remove(1001).unwrap();
        assert!(table.get(1001).is_err());
        assert_eq!(table.get(1002).unwrap().ppid, 1);
        check_invariants(&table);
    }

    #[test]
    fn drop_tree_removes_descendants() {
        let mut table = table();
        table.apply(&fork(SELF, 1001), no_callback);
        table.apply(&fork(1001, 1002), no_callback);
        table.apply(&fork(1002, 1003), no_callback);
        table.apply(&fork(SELF, 2001), no_callback);
        table.apply(&exit(1003, 0), no_callback);
        table.drop_tree(1001).unwrap();
        assert_eq!(table.count(), 1);
        assert!(table.get(1002).is_err());
        // the dropped descendant must not be collected either
        assert!(matches!(table.collect(), Err(Error::NoneReady)));
        check_invariants(&table);
    }

    #[test]
    fn reinsert_allows_only_legal_mutations() {
        let mut table = table();
        table.apply(&fork(SELF, 1001), no_callback);
        table.apply(&fork(SELF, 1002), no_callback);
        // re-parenting to anything but init is a violation
        assert!(table.insert(1001, 1002, 0).is_err());
        // re-parenting to init is fine
        table.insert(1001, 1, 0).unwrap();
        assert_eq!(table.get(1001).unwrap().ppid, 1);
        // sid may only move to the process's own pid
        assert!(table.insert(1002, 0, 4242).is_err());
        table.insert(1002, 0, 1002).unwrap();
        assert_eq!(table.get(1002).unwrap().sid, 1002);
        check_invariants(&table);
    }

    #[test]
    fn setsid_callback_can_drop() {
        let mut table = table();
        table.apply(&fork(SELF, 1001), no_callback);
        table.apply(&fork(1001, 1002), no_callback);
        table.apply(&Event::Sid { process: id(1002) }, |event, proc_| {
            assert_eq!(event, WatchEvent::SetSid);
            assert_eq!(proc_.sid, proc_.pid);
            WatchAction::Drop
        });
        assert!(table.get(1002).is_err());
        assert_eq!(table.count(), 1);
        check_invariants(&table);
    }

    #[test]
    fn exec_callback_default_keeps_process() {
        let mut table = table();
        table.apply(&fork(SELF, 1001), no_callback);
        let mut seen = false;
        table.apply(&Event::Exec { process: id(1001) }, |event, _| {
            assert_eq!(event, WatchEvent::Exec);
            seen = true;
            WatchAction::Default
        });
        assert!(seen);
        assert!(table.get(1001).is_ok());
    }

    #[test]
    fn fork_exit_sequences_drain_to_roots() {
        let mut table = table();
        let pids: Vec<Pid> = (1001..1020).collect();
        let mut parent = SELF;
        for &pid in &pids {
            table.apply(&fork(parent, pid), no_callback);
            parent = pid;
        }
        check_invariants(&table);
        for &pid in pids.iter().rev() {
            table.apply(&exit(pid, 0), no_callback);
        }
        while table.collect().is_ok() {}
        assert_eq!(table.count(), 0);
        check_invariants(&table);
    }
}
