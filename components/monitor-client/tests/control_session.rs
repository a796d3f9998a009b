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

//! Exercises the control protocol end to end over a real abstract
//! socket: a scripted server on one thread, the client library on the
//! other.

use std::sync::{Arc, Mutex};
use std::thread;

use sysvrun_monitor::control::{self, ControlEffect, ControlListener};
use sysvrun_monitor_protocol as protocol;
use sysvrun_monitor_protocol::MonitorState;

use sysvrun_monitor_client as client;

const SUPERVISOR: &str = "sysvrun-test";

#[test]
fn client_against_scripted_server() {
    let service = format!("ctl-{}", std::process::id());
    let listener = ControlListener::bind(SUPERVISOR, &service).unwrap();
    let state = Arc::new(Mutex::new(MonitorState::Running));
    let server_state = Arc::clone(&state);
    let server = thread::spawn(move || {
        // serve exactly three sessions the way the monitor would
        for _ in 0..3 {
            let mut session = listener.accept().unwrap();
            let privileged = session.peer.uid == unsafe { libc::getuid() };
            session.write_line(&protocol::banner()).unwrap();
            while let Some(line) = session.read_line().unwrap() {
                let mut current = server_state.lock().unwrap();
                let (response, effect) = control::dispatch(*current, privileged, &line);
                if let ControlEffect::SetState(next) = effect {
                    *current = next;
                }
                session.write_line(&response).unwrap();
            }
        }
    });

    // session 1: raw connect, banner, status
    let mut raw = client::MonitorClient::connect(SUPERVISOR, &service).unwrap();
    assert_eq!(raw.version(), protocol::CONTROL_VERSION);
    assert!(raw.monitor_pid() > 0);
    assert_eq!(raw.command("status").unwrap(), "running");
    drop(raw);

    // session 2: the state helper
    assert_eq!(
        client::get_state(SUPERVISOR, &service).unwrap(),
        MonitorState::Running
    );

    // session 3: a privileged stop takes effect server-side
    assert_eq!(
        client::control(SUPERVISOR, &service, "stop").unwrap(),
        "ok"
    );
    server.join().unwrap();
    assert_eq!(*state.lock().unwrap(), MonitorState::Stopping);

    // nobody listening any more: reported as stopped
    assert_eq!(
        client::get_state(SUPERVISOR, &service).unwrap(),
        MonitorState::Stopped
    );
    assert!(client::MonitorClient::connect(SUPERVISOR, &service)
        .unwrap_err()
        .is_not_running());
}

#[test]
fn unknown_commands_get_error_response() {
    let service = format!("ctl-err-{}", std::process::id());
    let listener = ControlListener::bind(SUPERVISOR, &service).unwrap();
    let server = thread::spawn(move || {
        let mut session = listener.accept().unwrap();
        session.write_line(&protocol::banner()).unwrap();
        while let Some(line) = session.read_line().unwrap() {
            let (response, _) = control::dispatch(MonitorState::Running, true, &line);
            session.write_line(&response).unwrap();
        }
    });
    assert_eq!(
        client::control(SUPERVISOR, &service, "frobnicate").unwrap(),
        "error"
    );
    server.join().unwrap();
}
