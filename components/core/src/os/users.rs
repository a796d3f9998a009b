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

use std::path::PathBuf;

use users::os::unix::UserExt;
use users::{self, Group, User};

/// Account details needed when preparing a service child's credentials
/// and environment.
#[derive(Clone, Debug)]
pub struct UserInfo {
    pub name: String,
    pub uid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
}

pub fn get_user_by_name(user: &str) -> Option<UserInfo> {
    users::get_user_by_name(user).map(|user: User| UserInfo {
        name: user.name().to_string_lossy().into_owned(),
        uid: user.uid(),
        home: user.home_dir().to_path_buf(),
        shell: user.shell().to_path_buf(),
    })
}

pub fn get_uid_by_name(user: &str) -> Option<u32> {
    users::get_user_by_name(user).map(|user: User| user.uid())
}

pub fn get_gid_by_name(group: &str) -> Option<u32> {
    users::get_group_by_name(group).map(|group: Group| group.gid())
}

pub fn get_effective_uid() -> u32 {
    users::get_effective_uid()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_uid_zero() {
        assert_eq!(get_uid_by_name("root"), Some(0));
        let info = get_user_by_name("root").unwrap();
        assert_eq!(info.uid, 0);
        assert_eq!(info.home, PathBuf::from("/root"));
    }

    #[test]
    fn unknown_user() {
        assert_eq!(get_uid_by_name("no-such-user-here"), None);
    }
}
