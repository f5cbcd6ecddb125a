// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{path::Path, sync::LazyLock};

use regex::Regex;

use crate::{
    engine::{
        cli_engine::cmd::{CommandRunner, OutputMode},
        engine::{ContentHasher, Host, RemoteFiles},
        types::{CmdOutput, DeviceType},
    },
    rbdcrypt::{HostConfig, RbdCryptError, RbdCryptResult},
};

static MD5SUM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\\?([0-9a-f]{32})\s").expect("constant pattern is a valid regex")
});

/// Parse the digest out of md5sum's output.
pub fn parse_md5sum(stdout: &str) -> Option<String> {
    MD5SUM_LINE
        .captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// A client node reached through its command line.
#[derive(Clone, Debug)]
pub struct CliHost {
    pub(super) runner: CommandRunner,
    pub(super) device_type: DeviceType,
}

impl CliHost {
    pub fn new(config: HostConfig, device_type: DeviceType) -> CliHost {
        CliHost {
            runner: CommandRunner::new(config),
            device_type,
        }
    }
}

impl RemoteFiles for CliHost {
    fn create_file(&self, path: &Path, contents: &str) -> RbdCryptResult<CmdOutput> {
        let path = path.display().to_string();
        self.runner
            .run_with(&["tee", &path], Some(contents), OutputMode::Discarded)
    }

    fn read_file(&self, path: &Path) -> RbdCryptResult<String> {
        let path = path.display().to_string();
        Ok(self
            .runner
            .run_checked_with(&["cat", &path], None, OutputMode::Unlogged)?
            .stdout)
    }
}

impl ContentHasher for CliHost {
    fn checksum(&self, path: &Path) -> RbdCryptResult<String> {
        let path = path.display().to_string();
        let output = self.runner.run_checked(&["md5sum", &path], None)?;
        parse_md5sum(&output.stdout).ok_or_else(|| {
            RbdCryptError::Msg(format!(
                "no digest found in md5sum output for {path} on {}: {}",
                self.runner.name(),
                output.text()
            ))
        })
    }
}

impl Host for CliHost {
    fn name(&self) -> &str {
        self.runner.name()
    }
}
