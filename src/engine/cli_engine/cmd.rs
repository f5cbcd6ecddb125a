// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Handles invoking external binaries, on this machine or on a client node
// reached over ssh. Every command runs to completion or until the host's
// timeout expires; a command that times out is killed and reported as an
// error, never retried.

use std::{
    io::{Read, Write},
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    engine::types::CmdOutput,
    rbdcrypt::{HostConfig, RbdCryptError, RbdCryptResult},
};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Quote a word for a POSIX shell, leaving plain words as they are.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=,:@%+".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn spawn_output_reader<R>(pipe: Option<R>) -> JoinHandle<RbdCryptResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> RbdCryptResult<String> {
        let mut buf = Vec::new();
        if let Some(mut reader) = pipe {
            reader.read_to_end(&mut buf)?;
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn join_reader(handle: JoinHandle<RbdCryptResult<String>>) -> RbdCryptResult<String> {
    handle
        .join()
        .map_err(|_| RbdCryptError::Msg("command output reader thread panicked".to_string()))?
}

/// What becomes of a command's stdout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputMode {
    /// Captured and logged at debug.
    Logged,
    /// Captured but kept out of the log.
    Unlogged,
    /// Not captured at all.
    Discarded,
}

/// Runs commands on one host.
#[derive(Clone, Debug)]
pub struct CommandRunner {
    config: HostConfig,
}

impl CommandRunner {
    pub fn new(config: HostConfig) -> CommandRunner {
        CommandRunner { config }
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// The command line as it would be typed on the host.
    pub fn command_line(&self, args: &[&str]) -> String {
        let line = itertools::join(args.iter().map(|a| shell_quote(a)), " ");
        if self.config.sudo {
            format!("sudo {line}")
        } else {
            line
        }
    }

    fn command(&self, args: &[&str]) -> RbdCryptResult<Command> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| RbdCryptError::Msg("no command given".to_string()))?;
        Ok(match self.config.host {
            Some(ref host) => {
                let mut command = Command::new("ssh");
                command
                    .arg("-o")
                    .arg("BatchMode=yes")
                    .arg(host)
                    .arg("--")
                    .arg(self.command_line(args));
                command
            }
            None if self.config.sudo => {
                let mut command = Command::new("sudo");
                command.args(args);
                command
            }
            None => {
                let mut command = Command::new(program);
                command.args(rest);
                command
            }
        })
    }

    /// Run a command, feeding it input on stdin if given. A command that
    /// ran is reported with its status, whatever that status is.
    pub fn run(&self, args: &[&str], input: Option<&str>) -> RbdCryptResult<CmdOutput> {
        self.run_with(args, input, OutputMode::Logged)
    }

    /// Run a command, handling its stdout as mode says.
    pub fn run_with(
        &self,
        args: &[&str],
        input: Option<&str>,
        mode: OutputMode,
    ) -> RbdCryptResult<CmdOutput> {
        let line = self.command_line(args);
        debug!("Running on {}: {line}", self.name());

        let mut command = self.command(args)?;
        command
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if mode == OutputMode::Discarded {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            RbdCryptError::Chained(
                format!("Failed to start {line} on {}", self.name()),
                Box::new(RbdCryptError::from(e)),
            )
        })?;
        if let (Some(payload), Some(mut stdin)) = (input, child.stdin.take()) {
            if let Err(e) = stdin.write_all(payload.as_bytes()) {
                if let Err(kill) = child.kill() {
                    warn!("Failed to kill {line} after its input could not be written: {kill}");
                }
                let _ = child.wait();
                return Err(RbdCryptError::Chained(
                    format!("Failed to write input to {line} on {}", self.name()),
                    Box::new(RbdCryptError::from(e)),
                ));
            }
        }

        let output = self.wait_with_timeout(child, &line)?;
        match mode {
            OutputMode::Logged => debug!("{line} on {} returned {output}", self.name()),
            OutputMode::Unlogged | OutputMode::Discarded => {
                debug!("{line} on {} exited with {}", self.name(), output.status)
            }
        }
        Ok(output)
    }

    /// Run a command and fail with a Command error unless it exits 0.
    pub fn run_checked(&self, args: &[&str], input: Option<&str>) -> RbdCryptResult<CmdOutput> {
        self.run_checked_with(args, input, OutputMode::Logged)
    }

    pub fn run_checked_with(
        &self,
        args: &[&str],
        input: Option<&str>,
        mode: OutputMode,
    ) -> RbdCryptResult<CmdOutput> {
        let output = self.run_with(args, input, mode)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(RbdCryptError::Command {
                cmd: self.command_line(args),
                output,
            })
        }
    }

    fn wait_with_timeout(&self, mut child: Child, line: &str) -> RbdCryptResult<CmdOutput> {
        let timeout = self.config.timeout();
        let start = Instant::now();
        let stdout = spawn_output_reader(child.stdout.take());
        let stderr = spawn_output_reader(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() > timeout {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill timed out command {line}: {e}");
                }
                let _ = child.wait();
                error!("{line} on {} timed out after {timeout:?}", self.name());
                return Err(RbdCryptError::Timeout {
                    cmd: line.to_string(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(CmdOutput {
            status: status.code().unwrap_or(-1),
            stdout: join_reader(stdout)?,
            stderr: join_reader(stderr)?,
        })
    }
}
