// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt, io, path::PathBuf, str, time::Duration};

use crate::engine::{CmdOutput, PipelineStep};

pub type RbdCryptResult<T> = Result<T, RbdCryptError>;

#[derive(Debug)]
pub enum RbdCryptError {
    Msg(String),
    Chained(String, Box<RbdCryptError>),
    Io(io::Error),
    Utf8(str::Utf8Error),
    Serde(serde_json::error::Error),

    /// A text value could not be parsed into the named kind of value.
    Parse {
        what: &'static str,
        input: String,
    },

    /// A passphrase file could not be written.
    Provisioning {
        path: PathBuf,
        reason: String,
    },

    /// A step of the snapshot/clone/encrypt/mount pipeline produced
    /// unexpected output.
    PipelineStep {
        step: PipelineStep,
        image: String,
        output: String,
    },

    /// A header overhead compensation resize did not produce an accepted
    /// outcome.
    Compensation {
        image: String,
        rule: String,
        output: String,
    },

    /// The content of two artifacts differs.
    Consistency {
        first: String,
        second: String,
        first_digest: String,
        second_digest: String,
    },

    /// The scenario is unknown or can not be run against an encryption
    /// chain of this length.
    ScenarioPrecondition {
        scenario: u8,
        chain_len: usize,
    },

    /// A negative scenario did not fail, or failed with the wrong error.
    ScenarioAssertion {
        scenario: u8,
        description: String,
        image: String,
        expected: String,
        actual: String,
    },

    /// An external command ran but returned a failure.
    Command {
        cmd: String,
        output: CmdOutput,
    },

    /// An external command did not finish in the allotted time.
    Timeout {
        cmd: String,
        timeout: Duration,
    },
}

impl fmt::Display for RbdCryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RbdCryptError::Msg(s) => write!(f, "{s}"),
            RbdCryptError::Chained(s, e) => write!(f, "{s}\nCaused by: {e}"),
            RbdCryptError::Io(err) => write!(f, "IO error: {err}"),
            RbdCryptError::Utf8(err) => write!(f, "Utf8 error: {err}"),
            RbdCryptError::Serde(err) => write!(f, "Serde error: {err}"),
            RbdCryptError::Parse { what, input } => {
                write!(f, "\"{input}\" is not a valid {what}")
            }
            RbdCryptError::Provisioning { path, reason } => write!(
                f,
                "failed to provision passphrase file {}: {reason}",
                path.display()
            ),
            RbdCryptError::PipelineStep {
                step,
                image,
                output,
            } => write!(f, "step {step} failed for {image}; output: \"{output}\""),
            RbdCryptError::Compensation {
                image,
                rule,
                output,
            } => write!(
                f,
                "resize to compensate for LUKS header overhead ({rule}) failed for {image}; output: \"{output}\""
            ),
            RbdCryptError::Consistency {
                first,
                second,
                first_digest,
                second_digest,
            } => write!(
                f,
                "data inconsistency found between {first} ({first_digest}) and {second} ({second_digest})"
            ),
            RbdCryptError::ScenarioPrecondition {
                scenario,
                chain_len,
            } => write!(
                f,
                "negative scenario {scenario} is unknown or requires an image with a parent; the encryption config has {chain_len} entries"
            ),
            RbdCryptError::ScenarioAssertion {
                scenario,
                description,
                image,
                expected,
                actual,
            } => write!(
                f,
                "negative scenario {scenario} \"{description}\" on {image}: expected error {expected}, actual: \"{actual}\""
            ),
            RbdCryptError::Command { cmd, output } => write!(
                f,
                "command {cmd} failed. status: {}, stdout: \"{}\", stderr: \"{}\"",
                output.status, output.stdout, output.stderr
            ),
            RbdCryptError::Timeout { cmd, timeout } => {
                write!(f, "command {cmd} timed out after {timeout:?}")
            }
        }
    }
}

impl Error for RbdCryptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RbdCryptError::Chained(_, err) => Some(err),
            RbdCryptError::Io(err) => Some(err),
            RbdCryptError::Utf8(err) => Some(err),
            RbdCryptError::Serde(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RbdCryptError {
    fn from(err: io::Error) -> RbdCryptError {
        RbdCryptError::Io(err)
    }
}

impl From<str::Utf8Error> for RbdCryptError {
    fn from(err: str::Utf8Error) -> RbdCryptError {
        RbdCryptError::Utf8(err)
    }
}

impl From<serde_json::error::Error> for RbdCryptError {
    fn from(err: serde_json::error::Error) -> RbdCryptError {
        RbdCryptError::Serde(err)
    }
}
