// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

macro_rules! log_on_failure {
    ($op:expr, $fmt:tt $(, $arg:expr)*) => {{
        let result = $op;
        if let Err(ref e) = result {
            warn!(
                concat!($fmt, "; failed with error: {}"),
                $($arg,)*
                e
            );
        }
        result?
    }}
}

/// Evaluate a collaborator call and return a PipelineStep error naming the
/// step and image if it did not exit 0. Otherwise yields the output.
macro_rules! expect_success {
    ($op:expr, $step:expr, $image:expr) => {{
        let output: $crate::engine::CmdOutput = $op;
        if !output.is_success() {
            error!(
                "{} failed for {} with status {}",
                $step, $image, output.status
            );
            return Err($crate::rbdcrypt::RbdCryptError::PipelineStep {
                step: $step,
                image: $image.to_string(),
                output: output.text(),
            });
        }
        output
    }};
}
