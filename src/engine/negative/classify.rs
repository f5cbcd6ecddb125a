// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt::Debug;

use crate::engine::types::CmdOutput;

/// Decides whether an error text carries a signature.
pub trait ErrorClassifier: Debug {
    fn matches(&self, tokens: &[String], text: &str) -> bool;
}

/// A signature matches when every token is a substring of the text.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubstringClassifier;

impl ErrorClassifier for SubstringClassifier {
    fn matches(&self, tokens: &[String], text: &str) -> bool {
        tokens.iter().all(|token| text.contains(token.as_str()))
    }
}

/// Which signature an error text carried.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureMatch {
    Primary,
    Alternate,
}

/// The classification of one attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Pass(SignatureMatch),
    /// The attempt succeeded although it should have failed.
    Unexpected,
    /// The attempt failed with an error that carries neither signature.
    Mismatch,
}

/// Classify an attempt's output against a primary and an optional
/// alternate signature.
pub fn classify<C>(
    classifier: &C,
    output: &CmdOutput,
    expected: &[String],
    alternate: Option<&[String]>,
) -> Verdict
where
    C: ErrorClassifier + ?Sized,
{
    if output.is_success() {
        return Verdict::Unexpected;
    }
    let text = output.text();
    if classifier.matches(expected, &text) {
        Verdict::Pass(SignatureMatch::Primary)
    } else if alternate.is_some_and(|tokens| classifier.matches(tokens, &text)) {
        Verdict::Pass(SignatureMatch::Alternate)
    } else {
        Verdict::Mismatch
    }
}
