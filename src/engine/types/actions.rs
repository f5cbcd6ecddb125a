// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Contains types which encode the results of resizes requested to make up
//! for LUKS header overhead. The action type indicates the effect of the
//! request at the time it was made: whether some resize had to be issued and
//! if so, which.

use std::fmt::{self, Display};

use strum_macros::{AsRefStr, Display};

use crate::engine::types::{ImageSpec, PassphraseRef, Size};

/// A trait for a generic kind of action. Defines the type of the thing to
/// be changed, and also a method to indicate what changed.
pub trait EngineAction {
    type Return;

    /// Returns whether or not the action changed state.
    fn is_changed(&self) -> bool;

    /// Returns the thing or things changed.
    fn changed(self) -> Option<Self::Return>;
}

/// Which compensation rule caused a resize to be issued.
#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum CompensationRule {
    #[strum(serialize = "grow encrypted parent before clone")]
    GrowParent,
    #[strum(serialize = "shrink LUKS1 parent of LUKS2 clone")]
    ShrinkParent,
    #[strum(serialize = "resize clone encrypted differently from parent")]
    ResizeClone,
}

/// A resize that was sent to the cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResizeIssued {
    pub rule: CompensationRule,
    pub image: ImageSpec,
    pub size: Size,
    pub allow_shrink: bool,
    pub passphrases: Vec<PassphraseRef>,
}

impl Display for ResizeIssued {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} resized to {} ({}) with {} passphrase(s)",
            self.image,
            self.size,
            self.rule,
            self.passphrases.len()
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
/// The result of one compensation request.
pub enum CompensationAction {
    /// No resize was needed.
    Identity,
    /// These resizes were issued, in order.
    Resized(Vec<ResizeIssued>),
}

impl CompensationAction {
    /// The resizes issued, empty when none.
    pub fn issued(&self) -> &[ResizeIssued] {
        match self {
            CompensationAction::Identity => &[],
            CompensationAction::Resized(issued) => issued,
        }
    }
}

impl EngineAction for CompensationAction {
    type Return = Vec<ResizeIssued>;

    fn is_changed(&self) -> bool {
        !matches!(*self, CompensationAction::Identity)
    }

    fn changed(self) -> Option<Vec<ResizeIssued>> {
        match self {
            CompensationAction::Resized(issued) => Some(issued),
            CompensationAction::Identity => None,
        }
    }
}

impl Display for CompensationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompensationAction::Identity => write!(
                f,
                "No resize was needed to compensate for LUKS header overhead; no action taken"
            ),
            CompensationAction::Resized(issued) => write!(
                f,
                "Compensated for LUKS header overhead: {}",
                itertools::join(issued.iter().map(|r| r.to_string()), "; ")
            ),
        }
    }
}
