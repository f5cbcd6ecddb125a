// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The fixed matrix of negative encryption scenarios.

use std::fmt;

use crate::{
    engine::negative::fault::FaultKind::{self, Blank, Identity, Invert, WrongSecret},
    rbdcrypt::{RbdCryptError, RbdCryptResult},
};

const IMAGE_PARAM: &str = "{image}";
const PARENT_PARAM: &str = "{parent}";

/// A list of tokens that must all appear in an error text. Tokens may
/// contain `{image}` and `{parent}`, which stand for the basenames of the
/// image under test and of its parent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ErrorSignature(&'static [&'static str]);

impl ErrorSignature {
    pub const fn new(tokens: &'static [&'static str]) -> ErrorSignature {
        ErrorSignature(tokens)
    }

    pub fn tokens(&self) -> &'static [&'static str] {
        self.0
    }

    /// The tokens with their parameters filled in.
    pub fn resolve(&self, image: &str, parent: Option<&str>) -> RbdCryptResult<Vec<String>> {
        self.0
            .iter()
            .map(|token| {
                let token = token.replace(IMAGE_PARAM, image);
                if token.contains(PARENT_PARAM) {
                    let parent = parent.ok_or_else(|| {
                        RbdCryptError::Msg(format!(
                            "expected error \"{token}\" names the parent of {image} but no parent was given"
                        ))
                    })?;
                    Ok(token.replace(PARENT_PARAM, parent))
                } else {
                    Ok(token)
                }
            })
            .collect()
    }
}

impl fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            itertools::join(self.0.iter().map(|t| format!("\"{t}\"")), ", ")
        )
    }
}

/// What a scenario attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScenarioKind {
    /// Map and mount with a faulted encryption config.
    EncryptionConfig,
    /// Mount a read-only image read-write.
    ReadWriteMount,
}

#[derive(Debug, Eq, PartialEq)]
pub struct NegativeScenario {
    pub id: u8,
    pub description: &'static str,
    /// One fault per slot, innermost first.
    pub format_faults: &'static [FaultKind],
    pub passphrase_faults: &'static [FaultKind],
    pub expected: ErrorSignature,
    /// Also accepted. Without an explicit format rbd assumes LUKS1, so some
    /// faults fail on the passphrase or on the format depending on the
    /// formats in use.
    pub alternate: Option<ErrorSignature>,
    pub kind: ScenarioKind,
}

impl NegativeScenario {
    /// Whether the scenario can only be run against an image with a parent.
    pub fn needs_parent(&self) -> bool {
        self.id > 4 && self.id != 15 && self.id != 16
    }
}

impl fmt::Display for NegativeScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.id, self.description)
    }
}

const LOAD_FAILED: &str = "failed to load encryption";
const EINVAL: [&str; 2] = ["(22)", "Invalid argument"];
const EPERM: [&str; 2] = ["(1)", "Operation not permitted"];

const IMAGE_EINVAL: ErrorSignature =
    ErrorSignature::new(&["image name: {image}", LOAD_FAILED, EINVAL[0], EINVAL[1]]);
const IMAGE_EPERM: ErrorSignature =
    ErrorSignature::new(&["image name: {image}", LOAD_FAILED, EPERM[0], EPERM[1]]);
const PARENT_EINVAL: ErrorSignature =
    ErrorSignature::new(&["image name: {parent}", LOAD_FAILED, EINVAL[0], EINVAL[1]]);
const PARENT_EPERM: ErrorSignature =
    ErrorSignature::new(&["image name: {parent}", LOAD_FAILED, EPERM[0], EPERM[1]]);
const LUKS_AS_FILESYSTEM: ErrorSignature =
    ErrorSignature::new(&["unknown filesystem type 'crypto_LUKS'"]);
const BAD_FILESYSTEM: ErrorSignature = ErrorSignature::new(&[
    "wrong fs type, bad option, bad superblock",
    "missing codepage or helper program, or other error",
]);
const READ_ONLY_SUPERBLOCK: ErrorSignature = ErrorSignature::new(&["can't read superblock"]);

const fn scenario(
    id: u8,
    description: &'static str,
    format_faults: &'static [FaultKind],
    passphrase_faults: &'static [FaultKind],
    expected: ErrorSignature,
) -> NegativeScenario {
    NegativeScenario {
        id,
        description,
        format_faults,
        passphrase_faults,
        expected,
        alternate: None,
        kind: ScenarioKind::EncryptionConfig,
    }
}

const fn with_alternate(
    mut scenario: NegativeScenario,
    alternate: ErrorSignature,
) -> NegativeScenario {
    scenario.alternate = Some(alternate);
    scenario
}

/// The id of the scenario that mounts a read-only image read-write.
pub const READ_WRITE_MOUNT: u8 = 16;

const SCENARIOS: [NegativeScenario; 16] = [
    scenario(
        1,
        "wrong image format (when image has no parent)",
        &[Invert],
        &[Identity],
        IMAGE_EINVAL,
    ),
    scenario(
        2,
        "wrong image passphrase (when image has no parent)",
        &[Identity],
        &[WrongSecret],
        IMAGE_EPERM,
    ),
    scenario(
        3,
        "no image config (when image has no parent)",
        &[Blank],
        &[Blank],
        LUKS_AS_FILESYSTEM,
    ),
    scenario(
        4,
        "wrong image config (both format and passphrase are wrong)(when image has no parent)",
        &[Invert],
        &[WrongSecret],
        IMAGE_EINVAL,
    ),
    scenario(
        5,
        "wrong parent format",
        &[Identity, Invert],
        &[Identity, Identity],
        PARENT_EINVAL,
    ),
    scenario(
        6,
        "wrong parent passphrase",
        &[Identity, Identity],
        &[Identity, WrongSecret],
        PARENT_EPERM,
    ),
    with_alternate(
        scenario(
            7,
            "no parent config",
            &[Identity, Blank],
            &[Identity, Blank],
            PARENT_EPERM,
        ),
        PARENT_EINVAL,
    ),
    scenario(
        8,
        "wrong parent config (both format and passphrase are wrong)",
        &[Identity, Invert],
        &[Identity, WrongSecret],
        PARENT_EINVAL,
    ),
    scenario(
        9,
        "wrong image format and parent format",
        &[Invert, Invert],
        &[Identity, Identity],
        IMAGE_EINVAL,
    ),
    scenario(
        10,
        "wrong image passphrase and parent passphrase",
        &[Identity, Identity],
        &[WrongSecret, WrongSecret],
        IMAGE_EPERM,
    ),
    scenario(
        11,
        "wrong image config (both format and passphrase are wrong)(when parent in present)",
        &[Invert, Identity],
        &[WrongSecret, Identity],
        IMAGE_EINVAL,
    ),
    scenario(
        12,
        "wrong image config and parent config (both format and passphrase are wrong)",
        &[Invert, Invert],
        &[WrongSecret, WrongSecret],
        IMAGE_EINVAL,
    ),
    with_alternate(
        scenario(
            13,
            "no image config(when parent in present and encrypted)",
            &[Blank, Identity],
            &[Blank, Identity],
            IMAGE_EPERM,
        ),
        IMAGE_EINVAL,
    ),
    scenario(
        14,
        "no image config(when parent in present and not encrypted)",
        &[Blank, Identity],
        &[Blank, Identity],
        BAD_FILESYSTEM,
    ),
    scenario(
        15,
        "no image config(when parent is present and clone not encrypted)",
        &[Blank],
        &[Blank],
        BAD_FILESYSTEM,
    ),
    NegativeScenario {
        id: READ_WRITE_MOUNT,
        description: "mount read-only image as read-write",
        format_faults: &[Identity, Identity],
        passphrase_faults: &[Identity, Identity],
        expected: READ_ONLY_SUPERBLOCK,
        alternate: None,
        kind: ScenarioKind::ReadWriteMount,
    },
];

const fn validate(scenarios: &[NegativeScenario]) {
    let mut i = 0;
    while i < scenarios.len() {
        let s = &scenarios[i];
        assert!(s.id as usize == i + 1, "scenario ids must be 1, 2, ... in order");
        assert!(
            s.format_faults.len() == s.passphrase_faults.len(),
            "format and passphrase faults must have the same length"
        );
        assert!(
            s.format_faults.len() == 1 || s.format_faults.len() == 2,
            "a scenario faults one or two slots"
        );
        let mut j = 0;
        while j < s.format_faults.len() {
            assert!(s.format_faults[j].applies_to_format());
            assert!(s.passphrase_faults[j].applies_to_passphrase());
            j += 1;
        }
        i += 1;
    }
}

const _: () = validate(&SCENARIOS);

/// All scenarios, ordered by id.
pub fn scenarios() -> &'static [NegativeScenario] {
    &SCENARIOS
}

/// The scenario with the given id.
pub fn scenario_by_id(id: u8) -> Option<&'static NegativeScenario> {
    SCENARIOS.iter().find(|s| s.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_shape() {
        let all = scenarios();
        assert_eq!(all.len(), 16);
        for (index, s) in all.iter().enumerate() {
            assert_eq!(usize::from(s.id), index + 1);
            assert_eq!(s.format_faults.len(), s.passphrase_faults.len());
        }
        assert_eq!(
            all.iter().filter(|s| s.alternate.is_some()).map(|s| s.id).collect::<Vec<_>>(),
            vec![7, 13]
        );
        assert_eq!(
            scenario_by_id(READ_WRITE_MOUNT).unwrap().kind,
            ScenarioKind::ReadWriteMount
        );
        assert!(scenario_by_id(0).is_none());
        assert!(scenario_by_id(17).is_none());
    }

    #[test]
    fn test_needs_parent() {
        let needing: Vec<u8> = scenarios()
            .iter()
            .filter(|s| s.needs_parent())
            .map(|s| s.id)
            .collect();
        assert_eq!(needing, (5..=14).collect::<Vec<u8>>());
    }

    #[test]
    fn test_resolve() {
        let tokens = PARENT_EPERM.resolve("clone_1", Some("parent_1")).unwrap();
        assert_eq!(tokens[0], "image name: parent_1");
        let tokens = IMAGE_EINVAL.resolve("clone_1", None).unwrap();
        assert_eq!(tokens[0], "image name: clone_1");
        assert_eq!(tokens.len(), 4);
        assert_matches!(
            PARENT_EINVAL.resolve("clone_1", None),
            Err(RbdCryptError::Msg(_))
        );
    }

    proptest! {
        #[test]
        /// Resolved tokens never keep a template parameter.
        fn resolved_tokens_have_no_parameters(id in 1u8..=16, image in "[a-z_0-9]{1,12}") {
            let s = scenario_by_id(id).unwrap();
            for signature in std::iter::once(&s.expected).chain(s.alternate.iter()) {
                for token in signature.resolve(&image, Some("parent")).unwrap() {
                    prop_assert!(!token.contains(IMAGE_PARAM));
                    prop_assert!(!token.contains(PARENT_PARAM));
                }
            }
        }
    }
}
