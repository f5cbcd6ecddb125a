// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    convert::TryFrom,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde_derive::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString, VariantArray};

use crate::rbdcrypt::{RbdCryptError, RbdCryptResult};

/// The LUKS header format applied to an image, if any.
#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumString,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    VariantArray,
)]
#[serde(try_from = "String", into = "String")]
pub enum EncryptionFormat {
    #[strum(serialize = "luks1", ascii_case_insensitive)]
    Luks1,
    #[strum(serialize = "luks2", ascii_case_insensitive)]
    Luks2,
    #[strum(to_string = "NA", serialize = "none", ascii_case_insensitive)]
    None,
}

impl EncryptionFormat {
    /// The formats that actually write a LUKS header.
    pub const LUKS: [EncryptionFormat; 2] = [EncryptionFormat::Luks1, EncryptionFormat::Luks2];

    pub fn is_luks(self) -> bool {
        self != EncryptionFormat::None
    }

    /// The other LUKS version. None when this format is not LUKS.
    pub fn inverted(self) -> Option<EncryptionFormat> {
        match self {
            EncryptionFormat::Luks1 => Some(EncryptionFormat::Luks2),
            EncryptionFormat::Luks2 => Some(EncryptionFormat::Luks1),
            EncryptionFormat::None => None,
        }
    }

    /// Bytes reserved at the start of the image by the LUKS header.
    pub fn header_overhead(self) -> u64 {
        match self {
            EncryptionFormat::Luks1 => 2 * 1024 * 1024,
            EncryptionFormat::Luks2 => 16 * 1024 * 1024,
            EncryptionFormat::None => 0,
        }
    }
}

impl TryFrom<String> for EncryptionFormat {
    type Error = RbdCryptError;

    fn try_from(s: String) -> RbdCryptResult<EncryptionFormat> {
        EncryptionFormat::from_str(&s).map_err(|_| RbdCryptError::Parse {
            what: "encryption format",
            input: s,
        })
    }
}

impl From<EncryptionFormat> for String {
    fn from(format: EncryptionFormat) -> String {
        format.to_string()
    }
}

/// A "parent,clone" pair of formats, e.g. "luks2,luks1" or "NA,luks1".
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormatPair {
    pub parent: EncryptionFormat,
    pub clone: EncryptionFormat,
}

impl FormatPair {
    pub fn new(parent: EncryptionFormat, clone: EncryptionFormat) -> FormatPair {
        FormatPair { parent, clone }
    }
}

impl FromStr for FormatPair {
    type Err = RbdCryptError;

    fn from_str(s: &str) -> RbdCryptResult<FormatPair> {
        let err = || RbdCryptError::Parse {
            what: "parent,clone format pair",
            input: s.to_string(),
        };
        let (parent, clone) = s.split_once(',').ok_or_else(err)?;
        Ok(FormatPair {
            parent: EncryptionFormat::from_str(parent.trim()).map_err(|_| err())?,
            clone: EncryptionFormat::from_str(clone.trim()).map_err(|_| err())?,
        })
    }
}

impl TryFrom<String> for FormatPair {
    type Error = RbdCryptError;

    fn try_from(s: String) -> RbdCryptResult<FormatPair> {
        FormatPair::from_str(&s)
    }
}

impl From<FormatPair> for String {
    fn from(pair: FormatPair) -> String {
        pair.to_string()
    }
}

impl fmt::Display for FormatPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.parent, self.clone)
    }
}

/// One point at which encryption is applied: an image or one of its
/// ancestors. A slot with format None carries no passphrase and stands for
/// "no encryption config for this layer".
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptionSlot {
    format: EncryptionFormat,
    passphrase_file: Option<PathBuf>,
}

impl EncryptionSlot {
    pub fn luks(format: EncryptionFormat, passphrase_file: PathBuf) -> RbdCryptResult<Self> {
        if !format.is_luks() {
            return Err(RbdCryptError::Msg(format!(
                "a passphrase file ({}) was supplied for an unencrypted slot",
                passphrase_file.display()
            )));
        }
        Ok(EncryptionSlot {
            format,
            passphrase_file: Some(passphrase_file),
        })
    }

    pub fn unencrypted() -> Self {
        EncryptionSlot {
            format: EncryptionFormat::None,
            passphrase_file: None,
        }
    }

    pub fn format(&self) -> EncryptionFormat {
        self.format
    }

    pub fn passphrase_file(&self) -> Option<&Path> {
        self.passphrase_file.as_deref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.format.is_luks()
    }

    /// The reference passed to rbd for this slot, None if unencrypted.
    pub fn as_passphrase_ref(&self) -> Option<PassphraseRef> {
        self.passphrase_file.as_ref().map(|path| PassphraseRef {
            format: Some(self.format),
            passphrase_file: path.clone(),
        })
    }
}

impl fmt::Display for EncryptionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.passphrase_file {
            Some(ref path) => write!(f, "{}:{}", self.format, path.display()),
            None => write!(f, "{}", self.format),
        }
    }
}

/// An encryption option as handed to rbd. A format of None lets rbd pick
/// its default, which is LUKS1.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PassphraseRef {
    pub format: Option<EncryptionFormat>,
    pub passphrase_file: PathBuf,
}

impl PassphraseRef {
    pub fn passphrase_only(passphrase_file: PathBuf) -> PassphraseRef {
        PassphraseRef {
            format: None,
            passphrase_file,
        }
    }
}

/// The encryption slots of an artifact, innermost first: index 0 is the
/// image itself, index 1 its parent. Always holds one or two slots.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptionChain(Vec<EncryptionSlot>);

impl EncryptionChain {
    pub const MAX_LEN: usize = 2;

    pub fn new(slots: Vec<EncryptionSlot>) -> RbdCryptResult<EncryptionChain> {
        if slots.is_empty() || slots.len() > EncryptionChain::MAX_LEN {
            return Err(RbdCryptError::Msg(format!(
                "an encryption chain holds one to {} slots, got {}",
                EncryptionChain::MAX_LEN,
                slots.len()
            )));
        }
        Ok(EncryptionChain(slots))
    }

    pub fn single(slot: EncryptionSlot) -> EncryptionChain {
        EncryptionChain(vec![slot])
    }

    /// A chain for a clone and its parent, in that order.
    pub fn layered(clone: EncryptionSlot, parent: EncryptionSlot) -> EncryptionChain {
        EncryptionChain(vec![clone, parent])
    }

    pub fn slots(&self) -> &[EncryptionSlot] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The slot of the artifact itself.
    pub fn image(&self) -> Option<&EncryptionSlot> {
        self.0.first()
    }

    pub fn parent(&self) -> Option<&EncryptionSlot> {
        self.0.get(1)
    }

    /// A chain holding only this chain's innermost slot.
    pub fn innermost(&self) -> EncryptionChain {
        EncryptionChain(self.0.iter().take(1).cloned().collect())
    }

    /// Append a placeholder slot for an unencrypted parent.
    pub fn with_unencrypted_parent(mut self) -> RbdCryptResult<EncryptionChain> {
        self.0.push(EncryptionSlot::unencrypted());
        EncryptionChain::new(self.0)
    }

    pub fn is_encrypted(&self) -> bool {
        self.0.iter().any(|slot| slot.is_encrypted())
    }

    /// The rbd encryption options for this chain, in order, skipping
    /// unencrypted slots.
    pub fn passphrase_refs(&self) -> Vec<PassphraseRef> {
        self.0
            .iter()
            .filter_map(|slot| slot.as_passphrase_ref())
            .collect()
    }
}

impl fmt::Display for EncryptionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            itertools::join(self.0.iter().map(|slot| slot.to_string()), ", ")
        )
    }
}
