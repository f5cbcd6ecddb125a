// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use rand::{rng, Rng};
use strum_macros::{AsRefStr, Display, EnumString, VariantArray};

use crate::{
    engine::{crypt::wrong_passphrase, engine::RemoteFiles, types::EncryptionFormat},
    rbdcrypt::{RbdCryptError, RbdCryptResult},
};

/// How one half of an encryption slot is corrupted for a negative scenario.
#[derive(AsRefStr, Clone, Copy, Debug, Display, EnumString, Eq, PartialEq, VariantArray)]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    /// Keep the value as it is.
    Identity,
    /// Use the other LUKS version. Formats only.
    Invert,
    /// Leave the value out.
    Blank,
    /// Use a valid secret that belongs to no image. Passphrases only.
    WrongSecret,
}

impl FaultKind {
    pub const fn applies_to_format(self) -> bool {
        !matches!(self, FaultKind::WrongSecret)
    }

    pub const fn applies_to_passphrase(self) -> bool {
        !matches!(self, FaultKind::Invert)
    }
}

fn random_luks() -> EncryptionFormat {
    if rng().random_bool(0.5) {
        EncryptionFormat::Luks1
    } else {
        EncryptionFormat::Luks2
    }
}

/// Apply a fault to a slot's format. None means that no format is passed
/// and rbd falls back to its default.
pub fn apply_format_fault(
    kind: FaultKind,
    format: EncryptionFormat,
) -> RbdCryptResult<Option<EncryptionFormat>> {
    match kind {
        FaultKind::Identity => Ok(format.is_luks().then_some(format)),
        FaultKind::Invert => Ok(Some(format.inverted().unwrap_or_else(random_luks))),
        FaultKind::Blank => Ok(None),
        FaultKind::WrongSecret => Err(RbdCryptError::Msg(format!(
            "fault {kind} can not be applied to an encryption format"
        ))),
    }
}

/// Apply a fault to a slot's passphrase file. None means that the slot is
/// left out altogether. Dummy passphrase files are written to dir on the
/// host.
pub fn apply_passphrase_fault<H>(
    kind: FaultKind,
    passphrase: Option<&Path>,
    host: &H,
    dir: &Path,
) -> RbdCryptResult<Option<PathBuf>>
where
    H: RemoteFiles + ?Sized,
{
    match kind {
        FaultKind::Identity => Ok(passphrase.map(|p| p.to_owned())),
        FaultKind::Blank => Ok(None),
        FaultKind::WrongSecret => wrong_passphrase(host, dir).map(Some),
        FaultKind::Invert => Err(RbdCryptError::Msg(format!(
            "fault {kind} can not be applied to a passphrase"
        ))),
    }
}
