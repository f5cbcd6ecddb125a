// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provisioning of the passphrase files that key LUKS headers.

use std::path::{Path, PathBuf};

use data_encoding::BASE64URL_NOPAD;
use rand::{rng, Rng};

use crate::{
    engine::{engine::RemoteFiles, shared::random_string, types::EncryptionFormat},
    rbdcrypt::{RbdCryptError, RbdCryptResult},
};

const SECRET_BYTES: usize = 32;

/// A fresh random secret in a form that is safe to write to a text file.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rng().fill(&mut bytes);
    BASE64URL_NOPAD.encode(&bytes)
}

/// Name of the passphrase file of an image encrypted with format.
pub fn passphrase_file_name(format: EncryptionFormat) -> String {
    format!("{format}_passphrase.bin")
}

/// Name of the passphrase file of a clone encrypted with format.
pub fn clone_passphrase_file_name(format: EncryptionFormat) -> String {
    format!("clone_{format}_passphrase.bin")
}

/// Write a fresh random secret to path on the host.
pub fn create_passphrase_file<H>(host: &H, path: &Path) -> RbdCryptResult<()>
where
    H: RemoteFiles + ?Sized,
{
    write_secret(host, path, &generate_secret())?;
    info!("Created passphrase file {}", path.display());
    Ok(())
}

/// Write a secret unrelated to any image to a new file in dir and return
/// its path.
pub fn wrong_passphrase<H>(host: &H, dir: &Path) -> RbdCryptResult<PathBuf>
where
    H: RemoteFiles + ?Sized,
{
    let path = dir.join(format!("dummy_{}_passphrase.bin", random_string(5)));
    write_secret(host, &path, &generate_secret())?;
    debug!("Created dummy passphrase file {}", path.display());
    Ok(path)
}

/// Copy the passphrase file at path on one host to the same path on
/// another.
pub fn copy_passphrase<F, T>(from: &F, to: &T, path: &Path) -> RbdCryptResult<()>
where
    F: RemoteFiles + ?Sized,
    T: RemoteFiles + ?Sized,
{
    let secret = from
        .read_file(path)
        .map_err(|e| RbdCryptError::Provisioning {
            path: path.to_owned(),
            reason: format!("could not read source file: {e}"),
        })?;
    write_secret(to, path, &secret)
}

fn write_secret<H>(host: &H, path: &Path, secret: &str) -> RbdCryptResult<()>
where
    H: RemoteFiles + ?Sized,
{
    match host.create_file(path, secret) {
        Ok(output) if output.is_success() => Ok(()),
        Ok(output) => Err(RbdCryptError::Provisioning {
            path: path.to_owned(),
            reason: output.text(),
        }),
        Err(e) => Err(RbdCryptError::Provisioning {
            path: path.to_owned(),
            reason: e.to_string(),
        }),
    }
}
