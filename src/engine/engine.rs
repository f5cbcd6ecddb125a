// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{fmt::Debug, path::Path};

use crate::{
    engine::types::{
        CloneFormat, CmdOutput, EncryptionFormat, ImageSpec, MapRequest, PassphraseRef, Size,
        SnapSpec,
    },
    rbdcrypt::RbdCryptResult,
};

/// The rbd operations the harness issues. Every call reports the cluster's
/// answer as a CmdOutput; an Err means the call could not be made at all.
pub trait RbdClient: Debug {
    fn create(&self, image: &ImageSpec, size: Size) -> RbdCryptResult<CmdOutput>;

    /// Write a LUKS header to the image, keyed by the passphrase file.
    fn encryption_format(
        &self,
        image: &ImageSpec,
        format: EncryptionFormat,
        passphrase_file: &Path,
    ) -> RbdCryptResult<CmdOutput>;

    /// Resize the image. With passphrases the size is the size as seen
    /// through the encryption layer.
    fn resize(
        &self,
        image: &ImageSpec,
        size: Size,
        allow_shrink: bool,
        passphrases: &[PassphraseRef],
    ) -> RbdCryptResult<CmdOutput>;

    fn snap_create(&self, snap: &SnapSpec) -> RbdCryptResult<CmdOutput>;

    fn snap_protect(&self, snap: &SnapSpec) -> RbdCryptResult<CmdOutput>;

    fn clone_image(
        &self,
        snap: &SnapSpec,
        target: &ImageSpec,
        clone_format: Option<CloneFormat>,
    ) -> RbdCryptResult<CmdOutput>;

    /// Map the image as a block device, make a filesystem unless told not
    /// to, mount it and run IO. Returns the output of the first step that
    /// failed, or the mapped device on success. A device that mapped but
    /// was not mounted is unmapped before returning.
    fn map_and_mount(&self, request: &MapRequest) -> RbdCryptResult<CmdOutput>;

    fn flatten(&self, image: &ImageSpec, passphrases: &[PassphraseRef])
        -> RbdCryptResult<CmdOutput>;

    /// Unmount whatever is mounted at mount_dir and unmap the image.
    fn unmount_and_unmap(
        &self,
        image: &ImageSpec,
        mount_dir: &Path,
        passphrases: &[PassphraseRef],
    ) -> RbdCryptResult<CmdOutput>;

    fn mirror_image_enable(&self, image: &ImageSpec, mode: &str) -> RbdCryptResult<CmdOutput>;

    /// `rbd status` in JSON on stdout.
    fn status(&self, image: &ImageSpec) -> RbdCryptResult<CmdOutput>;

    fn migration_prepare(
        &self,
        source: &ImageSpec,
        target: &ImageSpec,
    ) -> RbdCryptResult<CmdOutput>;

    fn migration_execute(&self, target: &ImageSpec) -> RbdCryptResult<CmdOutput>;

    fn migration_commit(&self, target: &ImageSpec) -> RbdCryptResult<CmdOutput>;

    fn migration_abort(&self, target: &ImageSpec) -> RbdCryptResult<CmdOutput>;
}

/// Files on the host that runs rbd.
pub trait RemoteFiles: Debug {
    fn create_file(&self, path: &Path, contents: &str) -> RbdCryptResult<CmdOutput>;

    fn read_file(&self, path: &Path) -> RbdCryptResult<String>;
}

pub trait ContentHasher: Debug {
    /// A digest of the file's content.
    fn checksum(&self, path: &Path) -> RbdCryptResult<String>;
}

/// A client node: somewhere rbd runs and files live.
pub trait Host: RbdClient + RemoteFiles + ContentHasher {
    /// How the host is named in messages.
    fn name(&self) -> &str;
}
