// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use crate::{
    engine::{
        engine::Host,
        types::{
            CmdOutput, EncryptionChain, ImageSpec, IoProfile, MapRequest, PassphraseRef,
            PipelineStep,
        },
    },
    rbdcrypt::{HarnessConfig, RbdCryptResult},
};

/// An image with the encryption chain that opens it and the path of a file
/// on its mounted filesystem.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptedImage {
    pub image: ImageSpec,
    pub chain: EncryptionChain,
    pub file_path: PathBuf,
}

impl EncryptedImage {
    pub fn new(image: ImageSpec, chain: EncryptionChain, file_path: PathBuf) -> Self {
        EncryptedImage {
            image,
            chain,
            file_path,
        }
    }

    /// The same image and chain with a file at a different path.
    pub fn at(&self, file_path: PathBuf) -> EncryptedImage {
        EncryptedImage {
            image: self.image.clone(),
            chain: self.chain.clone(),
            file_path,
        }
    }
}

/// A map request for image that opens it with chain and mounts it at the
/// directory of file_path, using the configured device type and
/// filesystem.
pub fn map_request(
    config: &HarnessConfig,
    target: &EncryptedImage,
    read_only: bool,
    skip_mkfs: bool,
    io: Option<IoProfile>,
) -> MapRequest {
    MapRequest {
        image: target.image.clone(),
        encryption: target.chain.passphrase_refs(),
        read_only,
        device_type: config.device_type,
        filesystem: config.filesystem.clone(),
        file_path: target.file_path.clone(),
        skip_mkfs,
        io,
    }
}

/// Map and mount, failing with a pipeline error if any part fails.
pub fn map_and_mount<H>(host: &H, request: &MapRequest) -> RbdCryptResult<CmdOutput>
where
    H: Host + ?Sized,
{
    info!(
        "Mapping {} on {} and mounting it at {}",
        request.image,
        host.name(),
        request.mount_dir().display()
    );
    Ok(expect_success!(
        host.map_and_mount(request)?,
        PipelineStep::MapMount,
        request.image
    ))
}

/// Unmount and unmap an image mounted at the directory of file_path.
/// Failures are logged and otherwise ignored.
pub fn device_cleanup<H>(
    host: &H,
    image: &ImageSpec,
    file_path: &Path,
    passphrases: &[PassphraseRef],
) where
    H: Host + ?Sized,
{
    let mount_dir = match file_path.parent() {
        Some(dir) => dir,
        None => return,
    };
    match host.unmount_and_unmap(image, mount_dir, passphrases) {
        Ok(output) if output.is_success() => {
            debug!("Unmounted and unmapped {image} on {}", host.name())
        }
        Ok(output) => warn!(
            "Cleanup of {image} mounted at {} on {} failed: {}",
            mount_dir.display(),
            host.name(),
            output.text()
        ),
        Err(e) => warn!(
            "Cleanup of {image} mounted at {} on {} failed: {e}",
            mount_dir.display(),
            host.name()
        ),
    }
}

/// Unmount and unmap an encrypted image, logging failures.
pub fn cleanup_image<H>(host: &H, target: &EncryptedImage)
where
    H: Host + ?Sized,
{
    device_cleanup(
        host,
        &target.image,
        &target.file_path,
        &target.chain.passphrase_refs(),
    )
}
