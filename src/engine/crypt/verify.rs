// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::{
    engine::{
        crypt::{
            device::{map_and_mount, map_request, EncryptedImage},
            keys::copy_passphrase,
        },
        engine::Host,
        shared::unique_file_path,
    },
    rbdcrypt::{HarnessConfig, RbdCryptError, RbdCryptResult},
};

/// Whether an artifact still has to be mounted before its file can be read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MountPolicy {
    AlreadyMounted,
    ReadOnly,
    ReadWrite,
}

/// A file on an encrypted image, as reached from one host.
#[derive(Debug)]
pub struct Artifact<'a, H: ?Sized> {
    pub host: &'a H,
    pub target: &'a EncryptedImage,
    pub mount: MountPolicy,
}

impl<'a, H> Artifact<'a, H>
where
    H: Host + ?Sized,
{
    pub fn new(host: &'a H, target: &'a EncryptedImage, mount: MountPolicy) -> Self {
        Artifact {
            host,
            target,
            mount,
        }
    }

    fn location(&self) -> String {
        format!(
            "{}:{} ({})",
            self.host.name(),
            self.target.file_path.display(),
            self.target.image
        )
    }

    fn checksum(&self, config: &HarnessConfig) -> RbdCryptResult<String> {
        let read_only = match self.mount {
            MountPolicy::AlreadyMounted => None,
            MountPolicy::ReadOnly => Some(true),
            MountPolicy::ReadWrite => Some(false),
        };
        if let Some(read_only) = read_only {
            map_and_mount(
                self.host,
                &map_request(config, self.target, read_only, true, None),
            )?;
        }
        let digest = self.host.checksum(&self.target.file_path)?;
        debug!("Checksum of {}: {digest}", self.location());
        Ok(digest)
    }
}

/// Mount the two artifacts as needed and succeed iff their files have the
/// same content.
pub fn verify_consistency<A, B>(
    config: &HarnessConfig,
    first: &Artifact<'_, A>,
    second: &Artifact<'_, B>,
) -> RbdCryptResult<()>
where
    A: Host + ?Sized,
    B: Host + ?Sized,
{
    let first_digest = first.checksum(config)?;
    let second_digest = second.checksum(config)?;
    if first_digest != second_digest {
        error!(
            "Data inconsistency found between {} and {}",
            first.location(),
            second.location()
        );
        return Err(RbdCryptError::Consistency {
            first: first.location(),
            second: second.location(),
            first_digest,
            second_digest,
        });
    }
    Ok(())
}

/// Copy the passphrases of a mounted image to the mirror host, mount the
/// mirrored image there read-only and check that it holds the same file.
/// Returns the mirrored image as mounted on the mirror host.
pub fn mount_image_and_mirror_and_check_data<P, M>(
    config: &HarnessConfig,
    primary: &P,
    mirror: &M,
    image: &EncryptedImage,
) -> RbdCryptResult<EncryptedImage>
where
    P: Host + ?Sized,
    M: Host + ?Sized,
{
    for path in image
        .chain
        .slots()
        .iter()
        .filter_map(|slot| slot.passphrase_file())
    {
        copy_passphrase(primary, mirror, path)?;
    }

    let mirror_file = match image.file_path.file_name() {
        Some(name) => unique_file_path(&config.workdir).with_file_name(name),
        None => unique_file_path(&config.workdir),
    };
    let mirrored = image.at(mirror_file);
    verify_consistency(
        config,
        &Artifact::new(primary, image, MountPolicy::AlreadyMounted),
        &Artifact::new(mirror, &mirrored, MountPolicy::ReadOnly),
    )?;
    info!(
        "Data of {} on {} is consistent with its mirror on {}",
        image.image,
        primary.name(),
        mirror.name()
    );
    Ok(mirrored)
}
