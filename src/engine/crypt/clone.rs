// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Encryption of standalone images and of copy-on-write clones.

use std::path::PathBuf;

use crate::{
    engine::{
        crypt::{
            compensate::compensate,
            device::{map_and_mount, map_request, EncryptedImage},
            keys::{clone_passphrase_file_name, create_passphrase_file, passphrase_file_name},
            verify::{verify_consistency, Artifact, MountPolicy},
        },
        engine::Host,
        shared::unique_file_path,
        types::{
            CloneFormat, EncryptionChain, EncryptionFormat, EncryptionSlot, FormatPair, ImageSpec,
            ParentCloneSpec, PipelineStep, ResizeSequence, Size,
        },
    },
    rbdcrypt::{HarnessConfig, RbdCryptResult},
};

/// What to clone from where, and how to encrypt the clone.
#[derive(Clone, Debug)]
pub struct CloneRequest {
    pub parent: ImageSpec,
    /// The parent's own encryption.
    pub parent_slot: EncryptionSlot,
    pub snap_name: String,
    pub clone: ImageSpec,
    pub clone_format: EncryptionFormat,
    /// Passphrase file for the clone; a fresh one in the work directory if
    /// None.
    pub clone_passphrase: Option<PathBuf>,
    pub cow_format: Option<CloneFormat>,
    pub target_size: Size,
    pub file_path: PathBuf,
    pub do_not_map_and_mount: bool,
}

/// A parent image and a clone of it, both mounted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LayeredImages {
    pub parent: EncryptedImage,
    pub clone: EncryptedImage,
}

/// Apply format to an image, compensate for its header, then map and mount
/// it and write the configured IO to file_path. The image must exist.
pub fn encrypt_image<H>(
    host: &H,
    config: &HarnessConfig,
    image: &ImageSpec,
    format: EncryptionFormat,
    file_path: PathBuf,
) -> RbdCryptResult<EncryptedImage>
where
    H: Host + ?Sized,
{
    let slot = if format.is_luks() {
        let passphrase = config.workdir.join(passphrase_file_name(format));
        create_passphrase_file(host, &passphrase)?;
        expect_success!(
            host.encryption_format(image, format, &passphrase)?,
            PipelineStep::EncryptionFormat,
            image
        );
        info!("Applied {format} encryption to {image}");
        let slot = EncryptionSlot::luks(format, passphrase)?;
        compensate(
            host,
            &ParentCloneSpec::parent_only(
                format,
                image.clone(),
                slot.passphrase_file().map(|p| p.to_owned()),
                config.image_size,
            ),
            ResizeSequence::BeforeClone,
        )?;
        slot
    } else {
        EncryptionSlot::unencrypted()
    };

    let target = EncryptedImage::new(image.clone(), EncryptionChain::single(slot), file_path);
    map_and_mount(
        host,
        &map_request(config, &target, false, false, Some(config.io.clone())),
    )?;
    Ok(target)
}

/// Snapshot, protect and clone the parent, encrypt the clone and
/// compensate for header overhead, then map and mount the clone unless
/// asked not to. Returns the chain that opens the clone.
pub fn create_and_encrypt_clone<H>(
    host: &H,
    config: &HarnessConfig,
    request: &CloneRequest,
) -> RbdCryptResult<EncryptedImage>
where
    H: Host + ?Sized,
{
    let snap = request.parent.snap(&request.snap_name)?;
    expect_success!(host.snap_create(&snap)?, PipelineStep::SnapCreate, snap);
    expect_success!(host.snap_protect(&snap)?, PipelineStep::SnapProtect, snap);
    expect_success!(
        host.clone_image(&snap, &request.clone, request.cow_format)?,
        PipelineStep::Clone,
        request.clone
    );
    info!("Created clone {} of {snap}", request.clone);

    let parent_format = request.parent_slot.format();
    let clone_format = request.clone_format;

    let (chain, clone_passphrase) = if clone_format.is_luks() {
        let passphrase = request
            .clone_passphrase
            .clone()
            .unwrap_or_else(|| config.workdir.join(clone_passphrase_file_name(clone_format)));
        create_passphrase_file(host, &passphrase)?;
        let clone_slot = EncryptionSlot::luks(clone_format, passphrase.clone())?;
        let chain = if request.parent_slot.is_encrypted() {
            EncryptionChain::layered(clone_slot, request.parent_slot.clone())
        } else {
            EncryptionChain::single(clone_slot)
        };
        expect_success!(
            host.encryption_format(&request.clone, clone_format, &passphrase)?,
            PipelineStep::EncryptionFormat,
            request.clone
        );
        info!("Applied {clone_format} encryption to {}", request.clone);
        (chain, Some(passphrase))
    } else {
        (EncryptionChain::single(request.parent_slot.clone()), None)
    };

    compensate(
        host,
        &ParentCloneSpec {
            parent_format,
            parent: request.parent.clone(),
            parent_passphrase: request.parent_slot.passphrase_file().map(|p| p.to_owned()),
            clone_format: Some(clone_format),
            clone: Some(request.clone.clone()),
            clone_passphrase,
            target_size: request.target_size,
        },
        ResizeSequence::AfterClone,
    )?;

    let target = EncryptedImage::new(request.clone.clone(), chain, request.file_path.clone());
    if !request.do_not_map_and_mount {
        map_and_mount(host, &map_request(config, &target, false, true, None))?;
    }
    Ok(target)
}

/// Encrypt a new parent image and write to it, clone it and encrypt the
/// clone, then check that the file written to the parent reads the same
/// through the clone.
pub fn test_encryption_between_image_and_clone<H>(
    host: &H,
    config: &HarnessConfig,
    pair: FormatPair,
    parent: &ImageSpec,
    clone: &ImageSpec,
) -> RbdCryptResult<LayeredImages>
where
    H: Host + ?Sized,
{
    info!("Testing {pair} encryption between {parent} and {clone}");
    expect_success!(
        host.create(parent, config.image_size)?,
        PipelineStep::Create,
        parent
    );

    let parent_file = unique_file_path(&config.workdir);
    let parent = encrypt_image(host, config, parent, pair.parent, parent_file.clone())?;

    // The clone sees the parent's file under the same name.
    let clone_file = match parent_file.file_name() {
        Some(name) => unique_file_path(&config.workdir).with_file_name(name),
        None => unique_file_path(&config.workdir),
    };
    let request = CloneRequest {
        parent: parent.image.clone(),
        parent_slot: parent
            .chain
            .image()
            .cloned()
            .unwrap_or_else(EncryptionSlot::unencrypted),
        snap_name: format!("{}_snap", parent.image.name()),
        clone: clone.clone(),
        clone_format: pair.clone,
        clone_passphrase: None,
        cow_format: None,
        target_size: config.image_size,
        file_path: clone_file,
        do_not_map_and_mount: false,
    };
    let clone = create_and_encrypt_clone(host, config, &request)?;

    verify_consistency(
        config,
        &Artifact::new(host, &parent, MountPolicy::AlreadyMounted),
        &Artifact::new(host, &clone, MountPolicy::AlreadyMounted),
    )?;
    info!("Data of {} is consistent with its clone {}", parent.image, clone.image);

    Ok(LayeredImages { parent, clone })
}

/// Flatten a clone, cutting it loose from its parent. The flattened image
/// is opened by the innermost slot of its former chain only.
pub fn flatten_clone<H>(host: &H, clone: &EncryptedImage) -> RbdCryptResult<EncryptedImage>
where
    H: Host + ?Sized,
{
    expect_success!(
        host.flatten(&clone.image, &clone.chain.passphrase_refs())?,
        PipelineStep::Flatten,
        clone.image
    );
    info!("Flattened {}", clone.image);
    Ok(EncryptedImage::new(
        clone.image.clone(),
        clone.chain.innermost(),
        clone.file_path.clone(),
    ))
}
