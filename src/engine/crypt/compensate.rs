// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resizes that make up for the space a LUKS header takes from an image.
//!
//! A LUKS2 header is larger than a LUKS1 header, so a clone formatted
//! differently from its parent would lose access to the tail of the
//! parent's data. The parent is grown before cloning to reserve room in the
//! snapshot; after cloning the parent may be shrunk back and the clone is
//! resized to the target size as seen through its own header.

use std::path::Path;

use crate::{
    engine::{
        engine::RbdClient,
        types::{
            CompensationAction, CompensationRule, EncryptionFormat, ImageSpec, ParentCloneSpec,
            PassphraseRef, ResizeIssued, ResizeSequence,
        },
    },
    rbdcrypt::{RbdCryptError, RbdCryptResult},
};

/// rbd's answer to a resize that would not change the size.
pub const SIZE_UNCHANGED: &str = "new size is equal to original size";

fn passphrase_ref(
    format: EncryptionFormat,
    passphrase: Option<&Path>,
    image: &ImageSpec,
) -> RbdCryptResult<PassphraseRef> {
    let path = passphrase.ok_or_else(|| {
        RbdCryptError::Msg(format!(
            "{image} is encrypted with {format} but no passphrase file was given for it"
        ))
    })?;
    Ok(PassphraseRef {
        format: Some(format),
        passphrase_file: path.to_owned(),
    })
}

fn issue<R>(
    rbd: &R,
    spec: &ParentCloneSpec,
    rule: CompensationRule,
    image: &ImageSpec,
    passphrases: Vec<PassphraseRef>,
) -> RbdCryptResult<ResizeIssued>
where
    R: RbdClient + ?Sized,
{
    let allow_shrink = rule != CompensationRule::GrowParent;
    let output = rbd.resize(image, spec.target_size, allow_shrink, &passphrases)?;
    info!("Output of rbd resize of {image} ({rule}): {}", output.text());

    let accepted = match rule {
        CompensationRule::ShrinkParent => {
            output.is_success() || output.text().contains(SIZE_UNCHANGED)
        }
        CompensationRule::GrowParent | CompensationRule::ResizeClone => output.is_success(),
    };
    if !accepted {
        error!("Resize to compensate for LUKS header overhead failed for {image}");
        return Err(RbdCryptError::Compensation {
            image: image.to_string(),
            rule: rule.to_string(),
            output: output.text(),
        });
    }

    Ok(ResizeIssued {
        rule,
        image: image.clone(),
        size: spec.target_size,
        allow_shrink,
        passphrases,
    })
}

/// Issue the resizes that compensate for LUKS header overhead at the given
/// point of the clone pipeline. Returns the resizes actually issued.
pub fn compensate<R>(
    rbd: &R,
    spec: &ParentCloneSpec,
    sequence: ResizeSequence,
) -> RbdCryptResult<CompensationAction>
where
    R: RbdClient + ?Sized,
{
    info!(
        "Compensating for the overhead of LUKS headers of {} {sequence}",
        spec.parent
    );
    let parent_format = spec.parent_format;

    let clone_format = match (sequence, spec.clone_format) {
        (ResizeSequence::BeforeClone, _) | (_, None) => {
            if sequence == ResizeSequence::AfterClone {
                info!("No clone given; nothing to resize after clone");
                return Ok(CompensationAction::Identity);
            }
            if !parent_format.is_luks() {
                info!("Parent image resize not required since it is not encrypted");
                return Ok(CompensationAction::Identity);
            }
            let passphrase = passphrase_ref(
                parent_format,
                spec.parent_passphrase.as_deref(),
                &spec.parent,
            )?;
            let issued = issue(
                rbd,
                spec,
                CompensationRule::GrowParent,
                &spec.parent,
                vec![passphrase],
            )?;
            return Ok(CompensationAction::Resized(vec![issued]));
        }
        (ResizeSequence::AfterClone, Some(clone_format)) => clone_format,
    };

    let mut issued = Vec::new();

    if parent_format == EncryptionFormat::Luks1 && clone_format == EncryptionFormat::Luks2 {
        let passphrase = passphrase_ref(
            parent_format,
            spec.parent_passphrase.as_deref(),
            &spec.parent,
        )?;
        issued.push(issue(
            rbd,
            spec,
            CompensationRule::ShrinkParent,
            &spec.parent,
            vec![passphrase],
        )?);
    }

    if clone_format.is_luks() && clone_format != parent_format {
        let clone = spec.clone.as_ref().ok_or_else(|| {
            RbdCryptError::Msg(format!(
                "clone format {clone_format} given for {} without a clone image",
                spec.parent
            ))
        })?;
        let mut passphrases = vec![passphrase_ref(
            clone_format,
            spec.clone_passphrase.as_deref(),
            clone,
        )?];
        if parent_format.is_luks() {
            passphrases.push(passphrase_ref(
                parent_format,
                spec.parent_passphrase.as_deref(),
                &spec.parent,
            )?);
        }
        issued.push(issue(
            rbd,
            spec,
            CompensationRule::ResizeClone,
            clone,
            passphrases,
        )?);
    } else {
        info!("Clone resize not required since clone is either not encrypted or encrypted with same format as parent");
    }

    if issued.is_empty() {
        Ok(CompensationAction::Identity)
    } else {
        Ok(CompensationAction::Resized(issued))
    }
}
