// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use rbdcrypt::{
    engine::{
        compensate, encrypt_image, flatten_clone, test_encryption_between_image_and_clone,
        unique_file_path, verify_consistency, Artifact, CompensationAction, CompensationRule,
        EncryptionFormat, MountPolicy, ParentCloneSpec, RbdClient, ResizeSequence, Size,
    },
};

use common::{all_pairs, config, image, pair, sim_sites};

mod common;

#[test]
// Data written to a LUKS1 parent reads the same through its LUKS1 clone.
fn test_luks1_clone_consistent() {
    let sites = sim_sites();
    let config = config();
    let images = test_encryption_between_image_and_clone(
        &sites.primary,
        &config,
        pair("luks1,luks1"),
        &image("parent"),
        &image("clone"),
    )
    .unwrap();

    assert_eq!(images.clone.chain.len(), 2);
    verify_consistency(
        &config,
        &Artifact::new(&sites.primary, &images.parent, MountPolicy::AlreadyMounted),
        &Artifact::new(&sites.primary, &images.clone, MountPolicy::AlreadyMounted),
    )
    .unwrap();
}

#[test]
// A LUKS2 parent is grown before cloning, its LUKS1 clone shrunk after.
fn test_luks2_luks1_resize_order() {
    let sites = sim_sites();
    let config = config();
    let images = test_encryption_between_image_and_clone(
        &sites.primary,
        &config,
        pair("luks2,luks1"),
        &image("parent"),
        &image("clone"),
    )
    .unwrap();

    let resizes = sites.primary.calls_of("resize");
    assert_eq!(resizes.len(), 2);

    assert_eq!(resizes[0].target, "qe_pool/parent");
    assert!(resizes[0].detail.ends_with("allow_shrink=false"));
    assert_eq!(resizes[0].passphrases.len(), 1);
    assert_eq!(resizes[0].passphrases[0].format, Some(EncryptionFormat::Luks2));

    assert_eq!(resizes[1].target, "qe_pool/clone");
    assert!(resizes[1].detail.ends_with("allow_shrink=true"));
    let formats: Vec<_> = resizes[1].passphrases.iter().map(|p| p.format).collect();
    assert_eq!(
        formats,
        vec![Some(EncryptionFormat::Luks1), Some(EncryptionFormat::Luks2)]
    );

    let cluster = sites.primary.cluster();
    assert_eq!(
        cluster.image_size(&images.clone.image),
        Some(Size::from_bytes(
            config.image_size.bytes() + EncryptionFormat::Luks1.header_overhead()
        ))
    );
}

#[test]
// Only the parent passphrase goes along with the single grow before cloning.
fn test_grow_before_clone() {
    let sites = sim_sites();
    let config = config();
    let parent = image("parent");
    sites.primary.create(&parent, config.image_size).unwrap();
    encrypt_image(
        &sites.primary,
        &config,
        &parent,
        EncryptionFormat::Luks1,
        unique_file_path(&config.workdir),
    )
    .unwrap();

    let resizes = sites.primary.calls_of("resize");
    assert_eq!(resizes.len(), 1);
    assert_eq!(resizes[0].passphrases.len(), 1);
    assert_eq!(
        resizes[0].passphrases[0].passphrase_file,
        PathBuf::from("/qe/luks1_passphrase.bin")
    );

    let plain = image("plain");
    sites.primary.create(&plain, config.image_size).unwrap();
    sites.primary.clear_calls();
    encrypt_image(
        &sites.primary,
        &config,
        &plain,
        EncryptionFormat::None,
        unique_file_path(&config.workdir),
    )
    .unwrap();
    assert!(sites.primary.calls_of("resize").is_empty());
}

#[test]
// The parent shrink after cloning is accepted whether or not it changes the
// size.
fn test_parent_shrink_accepted() {
    let sites = sim_sites();
    let config = config();
    test_encryption_between_image_and_clone(
        &sites.primary,
        &config,
        pair("luks1,luks2"),
        &image("parent"),
        &image("clone"),
    )
    .unwrap();
    let resizes = sites.primary.calls_of("resize");
    assert_eq!(
        resizes.iter().map(|r| r.target.as_str()).collect::<Vec<_>>(),
        vec!["qe_pool/parent", "qe_pool/parent", "qe_pool/clone"]
    );
    assert!(resizes[1].detail.ends_with("allow_shrink=true"));
}

#[test]
// Compensating a balanced pair twice issues no resize either time.
fn test_balanced_pair_twice_is_identity() {
    let sites = sim_sites();
    for format in EncryptionFormat::LUKS {
        let spec = ParentCloneSpec {
            parent_format: format,
            parent: image("parent"),
            parent_passphrase: Some(PathBuf::from("/qe/parent.bin")),
            clone_format: Some(format),
            clone: Some(image("clone")),
            clone_passphrase: Some(PathBuf::from("/qe/clone.bin")),
            target_size: Size::from_gib(1),
        };
        for _ in 0..2 {
            let action = compensate(&sites.primary, &spec, ResizeSequence::AfterClone).unwrap();
            assert_eq!(action, CompensationAction::Identity);
            assert!(action.issued().is_empty());
        }
    }
    assert!(sites.primary.calls().is_empty());
}

#[test]
// The compensation after cloning shrinks the parent back when it grew.
fn test_compensation_rules_recorded() {
    let sites = sim_sites();
    let config = config();
    let images = test_encryption_between_image_and_clone(
        &sites.primary,
        &config,
        pair("luks1,luks2"),
        &image("parent"),
        &image("clone"),
    )
    .unwrap();
    let parent_slot = images.parent.chain.image().unwrap();

    // Grow both past their target so that the resizes do change them.
    sites
        .primary
        .resize(
            &images.parent.image,
            Size::from_gib(2),
            false,
            &[parent_slot.as_passphrase_ref().unwrap()],
        )
        .unwrap();

    let clone_slot = images.clone.chain.image().unwrap();
    sites
        .primary
        .resize(
            &images.clone.image,
            Size::from_gib(2),
            false,
            &images.clone.chain.passphrase_refs(),
        )
        .unwrap();

    let spec = ParentCloneSpec {
        parent_format: EncryptionFormat::Luks1,
        parent: images.parent.image.clone(),
        parent_passphrase: parent_slot.passphrase_file().map(|p| p.to_owned()),
        clone_format: Some(EncryptionFormat::Luks2),
        clone: Some(images.clone.image.clone()),
        clone_passphrase: clone_slot.passphrase_file().map(|p| p.to_owned()),
        target_size: config.image_size,
    };
    let action = compensate(&sites.primary, &spec, ResizeSequence::AfterClone).unwrap();
    let rules: Vec<_> = action.issued().iter().map(|r| r.rule).collect();
    assert_eq!(
        rules,
        vec![CompensationRule::ShrinkParent, CompensationRule::ResizeClone]
    );
}

#[test]
// Every combination of parent and clone encryption opens consistently.
fn test_all_format_pairs() {
    for pair in all_pairs() {
        let sites = sim_sites();
        let config = config();
        let images = test_encryption_between_image_and_clone(
            &sites.primary,
            &config,
            pair,
            &image("parent"),
            &image("clone"),
        )
        .unwrap_or_else(|e| panic!("format pair {pair}: {e}"));
        assert_eq!(
            images.clone.chain.is_encrypted(),
            pair.parent.is_luks() || pair.clone.is_luks()
        );
    }
}

#[test]
// A flattened clone drops its parent and opens with its own slot only.
fn test_flatten_clone() {
    let sites = sim_sites();
    let config = config();
    let images = test_encryption_between_image_and_clone(
        &sites.primary,
        &config,
        pair("luks2,luks1"),
        &image("parent"),
        &image("clone"),
    )
    .unwrap();
    let cluster = sites.primary.cluster();
    assert_eq!(cluster.has_parent(&images.clone.image), Some(true));

    let flattened = flatten_clone(&sites.primary, &images.clone).unwrap();
    assert_eq!(cluster.has_parent(&flattened.image), Some(false));
    assert_eq!(flattened.chain.len(), 1);
    assert_eq!(
        flattened.chain.image().map(|s| s.format()),
        Some(EncryptionFormat::Luks1)
    );
    assert_eq!(sites.primary.calls_of("flatten")[0].passphrases.len(), 2);
}
