// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use assert_matches::assert_matches;
use serde_json::Value;

use rbdcrypt::{
    engine::{
        encrypt_image, mount_image_and_mirror_and_check_data,
        test_encryption_between_image_and_clone, unique_file_path, EncryptedImage,
        EncryptionFormat, ErrorClassifier, ImageSpec, LayeredImages, RbdClient, ScenarioExecutor,
        ScenarioTarget, SignatureMatch, SimHost,
    },
    rbdcrypt::{HarnessConfig, RbdCryptError},
};

use common::{config, image, pair, sim_sites};

mod common;

fn encrypted_parent(
    host: &SimHost,
    config: &HarnessConfig,
    format: EncryptionFormat,
) -> EncryptedImage {
    let parent = image("parent");
    host.create(&parent, config.image_size).unwrap();
    encrypt_image(
        host,
        config,
        &parent,
        format,
        unique_file_path(&config.workdir),
    )
    .unwrap()
}

fn standalone(image: &EncryptedImage, read_only: bool) -> ScenarioTarget {
    ScenarioTarget {
        image: image.image.clone(),
        parent: None,
        chain: image.chain.clone(),
        read_only,
    }
}

fn layered(
    host: &SimHost,
    config: &HarnessConfig,
    formats: &str,
) -> (LayeredImages, ScenarioTarget) {
    let pair = pair(formats);
    let images = test_encryption_between_image_and_clone(
        host,
        config,
        pair,
        &image("parent"),
        &image("clone"),
    )
    .unwrap();
    let chain = if pair.parent.is_luks() {
        images.clone.chain.clone()
    } else {
        images.clone.chain.clone().with_unencrypted_parent().unwrap()
    };
    let target = ScenarioTarget {
        image: images.clone.image.clone(),
        parent: Some(images.parent.image.clone()),
        chain,
        read_only: false,
    };
    (images, target)
}

fn watchers(host: &SimHost, spec: &ImageSpec) -> usize {
    let status: Value = serde_json::from_str(&host.status(spec).unwrap().stdout).unwrap();
    status["watchers"].as_array().unwrap().len()
}

#[test]
// Mounting a LUKS image without any encryption config finds the LUKS
// signature where a filesystem should be.
fn test_no_config_on_standalone_image() {
    let sites = sim_sites();
    let config = config();
    let parent = encrypted_parent(&sites.primary, &config, EncryptionFormat::Luks1);

    let outcomes = ScenarioExecutor::new(&sites.primary, &config)
        .run(&standalone(&parent, false), &[3])
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].id, 3);
    assert_eq!(outcomes[0].matched, SignatureMatch::Primary);
    assert!(outcomes[0]
        .error
        .contains("unknown filesystem type 'crypto_LUKS'"));
}

#[test]
// Attempts that map but fail to mount leave nothing mapped behind.
fn test_failed_attempts_unmap() {
    let sites = sim_sites();
    let config = config();
    let parent = encrypted_parent(&sites.primary, &config, EncryptionFormat::Luks1);
    let before = watchers(&sites.primary, &parent.image);
    assert_eq!(before, 1);

    ScenarioExecutor::new(&sites.primary, &config)
        .run(&standalone(&parent, false), &[3, 3, 3, 4, 1, 2])
        .unwrap();
    assert_eq!(watchers(&sites.primary, &parent.image), before);

    let (images, target) = layered(&sites.primary, &config, "luks1,luks2");
    let before = watchers(&sites.primary, &images.clone.image);
    ScenarioExecutor::new(&sites.primary, &config)
        .run(&target, &(5..=13).collect::<Vec<u8>>())
        .unwrap();
    assert_eq!(watchers(&sites.primary, &images.clone.image), before);
}

#[test]
// The standalone scenarios against LUKS1 and LUKS2 images.
fn test_standalone_scenarios() {
    for format in EncryptionFormat::LUKS {
        let sites = sim_sites();
        let config = config();
        let parent = encrypted_parent(&sites.primary, &config, format);
        let outcomes = ScenarioExecutor::new(&sites.primary, &config)
            .run(&standalone(&parent, false), &[4, 1, 2, 3])
            .unwrap();
        let ids: Vec<u8> = outcomes.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![4, 1, 2, 3]);
        assert!(outcomes[2].error.contains("(1) Operation not permitted"));
    }
}

#[test]
// Forcing a read-write mount of a mirrored image can not read its
// superblock.
fn test_read_write_mount_of_mirror() {
    let sites = sim_sites();
    let config = config();
    let parent = encrypted_parent(&sites.primary, &config, EncryptionFormat::Luks2);
    assert!(sites
        .primary
        .mirror_image_enable(&parent.image, "snapshot")
        .unwrap()
        .is_success());
    let mirrored =
        mount_image_and_mirror_and_check_data(&config, &sites.primary, &sites.mirror, &parent)
            .unwrap();

    let outcomes = ScenarioExecutor::new(&sites.mirror, &config)
        .run(&standalone(&mirrored, true), &[1, 16])
        .unwrap();
    assert_eq!(outcomes[0].id, 16);
    assert!(outcomes[0].error.contains("can't read superblock"));
    assert_eq!(outcomes[1].id, 1);
}

#[test]
// The faulted config lists the clone's slot before its parent's.
fn test_chain_order_clone_then_parent() {
    let sites = sim_sites();
    let config = config();
    let (images, target) = layered(&sites.primary, &config, "luks1,luks1");
    let clone_ref = images.clone.chain.image().unwrap().as_passphrase_ref().unwrap();
    let parent_ref = images.parent.chain.image().unwrap().as_passphrase_ref().unwrap();

    sites.primary.clear_calls();
    ScenarioExecutor::new(&sites.primary, &config)
        .run(&target, &[6])
        .unwrap();

    let attempts = sites.primary.calls_of("map_and_mount");
    assert_eq!(attempts.len(), 1);
    let passphrases = &attempts[0].passphrases;
    assert_eq!(passphrases.len(), 2);
    assert_eq!(passphrases[0], clone_ref);
    assert_eq!(passphrases[1].format, parent_ref.format);
    assert_ne!(passphrases[1].passphrase_file, parent_ref.passphrase_file);
}

#[test]
// Parent scenarios against an image without a parent are refused before
// anything is run.
fn test_parent_scenarios_need_parent() {
    let sites = sim_sites();
    let config = config();
    let parent = encrypted_parent(&sites.primary, &config, EncryptionFormat::Luks1);
    let target = standalone(&parent, false);

    sites.primary.clear_calls();
    for id in 5..=14 {
        assert_matches!(
            ScenarioExecutor::new(&sites.primary, &config).run(&target, &[1, id]),
            Err(RbdCryptError::ScenarioPrecondition { scenario, chain_len: 1 }) if scenario == id
        );
    }
    assert_matches!(
        ScenarioExecutor::new(&sites.primary, &config).run(&target, &[17]),
        Err(RbdCryptError::ScenarioPrecondition { scenario: 17, .. })
    );
    assert!(sites.primary.calls().is_empty());
}

#[test]
// A scenario that does not fail is an assertion error and its mount is
// undone.
fn test_unexpected_success() {
    let sites = sim_sites();
    let config = config();
    let parent = encrypted_parent(&sites.primary, &config, EncryptionFormat::Luks1);
    let mounted = sites.primary.mounted_dirs();

    assert_matches!(
        ScenarioExecutor::new(&sites.primary, &config).run(&standalone(&parent, false), &[16]),
        Err(RbdCryptError::ScenarioAssertion { scenario: 16, ref actual, .. })
            if actual == "did not throw any error"
    );
    assert_eq!(sites.primary.mounted_dirs(), mounted);
}

#[test]
// A scenario that fails with the wrong error is an assertion error naming
// the error it expected.
fn test_mismatched_error() {
    let sites = sim_sites();
    let config = config();
    let parent = encrypted_parent(&sites.primary, &config, EncryptionFormat::Luks1);

    assert_matches!(
        ScenarioExecutor::new(&sites.primary, &config).run(&standalone(&parent, false), &[15]),
        Err(RbdCryptError::ScenarioAssertion { scenario: 15, ref expected, ref actual, .. })
            if expected.contains("wrong fs type") && actual.contains("crypto_LUKS")
    );
}

#[derive(Debug)]
struct NeverMatches;

impl ErrorClassifier for NeverMatches {
    fn matches(&self, _: &[String], _: &str) -> bool {
        false
    }
}

#[test]
// The classifier decides which errors count as expected.
fn test_custom_classifier() {
    let sites = sim_sites();
    let config = config();
    let parent = encrypted_parent(&sites.primary, &config, EncryptionFormat::Luks1);

    assert_matches!(
        ScenarioExecutor::new(&sites.primary, &config)
            .with_classifier(NeverMatches)
            .run(&standalone(&parent, false), &[1]),
        Err(RbdCryptError::ScenarioAssertion { scenario: 1, .. })
    );
}

#[test]
// Both LUKS layers faulted in every way a layered clone is tested.
fn test_layered_clone_scenarios() {
    for formats in ["luks1,luks1", "luks1,luks2", "luks2,luks1", "luks2,luks2"] {
        let sites = sim_sites();
        let config = config();
        let (_, target) = layered(&sites.primary, &config, formats);
        let outcomes = ScenarioExecutor::new(&sites.primary, &config)
            .run(&target, &(5..=13).collect::<Vec<u8>>())
            .unwrap_or_else(|e| panic!("format pair {formats}: {e}"));
        assert_eq!(outcomes.len(), 9);
    }
}

#[test]
// A LUKS clone of an unencrypted parent, and an unencrypted clone of a
// LUKS parent.
fn test_half_encrypted_clone_scenarios() {
    for (formats, ids) in [
        ("NA,luks1", vec![8, 11, 12, 14]),
        ("NA,luks2", vec![8, 11, 12, 14]),
        ("luks1,NA", vec![1, 2, 4, 15]),
        ("luks2,NA", vec![1, 2, 4, 15]),
    ] {
        let sites = sim_sites();
        let config = config();
        let (_, target) = layered(&sites.primary, &config, formats);
        let outcomes = ScenarioExecutor::new(&sites.primary, &config)
            .run(&target, &ids)
            .unwrap_or_else(|e| panic!("format pair {formats}: {e}"));
        assert_eq!(outcomes.iter().map(|o| o.id).collect::<Vec<_>>(), ids);
    }
}
