// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Layered encryption across a mirrored pair of clusters.

use std::fmt;

use crate::{
    engine::{
        crypt::{
            cleanup_image, create_and_encrypt_clone, flatten_clone,
            mount_image_and_mirror_and_check_data, test_encryption_between_image_and_clone,
            CloneRequest, EncryptedImage,
        },
        engine::Host,
        negative::{select_scenarios, ScenarioExecutor, ScenarioOutcome, ScenarioTarget, Stage},
        shared::{random_string, unique_file_path},
        types::{EncryptionSlot, FormatPair, ImageSpec, PipelineStep},
    },
    rbdcrypt::{HarnessConfig, RbdCryptResult},
};

/// The negative scenarios run at one stage of the workflow.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StageOutcome {
    pub stage: Stage,
    pub image: ImageSpec,
    pub scenarios: Vec<ScenarioOutcome>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MirrorReport {
    pub pair: FormatPair,
    pub stages: Vec<StageOutcome>,
}

impl fmt::Display for MirrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "format pair {}:", self.pair)?;
        for stage in &self.stages {
            writeln!(
                f,
                "  {} ({}): scenarios [{}] failed as expected",
                stage.stage,
                stage.image,
                itertools::join(stage.scenarios.iter().map(|s| s.id), ", ")
            )?;
        }
        Ok(())
    }
}

/// Images mounted along the way, unmounted when the workflow ends.
#[derive(Debug, Default)]
struct Mounted {
    primary: Vec<EncryptedImage>,
    mirror: Vec<EncryptedImage>,
}

fn run_stage<H>(
    host: &H,
    config: &HarnessConfig,
    stage: Stage,
    target: ScenarioTarget,
    pair: FormatPair,
) -> RbdCryptResult<StageOutcome>
where
    H: Host + ?Sized,
{
    let ids = select_scenarios(stage, pair.parent.is_luks(), pair.clone.is_luks());
    info!("Stage {stage}: negative scenarios {ids:?} against {}", target.image);
    let scenarios = ScenarioExecutor::new(host, config).run(&target, &ids)?;
    Ok(StageOutcome {
        stage,
        image: target.image,
        scenarios,
    })
}

fn standalone_target(image: &EncryptedImage, read_only: bool) -> ScenarioTarget {
    ScenarioTarget {
        image: image.image.clone(),
        parent: None,
        chain: image.chain.clone(),
        read_only,
    }
}

/// Encrypt a parent and a clone with the given formats, flatten the clone,
/// mirror both and check their data on the mirror host, then run the
/// negative scenarios fitting each image on both hosts. Everything mounted
/// is unmounted at the end, whether the workflow succeeded or not.
pub fn test_mirrored_encryption<P, M>(
    config: &HarnessConfig,
    primary: &P,
    mirror: &M,
    pair: FormatPair,
    parent: &ImageSpec,
    clone: &ImageSpec,
) -> RbdCryptResult<MirrorReport>
where
    P: Host + ?Sized,
    M: Host + ?Sized,
{
    let mut mounted = Mounted::default();
    let result = mirrored_workflow(config, primary, mirror, pair, parent, clone, &mut mounted);

    for image in &mounted.primary {
        cleanup_image(primary, image);
    }
    for image in &mounted.mirror {
        cleanup_image(mirror, image);
    }
    result
}

fn mirrored_workflow<P, M>(
    config: &HarnessConfig,
    primary: &P,
    mirror: &M,
    pair: FormatPair,
    parent: &ImageSpec,
    clone: &ImageSpec,
    mounted: &mut Mounted,
) -> RbdCryptResult<MirrorReport>
where
    P: Host + ?Sized,
    M: Host + ?Sized,
{
    let images = test_encryption_between_image_and_clone(primary, config, pair, parent, clone)?;
    mounted.primary.push(images.parent.clone());
    mounted.primary.push(images.clone.clone());

    let flattened = flatten_clone(primary, &images.clone)?;

    for image in [&images.parent.image, &flattened.image] {
        expect_success!(
            primary.mirror_image_enable(image, &config.mirror_mode)?,
            PipelineStep::MirrorEnable,
            image
        );
        info!("Enabled {} mirroring of {image}", config.mirror_mode);
    }

    let mirrored_parent =
        mount_image_and_mirror_and_check_data(config, primary, mirror, &images.parent)?;
    mounted.mirror.push(mirrored_parent.clone());
    let mirrored_clone = mount_image_and_mirror_and_check_data(config, primary, mirror, &flattened)?;
    mounted.mirror.push(mirrored_clone.clone());

    let mut stages = vec![
        run_stage(
            primary,
            config,
            Stage::Parent,
            standalone_target(&images.parent, false),
            pair,
        )?,
        run_stage(
            primary,
            config,
            Stage::FlattenedClone,
            standalone_target(&flattened, false),
            pair,
        )?,
        run_stage(
            mirror,
            config,
            Stage::MirroredParent,
            standalone_target(&mirrored_parent, true),
            pair,
        )?,
        run_stage(
            mirror,
            config,
            Stage::MirroredFlattenedClone,
            standalone_target(&mirrored_clone, true),
            pair,
        )?,
    ];

    if select_scenarios(Stage::Clone, pair.parent.is_luks(), pair.clone.is_luks()).is_empty() {
        info!("No negative scenarios for a clone of format pair {pair}; skipping clone stage");
    } else {
        let unflattened = fresh_clone(primary, config, &images.parent, pair)?;
        stages.push(run_stage(
            primary,
            config,
            Stage::Clone,
            ScenarioTarget {
                image: unflattened.image.clone(),
                parent: Some(images.parent.image.clone()),
                chain: unflattened.chain,
                read_only: false,
            },
            pair,
        )?);
    }

    Ok(MirrorReport { pair, stages })
}

/// A new, unmounted clone of parent that keeps its parent.
fn fresh_clone<H>(
    host: &H,
    config: &HarnessConfig,
    parent: &EncryptedImage,
    pair: FormatPair,
) -> RbdCryptResult<EncryptedImage>
where
    H: Host + ?Sized,
{
    let clone_name = format!("clone_{}", random_string(5));
    let clone = parent.image.sibling(&clone_name)?;
    let request = CloneRequest {
        parent: parent.image.clone(),
        parent_slot: parent
            .chain
            .image()
            .cloned()
            .unwrap_or_else(EncryptionSlot::unencrypted),
        snap_name: format!("snap_{}", random_string(5)),
        clone,
        clone_format: pair.clone,
        clone_passphrase: Some(
            config
                .workdir
                .join(format!("clone_{clone_name}_passphrase.bin")),
        ),
        cow_format: None,
        target_size: config.image_size,
        file_path: unique_file_path(&config.workdir),
        do_not_map_and_mount: true,
    };
    let mut encrypted = create_and_encrypt_clone(host, config, &request)?;
    if !pair.parent.is_luks() {
        encrypted.chain = encrypted.chain.with_unencrypted_parent()?;
    }
    Ok(encrypted)
}
