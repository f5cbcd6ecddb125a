// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Live migration of encrypted images.

use serde_json::Value;

use crate::{
    engine::{
        crypt::{cleanup_image, map_and_mount, map_request, EncryptedImage},
        engine::Host,
        shared::unique_file_path,
        types::{ImageSpec, PipelineStep},
    },
    rbdcrypt::{HarnessConfig, RbdCryptError, RbdCryptResult},
};

const PREPARED: &str = "prepared";
const EXECUTED: &str = "executed";

/// The state of the migration an image takes part in, None if it is not
/// being migrated.
pub fn migration_state<H>(host: &H, image: &ImageSpec) -> RbdCryptResult<Option<String>>
where
    H: Host + ?Sized,
{
    let output = expect_success!(host.status(image)?, PipelineStep::Status, image);
    let status: Value = serde_json::from_str(&output.stdout)?;
    Ok(status
        .get("migration")
        .and_then(|m| m.get("state"))
        .and_then(Value::as_str)
        .map(|s| s.to_string()))
}

fn expect_state<H>(host: &H, image: &ImageSpec, expected: Option<&str>) -> RbdCryptResult<()>
where
    H: Host + ?Sized,
{
    let state = migration_state(host, image)?;
    if state.as_deref() != expected {
        error!("Unexpected migration state {state:?} of {image}");
        return Err(RbdCryptError::Msg(format!(
            "migration state of {image} is {}, expected {}",
            state.as_deref().unwrap_or("none"),
            expected.unwrap_or("none")
        )));
    }
    Ok(())
}

/// Mount image read-only at a fresh path with the same file name and
/// check that its file reads as digest.
fn check_remounted<H>(
    host: &H,
    config: &HarnessConfig,
    image: &EncryptedImage,
    first: &str,
    digest: &str,
) -> RbdCryptResult<EncryptedImage>
where
    H: Host + ?Sized,
{
    let file_path = match image.file_path.file_name() {
        Some(name) => unique_file_path(&config.workdir).with_file_name(name),
        None => unique_file_path(&config.workdir),
    };
    let remounted = image.at(file_path);
    map_and_mount(host, &map_request(config, &remounted, true, true, None))?;
    let remounted_digest = host.checksum(&remounted.file_path)?;
    if remounted_digest != digest {
        error!("Data inconsistency found between {first} and {}", remounted.image);
        return Err(RbdCryptError::Consistency {
            first: first.to_string(),
            second: format!("{}:{}", remounted.image, remounted.file_path.display()),
            first_digest: digest.to_string(),
            second_digest: remounted_digest,
        });
    }
    Ok(remounted)
}

/// Migrate a mounted encrypted image to target and check that the target
/// opens with the source's encryption and holds the same data. Returns the
/// target as mounted read-only.
pub fn migrate_and_check_consistency<H>(
    host: &H,
    config: &HarnessConfig,
    source: &EncryptedImage,
    target: &ImageSpec,
) -> RbdCryptResult<EncryptedImage>
where
    H: Host + ?Sized,
{
    let digest = log_on_failure!(
        host.checksum(&source.file_path),
        "Failed to read {} before migrating it",
        source.image
    );
    cleanup_image(host, source);

    expect_success!(
        host.migration_prepare(&source.image, target)?,
        PipelineStep::MigrationPrepare,
        target
    );
    expect_state(host, target, Some(PREPARED))?;
    expect_success!(
        host.migration_execute(target)?,
        PipelineStep::MigrationExecute,
        target
    );
    expect_state(host, target, Some(EXECUTED))?;
    expect_success!(
        host.migration_commit(target)?,
        PipelineStep::MigrationCommit,
        target
    );
    expect_state(host, target, None)?;
    info!("Migrated {} to {target}", source.image);

    let migrated = EncryptedImage::new(
        target.clone(),
        source.chain.clone(),
        source.file_path.clone(),
    );
    check_remounted(host, config, &migrated, &source.image.to_string(), &digest)
}

/// Prepare a migration of a mounted encrypted image to target, abort it,
/// and check that the source is left usable with its data intact.
pub fn abort_migration<H>(
    host: &H,
    config: &HarnessConfig,
    source: &EncryptedImage,
    target: &ImageSpec,
) -> RbdCryptResult<EncryptedImage>
where
    H: Host + ?Sized,
{
    let digest = log_on_failure!(
        host.checksum(&source.file_path),
        "Failed to read {} before migrating it",
        source.image
    );
    cleanup_image(host, source);

    expect_success!(
        host.migration_prepare(&source.image, target)?,
        PipelineStep::MigrationPrepare,
        target
    );
    expect_state(host, target, Some(PREPARED))?;
    expect_success!(
        host.migration_abort(target)?,
        PipelineStep::MigrationAbort,
        target
    );
    expect_state(host, &source.image, None)?;
    info!("Aborted migration of {} to {target}", source.image);

    check_remounted(host, config, source, &source.image.to_string(), &digest)
}
