// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub use self::{
    cli_engine::{CliHost, CommandRunner, OutputMode},
    crypt::{
        cleanup_image, clone_passphrase_file_name, compensate, copy_passphrase,
        create_and_encrypt_clone, create_passphrase_file, device_cleanup, encrypt_image,
        flatten_clone, generate_secret, map_and_mount, map_request,
        mount_image_and_mirror_and_check_data, passphrase_file_name,
        test_encryption_between_image_and_clone, verify_consistency, wrong_passphrase, Artifact,
        CloneRequest, EncryptedImage, LayeredImages, MountPolicy, SIZE_UNCHANGED,
    },
    engine::{ContentHasher, Host, RbdClient, RemoteFiles},
    negative::{
        apply_format_fault, apply_passphrase_fault, check_preconditions, classify,
        scenario_by_id, scenarios, select_scenarios, ErrorClassifier, ErrorSignature, FaultKind,
        NegativeScenario, ScenarioExecutor, ScenarioKind, ScenarioOutcome, ScenarioTarget,
        SignatureMatch, Stage, SubstringClassifier, Verdict, READ_WRITE_MOUNT,
    },
    shared::{random_string, unique_file_path},
    sim_engine::{SimCall, SimCluster, SimHost},
    types::{
        CloneFormat, CmdOutput, CompensationAction, CompensationRule, DeviceType, EncryptionChain,
        EncryptionFormat, EncryptionSlot, EngineAction, FormatPair, ImageSpec, IoProfile,
        MapRequest, ParentCloneSpec, PassphraseRef, PipelineStep, ResizeIssued, ResizeSequence,
        Size, SnapSpec,
    },
    workflows::{
        abort_migration, migrate_and_check_consistency, migration_state,
        test_mirrored_encryption, MirrorReport, StageOutcome,
    },
};

#[macro_use]
mod macros;

mod cli_engine;
mod crypt;
#[allow(clippy::module_inception)]
mod engine;
mod negative;
mod shared;
mod sim_engine;
mod types;
mod workflows;
