// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::{
    engine::{
        crypt::device_cleanup,
        engine::Host,
        negative::{
            classify::{classify, ErrorClassifier, SignatureMatch, SubstringClassifier, Verdict},
            fault::{apply_format_fault, apply_passphrase_fault},
            scenario::{scenario_by_id, NegativeScenario, ScenarioKind, READ_WRITE_MOUNT},
        },
        shared::unique_file_path,
        types::{CmdOutput, EncryptionChain, ImageSpec, MapRequest, PassphraseRef},
    },
    rbdcrypt::{HarnessConfig, RbdCryptError, RbdCryptResult},
};

/// The image negative scenarios are run against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScenarioTarget {
    pub image: ImageSpec,
    /// Needed to resolve expected errors that name the parent.
    pub parent: Option<ImageSpec>,
    /// The chain that opens the image correctly.
    pub chain: EncryptionChain,
    /// Whether faulted mounts are read-only. Scenario 16 always mounts
    /// read-write.
    pub read_only: bool,
}

/// A scenario that failed the way it should.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScenarioOutcome {
    pub id: u8,
    pub description: &'static str,
    pub matched: SignatureMatch,
    pub error: String,
}

#[derive(Debug)]
enum ScenarioState {
    BuildFaultConfig,
    AttemptOperation(MapRequest),
    ClassifyResult(MapRequest, CmdOutput),
    Pass(SignatureMatch, String),
    Fail(RbdCryptError),
}

/// Check every requested id before anything is run. Returns the scenarios
/// in execution order: the read-write mount first, the others as given.
pub fn check_preconditions(
    ids: &[u8],
    chain_len: usize,
) -> RbdCryptResult<Vec<&'static NegativeScenario>> {
    let mut scenarios = Vec::with_capacity(ids.len());
    for &id in ids {
        let scenario = scenario_by_id(id).ok_or(RbdCryptError::ScenarioPrecondition {
            scenario: id,
            chain_len,
        })?;
        if chain_len < 2 && scenario.needs_parent() {
            error!("Parent clone scenario {id} requested for an image with no parent");
            return Err(RbdCryptError::ScenarioPrecondition {
                scenario: id,
                chain_len,
            });
        }
        scenarios.push(scenario);
    }
    scenarios.sort_by_key(|s| s.id != READ_WRITE_MOUNT);
    Ok(scenarios)
}

/// Runs negative scenarios against an image on one host.
#[derive(Debug)]
pub struct ScenarioExecutor<'a, H: ?Sized, C = SubstringClassifier> {
    host: &'a H,
    config: &'a HarnessConfig,
    classifier: C,
}

impl<'a, H> ScenarioExecutor<'a, H>
where
    H: Host + ?Sized,
{
    pub fn new(host: &'a H, config: &'a HarnessConfig) -> Self {
        ScenarioExecutor {
            host,
            config,
            classifier: SubstringClassifier,
        }
    }
}

impl<'a, H, C> ScenarioExecutor<'a, H, C>
where
    H: Host + ?Sized,
    C: ErrorClassifier,
{
    pub fn with_classifier<D>(self, classifier: D) -> ScenarioExecutor<'a, H, D>
    where
        D: ErrorClassifier,
    {
        ScenarioExecutor {
            host: self.host,
            config: self.config,
            classifier,
        }
    }

    /// Run the scenarios with the given ids, stopping at the first one
    /// that does not fail as expected.
    pub fn run(
        &self,
        target: &ScenarioTarget,
        ids: &[u8],
    ) -> RbdCryptResult<Vec<ScenarioOutcome>> {
        let scenarios = check_preconditions(ids, target.chain.len())?;
        info!(
            "Running negative scenarios {ids:?} against {} on {} with encryption config {}",
            target.image,
            self.host.name(),
            target.chain
        );
        scenarios
            .into_iter()
            .map(|scenario| self.run_one(scenario, target))
            .collect()
    }

    /// The faulted encryption config of a scenario: each slot paired with
    /// its faults, slots without a passphrase left out.
    fn build_fault_config(
        &self,
        scenario: &NegativeScenario,
        chain: &EncryptionChain,
    ) -> RbdCryptResult<Vec<PassphraseRef>> {
        let mut refs = Vec::new();
        for ((slot, format_fault), passphrase_fault) in chain
            .slots()
            .iter()
            .zip(scenario.format_faults)
            .zip(scenario.passphrase_faults)
        {
            let passphrase = apply_passphrase_fault(
                *passphrase_fault,
                slot.passphrase_file(),
                self.host,
                &self.config.workdir,
            )?;
            if let Some(passphrase_file) = passphrase {
                refs.push(PassphraseRef {
                    format: apply_format_fault(*format_fault, slot.format())?,
                    passphrase_file,
                });
            }
        }
        Ok(refs)
    }

    fn run_one(
        &self,
        scenario: &'static NegativeScenario,
        target: &ScenarioTarget,
    ) -> RbdCryptResult<ScenarioOutcome> {
        let mut state = ScenarioState::BuildFaultConfig;
        loop {
            state = match state {
                ScenarioState::BuildFaultConfig => {
                    let encryption = self.build_fault_config(scenario, &target.chain)?;
                    debug!(
                        "Scenario {scenario}: encryption config {}",
                        itertools::join(
                            encryption
                                .iter()
                                .map(|r| format!("{:?}:{}", r.format, r.passphrase_file.display())),
                            ", "
                        )
                    );
                    ScenarioState::AttemptOperation(MapRequest {
                        image: target.image.clone(),
                        encryption,
                        read_only: scenario.kind != ScenarioKind::ReadWriteMount
                            && target.read_only,
                        device_type: self.config.device_type,
                        filesystem: self.config.filesystem.clone(),
                        file_path: unique_file_path(&self.config.workdir),
                        skip_mkfs: true,
                        io: None,
                    })
                }
                ScenarioState::AttemptOperation(request) => {
                    let output = self.host.map_and_mount(&request)?;
                    ScenarioState::ClassifyResult(request, output)
                }
                ScenarioState::ClassifyResult(request, output) => {
                    self.classify_result(scenario, target, &request, &output)?
                }
                ScenarioState::Pass(matched, error) => {
                    info!(
                        "Negative scenario {scenario} failed appropriately with error {error}"
                    );
                    return Ok(ScenarioOutcome {
                        id: scenario.id,
                        description: scenario.description,
                        matched,
                        error,
                    });
                }
                ScenarioState::Fail(err) => {
                    error!("{err}");
                    return Err(err);
                }
            }
        }
    }

    fn classify_result(
        &self,
        scenario: &NegativeScenario,
        target: &ScenarioTarget,
        request: &MapRequest,
        output: &CmdOutput,
    ) -> RbdCryptResult<ScenarioState> {
        let image = target.image.name();
        let parent = target.parent.as_ref().map(|p| p.name());
        let expected = scenario.expected.resolve(image, parent)?;
        let alternate = scenario
            .alternate
            .map(|a| a.resolve(image, parent))
            .transpose()?;

        let expected_text = match scenario.alternate {
            Some(alternate) => format!("{} or {alternate}", scenario.expected),
            None => scenario.expected.to_string(),
        };

        Ok(
            match classify(&self.classifier, output, &expected, alternate.as_deref()) {
                Verdict::Pass(matched) => ScenarioState::Pass(matched, output.text()),
                Verdict::Unexpected => {
                    device_cleanup(
                        self.host,
                        &request.image,
                        &request.file_path,
                        &request.encryption,
                    );
                    ScenarioState::Fail(RbdCryptError::ScenarioAssertion {
                        scenario: scenario.id,
                        description: scenario.description.to_string(),
                        image: target.image.to_string(),
                        expected: expected_text,
                        actual: "did not throw any error".to_string(),
                    })
                }
                Verdict::Mismatch => ScenarioState::Fail(RbdCryptError::ScenarioAssertion {
                    scenario: scenario.id,
                    description: scenario.description.to_string(),
                    image: target.image.to_string(),
                    expected: expected_text,
                    actual: output.text(),
                }),
            },
        )
    }
}
