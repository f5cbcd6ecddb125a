// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod classify;
mod executor;
mod fault;
mod scenario;
mod select;

pub use self::{
    classify::{classify, ErrorClassifier, SignatureMatch, SubstringClassifier, Verdict},
    executor::{check_preconditions, ScenarioExecutor, ScenarioOutcome, ScenarioTarget},
    fault::{apply_format_fault, apply_passphrase_fault, FaultKind},
    scenario::{
        scenario_by_id, scenarios, ErrorSignature, NegativeScenario, ScenarioKind,
        READ_WRITE_MOUNT,
    },
    select::{select_scenarios, Stage},
};
