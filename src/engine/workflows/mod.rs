// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod migrate;
mod mirror;

pub use self::{
    migrate::{abort_migration, migrate_and_check_consistency, migration_state},
    mirror::{test_mirrored_encryption, MirrorReport, StageOutcome},
};
