// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use strum_macros::{AsRefStr, Display, VariantArray};

use crate::engine::negative::scenario::READ_WRITE_MOUNT;

/// The points of the mirrored-image workflow at which negative scenarios
/// run.
#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq, VariantArray)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    Parent,
    FlattenedClone,
    MirroredParent,
    MirroredFlattenedClone,
    /// A clone that still has its parent.
    Clone,
}

impl Stage {
    /// Whether the stage runs against the read-only mirror of an image.
    pub fn is_mirrored(self) -> bool {
        matches!(self, Stage::MirroredParent | Stage::MirroredFlattenedClone)
    }
}

/// The scenario ids exercised at a stage, given which of parent and clone
/// carry their own encryption.
pub fn select_scenarios(stage: Stage, parent_encrypted: bool, clone_encrypted: bool) -> Vec<u8> {
    let standalone = |encrypted: bool| {
        let mut ids = vec![4];
        if encrypted {
            ids.extend([1, 2, 3]);
        }
        if stage.is_mirrored() {
            ids.push(READ_WRITE_MOUNT);
        }
        ids
    };

    match stage {
        Stage::Parent | Stage::MirroredParent => standalone(parent_encrypted),
        // A flattened clone keeps whichever header it was opened through.
        Stage::FlattenedClone | Stage::MirroredFlattenedClone => {
            standalone(parent_encrypted || clone_encrypted)
        }
        Stage::Clone => match (parent_encrypted, clone_encrypted) {
            (true, true) => (5..=13).collect(),
            (false, true) => vec![8, 11, 12, 14],
            (true, false) => vec![1, 2, 4, 15],
            (false, false) => vec![],
        },
    }
}

#[cfg(test)]
mod tests {
    use strum::VariantArray;

    use crate::engine::negative::scenario::scenario_by_id;

    use super::*;

    #[test]
    fn test_parent_stages() {
        assert_eq!(select_scenarios(Stage::Parent, false, true), vec![4]);
        assert_eq!(select_scenarios(Stage::Parent, true, false), vec![4, 1, 2, 3]);
        assert_eq!(
            select_scenarios(Stage::MirroredParent, true, true),
            vec![4, 1, 2, 3, 16]
        );
        assert_eq!(
            select_scenarios(Stage::MirroredFlattenedClone, false, false),
            vec![4, 16]
        );
    }

    #[test]
    fn test_clone_stage() {
        assert_eq!(
            select_scenarios(Stage::Clone, true, true),
            (5..=13).collect::<Vec<u8>>()
        );
        assert_eq!(select_scenarios(Stage::Clone, false, true), vec![8, 11, 12, 14]);
        assert_eq!(select_scenarios(Stage::Clone, true, false), vec![1, 2, 4, 15]);
        assert!(select_scenarios(Stage::Clone, false, false).is_empty());
    }

    #[test]
    fn test_selected_ids_exist() {
        for stage in Stage::VARIANTS {
            for (parent, clone) in [(true, true), (true, false), (false, true), (false, false)] {
                for id in select_scenarios(*stage, parent, clone) {
                    assert!(scenario_by_id(id).is_some());
                }
            }
        }
    }
}
