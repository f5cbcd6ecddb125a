// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use strum_macros::{AsRefStr, Display};

use crate::engine::types::{EncryptionFormat, ImageSpec};

/// The files of a simulated filesystem, by name.
pub type SimFilesystem = BTreeMap<String, String>;

/// A LUKS header: the format it was written with and the secret that
/// unlocks it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LuksHeader {
    pub format: EncryptionFormat,
    pub secret: String,
}

/// The snapshot a clone was made from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParentRef {
    pub image: ImageSpec,
    pub snap: String,
}

#[derive(Clone, Debug)]
pub struct SimSnapshot {
    pub size: u64,
    pub header: Option<LuksHeader>,
    pub fs: Option<SimFilesystem>,
    pub parent: Option<ParentRef>,
    pub protected: bool,
}

#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum MigrationState {
    Prepared,
    Executed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimMigration {
    pub source: ImageSpec,
    pub target: ImageSpec,
    pub state: MigrationState,
}

#[derive(Clone, Debug)]
pub struct SimImage {
    /// Size in bytes, header included.
    pub size: u64,
    /// The image's own header; a clone without one inherits its parent's.
    pub header: Option<LuksHeader>,
    pub fs: Option<SimFilesystem>,
    pub parent: Option<ParentRef>,
    pub snaps: BTreeMap<String, SimSnapshot>,
    pub non_primary: bool,
    pub migration: Option<SimMigration>,
    /// Hosts that have the image mapped.
    pub watchers: Vec<String>,
}

impl SimImage {
    pub fn new(size: u64) -> SimImage {
        SimImage {
            size,
            header: None,
            fs: None,
            parent: None,
            snaps: BTreeMap::new(),
            non_primary: false,
            migration: None,
            watchers: Vec::new(),
        }
    }

    /// A clone of the snapshot.
    pub fn from_snapshot(snap: &SimSnapshot, parent: ParentRef) -> SimImage {
        SimImage {
            size: snap.size,
            fs: snap.fs.clone(),
            parent: Some(parent),
            ..SimImage::new(snap.size)
        }
    }

    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            size: self.size,
            header: self.header.clone(),
            fs: self.fs.clone(),
            parent: self.parent.clone(),
            protected: false,
        }
    }

    /// A copy of the image's content and snapshots, without mirroring,
    /// migration or mapping state.
    pub fn copy_content(&self) -> SimImage {
        SimImage {
            header: self.header.clone(),
            fs: self.fs.clone(),
            parent: self.parent.clone(),
            snaps: self.snaps.clone(),
            ..SimImage::new(self.size)
        }
    }
}

/// One layer of an image as rbd walks it: the image itself, then each
/// ancestor snapshot.
#[derive(Clone, Debug)]
pub struct Layer {
    pub name: String,
    pub header: Option<LuksHeader>,
}
