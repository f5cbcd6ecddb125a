// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use std::{path::PathBuf, str::FromStr};

use rbdcrypt::{
    engine::{EncryptionFormat, FormatPair, ImageSpec, SimCluster, SimHost},
    rbdcrypt::HarnessConfig,
};

/// A primary site whose images are mirrored to a second site.
pub struct SimSites {
    pub primary: SimHost,
    pub mirror: SimHost,
}

pub fn sim_sites() -> SimSites {
    let site_a = SimCluster::new("site-a");
    let site_b = SimCluster::new("site-b");
    site_a.set_peer(&site_b);
    SimSites {
        primary: SimHost::new("client-a", &site_a),
        mirror: SimHost::new("client-b", &site_b),
    }
}

pub fn config() -> HarnessConfig {
    HarnessConfig {
        workdir: PathBuf::from("/qe"),
        pool: "qe_pool".to_string(),
        ..HarnessConfig::default()
    }
}

pub fn image(name: &str) -> ImageSpec {
    ImageSpec::from_str(&format!("qe_pool/{name}")).unwrap()
}

pub fn pair(s: &str) -> FormatPair {
    FormatPair::from_str(s).unwrap()
}

/// Every parent,clone combination of LUKS1, LUKS2 and no encryption.
pub fn all_pairs() -> Vec<FormatPair> {
    let formats = [
        EncryptionFormat::Luks1,
        EncryptionFormat::Luks2,
        EncryptionFormat::None,
    ];
    formats
        .iter()
        .flat_map(|parent| {
            formats
                .iter()
                .map(move |clone| FormatPair::new(*parent, *clone))
        })
        .collect()
}
