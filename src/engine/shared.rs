// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use rand::{distr::Alphanumeric, rng, Rng};

/// A random lowercase alphanumeric string of the given length.
pub fn random_string(len: usize) -> String {
    rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// A path to a file in a directory of its own below workdir, neither of
/// which is likely to exist yet: `<workdir>/<rand5>_dir/<rand5>_file`.
pub fn unique_file_path(workdir: &Path) -> PathBuf {
    workdir
        .join(format!("{}_dir", random_string(5)))
        .join(format!("{}_file", random_string(5)))
}
