// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![allow(clippy::doc_markdown)]

#[cfg(feature = "engine")]
#[macro_use]
extern crate log;

#[cfg(feature = "engine")]
#[macro_use]
extern crate serde_json;

#[cfg(all(test, feature = "engine"))]
#[macro_use]
extern crate assert_matches;

#[cfg(all(test, feature = "engine"))]
#[macro_use]
extern crate proptest;

#[cfg(feature = "engine")]
pub mod engine;

#[cfg(feature = "engine")]
pub mod rbdcrypt;
