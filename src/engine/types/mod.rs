// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    convert::TryFrom,
    fmt::{self, Display},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde_derive::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString, VariantArray};

pub use crate::engine::types::{
    actions::{CompensationAction, CompensationRule, EngineAction, ResizeIssued},
    keys::{EncryptionChain, EncryptionFormat, EncryptionSlot, FormatPair, PassphraseRef},
};
use crate::rbdcrypt::{RbdCryptError, RbdCryptResult};

mod actions;
mod keys;

const UNITS: [(char, u64); 4] = [
    ('T', 1 << 40),
    ('G', 1 << 30),
    ('M', 1 << 20),
    ('K', 1 << 10),
];

/// An image size in bytes. Its text form is the one rbd accepts for
/// --size: a number with an optional binary unit suffix.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Size(u64);

impl Size {
    pub const fn from_bytes(bytes: u64) -> Size {
        Size(bytes)
    }

    pub const fn from_mib(mib: u64) -> Size {
        Size(mib << 20)
    }

    pub const fn from_gib(gib: u64) -> Size {
        Size(gib << 30)
    }

    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, bytes: u64) -> Option<Size> {
        self.0.checked_add(bytes).map(Size)
    }
}

impl FromStr for Size {
    type Err = RbdCryptError;

    fn from_str(s: &str) -> RbdCryptResult<Size> {
        let err = || RbdCryptError::Parse {
            what: "size",
            input: s.to_string(),
        };
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_suffix("iB")
            .or_else(|| trimmed.strip_suffix('B'))
            .unwrap_or(trimmed);
        let (digits, multiplier) = match trimmed.chars().last() {
            Some(c) if c.is_ascii_alphabetic() => {
                let upper = c.to_ascii_uppercase();
                let (_, multiplier) = UNITS
                    .iter()
                    .find(|(unit, _)| *unit == upper)
                    .ok_or_else(err)?;
                (&trimmed[..trimmed.len() - 1], *multiplier)
            }
            _ => (trimmed, 1),
        };
        let value = digits.parse::<u64>().map_err(|_| err())?;
        value.checked_mul(multiplier).map(Size).ok_or_else(err)
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0B");
        }
        match UNITS.iter().find(|(_, m)| self.0 % m == 0) {
            Some((unit, m)) => write!(f, "{}{unit}", self.0 / m),
            None => write!(f, "{}B", self.0),
        }
    }
}

impl TryFrom<String> for Size {
    type Error = RbdCryptError;

    fn try_from(s: String) -> RbdCryptResult<Size> {
        Size::from_str(&s)
    }
}

impl From<Size> for String {
    fn from(size: Size) -> String {
        size.to_string()
    }
}

fn valid_component(s: &str) -> bool {
    !s.is_empty() && !s.contains(['/', '@']) && !s.chars().any(char::is_whitespace)
}

/// An rbd image, `pool/image`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ImageSpec {
    pool: String,
    image: String,
}

impl ImageSpec {
    pub fn new(pool: &str, image: &str) -> RbdCryptResult<ImageSpec> {
        if !valid_component(pool) || !valid_component(image) {
            return Err(RbdCryptError::Parse {
                what: "image spec",
                input: format!("{pool}/{image}"),
            });
        }
        Ok(ImageSpec {
            pool: pool.to_string(),
            image: image.to_string(),
        })
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// The image name without its pool.
    pub fn name(&self) -> &str {
        &self.image
    }

    pub fn snap(&self, snap: &str) -> RbdCryptResult<SnapSpec> {
        if !valid_component(snap) {
            return Err(RbdCryptError::Parse {
                what: "snapshot spec",
                input: format!("{self}@{snap}"),
            });
        }
        Ok(SnapSpec {
            image: self.clone(),
            snap: snap.to_string(),
        })
    }

    /// An image in the same pool.
    pub fn sibling(&self, image: &str) -> RbdCryptResult<ImageSpec> {
        ImageSpec::new(&self.pool, image)
    }
}

impl FromStr for ImageSpec {
    type Err = RbdCryptError;

    fn from_str(s: &str) -> RbdCryptResult<ImageSpec> {
        let (pool, image) = s.split_once('/').ok_or_else(|| RbdCryptError::Parse {
            what: "image spec",
            input: s.to_string(),
        })?;
        ImageSpec::new(pool, image)
    }
}

impl Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool, self.image)
    }
}

/// A snapshot of an rbd image, `pool/image@snap`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SnapSpec {
    image: ImageSpec,
    snap: String,
}

impl SnapSpec {
    pub fn image(&self) -> &ImageSpec {
        &self.image
    }

    pub fn name(&self) -> &str {
        &self.snap
    }
}

impl FromStr for SnapSpec {
    type Err = RbdCryptError;

    fn from_str(s: &str) -> RbdCryptResult<SnapSpec> {
        let (image, snap) = s.split_once('@').ok_or_else(|| RbdCryptError::Parse {
            what: "snapshot spec",
            input: s.to_string(),
        })?;
        ImageSpec::from_str(image)?.snap(snap)
    }
}

impl Display for SnapSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.image, self.snap)
    }
}

#[derive(
    AsRefStr, Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[strum(serialize = "nbd")]
    Nbd,
    #[strum(serialize = "krbd")]
    Krbd,
}

/// The copy-on-write clone format, rbd's `rbd_default_clone_format`.
#[derive(AsRefStr, Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
pub enum CloneFormat {
    #[strum(serialize = "1")]
    V1,
    #[strum(serialize = "2")]
    V2,
}

/// How much data a mount writes after mounting.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct IoProfile {
    pub file_size: Size,
    pub block_size: Size,
}

impl IoProfile {
    /// Number of blocks of block_size needed to cover file_size.
    pub fn block_count(&self) -> u64 {
        let block = self.block_size.bytes().max(1);
        self.file_size.bytes().div_ceil(block)
    }
}

impl Default for IoProfile {
    fn default() -> IoProfile {
        IoProfile {
            file_size: Size::from_mib(100),
            block_size: Size::from_mib(4),
        }
    }
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ResizeSequence {
    #[strum(serialize = "before clone")]
    BeforeClone,
    #[strum(serialize = "after clone")]
    AfterClone,
}

/// Formats, passphrases and target size of an image and its optional clone,
/// as seen by the header overhead compensation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParentCloneSpec {
    pub parent_format: EncryptionFormat,
    pub parent: ImageSpec,
    pub parent_passphrase: Option<PathBuf>,
    pub clone_format: Option<EncryptionFormat>,
    pub clone: Option<ImageSpec>,
    pub clone_passphrase: Option<PathBuf>,
    pub target_size: Size,
}

impl ParentCloneSpec {
    pub fn parent_only(
        parent_format: EncryptionFormat,
        parent: ImageSpec,
        parent_passphrase: Option<PathBuf>,
        target_size: Size,
    ) -> ParentCloneSpec {
        ParentCloneSpec {
            parent_format,
            parent,
            parent_passphrase,
            clone_format: None,
            clone: None,
            clone_passphrase: None,
            target_size,
        }
    }
}

/// Everything needed to map an image and mount a filesystem on it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MapRequest {
    pub image: ImageSpec,
    pub encryption: Vec<PassphraseRef>,
    pub read_only: bool,
    pub device_type: DeviceType,
    pub filesystem: String,
    pub file_path: PathBuf,
    pub skip_mkfs: bool,
    pub io: Option<IoProfile>,
}

impl MapRequest {
    pub fn new(image: ImageSpec, encryption: Vec<PassphraseRef>, file_path: PathBuf) -> Self {
        MapRequest {
            image,
            encryption,
            read_only: false,
            device_type: DeviceType::Nbd,
            filesystem: "ext4".to_string(),
            file_path,
            skip_mkfs: false,
            io: None,
        }
    }

    /// The mount point: the directory holding file_path.
    pub fn mount_dir(&self) -> &Path {
        self.file_path.parent().unwrap_or_else(|| Path::new("/"))
    }
}

/// The outcome of one collaborator call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CmdOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(stdout: impl Into<String>) -> CmdOutput {
        CmdOutput {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> CmdOutput {
        CmdOutput {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// stdout and stderr together, the text error tokens are searched in.
    pub fn text(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

impl Display for CmdOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.status, self.text())
    }
}

/// The steps of the image and clone pipelines.
#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq, VariantArray)]
#[strum(serialize_all = "kebab-case")]
pub enum PipelineStep {
    Create,
    SnapCreate,
    SnapProtect,
    Clone,
    Passphrase,
    EncryptionFormat,
    Resize,
    MapMount,
    Flatten,
    Unmap,
    MirrorEnable,
    Status,
    MigrationPrepare,
    MigrationExecute,
    MigrationCommit,
    MigrationAbort,
    Checksum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_parse() {
        assert_eq!(Size::from_str("1G").unwrap(), Size::from_gib(1));
        assert_eq!(Size::from_str("1024M").unwrap(), Size::from_gib(1));
        assert_eq!(Size::from_str("16MiB").unwrap(), Size::from_mib(16));
        assert_eq!(Size::from_str("512").unwrap(), Size::from_bytes(512));
        assert_eq!(Size::from_str("2k").unwrap(), Size::from_bytes(2048));
        assert_matches!(Size::from_str("G"), Err(RbdCryptError::Parse { .. }));
        assert_matches!(Size::from_str("3Q"), Err(RbdCryptError::Parse { .. }));
        assert_matches!(
            Size::from_str("99999999999T"),
            Err(RbdCryptError::Parse { .. })
        );
    }

    #[test]
    fn test_size_display() {
        assert_eq!(Size::from_gib(1).to_string(), "1G");
        assert_eq!(Size::from_mib(1040).to_string(), "1040M");
        assert_eq!(Size::from_bytes(1000).to_string(), "1000B");
        assert_eq!(Size::default().to_string(), "0B");
    }

    proptest! {
        #[test]
        /// Display always produces text that parses back to the same size.
        fn size_display_parses(bytes in 0u64..(1u64 << 50)) {
            let size = Size::from_bytes(bytes);
            prop_assert_eq!(Size::from_str(&size.to_string()).unwrap(), size);
        }
    }

    #[test]
    fn test_image_spec() {
        let spec = ImageSpec::from_str("rbd_pool/image_1").unwrap();
        assert_eq!(spec.pool(), "rbd_pool");
        assert_eq!(spec.name(), "image_1");
        assert_eq!(spec.to_string(), "rbd_pool/image_1");
        assert!(ImageSpec::from_str("image_1").is_err());
        assert!(ImageSpec::from_str("a/b/c").is_err());
        assert!(ImageSpec::from_str("/b").is_err());

        let snap = spec.snap("snap_1").unwrap();
        assert_eq!(snap.to_string(), "rbd_pool/image_1@snap_1");
        assert_eq!(SnapSpec::from_str("rbd_pool/image_1@snap_1").unwrap(), snap);
        assert!(SnapSpec::from_str("rbd_pool/image_1@").is_err());
        assert!(SnapSpec::from_str("rbd_pool/image_1@a@b").is_err());
    }

    #[test]
    fn test_cmd_output_text() {
        let out = CmdOutput {
            status: 22,
            stdout: "partial\n".to_string(),
            stderr: "rbd: map failed".to_string(),
        };
        assert_eq!(out.text(), "partial\nrbd: map failed");
        assert!(!out.is_success());
        assert_eq!(CmdOutput::success("ok").text(), "ok");
    }

    #[test]
    fn test_mount_dir() {
        let request = MapRequest::new(
            ImageSpec::from_str("p/i").unwrap(),
            vec![],
            PathBuf::from("/tmp/abcde_dir/fghij_file"),
        );
        assert_eq!(request.mount_dir(), Path::new("/tmp/abcde_dir"));
    }

    #[test]
    fn test_io_block_count() {
        let io = IoProfile {
            file_size: Size::from_mib(10),
            block_size: Size::from_mib(4),
        };
        assert_eq!(io.block_count(), 3);
    }

    #[test]
    fn test_pipeline_step_names() {
        assert_eq!(PipelineStep::SnapProtect.to_string(), "snap-protect");
        assert_eq!(PipelineStep::MapMount.as_ref(), "map-mount");
    }
}
