// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    path::{Path, PathBuf},
};

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

use crate::{
    engine::{
        engine::{ContentHasher, Host, RbdClient, RemoteFiles},
        shared::random_string,
        sim_engine::cluster::{FsProbe, LoadSpec, Mapping, SimCluster, ENOENT},
        types::{
            CloneFormat, CmdOutput, DeviceType, EncryptionFormat, ImageSpec, MapRequest,
            PassphraseRef, Size, SnapSpec,
        },
    },
    rbdcrypt::{RbdCryptError, RbdCryptResult},
};

/// A call made to a SimHost, as recorded for inspection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimCall {
    pub op: &'static str,
    pub target: String,
    pub passphrases: Vec<PassphraseRef>,
    pub detail: String,
}

#[derive(Clone, Debug)]
struct SimMount {
    image: ImageSpec,
    device: String,
}

/// A client node of a simulated cluster, with its own files and mounts.
#[derive(Debug)]
pub struct SimHost {
    name: String,
    cluster: SimCluster,
    files: RefCell<HashMap<PathBuf, String>>,
    mounts: RefCell<HashMap<PathBuf, SimMount>>,
    next_device: Cell<u32>,
    calls: RefCell<Vec<SimCall>>,
}

impl SimHost {
    pub fn new(name: &str, cluster: &SimCluster) -> SimHost {
        SimHost {
            name: name.to_string(),
            cluster: cluster.clone(),
            files: RefCell::new(HashMap::new()),
            mounts: RefCell::new(HashMap::new()),
            next_device: Cell::new(0),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn cluster(&self) -> &SimCluster {
        &self.cluster
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<SimCall> {
        self.calls.borrow().clone()
    }

    /// The recorded calls of one kind.
    pub fn calls_of(&self, op: &str) -> Vec<SimCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn mounted_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.mounts.borrow().keys().cloned().collect();
        dirs.sort();
        dirs
    }

    fn record(
        &self,
        op: &'static str,
        target: &dyn ToString,
        passphrases: &[PassphraseRef],
        detail: String,
    ) {
        self.calls.borrow_mut().push(SimCall {
            op,
            target: target.to_string(),
            passphrases: passphrases.to_vec(),
            detail,
        });
    }

    /// Read the passphrase files named by the options. A missing file
    /// yields rbd's answer to it.
    fn load_specs(
        &self,
        passphrases: &[PassphraseRef],
        prefix: &str,
    ) -> Result<Vec<LoadSpec>, CmdOutput> {
        let files = self.files.borrow();
        passphrases
            .iter()
            .map(|p| match files.get(&p.passphrase_file) {
                Some(secret) => Ok(LoadSpec {
                    format: p.format,
                    secret: secret.clone(),
                }),
                None => Err(ENOENT.output(prefix)),
            })
            .collect()
    }

    fn device_name(&self, device_type: DeviceType) -> String {
        let index = self.next_device.get();
        self.next_device.set(index + 1);
        match device_type {
            DeviceType::Nbd => format!("/dev/nbd{index}"),
            DeviceType::Krbd => format!("/dev/rbd{index}"),
        }
    }

    fn mount(&self, request: &MapRequest) -> CmdOutput {
        let prefix = "rbd: map failed";
        let specs = match self.load_specs(&request.encryption, prefix) {
            Ok(specs) => specs,
            Err(output) => return output,
        };
        let mapping = match self.cluster.map(
            &request.image,
            &self.name,
            &specs,
            request.read_only,
            request.skip_mkfs,
        ) {
            Ok(mapping) => mapping,
            Err(output) => return output,
        };
        let device = self.device_name(request.device_type);
        let output = self.mount_device(request, &mapping, device);
        if !output.is_success() && !self.mounts.borrow().contains_key(request.mount_dir()) {
            self.cluster.unmap(&request.image, &self.name);
        }
        output
    }

    fn mount_device(&self, request: &MapRequest, mapping: &Mapping, device: String) -> CmdOutput {
        let mount_dir = request.mount_dir();

        if mapping.non_primary && !request.read_only {
            return CmdOutput::failure(
                32,
                format!(
                    "mount: {}: can't read superblock on {device}.",
                    mount_dir.display()
                ),
            );
        }
        match mapping.probe {
            FsProbe::Ready => (),
            FsProbe::LuksSignature => {
                return CmdOutput::failure(
                    32,
                    format!(
                        "mount: {}: unknown filesystem type 'crypto_LUKS'.",
                        mount_dir.display()
                    ),
                )
            }
            FsProbe::Unrecognized => {
                return CmdOutput::failure(
                    32,
                    format!(
                        "mount: {}: wrong fs type, bad option, bad superblock on {device}, missing codepage or helper program, or other error.",
                        mount_dir.display()
                    ),
                )
            }
        }

        self.mounts.borrow_mut().insert(
            mount_dir.to_owned(),
            SimMount {
                image: request.image.clone(),
                device: device.clone(),
            },
        );

        if request.io.is_some() {
            let file_name = match request.file_path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => {
                    return CmdOutput::failure(1, "dd: no output file given".to_string());
                }
            };
            if request.read_only
                || !self
                    .cluster
                    .write_fs_file(&request.image, &file_name, random_string(64))
            {
                return CmdOutput::failure(
                    1,
                    format!(
                        "dd: failed to open '{}': Read-only file system",
                        request.file_path.display()
                    ),
                );
            }
        }
        CmdOutput::success(device)
    }
}

impl RbdClient for SimHost {
    fn create(&self, image: &ImageSpec, size: Size) -> RbdCryptResult<CmdOutput> {
        self.record("create", image, &[], size.to_string());
        Ok(self
            .cluster
            .inject_failure("create")
            .unwrap_or_else(|| self.cluster.create(image, size)))
    }

    fn encryption_format(
        &self,
        image: &ImageSpec,
        format: EncryptionFormat,
        passphrase_file: &Path,
    ) -> RbdCryptResult<CmdOutput> {
        self.record("encryption_format", image, &[], format.to_string());
        if let Some(output) = self.cluster.inject_failure("encryption format") {
            return Ok(output);
        }
        let secret = self.files.borrow().get(passphrase_file).cloned();
        Ok(match secret {
            Some(secret) => self.cluster.encryption_format(image, format, secret),
            None => ENOENT.output("rbd: encryption format error"),
        })
    }

    fn resize(
        &self,
        image: &ImageSpec,
        size: Size,
        allow_shrink: bool,
        passphrases: &[PassphraseRef],
    ) -> RbdCryptResult<CmdOutput> {
        self.record(
            "resize",
            image,
            passphrases,
            format!("{size} allow_shrink={allow_shrink}"),
        );
        if let Some(output) = self.cluster.inject_failure("resize") {
            return Ok(output);
        }
        Ok(match self.load_specs(passphrases, "rbd: resize error") {
            Ok(specs) => self.cluster.resize(image, size, allow_shrink, &specs),
            Err(output) => output,
        })
    }

    fn snap_create(&self, snap: &SnapSpec) -> RbdCryptResult<CmdOutput> {
        self.record("snap_create", snap, &[], String::new());
        Ok(self
            .cluster
            .inject_failure("snap create")
            .unwrap_or_else(|| self.cluster.snap_create(snap)))
    }

    fn snap_protect(&self, snap: &SnapSpec) -> RbdCryptResult<CmdOutput> {
        self.record("snap_protect", snap, &[], String::new());
        Ok(self
            .cluster
            .inject_failure("snap protect")
            .unwrap_or_else(|| self.cluster.snap_protect(snap)))
    }

    fn clone_image(
        &self,
        snap: &SnapSpec,
        target: &ImageSpec,
        clone_format: Option<CloneFormat>,
    ) -> RbdCryptResult<CmdOutput> {
        self.record("clone", target, &[], snap.to_string());
        Ok(self
            .cluster
            .inject_failure("clone")
            .unwrap_or_else(|| self.cluster.clone_image(snap, target, clone_format)))
    }

    fn map_and_mount(&self, request: &MapRequest) -> RbdCryptResult<CmdOutput> {
        self.record(
            "map_and_mount",
            &request.image,
            &request.encryption,
            format!(
                "{} read_only={}",
                request.file_path.display(),
                request.read_only
            ),
        );
        Ok(self
            .cluster
            .inject_failure("map")
            .unwrap_or_else(|| self.mount(request)))
    }

    fn flatten(
        &self,
        image: &ImageSpec,
        passphrases: &[PassphraseRef],
    ) -> RbdCryptResult<CmdOutput> {
        self.record("flatten", image, passphrases, String::new());
        if let Some(output) = self.cluster.inject_failure("flatten") {
            return Ok(output);
        }
        Ok(match self.load_specs(passphrases, "rbd: flatten error") {
            Ok(specs) => self.cluster.flatten(image, &specs),
            Err(output) => output,
        })
    }

    fn unmount_and_unmap(
        &self,
        image: &ImageSpec,
        mount_dir: &Path,
        passphrases: &[PassphraseRef],
    ) -> RbdCryptResult<CmdOutput> {
        self.record(
            "unmount_and_unmap",
            image,
            passphrases,
            mount_dir.display().to_string(),
        );
        let mount = self.mounts.borrow_mut().remove(mount_dir);
        Ok(match mount {
            Some(mount) => {
                self.cluster.unmap(&mount.image, &self.name);
                CmdOutput::success(format!("unmapped {}", mount.device))
            }
            None => CmdOutput::failure(
                32,
                format!("umount: {}: not mounted.", mount_dir.display()),
            ),
        })
    }

    fn mirror_image_enable(&self, image: &ImageSpec, mode: &str) -> RbdCryptResult<CmdOutput> {
        self.record("mirror_image_enable", image, &[], mode.to_string());
        Ok(self
            .cluster
            .inject_failure("mirror image enable")
            .unwrap_or_else(|| self.cluster.mirror_image_enable(image, mode)))
    }

    fn status(&self, image: &ImageSpec) -> RbdCryptResult<CmdOutput> {
        self.record("status", image, &[], String::new());
        Ok(self.cluster.status(image))
    }

    fn migration_prepare(
        &self,
        source: &ImageSpec,
        target: &ImageSpec,
    ) -> RbdCryptResult<CmdOutput> {
        self.record("migration_prepare", target, &[], source.to_string());
        Ok(self
            .cluster
            .inject_failure("migration prepare")
            .unwrap_or_else(|| self.cluster.migration_prepare(source, target)))
    }

    fn migration_execute(&self, target: &ImageSpec) -> RbdCryptResult<CmdOutput> {
        self.record("migration_execute", target, &[], String::new());
        Ok(self
            .cluster
            .inject_failure("migration execute")
            .unwrap_or_else(|| self.cluster.migration_execute(target)))
    }

    fn migration_commit(&self, target: &ImageSpec) -> RbdCryptResult<CmdOutput> {
        self.record("migration_commit", target, &[], String::new());
        Ok(self
            .cluster
            .inject_failure("migration commit")
            .unwrap_or_else(|| self.cluster.migration_commit(target)))
    }

    fn migration_abort(&self, target: &ImageSpec) -> RbdCryptResult<CmdOutput> {
        self.record("migration_abort", target, &[], String::new());
        Ok(self.cluster.migration_abort(target))
    }
}

impl RemoteFiles for SimHost {
    fn create_file(&self, path: &Path, contents: &str) -> RbdCryptResult<CmdOutput> {
        self.record("create_file", &path.display(), &[], String::new());
        if let Some(output) = self.cluster.inject_failure("tee") {
            return Ok(output);
        }
        self.files
            .borrow_mut()
            .insert(path.to_owned(), contents.to_string());
        Ok(CmdOutput::success(""))
    }

    fn read_file(&self, path: &Path) -> RbdCryptResult<String> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| RbdCryptError::Command {
                cmd: format!("cat {}", path.display()),
                output: CmdOutput::failure(
                    1,
                    format!("cat: {}: No such file or directory", path.display()),
                ),
            })
    }
}

impl ContentHasher for SimHost {
    fn checksum(&self, path: &Path) -> RbdCryptResult<String> {
        let mounted = path.parent().and_then(|dir| {
            self.mounts
                .borrow()
                .get(dir)
                .map(|m| m.image.clone())
        });
        let contents = match (mounted, path.file_name()) {
            (Some(image), Some(name)) => self
                .cluster
                .read_fs_file(&image, &name.to_string_lossy()),
            _ => self.files.borrow().get(path).cloned(),
        };
        match contents {
            Some(contents) => Ok(HEXLOWER.encode(&Sha256::digest(contents.as_bytes()))),
            None => Err(RbdCryptError::Command {
                cmd: format!("sha256sum {}", path.display()),
                output: CmdOutput::failure(
                    1,
                    format!("sha256sum: {}: No such file or directory", path.display()),
                ),
            }),
        }
    }
}

impl Host for SimHost {
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::engine::types::IoProfile;

    use super::*;

    fn image(name: &str) -> ImageSpec {
        ImageSpec::from_str(&format!("rbd/{name}")).unwrap()
    }

    fn luks(path: &str) -> PassphraseRef {
        PassphraseRef {
            format: Some(EncryptionFormat::Luks1),
            passphrase_file: PathBuf::from(path),
        }
    }

    fn request(image: &ImageSpec, encryption: Vec<PassphraseRef>, file: &str) -> MapRequest {
        MapRequest::new(image.clone(), encryption, PathBuf::from(file))
    }

    #[test]
    fn test_map_mount_io_and_checksum() {
        let cluster = SimCluster::new("site-a");
        let host = SimHost::new("client", &cluster);
        let spec = image("img");
        host.create(&spec, Size::from_gib(1)).unwrap();
        host.create_file(Path::new("/tmp/k.bin"), "secret").unwrap();
        assert!(host
            .encryption_format(&spec, EncryptionFormat::Luks1, Path::new("/tmp/k.bin"))
            .unwrap()
            .is_success());

        let mut first = request(&spec, vec![luks("/tmp/k.bin")], "/tmp/a_dir/a_file");
        first.io = Some(IoProfile::default());
        let output = host.map_and_mount(&first).unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout, "/dev/nbd0");
        let digest = host.checksum(Path::new("/tmp/a_dir/a_file")).unwrap();
        assert_eq!(digest.len(), 64);

        // The same file seen through a second mount of the image.
        let mut second = request(&spec, vec![luks("/tmp/k.bin")], "/tmp/b_dir/a_file");
        second.skip_mkfs = true;
        second.read_only = true;
        assert!(host.map_and_mount(&second).unwrap().is_success());
        assert_eq!(
            host.checksum(Path::new("/tmp/b_dir/a_file")).unwrap(),
            digest
        );

        assert!(host
            .unmount_and_unmap(&spec, Path::new("/tmp/b_dir"), &[])
            .unwrap()
            .is_success());
        assert_eq!(
            host.unmount_and_unmap(&spec, Path::new("/tmp/b_dir"), &[])
                .unwrap()
                .status,
            32
        );
        assert_eq!(host.mounted_dirs(), vec![PathBuf::from("/tmp/a_dir")]);
    }

    #[test]
    fn test_mount_without_encryption_config() {
        let cluster = SimCluster::new("site-a");
        let host = SimHost::new("client", &cluster);
        let spec = image("img");
        host.create(&spec, Size::from_gib(1)).unwrap();
        host.create_file(Path::new("/tmp/k.bin"), "secret").unwrap();
        host.encryption_format(&spec, EncryptionFormat::Luks2, Path::new("/tmp/k.bin"))
            .unwrap();
        let mut attempt = request(&spec, vec![], "/tmp/c_dir/c_file");
        attempt.skip_mkfs = true;
        let output = host.map_and_mount(&attempt).unwrap();
        assert_eq!(output.status, 32);
        assert!(output
            .text()
            .contains("unknown filesystem type 'crypto_LUKS'"));
    }

    #[test]
    fn test_missing_passphrase_file() {
        let cluster = SimCluster::new("site-a");
        let host = SimHost::new("client", &cluster);
        let spec = image("img");
        host.create(&spec, Size::from_gib(1)).unwrap();
        let output = host
            .map_and_mount(&request(&spec, vec![luks("/nowhere")], "/tmp/d_dir/d_file"))
            .unwrap();
        assert_eq!(output.status, 2);
        assert!(host.read_file(Path::new("/nowhere")).is_err());
        assert!(host.checksum(Path::new("/nowhere")).is_err());
    }

    #[test]
    fn test_calls_recorded() {
        let cluster = SimCluster::new("site-a");
        let host = SimHost::new("client", &cluster);
        let spec = image("img");
        host.create(&spec, Size::from_gib(1)).unwrap();
        host.resize(&spec, Size::from_gib(2), false, &[]).unwrap();
        assert_eq!(host.calls().len(), 2);
        assert_eq!(host.calls_of("resize")[0].target, "rbd/img");
        host.clear_calls();
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_injected_failures() {
        let cluster = SimCluster::new("site-a");
        cluster.set_failure_probability(1);
        let host = SimHost::new("client", &cluster);
        let output = host.create(&image("img"), Size::from_gib(1)).unwrap();
        assert_eq!(output.status, 5);
        assert!(!cluster.contains(&image("img")));
    }
}
