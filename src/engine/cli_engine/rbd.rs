// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{path::Path, sync::LazyLock};

use regex::Regex;

use crate::{
    engine::{
        cli_engine::host::CliHost,
        engine::RbdClient,
        types::{
            CloneFormat, CmdOutput, EncryptionFormat, ImageSpec, MapRequest, PassphraseRef, Size,
            SnapSpec,
        },
    },
    rbdcrypt::{RbdCryptError, RbdCryptResult},
};

static DEVICE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(/dev/[[:alnum:]]+)").expect("constant pattern is a valid regex"));

/// The device rbd reports having mapped.
pub fn parse_device_path(stdout: &str) -> Option<String> {
    DEVICE_PATH
        .captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Encryption options in the form `rbd resize` and `rbd flatten` take.
pub fn encryption_args(passphrases: &[PassphraseRef]) -> Vec<String> {
    let mut args = Vec::new();
    for p in passphrases {
        if let Some(format) = p.format {
            args.push("--encryption-format".to_string());
            args.push(format.to_string());
        }
        args.push("--encryption-passphrase-file".to_string());
        args.push(p.passphrase_file.display().to_string());
    }
    args
}

/// Encryption options in the form `rbd device map -o` takes.
pub fn map_options(passphrases: &[PassphraseRef]) -> Option<String> {
    if passphrases.is_empty() {
        return None;
    }
    let options = passphrases.iter().flat_map(|p| {
        p.format
            .map(|f| format!("encryption-format={f}"))
            .into_iter()
            .chain(std::iter::once(format!(
                "encryption-passphrase-file={}",
                p.passphrase_file.display()
            )))
    });
    Some(itertools::join(options, ","))
}

impl CliHost {
    fn rbd(&self, args: &[String]) -> RbdCryptResult<CmdOutput> {
        let mut words = vec!["rbd"];
        words.extend(args.iter().map(String::as_str));
        self.runner.run(&words, None)
    }

    fn map_args(&self, request: &MapRequest) -> Vec<String> {
        let mut args = vec![
            "device".to_string(),
            "map".to_string(),
            "-t".to_string(),
            request.device_type.to_string(),
        ];
        if let Some(options) = map_options(&request.encryption) {
            args.push("-o".to_string());
            args.push(options);
        }
        if request.read_only {
            args.push("--read-only".to_string());
        }
        args.push(request.image.to_string());
        args
    }

    /// Make a filesystem on a mapped device if asked to and mount it.
    fn mount_device(&self, request: &MapRequest, device: &str) -> RbdCryptResult<CmdOutput> {
        if !request.skip_mkfs {
            let mkfs = format!("mkfs.{}", request.filesystem);
            let output = self.runner.run(&[&mkfs, device], None)?;
            if !output.is_success() {
                return Ok(output);
            }
        }

        let mount_dir = request.mount_dir().display().to_string();
        let output = self.runner.run(&["mkdir", "-p", &mount_dir], None)?;
        if !output.is_success() {
            return Ok(output);
        }
        let mut mount = vec!["mount"];
        if request.read_only {
            mount.extend(["-o", "ro"]);
        }
        mount.extend([device, mount_dir.as_str()]);
        self.runner.run(&mount, None)
    }

    /// Unmap a device that could not be mounted, logging a failure.
    fn unmap_device(&self, request: &MapRequest, device: &str) {
        let unmapped = self.rbd(&[
            "device".to_string(),
            "unmap".to_string(),
            "-t".to_string(),
            request.device_type.to_string(),
            device.to_string(),
        ]);
        match unmapped {
            Ok(output) if output.is_success() => {
                debug!("Unmapped {device} on {}", self.runner.name())
            }
            Ok(output) => warn!(
                "Failed to unmap {device} on {}: {}",
                self.runner.name(),
                output.text()
            ),
            Err(e) => warn!("Failed to unmap {device} on {}: {e}", self.runner.name()),
        }
    }
}

impl RbdClient for CliHost {
    fn create(&self, image: &ImageSpec, size: Size) -> RbdCryptResult<CmdOutput> {
        self.rbd(&[
            "create".to_string(),
            image.to_string(),
            "--size".to_string(),
            size.to_string(),
        ])
    }

    fn encryption_format(
        &self,
        image: &ImageSpec,
        format: EncryptionFormat,
        passphrase_file: &Path,
    ) -> RbdCryptResult<CmdOutput> {
        self.rbd(&[
            "encryption".to_string(),
            "format".to_string(),
            image.to_string(),
            format.to_string(),
            passphrase_file.display().to_string(),
        ])
    }

    fn resize(
        &self,
        image: &ImageSpec,
        size: Size,
        allow_shrink: bool,
        passphrases: &[PassphraseRef],
    ) -> RbdCryptResult<CmdOutput> {
        let mut args = vec![
            "resize".to_string(),
            "--size".to_string(),
            size.to_string(),
            image.to_string(),
        ];
        if allow_shrink {
            args.push("--allow-shrink".to_string());
        }
        args.extend(encryption_args(passphrases));
        self.rbd(&args)
    }

    fn snap_create(&self, snap: &SnapSpec) -> RbdCryptResult<CmdOutput> {
        self.rbd(&["snap".to_string(), "create".to_string(), snap.to_string()])
    }

    fn snap_protect(&self, snap: &SnapSpec) -> RbdCryptResult<CmdOutput> {
        self.rbd(&["snap".to_string(), "protect".to_string(), snap.to_string()])
    }

    fn clone_image(
        &self,
        snap: &SnapSpec,
        target: &ImageSpec,
        clone_format: Option<CloneFormat>,
    ) -> RbdCryptResult<CmdOutput> {
        let mut args = vec!["clone".to_string()];
        if let Some(format) = clone_format {
            args.push("--rbd-default-clone-format".to_string());
            args.push(format.to_string());
        }
        args.push(snap.to_string());
        args.push(target.to_string());
        self.rbd(&args)
    }

    fn map_and_mount(&self, request: &MapRequest) -> RbdCryptResult<CmdOutput> {
        let mapped = self.rbd(&self.map_args(request))?;
        if !mapped.is_success() {
            return Ok(mapped);
        }
        let device = parse_device_path(&mapped.stdout).ok_or_else(|| {
            RbdCryptError::Msg(format!(
                "no device path in output of mapping {} on {}: {}",
                request.image,
                self.runner.name(),
                mapped.text()
            ))
        })?;

        match self.mount_device(request, &device) {
            Ok(output) if output.is_success() => (),
            unmounted => {
                self.unmap_device(request, &device);
                return unmounted;
            }
        }

        if let Some(ref io) = request.io {
            let of = format!("of={}", request.file_path.display());
            let bs = format!("bs={}", io.block_size.bytes());
            let count = format!("count={}", io.block_count());
            let output = self
                .runner
                .run(&["dd", "if=/dev/urandom", &of, &bs, &count], None)?;
            if !output.is_success() {
                return Ok(output);
            }
        }
        Ok(CmdOutput::success(device))
    }

    fn flatten(
        &self,
        image: &ImageSpec,
        passphrases: &[PassphraseRef],
    ) -> RbdCryptResult<CmdOutput> {
        let mut args = vec!["flatten".to_string(), image.to_string()];
        args.extend(encryption_args(passphrases));
        self.rbd(&args)
    }

    fn unmount_and_unmap(
        &self,
        image: &ImageSpec,
        mount_dir: &Path,
        passphrases: &[PassphraseRef],
    ) -> RbdCryptResult<CmdOutput> {
        let dir = mount_dir.display().to_string();
        let output = self.runner.run(&["umount", &dir], None)?;
        if !output.is_success() {
            return Ok(output);
        }
        let mut args = vec![
            "device".to_string(),
            "unmap".to_string(),
            "-t".to_string(),
            self.device_type.to_string(),
        ];
        if let Some(options) = map_options(passphrases) {
            args.push("-o".to_string());
            args.push(options);
        }
        args.push(image.to_string());
        self.rbd(&args)
    }

    fn mirror_image_enable(&self, image: &ImageSpec, mode: &str) -> RbdCryptResult<CmdOutput> {
        self.rbd(&[
            "mirror".to_string(),
            "image".to_string(),
            "enable".to_string(),
            image.to_string(),
            mode.to_string(),
        ])
    }

    fn status(&self, image: &ImageSpec) -> RbdCryptResult<CmdOutput> {
        self.rbd(&[
            "status".to_string(),
            image.to_string(),
            "--format".to_string(),
            "json".to_string(),
        ])
    }

    fn migration_prepare(
        &self,
        source: &ImageSpec,
        target: &ImageSpec,
    ) -> RbdCryptResult<CmdOutput> {
        self.rbd(&[
            "migration".to_string(),
            "prepare".to_string(),
            source.to_string(),
            target.to_string(),
        ])
    }

    fn migration_execute(&self, target: &ImageSpec) -> RbdCryptResult<CmdOutput> {
        self.rbd(&[
            "migration".to_string(),
            "execute".to_string(),
            target.to_string(),
        ])
    }

    fn migration_commit(&self, target: &ImageSpec) -> RbdCryptResult<CmdOutput> {
        self.rbd(&[
            "migration".to_string(),
            "commit".to_string(),
            target.to_string(),
        ])
    }

    fn migration_abort(&self, target: &ImageSpec) -> RbdCryptResult<CmdOutput> {
        self.rbd(&[
            "migration".to_string(),
            "abort".to_string(),
            target.to_string(),
        ])
    }
}
