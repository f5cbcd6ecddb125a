// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{cell::RefCell, collections::HashMap, fmt, rc::Rc};

use crate::engine::{
    sim_engine::{
        image::{
            Layer, LuksHeader, MigrationState, ParentRef, SimFilesystem, SimImage, SimMigration,
        },
        randomization::Randomizer,
    },
    types::{CloneFormat, CmdOutput, EncryptionFormat, ImageSpec, Size, SnapSpec},
};

const MIRROR_MODES: [&str; 2] = ["snapshot", "journal"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) struct Errno(pub i32, pub &'static str);

pub(super) const EPERM: Errno = Errno(1, "Operation not permitted");
pub(super) const ENOENT: Errno = Errno(2, "No such file or directory");
pub(super) const EIO: Errno = Errno(5, "Input/output error");
pub(super) const EBUSY: Errno = Errno(16, "Device or resource busy");
pub(super) const EEXIST: Errno = Errno(17, "File exists");
pub(super) const EINVAL: Errno = Errno(22, "Invalid argument");

impl Errno {
    pub(super) fn output(self, prefix: &str) -> CmdOutput {
        CmdOutput::failure(self.0, format!("{prefix}: ({}) {}", self.0, self.1))
    }
}

fn no_image(image: &ImageSpec) -> CmdOutput {
    ENOENT.output(&format!("rbd: error opening image {}", image.name()))
}

/// An encryption option with its passphrase file already read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct LoadSpec {
    pub format: Option<EncryptionFormat>,
    pub secret: String,
}

/// Why encryption could not be loaded, and at which layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct LoadError {
    pub errno: Errno,
    pub image: String,
}

impl LoadError {
    pub(super) fn output(&self, prefix: &str) -> CmdOutput {
        CmdOutput::failure(
            self.errno.0,
            format!(
                "librbd::crypto::LoadRequest: handle_load: failed to load encryption. image name: {}\n{prefix}: ({}) {}",
                self.image, self.errno.0, self.errno.1
            ),
        )
    }
}

/// Check encryption options against the headers of an image's layers.
/// Option k unlocks the k-th header found walking from the image towards
/// its ancestors; the last option is reused for headers left over.
/// Returns the format of the outermost header, if any.
pub(super) fn load_encryption(
    layers: &[Layer],
    specs: &[LoadSpec],
) -> Result<Option<EncryptionFormat>, LoadError> {
    let headers: Vec<&LuksHeader> = layers.iter().filter_map(|l| l.header.as_ref()).collect();
    let layer_name = |k: usize| {
        layers
            .get(k)
            .or_else(|| layers.first())
            .map(|l| l.name.clone())
            .unwrap_or_default()
    };

    for k in 0..specs.len().max(headers.len()) {
        let spec = match specs.get(k).or_else(|| specs.last()) {
            Some(spec) => spec,
            None => break,
        };
        let header = headers.get(k).ok_or_else(|| LoadError {
            errno: EINVAL,
            image: layer_name(k),
        })?;
        // rbd assumes LUKS1 when no format is given.
        if spec.format.unwrap_or(EncryptionFormat::Luks1) != header.format {
            return Err(LoadError {
                errno: EINVAL,
                image: layer_name(k),
            });
        }
        if spec.secret != header.secret {
            return Err(LoadError {
                errno: EPERM,
                image: layer_name(k),
            });
        }
    }
    Ok(headers.first().map(|h| h.format))
}

/// What a mapped image looks like to mount.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum FsProbe {
    Ready,
    /// A LUKS header where a filesystem was expected.
    LuksSignature,
    Unrecognized,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) struct Mapping {
    pub non_primary: bool,
    pub probe: FsProbe,
}

struct ClusterState {
    name: String,
    images: HashMap<ImageSpec, SimImage>,
    peer: Option<SimCluster>,
    rdm: Randomizer,
}

impl fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterState")
            .field("name", &self.name)
            .field("images", &self.images.len())
            .field("peer", &self.peer.as_ref().map(|p| p.name()))
            .field("rdm", &self.rdm)
            .finish()
    }
}

impl ClusterState {
    fn layers(&self, image: &ImageSpec) -> Option<Vec<Layer>> {
        let top = self.images.get(image)?;
        let mut layers = vec![Layer {
            name: image.name().to_string(),
            header: top.header.clone(),
        }];
        let mut parent = top.parent.clone();
        while let Some(p) = parent {
            let snap = match self.images.get(&p.image).and_then(|i| i.snaps.get(&p.snap)) {
                Some(snap) => snap,
                None => break,
            };
            layers.push(Layer {
                name: p.image.name().to_string(),
                header: snap.header.clone(),
            });
            parent = snap.parent.clone();
        }
        Some(layers)
    }

    fn set_migration(&mut self, migration: &SimMigration, state: Option<MigrationState>) {
        for spec in [&migration.source, &migration.target] {
            if let Some(image) = self.images.get_mut(spec) {
                image.migration = state.map(|state| SimMigration {
                    state,
                    ..migration.clone()
                });
            }
        }
    }

    /// The migration the image takes part in as target.
    fn migration_of(&self, target: &ImageSpec) -> Option<SimMigration> {
        self.images
            .get(target)
            .and_then(|i| i.migration.clone())
            .filter(|m| &m.target == target)
    }
}

/// A simulated Ceph cluster. Clones of a SimCluster share its state.
#[derive(Clone, Debug)]
pub struct SimCluster {
    state: Rc<RefCell<ClusterState>>,
}

impl SimCluster {
    pub fn new(name: &str) -> SimCluster {
        SimCluster {
            state: Rc::new(RefCell::new(ClusterState {
                name: name.to_string(),
                images: HashMap::new(),
                peer: None,
                rdm: Randomizer::default(),
            })),
        }
    }

    pub fn name(&self) -> String {
        self.state.borrow().name.clone()
    }

    /// Images enabled for mirroring are copied to peer.
    pub fn set_peer(&self, peer: &SimCluster) {
        self.state.borrow_mut().peer = Some(peer.clone());
    }

    /// Make roughly one in denominator calls fail. 0 disables failures.
    pub fn set_failure_probability(&self, denominator: u32) {
        self.state.borrow_mut().rdm.set_probability(denominator);
    }

    pub fn contains(&self, image: &ImageSpec) -> bool {
        self.state.borrow().images.contains_key(image)
    }

    /// The size of the image, header included.
    pub fn image_size(&self, image: &ImageSpec) -> Option<Size> {
        self.state
            .borrow()
            .images
            .get(image)
            .map(|i| Size::from_bytes(i.size))
    }

    pub fn has_parent(&self, image: &ImageSpec) -> Option<bool> {
        self.state
            .borrow()
            .images
            .get(image)
            .map(|i| i.parent.is_some())
    }

    pub fn is_non_primary(&self, image: &ImageSpec) -> Option<bool> {
        self.state
            .borrow()
            .images
            .get(image)
            .map(|i| i.non_primary)
    }

    /// The format of the image's own header, None if it has none.
    pub fn own_format(&self, image: &ImageSpec) -> Option<EncryptionFormat> {
        self.state
            .borrow()
            .images
            .get(image)
            .and_then(|i| i.header.as_ref().map(|h| h.format))
    }

    pub(super) fn inject_failure(&self, op: &str) -> Option<CmdOutput> {
        if self.state.borrow_mut().rdm.throw_die() {
            warn!("Injecting failure into {op}");
            Some(EIO.output(&format!("rbd: {op} failed")))
        } else {
            None
        }
    }

    pub(super) fn create(&self, image: &ImageSpec, size: Size) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        if state.images.contains_key(image) {
            return EEXIST.output("rbd: create error");
        }
        state.images.insert(image.clone(), SimImage::new(size.bytes()));
        CmdOutput::success("")
    }

    pub(super) fn encryption_format(
        &self,
        image: &ImageSpec,
        format: EncryptionFormat,
        secret: String,
    ) -> CmdOutput {
        if !format.is_luks() {
            return EINVAL.output("rbd: encryption format error");
        }
        let mut state = self.state.borrow_mut();
        let sim = match state.images.get_mut(image) {
            Some(sim) => sim,
            None => return no_image(image),
        };
        if sim.header.is_some() {
            return EEXIST.output("rbd: encryption format error");
        }
        // A clone keeps seeing its parent's data through the new header.
        if sim.parent.is_none() {
            sim.fs = None;
        }
        sim.header = Some(LuksHeader { format, secret });
        CmdOutput::success("")
    }

    pub(super) fn resize(
        &self,
        image: &ImageSpec,
        size: Size,
        allow_shrink: bool,
        specs: &[LoadSpec],
    ) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        let layers = match state.layers(image) {
            Some(layers) => layers,
            None => return no_image(image),
        };
        let overhead = if specs.is_empty() {
            0
        } else {
            match load_encryption(&layers, specs) {
                Ok(format) => format.map_or(0, EncryptionFormat::header_overhead),
                Err(e) => return e.output("rbd: resize error"),
            }
        };
        let new_size = size.bytes().saturating_add(overhead);
        let sim = match state.images.get_mut(image) {
            Some(sim) => sim,
            None => return no_image(image),
        };
        if new_size == sim.size {
            return CmdOutput::failure(EINVAL.0, "rbd: new size is equal to original size");
        }
        if new_size < sim.size && !allow_shrink {
            return CmdOutput::failure(
                EINVAL.0,
                "rbd: shrinking an image is only allowed with the --allow-shrink flag",
            );
        }
        sim.size = new_size;
        CmdOutput::success("Resizing image: 100% complete...done.")
    }

    pub(super) fn snap_create(&self, snap: &SnapSpec) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        let sim = match state.images.get_mut(snap.image()) {
            Some(sim) => sim,
            None => return no_image(snap.image()),
        };
        if sim.snaps.contains_key(snap.name()) {
            return EEXIST.output("rbd: failed to create snapshot");
        }
        let snapshot = sim.snapshot();
        sim.snaps.insert(snap.name().to_string(), snapshot);
        CmdOutput::success("Creating snap: 100% complete...done.")
    }

    pub(super) fn snap_protect(&self, snap: &SnapSpec) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        let snapshot = match state
            .images
            .get_mut(snap.image())
            .and_then(|i| i.snaps.get_mut(snap.name()))
        {
            Some(snapshot) => snapshot,
            None => return ENOENT.output("rbd: protecting snap failed"),
        };
        if snapshot.protected {
            return EBUSY.output("rbd: protecting snap failed");
        }
        snapshot.protected = true;
        CmdOutput::success("")
    }

    pub(super) fn clone_image(
        &self,
        snap: &SnapSpec,
        target: &ImageSpec,
        clone_format: Option<CloneFormat>,
    ) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        let snapshot = match state
            .images
            .get(snap.image())
            .and_then(|i| i.snaps.get(snap.name()))
        {
            Some(snapshot) => snapshot,
            None => return ENOENT.output("rbd: clone error"),
        };
        if clone_format == Some(CloneFormat::V1) && !snapshot.protected {
            return EINVAL.output("rbd: clone error");
        }
        if state.images.contains_key(target) {
            return EEXIST.output("rbd: clone error");
        }
        let clone = SimImage::from_snapshot(
            snapshot,
            ParentRef {
                image: snap.image().clone(),
                snap: snap.name().to_string(),
            },
        );
        state.images.insert(target.clone(), clone);
        CmdOutput::success("")
    }

    pub(super) fn flatten(&self, image: &ImageSpec, specs: &[LoadSpec]) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        let layers = match state.layers(image) {
            Some(layers) => layers,
            None => return no_image(image),
        };
        if layers.len() < 2 {
            return EINVAL.output("rbd: flatten error");
        }
        if !specs.is_empty() {
            if let Err(e) = load_encryption(&layers, specs) {
                return e.output("rbd: flatten error");
            }
        }
        let inherited = layers[1..].iter().find_map(|l| l.header.clone());
        let sim = match state.images.get_mut(image) {
            Some(sim) => sim,
            None => return no_image(image),
        };
        if sim.header.is_none() {
            sim.header = inherited;
        }
        sim.parent = None;
        CmdOutput::success("Image flatten: 100% complete...done.")
    }

    pub(super) fn mirror_image_enable(&self, image: &ImageSpec, mode: &str) -> CmdOutput {
        if !MIRROR_MODES.contains(&mode) {
            return CmdOutput::failure(EINVAL.0, format!("rbd: invalid mirror image mode: {mode}"));
        }
        let state = self.state.borrow();
        let peer = match state.peer {
            Some(ref peer) if !Rc::ptr_eq(&peer.state, &self.state) => peer,
            _ => {
                return CmdOutput::failure(
                    EINVAL.0,
                    "rbd: mirroring not enabled on the pool",
                )
            }
        };
        if !state.images.contains_key(image) {
            return no_image(image);
        }

        let mut peer_state = peer.state.borrow_mut();
        let mut next = Some(image.clone());
        while let Some(spec) = next.take() {
            let sim = match state.images.get(&spec) {
                Some(sim) => sim,
                None => break,
            };
            if &spec == image || !peer_state.images.contains_key(&spec) {
                let mut copy = sim.copy_content();
                copy.non_primary = true;
                peer_state.images.insert(spec.clone(), copy);
            }
            next = sim.parent.as_ref().map(|p| p.image.clone());
        }
        CmdOutput::success("Mirroring enabled")
    }

    pub(super) fn status(&self, image: &ImageSpec) -> CmdOutput {
        let state = self.state.borrow();
        let sim = match state.images.get(image) {
            Some(sim) => sim,
            None => return no_image(image),
        };
        let mut status = json!({
            "watchers": sim
                .watchers
                .iter()
                .map(|w| json!({ "address": w }))
                .collect::<Vec<_>>(),
        });
        if let Some(ref migration) = sim.migration {
            status["migration"] = json!({
                "source_pool_name": migration.source.pool(),
                "source_image_name": migration.source.name(),
                "dest_pool_name": migration.target.pool(),
                "dest_image_name": migration.target.name(),
                "state": migration.state.as_ref(),
                "state_description": "",
            });
        }
        CmdOutput::success(status.to_string())
    }

    pub(super) fn migration_prepare(&self, source: &ImageSpec, target: &ImageSpec) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        if state.images.contains_key(target) {
            return EEXIST.output("rbd: preparing migration failed");
        }
        let sim = match state.images.get_mut(source) {
            Some(sim) => sim,
            None => return no_image(source),
        };
        if sim.migration.is_some() {
            return EBUSY.output("rbd: preparing migration failed");
        }
        let migration = SimMigration {
            source: source.clone(),
            target: target.clone(),
            state: MigrationState::Prepared,
        };
        sim.migration = Some(migration.clone());
        let mut copy = sim.copy_content();
        copy.migration = Some(migration);
        state.images.insert(target.clone(), copy);
        CmdOutput::success("")
    }

    pub(super) fn migration_execute(&self, target: &ImageSpec) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        match state.migration_of(target) {
            Some(m) if m.state == MigrationState::Prepared => {
                state.set_migration(&m, Some(MigrationState::Executed));
                CmdOutput::success("Image migration: 100% complete...done.")
            }
            _ => EINVAL.output("rbd: migration execute error"),
        }
    }

    pub(super) fn migration_commit(&self, target: &ImageSpec) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        match state.migration_of(target) {
            Some(m) if m.state == MigrationState::Executed => {
                state.set_migration(&m, None);
                state.images.remove(&m.source);
                CmdOutput::success("Commit image migration: 100% complete...done.")
            }
            _ => EINVAL.output("rbd: migration commit error"),
        }
    }

    pub(super) fn migration_abort(&self, target: &ImageSpec) -> CmdOutput {
        let mut state = self.state.borrow_mut();
        match state.migration_of(target) {
            Some(m) => {
                state.set_migration(&m, None);
                state.images.remove(&m.target);
                CmdOutput::success("Abort image migration: 100% complete...done.")
            }
            None => EINVAL.output("rbd: migration abort error"),
        }
    }

    /// Map an image for host: load its encryption, make a filesystem if
    /// asked to and tell how the mapped device will look to mount.
    pub(super) fn map(
        &self,
        image: &ImageSpec,
        host: &str,
        specs: &[LoadSpec],
        read_only: bool,
        skip_mkfs: bool,
    ) -> Result<Mapping, CmdOutput> {
        let mut state = self.state.borrow_mut();
        let layers = state.layers(image).ok_or_else(|| no_image(image))?;
        if !specs.is_empty() {
            load_encryption(&layers, specs).map_err(|e| e.output("rbd: map failed"))?;
        }
        let sim = state.images.get_mut(image).ok_or_else(|| no_image(image))?;

        if !skip_mkfs {
            if read_only {
                return Err(CmdOutput::failure(
                    1,
                    "mkfs: Read-only file system while setting up superblock",
                ));
            }
            sim.fs = Some(SimFilesystem::new());
        }
        sim.watchers.push(host.to_string());

        let probe = if specs.is_empty() && layers.iter().any(|l| l.header.is_some()) {
            if layers.len() == 1 {
                FsProbe::LuksSignature
            } else {
                FsProbe::Unrecognized
            }
        } else if sim.fs.is_none() {
            FsProbe::Unrecognized
        } else {
            FsProbe::Ready
        };
        Ok(Mapping {
            non_primary: sim.non_primary,
            probe,
        })
    }

    pub(super) fn unmap(&self, image: &ImageSpec, host: &str) {
        if let Some(sim) = self.state.borrow_mut().images.get_mut(image) {
            if let Some(index) = sim.watchers.iter().position(|w| w == host) {
                sim.watchers.remove(index);
            }
        }
    }

    pub(super) fn read_fs_file(&self, image: &ImageSpec, name: &str) -> Option<String> {
        self.state
            .borrow()
            .images
            .get(image)
            .and_then(|i| i.fs.as_ref())
            .and_then(|fs| fs.get(name).cloned())
    }

    pub(super) fn write_fs_file(&self, image: &ImageSpec, name: &str, contents: String) -> bool {
        match self
            .state
            .borrow_mut()
            .images
            .get_mut(image)
            .and_then(|i| i.fs.as_mut())
        {
            Some(fs) => {
                fs.insert(name.to_string(), contents);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::Value;

    use super::*;

    fn layer(name: &str, header: Option<(EncryptionFormat, &str)>) -> Layer {
        Layer {
            name: name.to_string(),
            header: header.map(|(format, secret)| LuksHeader {
                format,
                secret: secret.to_string(),
            }),
        }
    }

    fn load_spec(format: Option<EncryptionFormat>, secret: &str) -> LoadSpec {
        LoadSpec {
            format,
            secret: secret.to_string(),
        }
    }

    fn image(name: &str) -> ImageSpec {
        ImageSpec::from_str(&format!("rbd/{name}")).unwrap()
    }

    #[test]
    fn test_load_errors_name_layer() {
        let layers = vec![
            layer("clone", Some((EncryptionFormat::Luks2, "c"))),
            layer("parent", Some((EncryptionFormat::Luks1, "p"))),
        ];
        let good = [
            load_spec(Some(EncryptionFormat::Luks2), "c"),
            load_spec(Some(EncryptionFormat::Luks1), "p"),
        ];
        assert_eq!(
            load_encryption(&layers, &good),
            Ok(Some(EncryptionFormat::Luks2))
        );

        let wrong_parent_key = [
            load_spec(Some(EncryptionFormat::Luks2), "c"),
            load_spec(Some(EncryptionFormat::Luks1), "x"),
        ];
        assert_eq!(
            load_encryption(&layers, &wrong_parent_key),
            Err(LoadError {
                errno: EPERM,
                image: "parent".to_string()
            })
        );

        // The clone's option is reused for the parent's header.
        assert_eq!(
            load_encryption(&layers, &good[..1]),
            Err(LoadError {
                errno: EINVAL,
                image: "parent".to_string()
            })
        );

        // No format given means LUKS1.
        assert_eq!(
            load_encryption(&layers, &[load_spec(None, "c")]),
            Err(LoadError {
                errno: EINVAL,
                image: "clone".to_string()
            })
        );
    }

    #[test]
    fn test_load_option_without_header() {
        let layers = vec![
            layer("clone", Some((EncryptionFormat::Luks1, "c"))),
            layer("parent", None),
        ];
        let specs = [
            load_spec(Some(EncryptionFormat::Luks1), "c"),
            load_spec(Some(EncryptionFormat::Luks2), "x"),
        ];
        assert_eq!(
            load_encryption(&layers, &specs),
            Err(LoadError {
                errno: EINVAL,
                image: "parent".to_string()
            })
        );
        let text = LoadError {
            errno: EINVAL,
            image: "parent".to_string(),
        }
        .output("rbd: map failed")
        .text();
        assert!(text.contains("failed to load encryption. image name: parent"));
        assert!(text.contains("(22) Invalid argument"));
    }

    #[test]
    fn test_resize_outcomes() {
        let cluster = SimCluster::new("site-a");
        let spec = image("img");
        assert!(cluster.create(&spec, Size::from_gib(1)).is_success());
        let same = cluster.resize(&spec, Size::from_gib(1), true, &[]);
        assert_eq!(same.status, 22);
        assert!(same.text().contains("new size is equal to original size"));
        let shrink = cluster.resize(&spec, Size::from_mib(512), false, &[]);
        assert!(shrink.text().contains("--allow-shrink"));
        assert!(cluster
            .resize(&spec, Size::from_mib(512), true, &[])
            .is_success());
        assert_eq!(cluster.image_size(&spec), Some(Size::from_mib(512)));

        assert!(cluster
            .encryption_format(&spec, EncryptionFormat::Luks2, "k".to_string())
            .is_success());
        assert!(cluster
            .resize(
                &spec,
                Size::from_mib(512),
                false,
                &[load_spec(Some(EncryptionFormat::Luks2), "k")]
            )
            .is_success());
        assert_eq!(
            cluster.image_size(&spec),
            Some(Size::from_mib(512 + 16))
        );
    }

    #[test]
    fn test_flatten_materializes_header() {
        let cluster = SimCluster::new("site-a");
        let parent = image("parent");
        let clone = image("clone");
        cluster.create(&parent, Size::from_gib(1));
        cluster.encryption_format(&parent, EncryptionFormat::Luks1, "p".to_string());
        let snap = parent.snap("s").unwrap();
        assert!(cluster.snap_create(&snap).is_success());
        assert!(!cluster
            .clone_image(&snap, &clone, Some(CloneFormat::V1))
            .is_success());
        assert!(cluster.snap_protect(&snap).is_success());
        assert!(cluster
            .clone_image(&snap, &clone, Some(CloneFormat::V1))
            .is_success());
        assert_eq!(cluster.own_format(&clone), None);
        assert!(cluster.flatten(&clone, &[]).is_success());
        assert_eq!(cluster.own_format(&clone), Some(EncryptionFormat::Luks1));
        assert_eq!(cluster.has_parent(&clone), Some(false));
        assert_eq!(cluster.flatten(&clone, &[]).status, 22);
    }

    #[test]
    fn test_mirror_copies_parents() {
        let primary = SimCluster::new("site-a");
        let secondary = SimCluster::new("site-b");
        let parent = image("parent");
        let clone = image("clone");
        primary.create(&parent, Size::from_gib(1));
        let snap = parent.snap("s").unwrap();
        primary.snap_create(&snap);
        primary.clone_image(&snap, &clone, None);

        assert_eq!(primary.mirror_image_enable(&clone, "snapshot").status, 22);
        primary.set_peer(&secondary);
        assert_eq!(primary.mirror_image_enable(&clone, "bogus").status, 22);
        assert!(primary.mirror_image_enable(&clone, "snapshot").is_success());
        assert_eq!(secondary.is_non_primary(&clone), Some(true));
        assert_eq!(secondary.is_non_primary(&parent), Some(true));
        assert_eq!(primary.is_non_primary(&clone), Some(false));
    }

    #[test]
    fn test_migration_states() {
        let cluster = SimCluster::new("site-a");
        let source = image("src");
        let target = image("dst");
        cluster.create(&source, Size::from_gib(1));
        assert_eq!(cluster.migration_execute(&target).status, 22);
        assert!(cluster.migration_prepare(&source, &target).is_success());

        let status: Value =
            serde_json::from_str(&cluster.status(&target).stdout).unwrap();
        assert_eq!(status["migration"]["state"], "prepared");
        assert_eq!(status["migration"]["source_image_name"], "src");

        assert_eq!(cluster.migration_commit(&target).status, 22);
        assert!(cluster.migration_execute(&target).is_success());
        assert!(cluster.migration_commit(&target).is_success());
        assert!(!cluster.contains(&source));
        let status: Value =
            serde_json::from_str(&cluster.status(&target).stdout).unwrap();
        assert!(status.get("migration").is_none());
    }

    #[test]
    fn test_migration_abort_keeps_source() {
        let cluster = SimCluster::new("site-a");
        let source = image("src");
        let target = image("dst");
        cluster.create(&source, Size::from_gib(1));
        cluster.migration_prepare(&source, &target);
        assert!(cluster.migration_abort(&target).is_success());
        assert!(cluster.contains(&source));
        assert!(!cluster.contains(&target));
        let status: Value =
            serde_json::from_str(&cluster.status(&source).stdout).unwrap();
        assert!(status.get("migration").is_none());
    }
}
