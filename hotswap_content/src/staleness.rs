use std::collections::BTreeSet;

use hotswap_shared::{
    log::{info, warn},
    Handle,
};

use crate::{
    common::{SourceVersion, Uid},
    scene::{Object, Scene},
    Error, Result,
};

/// Tracked assets whose source changed since they were imported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalenessReport {
    pub stale: BTreeSet<Uid>,
    /// Asset names of the stale uids, in the order of the uids.
    pub names: Vec<String>,
}

impl StalenessReport {
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty()
    }
}

/// Compares the registered version of every asset that is in use with the modification time of its source.
///
/// A missing source counts as a change. Registry entries that no live datablock references are
/// skipped, as are tags whose uid has no registry entry. The path of every checked entry is stored
/// relative to the current document directory again.
pub fn check_all(scene: &mut Scene) -> StalenessReport {
    let live = scene.live_nodes();
    let uids = live
        .iter()
        .filter_map(|node| scene.tag(*node).and_then(|tag| tag.uid))
        .collect::<BTreeSet<_>>();

    let mut report = StalenessReport::default();
    for uid in uids {
        let document_dir = scene.document_dir().map(|dir| dir.to_path_buf());
        let Some(reference) = scene.registry().lookup(uid).cloned() else {
            warn!("The uid {uid} is used by the scene but has no registry entry");
            continue;
        };
        scene.registry_mut().normalize_path(uid, document_dir.as_deref());

        let source_path = scene.resolve_source(&reference);
        let current = SourceVersion::of_file(&source_path);
        if current != Some(reference.version) {
            match current {
                Some(current) => info!(
                    "'{}' ({uid}) is out of date: imported {}, source modified {current}",
                    reference.data_name, reference.version
                ),
                None => warn!(
                    "'{}' ({uid}) is out of date because its source \"{}\" is missing",
                    reference.data_name,
                    source_path.display()
                ),
            }
            report.stale.insert(uid);
            report.names.push(reference.data_name);
        }
    }
    report
}

/// Returns `true` when the source of the asset changed since its import.
pub fn check_asset(scene: &Scene, uid: Uid) -> Result<bool> {
    let reference = scene.registry().lookup(uid).ok_or(Error::UnknownAsset(uid))?;
    let current = SourceVersion::of_file(&scene.resolve_source(reference));
    Ok(current != Some(reference.version))
}

/// Registry information of the asset an object belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub name: String,
    pub uid: Uid,
    /// Stored source path, relative to the document directory.
    pub path: String,
    pub version: SourceVersion,
    pub update_available: bool,
}

/// Describes the tracked asset the object belongs to.
pub fn asset_info(scene: &Scene, object: Handle<Object>) -> Result<AssetInfo> {
    let object_name = scene.get(object).map(|object| object.name.clone()).unwrap_or_default();
    let uid = scene
        .get(object)
        .and_then(|object| object.relink.uid)
        .ok_or_else(|| Error::NotTracked(object_name))?;
    let reference = scene.registry().lookup(uid).ok_or(Error::UnknownAsset(uid))?;
    Ok(AssetInfo {
        name: reference.data_name.clone(),
        uid,
        path: reference.path.clone(),
        version: reference.version,
        update_available: check_asset(scene, uid)?,
    })
}
