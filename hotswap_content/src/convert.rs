use std::collections::HashSet;

use hotswap_shared::{
    log::{info, warn},
    Handle,
};
use serde::{Deserialize, Serialize};

use crate::{
    common::{strip_numeric_suffix, Uid},
    library::ImportSource,
    scene::{Action, DataRef, Object, RelinkTag, Scene, Transform},
    traversal, Error, Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Objects whose name contains the marker (ignoring case) keep their transform and action.
    pub rig_marker: String,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            rig_marker: "rig".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertReport {
    /// Names of the converted assets.
    pub converted: Vec<String>,
    pub warnings: Vec<String>,
}

struct CapturedRig {
    name: String,
    transform: Transform,
    action: Option<Handle<Action>>,
}

/// Replaces tracked assets with plain local copies of their source that are no longer tracked.
///
/// Rig objects keep their transform and action. Every other local modification is lost. All
/// roots are validated before the scene is modified.
pub fn convert(
    scene: &mut Scene,
    importer: &dyn ImportSource,
    roots: &[DataRef],
    config: &ConvertConfig,
) -> Result<ConvertReport> {
    let mut uids = Vec::new();
    for root in roots {
        let uid = scene
            .tag(*root)
            .and_then(|tag| tag.uid)
            .ok_or_else(|| Error::NotTracked(scene.name_of(*root).unwrap_or_default().to_owned()))?;
        if scene.registry().lookup(uid).is_none() {
            return Err(Error::UnknownAsset(uid));
        }
        if !uids.contains(&uid) {
            uids.push(uid);
        }
    }

    let mut report = ConvertReport::default();
    for uid in uids {
        convert_asset(scene, importer, uid, config, &mut report)?;
    }
    Ok(report)
}

fn convert_asset(
    scene: &mut Scene,
    importer: &dyn ImportSource,
    uid: Uid,
    config: &ConvertConfig,
    report: &mut ConvertReport,
) -> Result<()> {
    let reference = scene.registry().lookup(uid).cloned().ok_or(Error::UnknownAsset(uid))?;
    let source_path = scene.resolve_source(&reference);
    let marker = config.rig_marker.to_lowercase();

    let rigs = scene
        .tagged_handles::<Object>(uid)
        .into_iter()
        .filter_map(|handle| scene.get(handle))
        .filter(|object| !marker.is_empty() && object.name.to_lowercase().contains(&marker))
        .map(|object| CapturedRig {
            name: strip_numeric_suffix(&object.name).to_owned(),
            transform: object.transform,
            action: object.action,
        })
        .collect::<Vec<_>>();
    let keep = rigs
        .iter()
        .filter_map(|rig| rig.action.map(DataRef::Action))
        .collect::<HashSet<_>>();

    let parent = scene
        .asset_root(uid)
        .and_then(|root| scene.parent_of(root.into()))
        .unwrap_or_else(|| scene.root());

    for node in scene.tagged(uid) {
        if !keep.contains(&node) {
            scene.remove_ref(node);
        }
    }
    scene.purge_orphans(&keep);

    let root = importer.import(scene, &source_path, &reference.data_name, reference.data_type)?;
    scene.link_root(root, parent);

    let imported = traversal::ownership(scene, root.into())
        .into_iter()
        .filter_map(|node| match node {
            DataRef::Object(handle) => Some(handle),
            _ => None,
        })
        .collect::<Vec<_>>();
    for rig in &rigs {
        let target = imported.iter().copied().find(|handle| {
            scene
                .get(*handle)
                .is_some_and(|object| strip_numeric_suffix(&object.name) == rig.name)
        });
        let Some(target) = target else {
            let warning = format!("The rig '{}' no longer exists in '{}'", rig.name, reference.data_name);
            warn!("{warning}");
            report.warnings.push(warning);
            continue;
        };
        let fresh = scene.get(target).and_then(|object| object.action);
        if let Some(object) = scene.get_mut(target) {
            object.transform = rig.transform;
            if rig.action.is_some() {
                object.action = rig.action;
            }
        }
        if let (Some(fresh), Some(action)) = (fresh, rig.action) {
            if fresh != action && scene.users(DataRef::Action(fresh)) == 0 {
                scene.remove_ref(DataRef::Action(fresh));
            }
        }
    }

    for node in traversal::ownership(scene, root.into()) {
        if let Some(tag) = scene.tag_mut(node).filter(|tag| tag.uid.is_none()) {
            *tag = RelinkTag::default();
        }
    }
    for action in &keep {
        if scene.users(*action) == 0 {
            scene.remove_ref(*action);
        } else if let Some(tag) = scene.tag_mut(*action) {
            *tag = RelinkTag::default();
        }
    }
    scene.registry_mut().unregister(uid);

    info!("Converted '{}' ({uid}) into local datablocks", reference.data_name);
    report.converted.push(reference.data_name);
    Ok(())
}
