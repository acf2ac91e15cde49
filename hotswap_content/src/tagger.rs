use hotswap_shared::log::{info, trace};

use crate::{
    common::Uid,
    scene::{DataRef, ImportedRoot, RelinkTag, Scene, TagMetadata},
    traversal,
};

/// Tags every datablock owned by the freshly imported `root` with `uid`.
///
/// The original name is the datablock's name in its source as recorded by the importer. Without
/// one, the name the datablock has once pending name staging is committed is used. Only a collection root becomes the master. Datablocks that already belong to another
/// registered asset are shared with that asset and stay untouched. Returns the number of
/// tagged datablocks.
pub fn tag(scene: &mut Scene, root: ImportedRoot, uid: Uid) -> usize {
    let root_ref = DataRef::from(root);
    let mut count = 0;

    for node in traversal::ownership(scene, root_ref) {
        let Some(tag) = scene.tag(node) else {
            continue;
        };
        if let Some(other) = tag.uid.filter(|other| *other != uid) {
            if scene.registry().lookup(other).is_some() {
                trace!("Skipping the {} '{}' because it belongs to {other}", node.kind(), scene.name_of(node).unwrap_or_default());
                continue;
            }
        }

        let original_name = if tag.original_name.is_empty() {
            scene.final_name(node).unwrap_or_default()
        } else {
            tag.original_name.clone()
        };
        let metadata = import_metadata(scene, node);
        let master = node == root_ref && matches!(root, ImportedRoot::Collection(_));
        if let Some(tag) = scene.tag_mut(node) {
            *tag = RelinkTag {
                uid: Some(uid),
                original_name,
                master,
                metadata,
            };
            count += 1;
        }
        if let DataRef::Object(handle) = node {
            if let Some(object) = scene.get_mut(handle) {
                for bone in &mut object.pose_bones {
                    bone.metadata = TagMetadata {
                        constraints: bone.constraints.iter().map(|constraint| constraint.name.clone()).collect(),
                    };
                }
            }
        }
    }

    info!("Tagged {count} datablock(s) with {uid}");
    count
}

fn import_metadata(scene: &Scene, node: DataRef) -> TagMetadata {
    match node {
        DataRef::Object(handle) => TagMetadata {
            constraints: scene
                .get(handle)
                .map(|object| object.constraints.iter().map(|constraint| constraint.name.clone()).collect())
                .unwrap_or_default(),
        },
        _ => TagMetadata::default(),
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::SystemTime};

    use super::*;
    use crate::{
        common::{AssetKind, SourceVersion},
        scene::{Collection, Constraint, Material, Object, ObjectData, PoseBone},
    };

    fn chair(scene: &mut Scene) -> (hotswap_shared::Handle<Collection>, hotswap_shared::Handle<Object>) {
        let chair = scene.add(Collection::new("Chair"));
        let parts = scene.add(Collection::new("Parts"));
        let rig = scene.add(Object::new("Rig", ObjectData::default()));
        scene.get_mut(rig).unwrap().constraints.push(Constraint::new("Copy Location", "COPY_LOCATION"));
        scene.get_mut(rig).unwrap().pose_bones.push(PoseBone {
            name: "Spine".to_owned(),
            constraints: vec![Constraint::new("Limit Rotation", "LIMIT_ROTATION")],
            ..Default::default()
        });
        scene.link_collection(chair, parts);
        scene.link_object(parts, rig);
        (chair, rig)
    }

    #[test]
    fn every_owned_node_is_tagged() {
        let mut scene = Scene::new();
        let (chair, rig) = chair(&mut scene);
        let uid = Uid::new();

        let count = tag(&mut scene, ImportedRoot::Collection(chair), uid);
        assert_eq!(count, 3);
        assert_eq!(scene.tagged(uid).len(), 3);

        let chair = scene.get(chair).unwrap();
        assert!(chair.relink.master);
        assert_eq!(chair.relink.original_name, "Chair");

        let rig = scene.get(rig).unwrap();
        assert!(!rig.relink.master);
        assert_eq!(rig.relink.metadata.constraints, vec!["Copy Location"]);
        assert_eq!(rig.pose_bones[0].metadata.constraints, vec!["Limit Rotation"]);
    }

    #[test]
    fn object_root_is_not_master() {
        let mut scene = Scene::new();
        let (_, rig) = chair(&mut scene);
        let uid = Uid::new();
        tag(&mut scene, ImportedRoot::Object(rig), uid);
        assert!(!scene.get(rig).unwrap().relink.master);
        assert!(scene.get(rig).unwrap().relink.is(uid));
    }

    #[test]
    fn nodes_of_other_registered_assets_are_shared() {
        let mut scene = Scene::new();
        let (chair, rig) = chair(&mut scene);
        let wood = scene.add(Material::new("Wood"));
        scene.get_mut(rig).unwrap().material_slots.push(wood);

        let other = Uid::new();
        scene.get_mut(wood).unwrap().relink.uid = Some(other);
        scene.register_asset(
            other,
            Path::new("/library/wood.yaml"),
            AssetKind::Object,
            "Wood",
            SourceVersion::from(SystemTime::UNIX_EPOCH),
        );

        let uid = Uid::new();
        tag(&mut scene, ImportedRoot::Collection(chair), uid);
        assert!(scene.get(wood).unwrap().relink.is(other));
    }

    #[test]
    fn staged_nodes_keep_their_final_name() {
        let mut scene = Scene::new();
        scene.add(Object::new("Rig", ObjectData::default()));
        scene.begin_staging();
        let rig = scene.add(Object::new("Rig", ObjectData::default()));
        tag(&mut scene, ImportedRoot::Object(rig), Uid::new());
        assert_eq!(scene.get(rig).unwrap().name, "Rig.staged");
        assert_eq!(scene.get(rig).unwrap().relink.original_name, "Rig");
    }

    #[test]
    fn source_name_survives_renaming() {
        let mut scene = Scene::new();
        scene.add(Object::new("Rig", ObjectData::default()));
        let rig = scene.add(Object::new("Rig", ObjectData::default()));
        scene.get_mut(rig).unwrap().relink.original_name = "Rig".to_owned();

        tag(&mut scene, ImportedRoot::Object(rig), Uid::new());
        assert_eq!(scene.get(rig).unwrap().name, "Rig.001");
        assert_eq!(scene.get(rig).unwrap().relink.original_name, "Rig");
    }
}
