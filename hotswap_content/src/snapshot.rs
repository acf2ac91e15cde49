use std::collections::{HashMap, HashSet};

use hotswap_shared::{log::warn, Handle};

use crate::{
    common::Uid,
    scene::{Action, Constraint, Material, NodeInput, Object, Scene, Transform},
};

/// Transform properties that are driven by an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnimatedProperties {
    pub location: bool,
    pub rotation_euler: bool,
    pub rotation_quaternion: bool,
    pub scale: bool,
}

impl AnimatedProperties {
    pub fn of(action: Option<&Action>) -> Self {
        match action {
            Some(action) => Self {
                location: action.animates("location"),
                rotation_euler: action.animates("rotation_euler"),
                rotation_quaternion: action.animates("rotation_quaternion"),
                scale: action.animates("scale"),
            },
            None => Self::default(),
        }
    }
}

/// Copies the properties of `source` that are not animated into `target`.
pub fn apply_transform(target: &mut Transform, source: &Transform, animated: AnimatedProperties) {
    if !animated.location {
        target.location = source.location;
    }
    if !animated.rotation_euler {
        target.rotation_euler = source.rotation_euler;
    }
    if !animated.rotation_quaternion {
        target.rotation_quaternion = source.rotation_quaternion;
    }
    if !animated.scale {
        target.scale = source.scale;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PoseBoneSnapshot {
    pub name: String,
    pub constraints: Vec<Constraint>,
    pub import_constraints: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ObjectSnapshot {
    pub handle: Handle<Object>,
    pub action: Option<Handle<Action>>,
    pub transform: Transform,
    pub constraints: Vec<Constraint>,
    pub import_constraints: Vec<String>,
    pub pose_bones: Vec<PoseBoneSnapshot>,
}

impl ObjectSnapshot {
    /// Constraints that were added after the import.
    pub fn user_constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|constraint| !self.import_constraints.contains(&constraint.name))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ShaderSnapshot {
    pub inputs: Vec<NodeInput>,
    pub action: Option<Handle<Action>>,
}

/// State of the old instance of an asset that has to survive the relink.
#[derive(Debug, Default)]
pub(crate) struct OverrideSnapshot {
    /// Keyed by the original name of the object.
    pub objects: HashMap<String, ObjectSnapshot>,
    /// Keyed by the original names of the material and of the tree of the override-flagged group node.
    pub shaders: HashMap<(String, String), ShaderSnapshot>,
    pub captured_actions: HashSet<Handle<Action>>,
}

impl OverrideSnapshot {
    /// Captures the overrides of all datablocks tagged with `uid`. When several datablocks share
    /// an original name, the first one wins.
    pub fn capture(scene: &Scene, uid: Uid) -> Self {
        let mut snapshot = Self::default();

        for handle in scene.tagged_handles::<Object>(uid) {
            let Some(object) = scene.get(handle) else {
                continue;
            };
            if snapshot.objects.contains_key(&object.relink.original_name) {
                warn!(
                    "The object '{}' has the same original name '{}' as another object of the asset. Only the first one is remapped",
                    object.name, object.relink.original_name
                );
                continue;
            }
            snapshot.captured_actions.extend(object.action);
            snapshot.objects.insert(
                object.relink.original_name.clone(),
                ObjectSnapshot {
                    handle,
                    action: object.action,
                    transform: object.transform,
                    constraints: object.constraints.clone(),
                    import_constraints: object.relink.metadata.constraints.clone(),
                    pose_bones: object
                        .pose_bones
                        .iter()
                        .map(|bone| PoseBoneSnapshot {
                            name: bone.name.clone(),
                            constraints: bone.constraints.clone(),
                            import_constraints: bone.metadata.constraints.clone(),
                        })
                        .collect(),
                },
            );
        }

        for (_, material) in scene.iter::<Material>() {
            if !material.relink.is(uid) {
                continue;
            }
            let Some(tree) = material.node_tree.and_then(|tree| scene.get(tree)) else {
                continue;
            };
            for node in &tree.nodes {
                let Some(group) = node.override_group().and_then(|group| scene.get(group)) else {
                    continue;
                };
                let key = (material.relink.original_name.clone(), group.relink.original_name.clone());
                if snapshot.shaders.contains_key(&key) {
                    warn!(
                        "The material '{}' has more than one override node for '{}'. Only the first one is remapped",
                        material.name, group.name
                    );
                    continue;
                }
                snapshot.captured_actions.extend(tree.action);
                snapshot.shaders.insert(
                    key,
                    ShaderSnapshot {
                        inputs: node.inputs.clone(),
                        action: tree.action,
                    },
                );
            }
        }

        snapshot
    }
}
