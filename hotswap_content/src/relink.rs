use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use hotswap_shared::{
    log::{error, info, trace, warn},
    parking_lot::Mutex,
    Handle,
};

use crate::{
    common::Uid,
    library::ImportSource,
    loader::append,
    scene::{
        Action, Collection, Constraint, DataRef, InputValue, Material, NodeTree, Object, ParticleSettings, Scene, SharedScene,
    },
    snapshot::{apply_transform, AnimatedProperties, OverrideSnapshot},
    Error, Result,
};

/// Outcome of a successful relink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelinkResult {
    Ok { new_uid: Uid },
    /// The relink completed but some local modifications couldn't be carried over.
    Warning { new_uid: Uid, reason: String },
}

impl RelinkResult {
    pub fn new_uid(&self) -> Uid {
        match self {
            RelinkResult::Ok { new_uid } | RelinkResult::Warning { new_uid, .. } => *new_uid,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            RelinkResult::Ok { .. } => None,
            RelinkResult::Warning { reason, .. } => Some(reason),
        }
    }
}

/// Marks a uid as being relinked for as long as the guard lives.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<Uid>>,
    uid: Uid,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<Uid>>, uid: Uid) -> Result<Self> {
        if !in_flight.lock().insert(uid) {
            return Err(Error::RelinkInProgress(uid));
        }
        Ok(Self { in_flight, uid })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.uid);
    }
}

/// Replaces imported assets with a fresh import of their source while keeping local modifications.
///
/// Local modifications are the actions assigned to objects and node trees, constraints that were
/// added after the import, transforms that are not driven by an action and the input values of
/// override-flagged group nodes.
pub struct RelinkEngine {
    importer: Arc<dyn ImportSource>,
    in_flight: Mutex<HashSet<Uid>>,
}

impl RelinkEngine {
    pub fn new(importer: Arc<dyn ImportSource>) -> Self {
        Self {
            importer,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn importer(&self) -> &dyn ImportSource {
        self.importer.as_ref()
    }

    /// Relinks the asset with the given uid. The asset is registered under a new uid afterwards.
    ///
    /// When the reimport fails, the old collections and data are already gone and the error is returned.
    /// The registry entry stays, so that the relink can be repeated once the source is available again.
    pub fn relink(&self, scene: &mut Scene, uid: Uid) -> Result<RelinkResult> {
        let _guard = InFlightGuard::acquire(&self.in_flight, uid)?;
        self.relink_exclusive(scene, uid)
    }

    /// Relinks while holding the scene lock. A second call for the same uid runs after the first one
    /// finished and fails with [`Error::UnknownAsset`] because the uid has been replaced.
    pub fn relink_shared(&self, scene: &SharedScene, uid: Uid) -> Result<RelinkResult> {
        let mut scene = scene.lock();
        self.relink(&mut scene, uid)
    }

    fn relink_exclusive(&self, scene: &mut Scene, uid: Uid) -> Result<RelinkResult> {
        let reference = scene.registry().lookup(uid).cloned().ok_or(Error::UnknownAsset(uid))?;
        let source_path = scene.resolve_source(&reference);
        info!("Relinking '{}' ({uid}) from \"{}\"", reference.data_name, source_path.display());

        let snapshot = OverrideSnapshot::capture(scene, uid);
        let parent = match scene.asset_root(uid) {
            Some(root) => scene.parent_of(root.into()).unwrap_or_else(|| scene.root()),
            None => {
                info!("'{}' has no datablocks left and is imported into the scene root", reference.data_name);
                scene.root()
            }
        };
        let old_objects = scene.tagged_handles::<Object>(uid);

        delete_old_hierarchy(scene, uid, &snapshot, &old_objects);

        scene.begin_staging();
        let loaded = match append(
            scene,
            self.importer.as_ref(),
            &source_path,
            &reference.data_name,
            reference.data_type,
            parent,
        ) {
            Ok(loaded) => loaded,
            Err(err) => {
                scene.commit_staging();
                error!("Failed to reimport '{}': {err}", reference.data_name);
                return Err(err);
            }
        };
        let new_uid = loaded.uid;

        let mut remap = Remap::new(scene, &snapshot, &old_objects, new_uid);
        remap.objects(scene);
        remap.shaders(scene);
        remap.external_references(scene);
        let Remap {
            warnings,
            replaced_actions,
            ..
        } = remap;

        for action in replaced_actions {
            if scene.users(DataRef::Action(action)) == 0 {
                scene.remove_ref(DataRef::Action(action));
            }
        }
        remove_old_objects(scene, uid, &old_objects, new_uid);
        scene.commit_staging();

        scene.registry_mut().unregister(uid);
        info!("Relinked '{}' from {uid} to {new_uid}", reference.data_name);

        if warnings.is_empty() {
            Ok(RelinkResult::Ok { new_uid })
        } else {
            let reason = warnings.join("; ");
            warn!("Relinked '{}' with warnings: {reason}", reference.data_name);
            Ok(RelinkResult::Warning { new_uid, reason })
        }
    }
}

/// Removes the collections, materials, node trees and images of the old import and its actions that
/// were not captured. The old objects are only unlinked because the remap still reads them.
fn delete_old_hierarchy(scene: &mut Scene, uid: Uid, snapshot: &OverrideSnapshot, old_objects: &[Handle<Object>]) {
    let masters = scene
        .iter::<Collection>()
        .filter(|(_, collection)| collection.relink.is(uid) && collection.relink.master)
        .map(|(handle, _)| handle)
        .collect::<Vec<_>>();
    for master in masters {
        let mut stack = vec![master];
        while let Some(collection) = stack.pop() {
            if let Some(value) = scene.get(collection) {
                stack.extend(
                    value
                        .children
                        .iter()
                        .copied()
                        .filter(|child| scene.get(*child).is_some_and(|child| child.relink.is(uid))),
                );
            }
            scene.remove_ref(DataRef::Collection(collection));
        }
    }

    for object in old_objects {
        scene.unlink_object_everywhere(*object);
    }

    for node in scene.tagged(uid) {
        let remove = match node {
            DataRef::Material(_) | DataRef::NodeTree(_) | DataRef::Image(_) => true,
            DataRef::Action(action) => !snapshot.captured_actions.contains(&action),
            _ => false,
        };
        if remove {
            trace!("Removing the old {} '{}'", node.kind(), scene.name_of(node).unwrap_or_default());
            scene.remove_ref(node);
        }
    }
}

/// Removes the old objects and their particle settings. Captured actions that ended up without a
/// user are removed, the others now belong to the new import.
fn remove_old_objects(scene: &mut Scene, uid: Uid, old_objects: &[Handle<Object>], new_uid: Uid) {
    for node in scene.tagged(uid) {
        if let DataRef::ParticleSettings(_) = node {
            scene.remove_ref(node);
        }
    }
    for object in old_objects {
        scene.remove_ref(DataRef::Object(*object));
    }
    for action in scene.tagged_handles::<Action>(uid) {
        if scene.users(DataRef::Action(action)) == 0 {
            scene.remove_ref(DataRef::Action(action));
        } else if let Some(action) = scene.get_mut(action) {
            action.relink.uid = Some(new_uid);
        }
    }
}

/// Carries the snapshot over to the freshly imported datablocks, matched by original name.
struct Remap<'a> {
    snapshot: &'a OverrideSnapshot,
    new_uid: Uid,
    old_objects: HashSet<Handle<Object>>,
    old_to_new: HashMap<Handle<Object>, Handle<Object>>,
    new_objects: HashMap<String, Handle<Object>>,
    warnings: Vec<String>,
    replaced_actions: Vec<Handle<Action>>,
}

impl<'a> Remap<'a> {
    fn new(scene: &Scene, snapshot: &'a OverrideSnapshot, old_objects: &[Handle<Object>], new_uid: Uid) -> Self {
        let mut new_objects = HashMap::new();
        for handle in scene.tagged_handles::<Object>(new_uid) {
            if let Some(object) = scene.get(handle) {
                new_objects.entry(object.relink.original_name.clone()).or_insert(handle);
            }
        }
        let old_to_new = snapshot
            .objects
            .iter()
            .filter_map(|(name, old)| new_objects.get(name).map(|new| (old.handle, *new)))
            .collect();
        Self {
            snapshot,
            new_uid,
            old_objects: old_objects.iter().copied().collect(),
            old_to_new,
            new_objects,
            warnings: Vec::new(),
            replaced_actions: Vec::new(),
        }
    }

    /// Copies a user constraint and points its target into the new hierarchy.
    fn retarget(&mut self, scene: &Scene, constraint: &Constraint, owner: &str) -> Constraint {
        let mut constraint = constraint.clone();
        if let Some(target) = constraint.target {
            if let Some(new) = self.old_to_new.get(&target) {
                constraint.target = Some(*new);
            } else if self.old_objects.contains(&target) {
                let target_name = scene.get(target).map(|target| target.relink.original_name.as_str()).unwrap_or_default();
                self.warnings.push(format!(
                    "The constraint '{}' of '{owner}' targets '{target_name}' which no longer exists",
                    constraint.name
                ));
                constraint.target = None;
            }
        }
        constraint
    }

    /// Assigns the action to its new owner, moves it to the new uid and remembers the fresh action it replaces.
    fn reassign_action(&mut self, scene: &mut Scene, action: Handle<Action>, fresh: Option<Handle<Action>>) {
        if let Some(action) = scene.get_mut(action) {
            action.relink.uid = Some(self.new_uid);
        }
        if let Some(fresh) = fresh.filter(|fresh| *fresh != action) {
            self.replaced_actions.push(fresh);
        }
    }

    fn objects(&mut self, scene: &mut Scene) {
        let snapshot = self.snapshot;
        let mut names = snapshot.objects.keys().collect::<Vec<_>>();
        names.sort();

        for name in names {
            let old = &snapshot.objects[name];
            let Some(new) = self.new_objects.get(name).copied() else {
                self.warnings.push(format!("The object '{name}' no longer exists"));
                continue;
            };

            if let Some(action) = old.action.filter(|action| scene.contains(*action)) {
                let fresh = scene.get(new).and_then(|object| object.action);
                if let Some(object) = scene.get_mut(new) {
                    object.action = Some(action);
                }
                self.reassign_action(scene, action, fresh);
            }

            let existing = scene
                .get(new)
                .map(|object| object.constraints.iter().map(|constraint| constraint.name.clone()).collect::<HashSet<_>>())
                .unwrap_or_default();
            let user_constraints = old
                .user_constraints()
                .filter(|constraint| !existing.contains(&constraint.name))
                .cloned()
                .collect::<Vec<_>>();
            let constraints = user_constraints
                .iter()
                .map(|constraint| self.retarget(scene, constraint, name))
                .collect::<Vec<_>>();

            let mut bone_constraints = Vec::new();
            for bone in &old.pose_bones {
                let user = bone
                    .constraints
                    .iter()
                    .filter(|constraint| !bone.import_constraints.contains(&constraint.name))
                    .collect::<Vec<_>>();
                if user.is_empty() {
                    continue;
                }
                let Some(existing) = scene.get(new).and_then(|object| object.pose_bone(&bone.name)).map(|new_bone| {
                    new_bone
                        .constraints
                        .iter()
                        .map(|constraint| constraint.name.clone())
                        .collect::<HashSet<_>>()
                }) else {
                    self.warnings.push(format!(
                        "The bone '{}' of '{name}' no longer exists and its constraints were dropped",
                        bone.name
                    ));
                    continue;
                };
                let owner = format!("{name}/{}", bone.name);
                let copied = user
                    .into_iter()
                    .filter(|constraint| !existing.contains(&constraint.name))
                    .map(|constraint| self.retarget(scene, constraint, &owner))
                    .collect::<Vec<_>>();
                bone_constraints.push((bone.name.clone(), copied));
            }

            let action = scene.get(new).and_then(|object| object.action);
            let animated = AnimatedProperties::of(action.and_then(|action| scene.get(action)));
            if let Some(object) = scene.get_mut(new) {
                object.constraints.extend(constraints);
                for (bone_name, copied) in bone_constraints {
                    if let Some(bone) = object.pose_bones.iter_mut().find(|bone| bone.name == bone_name) {
                        bone.constraints.extend(copied);
                    }
                }
                apply_transform(&mut object.transform, &old.transform, animated);
            }
        }
    }

    fn shaders(&mut self, scene: &mut Scene) {
        let snapshot = self.snapshot;
        for material in scene.tagged_handles::<Material>(self.new_uid) {
            let Some(material) = scene.get(material) else {
                continue;
            };
            let Some(tree_handle) = material.node_tree else {
                continue;
            };
            let Some(tree) = scene.get(tree_handle) else {
                continue;
            };
            let fresh_action = tree.action;
            let overrides = tree
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(index, node)| {
                    let group = scene.get(node.override_group()?)?;
                    Some((index, (material.relink.original_name.clone(), group.relink.original_name.clone())))
                })
                .collect::<Vec<_>>();

            for (index, key) in overrides {
                let Some(old) = snapshot.shaders.get(&key) else {
                    continue;
                };
                let mut missing = Vec::new();
                if let Some(node) = scene.get_mut(tree_handle).and_then(|tree| tree.nodes.get_mut(index)) {
                    for input in &old.inputs {
                        let value = match input.value {
                            InputValue::Object(Some(target)) => {
                                InputValue::Object(self.old_to_new.get(&target).copied().or(Some(target)))
                            }
                            value => value,
                        };
                        match node.input_mut(&input.name) {
                            Some(new_input) => new_input.value = value,
                            None => missing.push(input.name.clone()),
                        }
                    }
                }
                for input in missing {
                    self.warnings.push(format!(
                        "The input '{input}' of the '{}' override in '{}' no longer exists",
                        key.1, key.0
                    ));
                }

                if let Some(action) = old.action.filter(|action| scene.contains(*action)) {
                    if let Some(tree) = scene.get_mut(tree_handle) {
                        tree.action = Some(action);
                    }
                    self.reassign_action(scene, action, fresh_action);
                }
            }
        }
    }

    /// Points references from outside of the old import to the replacements of the old objects.
    fn external_references(&mut self, scene: &mut Scene) {
        let old_to_new = &self.old_to_new;
        let retarget = |target: &mut Option<Handle<Object>>| {
            if let Some(new) = target.and_then(|old| old_to_new.get(&old)) {
                *target = Some(*new);
            }
        };

        for (handle, object) in scene.iter_mut::<Object>() {
            if self.old_objects.contains(&handle) {
                continue;
            }
            let bone_constraints = object.pose_bones.iter_mut().flat_map(|bone| bone.constraints.iter_mut());
            for constraint in object.constraints.iter_mut().chain(bone_constraints) {
                retarget(&mut constraint.target);
            }
        }
        for (_, tree) in scene.iter_mut::<NodeTree>() {
            for input in tree.nodes.iter_mut().flat_map(|node| node.inputs.iter_mut()) {
                if let InputValue::Object(target) = &mut input.value {
                    retarget(target);
                }
            }
        }
        for (_, settings) in scene.iter_mut::<ParticleSettings>() {
            retarget(&mut settings.instance_object);
        }
    }
}
