mod datablocks;

pub use datablocks::*;

use std::{
    collections::{BTreeSet, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use hotswap_shared::{
    log::{info, trace, warn},
    parking_lot::Mutex,
    Handle, IndexingContainer,
};

use crate::{
    common::{strip_numeric_suffix, AssetKind, SourceVersion, Uid},
    registry::{AssetReference, AssetRegistry},
    traversal,
};

/// Name of the collection every scene starts with.
pub const ROOT_COLLECTION_NAME: &str = "Scene Collection";

/// Suffix of the temporary names that new datablocks receive while names are staged.
const STAGED_SUFFIX: &str = ".staged";

/// Scene that is shared between threads. Operations on the scene lock it for their whole duration.
pub type SharedScene = Arc<Mutex<Scene>>;

/// Common interface of all datablock kinds that are stored in a [`Scene`].
pub trait Datablock: Sized {
    const KIND: DatablockKind;

    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);
    fn relink(&self) -> &RelinkTag;
    fn relink_mut(&mut self) -> &mut RelinkTag;
    fn data_ref(handle: Handle<Self>) -> DataRef;

    #[doc(hidden)]
    fn container(scene: &Scene) -> &IndexingContainer<Self>;
    #[doc(hidden)]
    fn container_mut(scene: &mut Scene) -> &mut IndexingContainer<Self>;
}

macro_rules! impl_datablock {
    ($ty:ident, $field:ident) => {
        impl Datablock for $ty {
            const KIND: DatablockKind = DatablockKind::$ty;

            fn name(&self) -> &str {
                &self.name
            }

            fn set_name(&mut self, name: String) {
                self.name = name;
            }

            fn relink(&self) -> &RelinkTag {
                &self.relink
            }

            fn relink_mut(&mut self) -> &mut RelinkTag {
                &mut self.relink
            }

            fn data_ref(handle: Handle<Self>) -> DataRef {
                DataRef::$ty(handle)
            }

            fn container(scene: &Scene) -> &IndexingContainer<Self> {
                &scene.$field
            }

            fn container_mut(scene: &mut Scene) -> &mut IndexingContainer<Self> {
                &mut scene.$field
            }
        }
    };
}

impl_datablock!(Collection, collections);
impl_datablock!(Object, objects);
impl_datablock!(Material, materials);
impl_datablock!(NodeTree, node_trees);
impl_datablock!(Action, actions);
impl_datablock!(ParticleSettings, particle_settings);
impl_datablock!(Image, images);

/// Untyped reference to a datablock of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataRef {
    Collection(Handle<Collection>),
    Object(Handle<Object>),
    Material(Handle<Material>),
    NodeTree(Handle<NodeTree>),
    Action(Handle<Action>),
    ParticleSettings(Handle<ParticleSettings>),
    Image(Handle<Image>),
}

impl DataRef {
    pub fn kind(&self) -> DatablockKind {
        match self {
            DataRef::Collection(_) => DatablockKind::Collection,
            DataRef::Object(_) => DatablockKind::Object,
            DataRef::Material(_) => DatablockKind::Material,
            DataRef::NodeTree(_) => DatablockKind::NodeTree,
            DataRef::Action(_) => DatablockKind::Action,
            DataRef::ParticleSettings(_) => DatablockKind::ParticleSettings,
            DataRef::Image(_) => DatablockKind::Image,
        }
    }
}

impl<T: Datablock> From<Handle<T>> for DataRef {
    fn from(handle: Handle<T>) -> Self {
        T::data_ref(handle)
    }
}

/// Root of a freshly imported asset. Collections and objects can be imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportedRoot {
    Collection(Handle<Collection>),
    Object(Handle<Object>),
}

impl ImportedRoot {
    pub fn kind(&self) -> AssetKind {
        match self {
            ImportedRoot::Collection(_) => AssetKind::Collection,
            ImportedRoot::Object(_) => AssetKind::Object,
        }
    }
}

impl From<ImportedRoot> for DataRef {
    fn from(root: ImportedRoot) -> Self {
        match root {
            ImportedRoot::Collection(handle) => DataRef::Collection(handle),
            ImportedRoot::Object(handle) => DataRef::Object(handle),
        }
    }
}

/// Calls `$body` with the datablock behind a [`DataRef`] and returns `None` for stale references.
macro_rules! visit_ref {
    ($scene:expr, $node:expr, $method:ident, |$value:ident| $body:expr) => {
        match $node {
            DataRef::Collection(handle) => $scene.collections.$method(&handle).map(|$value| $body),
            DataRef::Object(handle) => $scene.objects.$method(&handle).map(|$value| $body),
            DataRef::Material(handle) => $scene.materials.$method(&handle).map(|$value| $body),
            DataRef::NodeTree(handle) => $scene.node_trees.$method(&handle).map(|$value| $body),
            DataRef::Action(handle) => $scene.actions.$method(&handle).map(|$value| $body),
            DataRef::ParticleSettings(handle) => $scene.particle_settings.$method(&handle).map(|$value| $body),
            DataRef::Image(handle) => $scene.images.$method(&handle).map(|$value| $body),
        }
    };
}

struct StagedName {
    node: DataRef,
    desired: String,
}

/// Working scene graph holding all datablocks and the registry of the imported assets.
pub struct Scene {
    collections: IndexingContainer<Collection>,
    objects: IndexingContainer<Object>,
    materials: IndexingContainer<Material>,
    node_trees: IndexingContainer<NodeTree>,
    actions: IndexingContainer<Action>,
    particle_settings: IndexingContainer<ParticleSettings>,
    images: IndexingContainer<Image>,
    root: Handle<Collection>,
    registry: AssetRegistry,
    document_path: Option<PathBuf>,
    staging: Option<Vec<StagedName>>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// Creates an empty scene that only contains the root collection.
    pub fn new() -> Self {
        let mut collections = IndexingContainer::new();
        let root = collections.insert(Collection::new(ROOT_COLLECTION_NAME));
        Self {
            collections,
            objects: IndexingContainer::new(),
            materials: IndexingContainer::new(),
            node_trees: IndexingContainer::new(),
            actions: IndexingContainer::new(),
            particle_settings: IndexingContainer::new(),
            images: IndexingContainer::new(),
            root,
            registry: AssetRegistry::default(),
            document_path: None,
            staging: None,
        }
    }

    /// Returns the root collection. It can't be removed.
    pub fn root(&self) -> Handle<Collection> {
        self.root
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AssetRegistry {
        &mut self.registry
    }

    /// Path of the document the scene was loaded from or saved to.
    pub fn document_path(&self) -> Option<&Path> {
        self.document_path.as_deref()
    }

    pub fn set_document_path(&mut self, path: impl Into<PathBuf>) {
        self.document_path = Some(path.into());
    }

    /// Directory against which the registry paths are stored. `None` for unsaved documents.
    pub fn document_dir(&self) -> Option<&Path> {
        self.document_path.as_deref().and_then(Path::parent)
    }

    /// Registers an asset with a path relative to the document directory.
    pub fn register_asset(&mut self, uid: Uid, source_path: &Path, kind: AssetKind, name: &str, version: SourceVersion) {
        let document_dir = self.document_dir().map(Path::to_path_buf);
        self.registry
            .register(uid, source_path, kind, name, version, document_dir.as_deref());
    }

    /// Returns the absolute source path of the given reference.
    pub fn resolve_source(&self, reference: &AssetReference) -> PathBuf {
        reference.resolve(self.document_dir())
    }

    pub fn get<T: Datablock>(&self, handle: Handle<T>) -> Option<&T> {
        T::container(self).get(&handle)
    }

    pub fn get_mut<T: Datablock>(&mut self, handle: Handle<T>) -> Option<&mut T> {
        T::container_mut(self).get_mut(&handle)
    }

    pub fn contains<T: Datablock>(&self, handle: Handle<T>) -> bool {
        T::container(self).contains(&handle)
    }

    /// Iterates over all datablocks of one kind in insertion order.
    pub fn iter<'a, T: Datablock + 'a>(&'a self) -> impl Iterator<Item = (Handle<T>, &'a T)> {
        T::container(self).iter()
    }

    pub fn iter_mut<'a, T: Datablock + 'a>(&'a mut self) -> impl Iterator<Item = (Handle<T>, &'a mut T)> {
        T::container_mut(self).iter_mut()
    }

    pub fn handles<T: Datablock>(&self) -> Vec<Handle<T>> {
        T::container(self).handles()
    }

    pub fn count<T: Datablock>(&self) -> usize {
        T::container(self).len()
    }

    /// Finds the datablock with the given name.
    pub fn find<T: Datablock>(&self, name: &str) -> Option<Handle<T>> {
        self.iter::<T>().find(|(_, value)| value.name() == name).map(|(handle, _)| handle)
    }

    fn is_name_taken<T: Datablock>(&self, name: &str) -> bool {
        self.iter::<T>().any(|(_, value)| value.name() == name)
    }

    /// Returns `name` if it is free and otherwise the first free name with a numeric suffix like `Chair.001`.
    pub fn unique_name<T: Datablock>(&self, name: &str) -> String {
        if !self.is_name_taken::<T>(name) {
            return name.to_owned();
        }
        let base = strip_numeric_suffix(name);
        let mut index = 1;
        loop {
            let candidate = format!("{base}.{index:03}");
            if !self.is_name_taken::<T>(&candidate) {
                return candidate;
            }
            index += 1;
        }
    }

    /// Adds a datablock. The name is made unique within its kind.
    ///
    /// While names are staged, a datablock whose name is taken receives a temporary name
    /// and gets the requested name when the staging is committed.
    pub fn add<T: Datablock>(&mut self, mut value: T) -> Handle<T> {
        let desired = value.name().to_owned();
        let staged = self.staging.is_some() && self.is_name_taken::<T>(&desired);
        let name = if staged {
            self.unique_name::<T>(&format!("{desired}{STAGED_SUFFIX}"))
        } else {
            self.unique_name::<T>(&desired)
        };
        if name != desired {
            trace!("Adding {} '{desired}' as '{name}'", T::KIND);
        }
        value.set_name(name);
        let handle = T::container_mut(self).insert(value);
        if let (true, Some(staging)) = (staged, self.staging.as_mut()) {
            staging.push(StagedName {
                node: T::data_ref(handle),
                desired,
            });
        }
        handle
    }

    /// Renames a datablock and returns the name it ends up with.
    pub fn rename<T: Datablock>(&mut self, handle: Handle<T>, name: &str) -> Option<String> {
        let current = self.get(handle)?.name().to_owned();
        if current == name {
            return Some(current);
        }
        let name = self.unique_name::<T>(name);
        self.get_mut(handle)?.set_name(name.clone());
        Some(name)
    }

    fn rename_ref(&mut self, node: DataRef, name: &str) -> Option<String> {
        match node {
            DataRef::Collection(handle) => self.rename(handle, name),
            DataRef::Object(handle) => self.rename(handle, name),
            DataRef::Material(handle) => self.rename(handle, name),
            DataRef::NodeTree(handle) => self.rename(handle, name),
            DataRef::Action(handle) => self.rename(handle, name),
            DataRef::ParticleSettings(handle) => self.rename(handle, name),
            DataRef::Image(handle) => self.rename(handle, name),
        }
    }

    /// Starts staging the names of new datablocks that collide with existing ones.
    pub(crate) fn begin_staging(&mut self) {
        if self.staging.is_some() {
            warn!("Names are already being staged");
            return;
        }
        self.staging = Some(Vec::new());
    }

    /// Assigns the requested names to all staged datablocks that still exist.
    pub(crate) fn commit_staging(&mut self) {
        let Some(staged) = self.staging.take() else {
            return;
        };
        for StagedName { node, desired } in staged {
            let Some(final_name) = self.rename_ref(node, &desired) else {
                continue;
            };
            if final_name != desired {
                warn!("The {} '{desired}' is still taken and is named '{final_name}' instead", node.kind());
            }
        }
    }

    /// Name the datablock has after the current staging is committed.
    pub fn final_name(&self, node: DataRef) -> Option<String> {
        let staged = self
            .staging
            .iter()
            .flatten()
            .find(|staged| staged.node == node)
            .map(|staged| staged.desired.clone());
        staged.or_else(|| self.name_of(node).map(str::to_owned))
    }

    pub fn name_of(&self, node: DataRef) -> Option<&str> {
        visit_ref!(self, node, get, |value| value.name.as_str())
    }

    pub fn tag(&self, node: DataRef) -> Option<&RelinkTag> {
        visit_ref!(self, node, get, |value| &value.relink)
    }

    pub fn tag_mut(&mut self, node: DataRef) -> Option<&mut RelinkTag> {
        visit_ref!(self, node, get_mut, |value| &mut value.relink)
    }

    pub fn contains_ref(&self, node: DataRef) -> bool {
        self.tag(node).is_some()
    }

    /// Links `child` into `parent`. Links that would create a cycle are refused.
    pub fn link_collection(&mut self, parent: Handle<Collection>, child: Handle<Collection>) -> bool {
        if child == self.root || !self.contains(parent) || !self.contains(child) {
            return false;
        }
        let descendants = traversal::ownership(self, DataRef::Collection(child));
        if descendants.contains(&DataRef::Collection(parent)) {
            warn!("Refusing to link a collection into its own hierarchy");
            return false;
        }
        match self.collections.get_mut(&parent) {
            Some(parent) if !parent.children.contains(&child) => {
                parent.children.push(child);
                true
            }
            _ => false,
        }
    }

    pub fn unlink_collection(&mut self, parent: Handle<Collection>, child: Handle<Collection>) {
        if let Some(parent) = self.collections.get_mut(&parent) {
            parent.children.retain(|handle| *handle != child);
        }
    }

    pub fn link_object(&mut self, collection: Handle<Collection>, object: Handle<Object>) -> bool {
        if !self.contains(object) {
            return false;
        }
        match self.collections.get_mut(&collection) {
            Some(collection) if !collection.objects.contains(&object) => {
                collection.objects.push(object);
                true
            }
            _ => false,
        }
    }

    pub fn unlink_object(&mut self, collection: Handle<Collection>, object: Handle<Object>) {
        if let Some(collection) = self.collections.get_mut(&collection) {
            collection.objects.retain(|handle| *handle != object);
        }
    }

    /// Removes the object from every collection it is linked into.
    pub fn unlink_object_everywhere(&mut self, object: Handle<Object>) {
        for (_, collection) in self.collections.iter_mut() {
            collection.objects.retain(|handle| *handle != object);
        }
    }

    /// Links an imported root into the given collection.
    pub fn link_root(&mut self, root: ImportedRoot, parent: Handle<Collection>) -> bool {
        match root {
            ImportedRoot::Collection(collection) => self.link_collection(parent, collection),
            ImportedRoot::Object(object) => self.link_object(parent, object),
        }
    }

    pub fn parent_of_collection(&self, child: Handle<Collection>) -> Option<Handle<Collection>> {
        self.collections
            .iter()
            .find(|(_, collection)| collection.children.contains(&child))
            .map(|(handle, _)| handle)
    }

    /// Returns the first collection that links the object.
    pub fn parent_of_object(&self, object: Handle<Object>) -> Option<Handle<Collection>> {
        self.collections
            .iter()
            .find(|(_, collection)| collection.objects.contains(&object))
            .map(|(handle, _)| handle)
    }

    pub fn parent_of(&self, node: DataRef) -> Option<Handle<Collection>> {
        match node {
            DataRef::Collection(handle) => self.parent_of_collection(handle),
            DataRef::Object(handle) => self.parent_of_object(handle),
            _ => None,
        }
    }

    /// Returns all datablocks in kind and insertion order.
    pub fn all_refs(&self) -> Vec<DataRef> {
        let mut result = Vec::new();
        result.extend(self.collections.iter().map(|(handle, _)| DataRef::Collection(handle)));
        result.extend(self.objects.iter().map(|(handle, _)| DataRef::Object(handle)));
        result.extend(self.materials.iter().map(|(handle, _)| DataRef::Material(handle)));
        result.extend(self.node_trees.iter().map(|(handle, _)| DataRef::NodeTree(handle)));
        result.extend(self.actions.iter().map(|(handle, _)| DataRef::Action(handle)));
        result.extend(self.particle_settings.iter().map(|(handle, _)| DataRef::ParticleSettings(handle)));
        result.extend(self.images.iter().map(|(handle, _)| DataRef::Image(handle)));
        result
    }

    /// Returns all datablocks that carry the given uid.
    pub fn tagged(&self, uid: Uid) -> Vec<DataRef> {
        self.all_refs()
            .into_iter()
            .filter(|node| self.tag(*node).is_some_and(|tag| tag.is(uid)))
            .collect()
    }

    /// Returns the datablocks of one kind that carry the given uid.
    pub fn tagged_handles<T: Datablock>(&self, uid: Uid) -> Vec<Handle<T>> {
        self.iter::<T>()
            .filter(|(_, value)| value.relink().is(uid))
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Datablocks that are reachable from the root collection.
    pub fn live_nodes(&self) -> HashSet<DataRef> {
        traversal::ownership(self, DataRef::Collection(self.root)).into_iter().collect()
    }

    /// Returns the root of the asset with the given uid: its master collection or, for
    /// object assets, the tagged object.
    pub fn asset_root(&self, uid: Uid) -> Option<ImportedRoot> {
        if let Some((handle, _)) = self
            .collections
            .iter()
            .find(|(_, collection)| collection.relink.is(uid) && collection.relink.master)
        {
            return Some(ImportedRoot::Collection(handle));
        }
        let data_name = self.registry.lookup(uid).map(|reference| reference.data_name.as_str());
        let objects = self.tagged_handles::<Object>(uid);
        objects
            .iter()
            .copied()
            .find(|handle| self.get(*handle).map(|object| object.relink.original_name.as_str()) == data_name)
            .or_else(|| objects.first().copied())
            .map(ImportedRoot::Object)
    }

    /// Number of references to the datablock. Self references of node trees are not counted.
    pub fn users(&self, node: DataRef) -> usize {
        match node {
            DataRef::Collection(handle) => self
                .collections
                .iter()
                .filter(|(_, collection)| collection.children.contains(&handle))
                .count(),
            DataRef::Object(handle) => self
                .collections
                .iter()
                .filter(|(_, collection)| collection.objects.contains(&handle))
                .count(),
            DataRef::Material(handle) => self
                .objects
                .iter()
                .map(|(_, object)| object.material_slots.iter().filter(|slot| **slot == handle).count())
                .sum(),
            DataRef::NodeTree(handle) => {
                let materials = self
                    .materials
                    .iter()
                    .filter(|(_, material)| material.node_tree == Some(handle))
                    .count();
                let groups: usize = self
                    .node_trees
                    .iter()
                    .filter(|(tree_handle, _)| *tree_handle != handle)
                    .map(|(_, tree)| {
                        tree.nodes
                            .iter()
                            .filter(|node| matches!(node.kind, ShaderNodeKind::Group { tree: Some(tree), .. } if tree == handle))
                            .count()
                    })
                    .sum();
                materials + groups
            }
            DataRef::Action(handle) => {
                let objects = self.objects.iter().filter(|(_, object)| object.action == Some(handle)).count();
                let trees = self.node_trees.iter().filter(|(_, tree)| tree.action == Some(handle)).count();
                objects + trees
            }
            DataRef::ParticleSettings(handle) => self
                .objects
                .iter()
                .map(|(_, object)| object.particle_systems.iter().filter(|system| **system == handle).count())
                .sum(),
            DataRef::Image(handle) => self
                .node_trees
                .iter()
                .flat_map(|(_, tree)| tree.nodes.iter())
                .filter(|node| matches!(node.kind, ShaderNodeKind::ImageTexture { image: Some(image) } if image == handle))
                .count(),
        }
    }

    /// Removes a single datablock and clears every reference to it. The root collection is never removed.
    pub(crate) fn remove_ref(&mut self, node: DataRef) -> bool {
        if node == DataRef::Collection(self.root) {
            return false;
        }
        let removed = match node {
            DataRef::Collection(handle) => self.collections.remove(&handle).is_some(),
            DataRef::Object(handle) => self.objects.remove(&handle).is_some(),
            DataRef::Material(handle) => self.materials.remove(&handle).is_some(),
            DataRef::NodeTree(handle) => self.node_trees.remove(&handle).is_some(),
            DataRef::Action(handle) => self.actions.remove(&handle).is_some(),
            DataRef::ParticleSettings(handle) => self.particle_settings.remove(&handle).is_some(),
            DataRef::Image(handle) => self.images.remove(&handle).is_some(),
        };
        if removed {
            self.clear_references(node);
            if let Some(staging) = self.staging.as_mut() {
                staging.retain(|staged| staged.node != node);
            }
        }
        removed
    }

    fn clear_references(&mut self, node: DataRef) {
        match node {
            DataRef::Collection(removed) => {
                for (_, collection) in self.collections.iter_mut() {
                    collection.children.retain(|handle| *handle != removed);
                }
            }
            DataRef::Object(removed) => {
                self.unlink_object_everywhere(removed);
                let clear = |target: &mut Option<Handle<Object>>| {
                    if *target == Some(removed) {
                        *target = None;
                    }
                };
                for (_, object) in self.objects.iter_mut() {
                    let bone_constraints = object.pose_bones.iter_mut().flat_map(|bone| bone.constraints.iter_mut());
                    for constraint in object.constraints.iter_mut().chain(bone_constraints) {
                        clear(&mut constraint.target);
                    }
                }
                for (_, settings) in self.particle_settings.iter_mut() {
                    clear(&mut settings.instance_object);
                }
                for (_, tree) in self.node_trees.iter_mut() {
                    for input in tree.nodes.iter_mut().flat_map(|node| node.inputs.iter_mut()) {
                        if let InputValue::Object(target) = &mut input.value {
                            clear(target);
                        }
                    }
                }
            }
            DataRef::Material(removed) => {
                for (_, object) in self.objects.iter_mut() {
                    object.material_slots.retain(|handle| *handle != removed);
                }
            }
            DataRef::NodeTree(removed) => {
                for (_, material) in self.materials.iter_mut() {
                    if material.node_tree == Some(removed) {
                        material.node_tree = None;
                    }
                }
                for (_, tree) in self.node_trees.iter_mut() {
                    for node in &mut tree.nodes {
                        if let ShaderNodeKind::Group { tree, .. } = &mut node.kind {
                            if *tree == Some(removed) {
                                *tree = None;
                            }
                        }
                    }
                }
            }
            DataRef::Action(removed) => {
                for (_, object) in self.objects.iter_mut() {
                    if object.action == Some(removed) {
                        object.action = None;
                    }
                }
                for (_, tree) in self.node_trees.iter_mut() {
                    if tree.action == Some(removed) {
                        tree.action = None;
                    }
                }
            }
            DataRef::ParticleSettings(removed) => {
                for (_, object) in self.objects.iter_mut() {
                    object.particle_systems.retain(|handle| *handle != removed);
                }
            }
            DataRef::Image(removed) => {
                for (_, tree) in self.node_trees.iter_mut() {
                    for node in &mut tree.nodes {
                        if let ShaderNodeKind::ImageTexture { image } = &mut node.kind {
                            if *image == Some(removed) {
                                *image = None;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Deletes a datablock together with the dependents that no other datablock uses.
    ///
    /// Registry entries of uids that no datablock carries afterwards are removed.
    /// Returns the number of removed datablocks.
    pub fn delete(&mut self, node: impl Into<DataRef>) -> usize {
        let node = node.into();
        if node == DataRef::Collection(self.root) || !self.contains_ref(node) {
            return 0;
        }
        let name = self.name_of(node).unwrap_or_default().to_owned();
        let candidates = traversal::ownership(self, node);
        let uids = self.uids_of(&candidates);

        let mut removed = usize::from(self.remove_ref(node));
        loop {
            let mut changed = false;
            for candidate in candidates.iter().skip(1) {
                if self.contains_ref(*candidate) && self.users(*candidate) == 0 && self.remove_ref(*candidate) {
                    removed += 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        self.prune_registry(uids);
        info!("Deleted the {} '{name}' with {} datablock(s)", node.kind(), removed);
        removed
    }

    /// Removes datablocks without users until none are left. Datablocks in `keep` and the root collection survive.
    pub fn purge_orphans(&mut self, keep: &HashSet<DataRef>) -> usize {
        let mut removed = 0;
        let mut uids = BTreeSet::new();
        loop {
            let orphans = self
                .all_refs()
                .into_iter()
                .filter(|node| *node != DataRef::Collection(self.root) && !keep.contains(node) && self.users(*node) == 0)
                .collect::<Vec<_>>();
            if orphans.is_empty() {
                break;
            }
            uids.extend(self.uids_of(&orphans));
            for orphan in orphans {
                trace!("Purging the orphaned {} '{}'", orphan.kind(), self.name_of(orphan).unwrap_or_default());
                if self.remove_ref(orphan) {
                    removed += 1;
                }
            }
        }
        self.prune_registry(uids);
        if removed > 0 {
            info!("Purged {removed} orphaned datablock(s)");
        }
        removed
    }

    fn uids_of(&self, nodes: &[DataRef]) -> BTreeSet<Uid> {
        nodes
            .iter()
            .filter_map(|node| self.tag(*node).and_then(|tag| tag.uid))
            .collect()
    }

    fn prune_registry(&mut self, uids: BTreeSet<Uid>) {
        for uid in uids {
            if !self.tagged(uid).is_empty() {
                continue;
            }
            if let Some(reference) = self.registry.unregister(uid) {
                info!("Removed the registry entry of '{}' ({uid}) because no datablock uses it", reference.data_name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(scene: &mut Scene, name: &str) -> Handle<Object> {
        scene.add(Object::new(name, ObjectData::default()))
    }

    #[test]
    fn new_scene_has_root() {
        let scene = Scene::new();
        assert_eq!(scene.get(scene.root()).unwrap().name, ROOT_COLLECTION_NAME);
        assert_eq!(scene.count::<Collection>(), 1);
    }

    mod names {
        use super::*;

        #[test]
        fn numeric_suffix_on_collision() {
            let mut scene = Scene::new();
            let a = object(&mut scene, "Chair");
            let b = object(&mut scene, "Chair");
            let c = object(&mut scene, "Chair.001");
            assert_eq!(scene.get(a).unwrap().name, "Chair");
            assert_eq!(scene.get(b).unwrap().name, "Chair.001");
            assert_eq!(scene.get(c).unwrap().name, "Chair.002");
        }

        #[test]
        fn names_are_unique_per_kind() {
            let mut scene = Scene::new();
            object(&mut scene, "Wood");
            let material = scene.add(Material::new("Wood"));
            assert_eq!(scene.get(material).unwrap().name, "Wood");
        }

        #[test]
        fn staging_defers_colliding_names() {
            let mut scene = Scene::new();
            let old = object(&mut scene, "Rig");

            scene.begin_staging();
            let new = object(&mut scene, "Rig");
            let free = object(&mut scene, "Seat");
            assert_eq!(scene.get(new).unwrap().name, "Rig.staged");
            assert_eq!(scene.final_name(DataRef::Object(new)).unwrap(), "Rig");
            assert_eq!(scene.get(free).unwrap().name, "Seat");

            scene.remove_ref(DataRef::Object(old));
            scene.commit_staging();
            assert_eq!(scene.get(new).unwrap().name, "Rig");
            assert_eq!(scene.final_name(DataRef::Object(new)).unwrap(), "Rig");
        }

        #[test]
        fn staging_falls_back_to_suffix() {
            let mut scene = Scene::new();
            object(&mut scene, "Rig");

            scene.begin_staging();
            let new = object(&mut scene, "Rig");
            scene.get_mut(new).unwrap().relink.original_name = "Rig".to_owned();
            scene.commit_staging();

            let new = scene.get(new).unwrap();
            assert_eq!(new.name, "Rig.001");
            assert_eq!(new.relink.original_name, "Rig");
        }
    }

    mod linking {
        use super::*;

        #[test]
        fn parents() {
            let mut scene = Scene::new();
            let chair = scene.add(Collection::new("Chair"));
            let seat = object(&mut scene, "Seat");
            assert!(scene.link_collection(scene.root(), chair));
            assert!(scene.link_object(chair, seat));
            assert!(!scene.link_object(chair, seat));
            assert_eq!(scene.parent_of_collection(chair), Some(scene.root()));
            assert_eq!(scene.parent_of_object(seat), Some(chair));
            assert_eq!(scene.parent_of_collection(scene.root()), None);
        }

        #[test]
        fn cycles_are_refused() {
            let mut scene = Scene::new();
            let a = scene.add(Collection::new("A"));
            let b = scene.add(Collection::new("B"));
            assert!(scene.link_collection(a, b));
            assert!(!scene.link_collection(b, a));
            assert!(!scene.link_collection(a, a));
            assert!(!scene.link_collection(a, scene.root()));
        }
    }

    mod removal {
        use super::*;

        #[test]
        fn remove_clears_references() {
            let mut scene = Scene::new();
            let action = scene.add(Action::new("Walk"));
            let material = scene.add(Material::new("Wood"));
            let seat = object(&mut scene, "Seat");
            let rig = object(&mut scene, "Rig");
            {
                let rig = scene.get_mut(rig).unwrap();
                rig.action = Some(action);
                rig.material_slots.push(material);
                rig.constraints.push(Constraint::new("Copy Location", "COPY_LOCATION").with_target(seat));
            }

            scene.remove_ref(DataRef::Action(action));
            scene.remove_ref(DataRef::Material(material));
            scene.remove_ref(DataRef::Object(seat));

            let rig = scene.get(rig).unwrap();
            assert_eq!(rig.action, None);
            assert!(rig.material_slots.is_empty());
            assert_eq!(rig.constraints[0].target, None);
        }

        #[test]
        fn root_is_never_removed() {
            let mut scene = Scene::new();
            let root = scene.root();
            assert!(!scene.remove_ref(DataRef::Collection(root)));
            assert_eq!(scene.delete(root), 0);
            assert!(scene.contains(root));
        }

        #[test]
        fn delete_keeps_shared_dependents() {
            let mut scene = Scene::new();
            let wood = scene.add(Material::new("Wood"));
            let chair = scene.add(Collection::new("Chair"));
            let seat = object(&mut scene, "Seat");
            let table = object(&mut scene, "Table");
            scene.get_mut(seat).unwrap().material_slots.push(wood);
            scene.get_mut(table).unwrap().material_slots.push(wood);
            scene.link_collection(scene.root(), chair);
            scene.link_object(chair, seat);
            scene.link_object(scene.root(), table);

            let removed = scene.delete(chair);
            assert_eq!(removed, 2);
            assert!(!scene.contains(seat));
            assert!(scene.contains(wood));
            assert!(scene.contains(table));
        }

        #[test]
        fn delete_removes_self_referencing_node_trees() {
            let mut scene = Scene::new();
            let controls = scene.add(NodeTree::new("Controls"));
            scene.get_mut(controls).unwrap().nodes.push(ShaderNode {
                name: "Nested".to_owned(),
                kind: ShaderNodeKind::Group {
                    tree: Some(controls),
                    is_override: false,
                },
                inputs: Vec::new(),
            });
            let material = scene.add(Material::new("Wood"));
            scene.get_mut(material).unwrap().node_tree = Some(controls);

            assert_eq!(scene.delete(material), 2);
            assert!(!scene.contains(controls));
        }

        #[test]
        fn purge_orphans_until_fixpoint() {
            let mut scene = Scene::new();
            let action = scene.add(Action::new("Walk"));
            let kept = scene.add(Action::new("Run"));
            let material = scene.add(Material::new("Wood"));
            let tree = scene.add(NodeTree::new("Wood"));
            scene.get_mut(material).unwrap().node_tree = Some(tree);
            scene.get_mut(tree).unwrap().action = Some(action);
            let linked = object(&mut scene, "Linked");
            scene.link_object(scene.root(), linked);

            let keep = HashSet::from([DataRef::Action(kept)]);
            assert_eq!(scene.purge_orphans(&keep), 3);
            assert!(scene.contains(kept));
            assert!(scene.contains(linked));
            assert_eq!(scene.count::<NodeTree>(), 0);
        }
    }
}
