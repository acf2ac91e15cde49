use std::{
    collections::{HashMap, HashSet},
    fs,
    ops::Not,
    path::Path,
};

use hotswap_shared::{
    log::{debug, info, warn},
    Handle,
};
use serde::{Deserialize, Serialize};

use crate::{
    common::{absolute_path, AssetKind},
    registry::AssetRegistry,
    scene::{
        Action, Channel, Collection, Constraint, Datablock, DatablockKind, Image, ImportedRoot, InputValue, Material, NodeInput,
        NodeTree, Object, ObjectData, ParticleSettings, PoseBone, RelinkTag, Scene, ShaderNode, ShaderNodeKind, TagMetadata,
        Transform,
    },
    Error, Result,
};

/// YAML layout of library sources and working documents.
///
/// Datablocks reference each other by name. Library sources usually omit the `relink` tags,
/// the `root` and the `registry`, which only working documents need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default)]
    pub collections: Vec<CollectionFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ObjectFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<MaterialFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_trees: Vec<NodeTreeFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub particle_settings: Vec<ParticleSettingsFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageFile>,
    #[serde(default, skip_serializing_if = "AssetRegistry::is_empty")]
    pub registry: AssetRegistry,
}

fn is_untagged(tag: &RelinkTag) -> bool {
    *tag == RelinkTag::default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<String>,
    #[serde(default, skip_serializing_if = "is_untagged")]
    pub relink: RelinkTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectFile {
    pub name: String,
    #[serde(default)]
    pub data: ObjectData,
    #[serde(default, skip_serializing_if = "Transform::is_default")]
    pub transform: Transform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pose_bones: Vec<PoseBoneFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub particle_systems: Vec<String>,
    #[serde(default, skip_serializing_if = "is_untagged")]
    pub relink: RelinkTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintFile {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtarget: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseBoneFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintFile>,
    #[serde(default, skip_serializing_if = "TagMetadata::is_empty")]
    pub metadata: TagMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_tree: Option<String>,
    #[serde(default, skip_serializing_if = "is_untagged")]
    pub relink: RelinkTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTreeFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeFile>,
    #[serde(default, skip_serializing_if = "is_untagged")]
    pub relink: RelinkTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFile {
    pub name: String,
    /// `group`, `image_texture` or any other node type.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<String>,
    #[serde(rename = "override", default, skip_serializing_if = "Not::not")]
    pub is_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFile {
    pub name: String,
    #[serde(flatten)]
    pub value: InputFileValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFileValue {
    Color([f32; 4]),
    Float(f32),
    Object(Option<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
    #[serde(default, skip_serializing_if = "is_untagged")]
    pub relink: RelinkTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleSettingsFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_object: Option<String>,
    #[serde(default, skip_serializing_if = "is_untagged")]
    pub relink: RelinkTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFile {
    pub name: String,
    #[serde(default)]
    pub filepath: String,
    #[serde(default, skip_serializing_if = "is_untagged")]
    pub relink: RelinkTag,
}

/// Names of the datablocks of a [`SceneFile`] that are instantiated.
#[derive(Debug, Default)]
struct Selection {
    collections: HashSet<String>,
    objects: HashSet<String>,
    materials: HashSet<String>,
    node_trees: HashSet<String>,
    actions: HashSet<String>,
    particle_settings: HashSet<String>,
    images: HashSet<String>,
}

/// Handles of the instantiated datablocks by their name in the file.
#[derive(Debug, Default)]
struct Created {
    collections: HashMap<String, Handle<Collection>>,
    objects: HashMap<String, Handle<Object>>,
    materials: HashMap<String, Handle<Material>>,
    node_trees: HashMap<String, Handle<NodeTree>>,
    actions: HashMap<String, Handle<Action>>,
    particle_settings: HashMap<String, Handle<ParticleSettings>>,
    images: HashMap<String, Handle<Image>>,
}

/// Object reference that can only be resolved once all objects exist.
enum PendingTarget {
    Constraint {
        object: Handle<Object>,
        bone: Option<usize>,
        index: usize,
    },
    Particles(Handle<ParticleSettings>),
    Input {
        tree: Handle<NodeTree>,
        node: usize,
        input: usize,
    },
}

fn resolve<T>(created: &HashMap<String, Handle<T>>, path: &Path, owner: &str, kind: DatablockKind, name: &str) -> Result<Handle<T>> {
    created.get(name).copied().ok_or_else(|| Error::InvalidDocument {
        path: path.to_owned(),
        reason: format!("'{owner}' references the unknown {kind} '{name}'"),
    })
}

fn resolve_optional<T>(
    created: &HashMap<String, Handle<T>>,
    path: &Path,
    owner: &str,
    kind: DatablockKind,
    name: Option<&str>,
) -> Result<Option<Handle<T>>> {
    name.map(|name| resolve(created, path, owner, kind, name)).transpose()
}

impl SceneFile {
    /// Reads and parses the file at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(path.to_owned()));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Instantiates the named asset and everything it depends on as a fresh, untagged copy.
    ///
    /// The tags of the copy only carry the datablocks' names in the file, which differ from
    /// their names in the scene when those were taken.
    pub fn instantiate_asset(&self, scene: &mut Scene, path: &Path, name: &str, kind: AssetKind) -> Result<ImportedRoot> {
        let selection = self.select_asset(path, name, kind)?;
        let created = self.instantiate(scene, path, &selection, false, None)?;
        let root = match kind {
            AssetKind::Collection => created.collections.get(name).copied().map(ImportedRoot::Collection),
            AssetKind::Object => created.objects.get(name).copied().map(ImportedRoot::Object),
        };
        root.ok_or_else(|| Error::AssetNotInSource {
            path: path.to_owned(),
            name: name.to_owned(),
            kind,
        })
    }

    fn select_all(&self) -> Selection {
        Selection {
            collections: self.collections.iter().map(|value| value.name.clone()).collect(),
            objects: self.objects.iter().map(|value| value.name.clone()).collect(),
            materials: self.materials.iter().map(|value| value.name.clone()).collect(),
            node_trees: self.node_trees.iter().map(|value| value.name.clone()).collect(),
            actions: self.actions.iter().map(|value| value.name.clone()).collect(),
            particle_settings: self.particle_settings.iter().map(|value| value.name.clone()).collect(),
            images: self.images.iter().map(|value| value.name.clone()).collect(),
        }
    }

    /// Selects the named asset and its dependencies.
    fn select_asset(&self, path: &Path, name: &str, kind: AssetKind) -> Result<Selection> {
        let exists = match kind {
            AssetKind::Collection => self.collections.iter().any(|collection| collection.name == name),
            AssetKind::Object => self.objects.iter().any(|object| object.name == name),
        };
        if !exists {
            return Err(Error::AssetNotInSource {
                path: path.to_owned(),
                name: name.to_owned(),
                kind,
            });
        }

        let mut selection = Selection::default();
        let mut collections = Vec::new();
        match kind {
            AssetKind::Collection => collections.push(name.to_owned()),
            AssetKind::Object => self.select_object(name, &mut selection),
        }
        while let Some(name) = collections.pop() {
            if !selection.collections.insert(name.clone()) {
                continue;
            }
            if let Some(collection) = self.collections.iter().find(|collection| collection.name == name) {
                collections.extend(collection.children.iter().cloned());
                for object in &collection.objects {
                    self.select_object(object, &mut selection);
                }
            }
        }
        Ok(selection)
    }

    fn select_object(&self, name: &str, selection: &mut Selection) {
        if !selection.objects.insert(name.to_owned()) {
            return;
        }
        let Some(object) = self.objects.iter().find(|object| object.name == name) else {
            return;
        };
        selection.actions.extend(object.action.iter().cloned());
        selection.particle_settings.extend(object.particle_systems.iter().cloned());
        for material in &object.materials {
            if !selection.materials.insert(material.clone()) {
                continue;
            }
            let tree = self
                .materials
                .iter()
                .find(|value| value.name == *material)
                .and_then(|material| material.node_tree.clone());
            if let Some(tree) = tree {
                self.select_node_tree(tree, selection);
            }
        }
    }

    fn select_node_tree(&self, start: String, selection: &mut Selection) {
        let mut stack = vec![start];
        while let Some(name) = stack.pop() {
            if !selection.node_trees.insert(name.clone()) {
                continue;
            }
            let Some(tree) = self.node_trees.iter().find(|tree| tree.name == name) else {
                continue;
            };
            selection.actions.extend(tree.action.iter().cloned());
            for node in &tree.nodes {
                stack.extend(node.tree.iter().cloned());
                selection.images.extend(node.image.iter().cloned());
            }
        }
    }

    /// Adds the selected datablocks to the scene. With `root`, the collection of that name becomes the scene root.
    fn instantiate(
        &self,
        scene: &mut Scene,
        path: &Path,
        selection: &Selection,
        preserve_tags: bool,
        root: Option<&str>,
    ) -> Result<Created> {
        // Fresh copies only remember their name in the file.
        let tag = |relink: &RelinkTag, name: &str| {
            if preserve_tags {
                relink.clone()
            } else {
                RelinkTag {
                    original_name: name.to_owned(),
                    ..Default::default()
                }
            }
        };
        let mut created = Created::default();
        let mut pending = Vec::new();

        for image in self.images.iter().filter(|image| selection.images.contains(&image.name)) {
            let handle = scene.add(Image {
                name: image.name.clone(),
                relink: tag(&image.relink, &image.name),
                filepath: image.filepath.clone(),
            });
            created.images.insert(image.name.clone(), handle);
        }

        for action in self.actions.iter().filter(|action| selection.actions.contains(&action.name)) {
            let handle = scene.add(Action {
                name: action.name.clone(),
                relink: tag(&action.relink, &action.name),
                channels: action.channels.clone(),
            });
            created.actions.insert(action.name.clone(), handle);
        }

        // Trees are created before their nodes because group nodes may reference any tree, including their own.
        let trees = self
            .node_trees
            .iter()
            .filter(|tree| selection.node_trees.contains(&tree.name))
            .collect::<Vec<_>>();
        for tree in &trees {
            let action = resolve_optional(&created.actions, path, &tree.name, DatablockKind::Action, tree.action.as_deref())?;
            let handle = scene.add(NodeTree {
                name: tree.name.clone(),
                relink: tag(&tree.relink, &tree.name),
                nodes: Vec::new(),
                action,
            });
            created.node_trees.insert(tree.name.clone(), handle);
        }
        for tree in &trees {
            let handle = resolve(&created.node_trees, path, &tree.name, DatablockKind::NodeTree, &tree.name)?;
            let mut nodes = Vec::with_capacity(tree.nodes.len());
            for (node_index, node) in tree.nodes.iter().enumerate() {
                let kind = match node.kind.as_str() {
                    "group" => ShaderNodeKind::Group {
                        tree: resolve_optional(&created.node_trees, path, &tree.name, DatablockKind::NodeTree, node.tree.as_deref())?,
                        is_override: node.is_override,
                    },
                    "image_texture" => ShaderNodeKind::ImageTexture {
                        image: resolve_optional(&created.images, path, &tree.name, DatablockKind::Image, node.image.as_deref())?,
                    },
                    other => ShaderNodeKind::Other(other.to_owned()),
                };
                let mut inputs = Vec::with_capacity(node.inputs.len());
                for (input_index, input) in node.inputs.iter().enumerate() {
                    let value = match &input.value {
                        InputFileValue::Color(color) => InputValue::Color(*color),
                        InputFileValue::Float(value) => InputValue::Float(*value),
                        InputFileValue::Object(target) => {
                            if let Some(target) = target {
                                let key = PendingTarget::Input {
                                    tree: handle,
                                    node: node_index,
                                    input: input_index,
                                };
                                pending.push((key, target.clone()));
                            }
                            InputValue::Object(None)
                        }
                    };
                    inputs.push(NodeInput::new(input.name.clone(), value));
                }
                nodes.push(ShaderNode {
                    name: node.name.clone(),
                    kind,
                    inputs,
                });
            }
            if let Some(tree) = scene.get_mut(handle) {
                tree.nodes = nodes;
            }
        }

        for material in self.materials.iter().filter(|material| selection.materials.contains(&material.name)) {
            let node_tree = resolve_optional(
                &created.node_trees,
                path,
                &material.name,
                DatablockKind::NodeTree,
                material.node_tree.as_deref(),
            )?;
            let handle = scene.add(Material {
                name: material.name.clone(),
                relink: tag(&material.relink, &material.name),
                node_tree,
            });
            created.materials.insert(material.name.clone(), handle);
        }

        for settings in self
            .particle_settings
            .iter()
            .filter(|settings| selection.particle_settings.contains(&settings.name))
        {
            let handle = scene.add(ParticleSettings {
                name: settings.name.clone(),
                relink: tag(&settings.relink, &settings.name),
                instance_object: None,
            });
            if let Some(target) = &settings.instance_object {
                pending.push((PendingTarget::Particles(handle), target.clone()));
            }
            created.particle_settings.insert(settings.name.clone(), handle);
        }

        for object in self.objects.iter().filter(|object| selection.objects.contains(&object.name)) {
            let owner = object.name.as_str();
            let material_slots = object
                .materials
                .iter()
                .map(|name| resolve(&created.materials, path, owner, DatablockKind::Material, name))
                .collect::<Result<Vec<_>>>()?;
            let particle_systems = object
                .particle_systems
                .iter()
                .map(|name| resolve(&created.particle_settings, path, owner, DatablockKind::ParticleSettings, name))
                .collect::<Result<Vec<_>>>()?;
            let action = resolve_optional(&created.actions, path, owner, DatablockKind::Action, object.action.as_deref())?;

            let mut targets = Vec::new();
            let constraints = instantiate_constraints(&object.constraints, None, &mut targets);
            let pose_bones = object
                .pose_bones
                .iter()
                .enumerate()
                .map(|(bone_index, bone)| PoseBone {
                    name: bone.name.clone(),
                    constraints: instantiate_constraints(&bone.constraints, Some(bone_index), &mut targets),
                    metadata: if preserve_tags { bone.metadata.clone() } else { TagMetadata::default() },
                })
                .collect();

            let handle = scene.add(Object {
                name: object.name.clone(),
                relink: tag(&object.relink, &object.name),
                data: object.data.clone(),
                transform: object.transform,
                action,
                material_slots,
                constraints,
                pose_bones,
                particle_systems,
            });
            for (bone, index, target) in targets {
                pending.push((PendingTarget::Constraint { object: handle, bone, index }, target));
            }
            created.objects.insert(object.name.clone(), handle);
        }

        for (key, target) in pending {
            let Some(target) = created.objects.get(&target).copied() else {
                debug!("The object '{target}' is not part of the instantiated data and the reference to it is dropped");
                continue;
            };
            match key {
                PendingTarget::Constraint { object, bone, index } => {
                    let constraint = scene.get_mut(object).and_then(|object| match bone {
                        Some(bone) => object.pose_bones.get_mut(bone).and_then(|bone| bone.constraints.get_mut(index)),
                        None => object.constraints.get_mut(index),
                    });
                    if let Some(constraint) = constraint {
                        constraint.target = Some(target);
                    }
                }
                PendingTarget::Particles(settings) => {
                    if let Some(settings) = scene.get_mut(settings) {
                        settings.instance_object = Some(target);
                    }
                }
                PendingTarget::Input { tree, node, input } => {
                    let input = scene
                        .get_mut(tree)
                        .and_then(|tree| tree.nodes.get_mut(node))
                        .and_then(|node| node.inputs.get_mut(input));
                    if let Some(input) = input {
                        input.value = InputValue::Object(Some(target));
                    }
                }
            }
        }

        let collections = self
            .collections
            .iter()
            .filter(|collection| selection.collections.contains(&collection.name))
            .collect::<Vec<_>>();
        for collection in &collections {
            let handle = if root == Some(collection.name.as_str()) {
                let handle = scene.root();
                scene.rename(handle, &collection.name);
                if let Some(root) = scene.get_mut(handle) {
                    root.relink = tag(&collection.relink, &collection.name);
                }
                handle
            } else {
                scene.add(Collection {
                    name: collection.name.clone(),
                    relink: tag(&collection.relink, &collection.name),
                    ..Default::default()
                })
            };
            created.collections.insert(collection.name.clone(), handle);
        }
        for collection in &collections {
            let owner = collection.name.as_str();
            let handle = resolve(&created.collections, path, owner, DatablockKind::Collection, owner)?;
            for child in &collection.children {
                let child = resolve(&created.collections, path, owner, DatablockKind::Collection, child)?;
                if !scene.link_collection(handle, child) {
                    warn!("The collection '{owner}' in \"{}\" links a child twice or into its own hierarchy", path.display());
                }
            }
            for object in &collection.objects {
                let object = resolve(&created.objects, path, owner, DatablockKind::Object, object)?;
                scene.link_object(handle, object);
            }
        }

        Ok(created)
    }

    /// Describes the whole scene including tags and registry.
    pub fn from_scene(scene: &Scene) -> Self {
        fn name<T: Datablock>(scene: &Scene, handle: Option<Handle<T>>) -> Option<String> {
            handle.and_then(|handle| scene.get(handle)).map(|value| value.name().to_owned())
        }
        fn names<T: Datablock>(scene: &Scene, handles: &[Handle<T>]) -> Vec<String> {
            handles.iter().filter_map(|handle| name(scene, Some(*handle))).collect()
        }
        fn constraints(scene: &Scene, constraints: &[Constraint]) -> Vec<ConstraintFile> {
            constraints
                .iter()
                .map(|constraint| ConstraintFile {
                    name: constraint.name.clone(),
                    kind: constraint.kind.clone(),
                    target: name(scene, constraint.target),
                    subtarget: constraint.subtarget.clone(),
                })
                .collect()
        }

        let node_file = |node: &ShaderNode| {
            let mut file = NodeFile {
                name: node.name.clone(),
                kind: String::new(),
                tree: None,
                is_override: false,
                image: None,
                inputs: node
                    .inputs
                    .iter()
                    .map(|input| InputFile {
                        name: input.name.clone(),
                        value: match input.value {
                            InputValue::Color(color) => InputFileValue::Color(color),
                            InputValue::Float(value) => InputFileValue::Float(value),
                            InputValue::Object(target) => InputFileValue::Object(name(scene, target)),
                        },
                    })
                    .collect(),
            };
            match &node.kind {
                ShaderNodeKind::Group { tree, is_override } => {
                    file.kind = "group".to_owned();
                    file.tree = name(scene, *tree);
                    file.is_override = *is_override;
                }
                ShaderNodeKind::ImageTexture { image } => {
                    file.kind = "image_texture".to_owned();
                    file.image = name(scene, *image);
                }
                ShaderNodeKind::Other(kind) => file.kind = kind.clone(),
            }
            file
        };

        Self {
            root: name(scene, Some(scene.root())),
            collections: scene
                .iter::<Collection>()
                .map(|(_, collection)| CollectionFile {
                    name: collection.name.clone(),
                    children: names(scene, &collection.children),
                    objects: names(scene, &collection.objects),
                    relink: collection.relink.clone(),
                })
                .collect(),
            objects: scene
                .iter::<Object>()
                .map(|(_, object)| ObjectFile {
                    name: object.name.clone(),
                    data: object.data.clone(),
                    transform: object.transform,
                    action: name(scene, object.action),
                    materials: names(scene, &object.material_slots),
                    constraints: constraints(scene, &object.constraints),
                    pose_bones: object
                        .pose_bones
                        .iter()
                        .map(|bone| PoseBoneFile {
                            name: bone.name.clone(),
                            constraints: constraints(scene, &bone.constraints),
                            metadata: bone.metadata.clone(),
                        })
                        .collect(),
                    particle_systems: names(scene, &object.particle_systems),
                    relink: object.relink.clone(),
                })
                .collect(),
            materials: scene
                .iter::<Material>()
                .map(|(_, material)| MaterialFile {
                    name: material.name.clone(),
                    node_tree: name(scene, material.node_tree),
                    relink: material.relink.clone(),
                })
                .collect(),
            node_trees: scene
                .iter::<NodeTree>()
                .map(|(_, tree)| NodeTreeFile {
                    name: tree.name.clone(),
                    action: name(scene, tree.action),
                    nodes: tree.nodes.iter().map(&node_file).collect(),
                    relink: tree.relink.clone(),
                })
                .collect(),
            actions: scene
                .iter::<Action>()
                .map(|(_, action)| ActionFile {
                    name: action.name.clone(),
                    channels: action.channels.clone(),
                    relink: action.relink.clone(),
                })
                .collect(),
            particle_settings: scene
                .iter::<ParticleSettings>()
                .map(|(_, settings)| ParticleSettingsFile {
                    name: settings.name.clone(),
                    instance_object: name(scene, settings.instance_object),
                    relink: settings.relink.clone(),
                })
                .collect(),
            images: scene
                .iter::<Image>()
                .map(|(_, image)| ImageFile {
                    name: image.name.clone(),
                    filepath: image.filepath.clone(),
                    relink: image.relink.clone(),
                })
                .collect(),
            registry: scene.registry().clone(),
        }
    }
}

fn instantiate_constraints(
    constraints: &[ConstraintFile],
    bone: Option<usize>,
    targets: &mut Vec<(Option<usize>, usize, String)>,
) -> Vec<Constraint> {
    constraints
        .iter()
        .enumerate()
        .map(|(index, constraint)| {
            if let Some(target) = &constraint.target {
                targets.push((bone, index, target.clone()));
            }
            Constraint {
                name: constraint.name.clone(),
                kind: constraint.kind.clone(),
                target: None,
                subtarget: constraint.subtarget.clone(),
            }
        })
        .collect()
}

/// Loads a working document with its tags and registry.
pub fn load(path: impl AsRef<Path>) -> Result<Scene> {
    let path = absolute_path(path.as_ref())?;
    let file = SceneFile::read(&path)?;
    let mut scene = Scene::new();
    file.instantiate(&mut scene, &path, &file.select_all(), true, file.root.as_deref())?;
    *scene.registry_mut() = file.registry;
    scene.set_document_path(&path);
    info!("Loaded the document \"{}\" with {} tracked asset(s)", path.display(), scene.registry().len());
    Ok(scene)
}

/// Saves the scene as a working document. Registry paths are stored relative to the new location.
pub fn save(scene: &mut Scene, path: impl AsRef<Path>) -> Result<()> {
    let path = absolute_path(path.as_ref())?;
    let mut registry = scene.registry().clone();
    registry.rebase(scene.document_dir(), path.parent());

    let mut file = SceneFile::from_scene(scene);
    file.registry = registry.clone();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_yaml::to_string(&file)?)?;

    *scene.registry_mut() = registry;
    scene.set_document_path(&path);
    info!("Saved the document \"{}\"", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use hotswap_test::{setup_logger, test_library, CHAIR_LIBRARY, LAMP_LIBRARY};

    use super::*;
    use crate::{common::Uid, tagger};

    #[test]
    fn parse_chair_library() {
        let file: SceneFile = serde_yaml::from_str(CHAIR_LIBRARY).unwrap();
        assert_eq!(file.collections.len(), 2);
        assert_eq!(file.objects.len(), 3);
        let paint = &file.node_trees[0].nodes[0];
        assert!(paint.is_override);
        assert_eq!(paint.inputs[0].value, InputFileValue::Color([0.8, 0.5, 0.2, 1.0]));
        assert_eq!(paint.inputs[1].value, InputFileValue::Float(0.4));
        assert_eq!(file.actions[1].channels[0].data_path, "nodes[\"Paint\"].inputs[0].default_value");
    }

    #[test]
    fn instantiate_collection_closure() {
        setup_logger();
        let library = test_library!();
        let path = library.write_source("props/chair.yaml", CHAIR_LIBRARY);
        let file = SceneFile::read(&path).unwrap();

        let mut scene = Scene::new();
        let root = file.instantiate_asset(&mut scene, &path, "Chair", AssetKind::Collection).unwrap();
        let ImportedRoot::Collection(chair) = root else {
            panic!("expected a collection root");
        };
        assert_eq!(scene.get(chair).unwrap().name, "Chair");
        assert_eq!(scene.count::<Object>(), 3);
        assert_eq!(scene.count::<NodeTree>(), 2);
        assert_eq!(scene.count::<Action>(), 2);
        assert_eq!(scene.count::<Image>(), 1);

        let rig = scene.find::<Object>("Rig").unwrap();
        let seat = scene.find::<Object>("Seat").unwrap();
        assert_eq!(scene.get(rig).unwrap().constraints[0].target, Some(seat));

        let controls = scene.find::<NodeTree>("Paint Controls").unwrap();
        let nested = &scene.get(controls).unwrap().nodes[0];
        assert_eq!(nested.kind, ShaderNodeKind::Group { tree: Some(controls), is_override: false });
    }

    #[test]
    fn repeated_imports_are_independent() {
        let library = test_library!();
        let path = library.write_source("props/chair.yaml", CHAIR_LIBRARY);
        let file = SceneFile::read(&path).unwrap();

        let mut scene = Scene::new();
        file.instantiate_asset(&mut scene, &path, "Chair", AssetKind::Collection).unwrap();
        file.instantiate_asset(&mut scene, &path, "Chair", AssetKind::Collection).unwrap();
        assert_eq!(scene.count::<Object>(), 6);
        assert!(scene.find::<Collection>("Chair.001").is_some());
        assert!(scene.find::<Material>("Wood.001").is_some());

        let rig = scene.find::<Object>("Rig.001").unwrap();
        let rig = &scene.get(rig).unwrap().relink;
        assert_eq!(rig.original_name, "Rig");
        assert_eq!(rig.uid, None);
        let wood = scene.find::<Material>("Wood.001").unwrap();
        assert_eq!(scene.get(wood).unwrap().relink.original_name, "Wood");
    }

    #[test]
    fn instantiate_object_closure() {
        let library = test_library!();
        let path = library.write_source("props/chair.yaml", CHAIR_LIBRARY);
        let file = SceneFile::read(&path).unwrap();

        let mut scene = Scene::new();
        let root = file.instantiate_asset(&mut scene, &path, "Rig", AssetKind::Object).unwrap();
        let ImportedRoot::Object(rig) = root else {
            panic!("expected an object root");
        };
        assert_eq!(scene.count::<Object>(), 1);
        assert_eq!(scene.count::<Material>(), 0);
        // The constraint target is not part of the closure
        assert_eq!(scene.get(rig).unwrap().constraints[0].target, None);
    }

    #[test]
    fn missing_asset() {
        let library = test_library!();
        let path = library.write_source("lamp.yaml", LAMP_LIBRARY);
        let file = SceneFile::read(&path).unwrap();
        let result = file.instantiate_asset(&mut Scene::new(), &path, "Lamp", AssetKind::Collection);
        assert!(matches!(result, Err(Error::AssetNotInSource { .. })));
    }

    #[test]
    fn unknown_reference() {
        let library = test_library!();
        let path = library.write_source("broken.yaml", "objects:\n  - { name: Lamp, materials: [Missing] }\n");
        let file = SceneFile::read(&path).unwrap();
        let result = file.instantiate_asset(&mut Scene::new(), &path, "Lamp", AssetKind::Object);
        assert!(matches!(result, Err(Error::InvalidDocument { .. })));
    }

    #[test]
    fn save_and_load_document() {
        setup_logger();
        let library = test_library!();
        let path = library.write_source("props/chair.yaml", CHAIR_LIBRARY);
        let file = SceneFile::read(&path).unwrap();

        let mut scene = Scene::new();
        let root = file.instantiate_asset(&mut scene, &path, "Chair", AssetKind::Collection).unwrap();
        scene.link_root(root, scene.root());
        let uid = Uid::new();
        tagger::tag(&mut scene, root, uid);
        let version = crate::SourceVersion::of_file(&path).unwrap();
        scene.register_asset(uid, &path, AssetKind::Collection, "Chair", version);

        save(&mut scene, library.document_path()).unwrap();
        assert_eq!(scene.registry().lookup(uid).unwrap().path, "../library/props/chair.yaml");

        let loaded = load(library.document_path()).unwrap();
        assert_eq!(loaded.registry(), scene.registry());
        assert_eq!(loaded.tagged(uid).len(), scene.tagged(uid).len());
        assert_eq!(loaded.live_nodes().len(), scene.live_nodes().len());
        let chair = loaded.find::<Collection>("Chair").unwrap();
        assert!(loaded.get(chair).unwrap().relink.master);
        assert_eq!(loaded.parent_of_collection(chair), Some(loaded.root()));
        let rig = loaded.find::<Object>("Rig").unwrap();
        assert_eq!(loaded.get(rig).unwrap().relink.metadata.constraints, vec!["Copy Location"]);
    }

    #[test]
    fn load_missing_document() {
        let library = test_library!();
        assert!(matches!(load(library.document_path()), Err(Error::NotFound(_))));
    }
}
