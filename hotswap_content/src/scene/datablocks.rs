use std::fmt;

use hotswap_shared::Handle;
use serde::{Deserialize, Serialize};

use crate::common::Uid;

/// Tag that every datablock carries to remember which import produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelinkTag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default)]
    pub original_name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub master: bool,
    #[serde(default, skip_serializing_if = "TagMetadata::is_empty")]
    pub metadata: TagMetadata,
}

impl RelinkTag {
    /// Returns `true` when the tag belongs to the given uid.
    pub fn is(&self, uid: Uid) -> bool {
        self.uid == Some(uid)
    }
}

/// Data recorded at import time that the relink needs to tell imported state from local edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMetadata {
    /// Names of the constraints that existed when the node was imported.
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl TagMetadata {
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatablockKind {
    Collection,
    Object,
    Material,
    NodeTree,
    Action,
    ParticleSettings,
    Image,
}

impl fmt::Display for DatablockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatablockKind::Collection => "collection",
            DatablockKind::Object => "object",
            DatablockKind::Material => "material",
            DatablockKind::NodeTree => "node tree",
            DatablockKind::Action => "action",
            DatablockKind::ParticleSettings => "particle settings",
            DatablockKind::Image => "image",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub name: String,
    pub relink: RelinkTag,
    pub children: Vec<Handle<Collection>>,
    pub objects: Vec<Handle<Object>>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    #[default]
    Empty,
    Mesh,
    Armature,
    Camera,
    Light,
}

/// Data the object instantiates, e.g. the mesh or the armature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    pub name: String,
    #[serde(default)]
    pub kind: ObjectKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub location: [f32; 3],
    pub rotation_euler: [f32; 3],
    pub rotation_quaternion: [f32; 4],
    pub scale: [f32; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            location: [0.0; 3],
            rotation_euler: [0.0; 3],
            rotation_quaternion: [1.0, 0.0, 0.0, 0.0],
            scale: [1.0; 3],
        }
    }
}

impl Transform {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    /// Constraint type like `COPY_LOCATION`.
    pub kind: String,
    pub target: Option<Handle<Object>>,
    /// Bone of the target, if the target is an armature.
    pub subtarget: Option<String>,
}

impl Constraint {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            target: None,
            subtarget: None,
        }
    }

    pub fn with_target(mut self, target: Handle<Object>) -> Self {
        self.target = Some(target);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseBone {
    pub name: String,
    pub constraints: Vec<Constraint>,
    pub metadata: TagMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct Object {
    pub name: String,
    pub relink: RelinkTag,
    pub data: ObjectData,
    pub transform: Transform,
    pub action: Option<Handle<Action>>,
    pub material_slots: Vec<Handle<Material>>,
    pub constraints: Vec<Constraint>,
    pub pose_bones: Vec<PoseBone>,
    pub particle_systems: Vec<Handle<ParticleSettings>>,
}

impl Object {
    pub fn new(name: impl Into<String>, data: ObjectData) -> Self {
        Self {
            name: name.into(),
            data,
            ..Default::default()
        }
    }

    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|constraint| constraint.name == name)
    }

    pub fn pose_bone(&self, name: &str) -> Option<&PoseBone> {
        self.pose_bones.iter().find(|bone| bone.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Material {
    pub name: String,
    pub relink: RelinkTag,
    pub node_tree: Option<Handle<NodeTree>>,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Color([f32; 4]),
    Float(f32),
    Object(Option<Handle<Object>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub name: String,
    pub value: InputValue,
}

impl NodeInput {
    pub fn new(name: impl Into<String>, value: InputValue) -> Self {
        Self { name: name.into(), value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShaderNodeKind {
    /// Node that instantiates another node tree. Override-flagged group nodes expose
    /// parameters that are tuned locally and survive a relink.
    Group { tree: Option<Handle<NodeTree>>, is_override: bool },
    ImageTexture { image: Option<Handle<Image>> },
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderNode {
    pub name: String,
    pub kind: ShaderNodeKind,
    pub inputs: Vec<NodeInput>,
}

impl ShaderNode {
    pub fn input(&self, name: &str) -> Option<&NodeInput> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut NodeInput> {
        self.inputs.iter_mut().find(|input| input.name == name)
    }

    /// Returns the referenced tree if this is an override-flagged group node.
    pub fn override_group(&self) -> Option<Handle<NodeTree>> {
        match self.kind {
            ShaderNodeKind::Group { tree, is_override: true } => tree,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeTree {
    pub name: String,
    pub relink: RelinkTag,
    pub nodes: Vec<ShaderNode>,
    pub action: Option<Handle<Action>>,
}

impl NodeTree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn node(&self, name: &str) -> Option<&ShaderNode> {
        self.nodes.iter().find(|node| node.name == name)
    }
}

/// Animation channel of an action, e.g. `location` with index 2 animates the z coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub data_path: String,
    #[serde(default)]
    pub array_index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Action {
    pub name: String,
    pub relink: RelinkTag,
    pub channels: Vec<Channel>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, data_path: impl Into<String>, array_index: usize) -> Self {
        self.channels.push(Channel {
            data_path: data_path.into(),
            array_index,
        });
        self
    }

    /// Returns `true` when any channel animates the given property.
    pub fn animates(&self, data_path: &str) -> bool {
        self.channels.iter().any(|channel| channel.data_path == data_path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParticleSettings {
    pub name: String,
    pub relink: RelinkTag,
    pub instance_object: Option<Handle<Object>>,
}

#[derive(Debug, Clone, Default)]
pub struct Image {
    pub name: String,
    pub relink: RelinkTag,
    pub filepath: String,
}
