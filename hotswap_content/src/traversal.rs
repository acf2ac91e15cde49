use std::collections::HashSet;

use hotswap_shared::log::trace;

use crate::scene::{DataRef, Scene, ShaderNodeKind};

/// Returns `start` followed by every datablock it owns directly or transitively, in depth-first order.
///
/// Collections own their child collections and objects, objects own their action, materials and
/// particle settings, materials own their node tree and node trees own the trees of their group
/// nodes, their images and their action. Shared and cyclic references are visited once.
pub fn ownership(scene: &Scene, start: DataRef) -> Vec<DataRef> {
    let mut visited = HashSet::new();
    let mut result = Vec::new();
    let mut stack = vec![start];

    while let Some(node) = stack.pop() {
        if !visited.insert(node) || !scene.contains_ref(node) {
            continue;
        }
        result.push(node);
        let children = owned_by(scene, node);
        stack.extend(children.into_iter().rev().filter(|child| !visited.contains(child)));
    }

    trace!("Traversed {} datablock(s) from {:?}", result.len(), start);
    result
}

fn owned_by(scene: &Scene, node: DataRef) -> Vec<DataRef> {
    let mut children = Vec::new();
    match node {
        DataRef::Collection(handle) => {
            if let Some(collection) = scene.get(handle) {
                children.extend(collection.children.iter().copied().map(DataRef::Collection));
                children.extend(collection.objects.iter().copied().map(DataRef::Object));
            }
        }
        DataRef::Object(handle) => {
            if let Some(object) = scene.get(handle) {
                children.extend(object.action.map(DataRef::Action));
                children.extend(object.material_slots.iter().copied().map(DataRef::Material));
                children.extend(object.particle_systems.iter().copied().map(DataRef::ParticleSettings));
            }
        }
        DataRef::Material(handle) => {
            if let Some(material) = scene.get(handle) {
                children.extend(material.node_tree.map(DataRef::NodeTree));
            }
        }
        DataRef::NodeTree(handle) => {
            if let Some(tree) = scene.get(handle) {
                for node in &tree.nodes {
                    match node.kind {
                        ShaderNodeKind::Group { tree: Some(group), .. } => children.push(DataRef::NodeTree(group)),
                        ShaderNodeKind::ImageTexture { image: Some(image) } => children.push(DataRef::Image(image)),
                        _ => {}
                    }
                }
                children.extend(tree.action.map(DataRef::Action));
            }
        }
        DataRef::Action(_) | DataRef::ParticleSettings(_) | DataRef::Image(_) => {}
    }
    children
}
