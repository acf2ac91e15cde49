use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use hotswap_shared::{
    log::{error, info},
    Handle,
};

use crate::{
    common::{AssetKind, SourceVersion, Uid},
    library::ImportSource,
    locator::{locate, LocatedAsset},
    scene::{Collection, DataRef, ImportedRoot, Scene},
    tagger, Error, Result,
};

/// Collection into which loaded assets are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget {
    SceneRoot,
    Active(Handle<Collection>),
}

/// Asset that was added to the scene and registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAsset {
    pub root: ImportedRoot,
    pub uid: Uid,
    /// Name of the root in the scene. It differs from the asset name when the name was taken.
    pub name: String,
}

/// Imports the named asset into `parent`, tags it with a new uid and registers it.
///
/// The source's modification time at the moment of the import becomes the registered version.
pub fn append(
    scene: &mut Scene,
    importer: &dyn ImportSource,
    source_path: &Path,
    name: &str,
    kind: AssetKind,
    parent: Handle<Collection>,
) -> Result<LoadedAsset> {
    let version = SourceVersion::of_file(source_path).ok_or_else(|| Error::NotFound(source_path.to_owned()))?;
    let root = importer.import(scene, source_path, name, kind)?;
    if !scene.link_root(root, parent) {
        error!("Failed to link the imported {kind} '{name}' into its parent collection");
    }

    let uid = Uid::new();
    tagger::tag(scene, root, uid);
    scene.register_asset(uid, source_path, kind, name, version);

    let name = scene.final_name(DataRef::from(root)).unwrap_or_default();
    info!("Appended '{name}' ({uid}) from \"{}\"", source_path.display());
    Ok(LoadedAsset { root, uid, name })
}

/// Loads assets that are described by descriptor files.
pub struct AssetLoader {
    importer: Arc<dyn ImportSource>,
    library_root: PathBuf,
}

impl AssetLoader {
    /// Creates a loader that resolves descriptors against `library_root`.
    pub fn new(importer: Arc<dyn ImportSource>, library_root: impl Into<PathBuf>) -> Self {
        Self {
            importer,
            library_root: library_root.into(),
        }
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Locates the asset of a descriptor and appends it to the target collection.
    pub fn load_descriptor(&self, scene: &mut Scene, descriptor: &Path, target: LoadTarget) -> Result<LoadedAsset> {
        let located = locate(descriptor, &self.library_root)?;
        self.load_located(scene, &located, target)
    }

    /// Loads several descriptors. All descriptors are located before anything is imported, so a
    /// missing descriptor or source leaves the scene untouched.
    pub fn load_descriptors<P: AsRef<Path>>(&self, scene: &mut Scene, descriptors: &[P], target: LoadTarget) -> Result<Vec<LoadedAsset>> {
        let located = descriptors
            .iter()
            .map(|descriptor| locate(descriptor.as_ref(), &self.library_root))
            .collect::<Result<Vec<_>>>()?;
        located
            .iter()
            .map(|located| self.load_located(scene, located, target))
            .collect()
    }

    fn load_located(&self, scene: &mut Scene, located: &LocatedAsset, target: LoadTarget) -> Result<LoadedAsset> {
        let parent = match target {
            LoadTarget::SceneRoot => scene.root(),
            LoadTarget::Active(collection) if scene.contains(collection) => collection,
            LoadTarget::Active(_) => {
                info!("The active collection no longer exists. Loading into the scene root");
                scene.root()
            }
        };
        append(scene, self.importer.as_ref(), &located.path, &located.name, located.kind, parent)
    }
}
