use std::path::Path;

use hotswap_shared::log::info;

use crate::{
    common::AssetKind,
    document::SceneFile,
    scene::{ImportedRoot, Scene},
    Result,
};

/// Materializes assets from their sources into a scene.
pub trait ImportSource: Send + Sync {
    /// Adds an independent copy of the named asset and everything it depends on to the scene
    /// and returns its root. The root is not linked into any collection.
    fn import(&self, scene: &mut Scene, source_path: &Path, name: &str, kind: AssetKind) -> Result<ImportedRoot>;
}

/// [`ImportSource`] that reads library sources in the YAML layout of [`SceneFile`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLibrary;

impl ImportSource for FileLibrary {
    fn import(&self, scene: &mut Scene, source_path: &Path, name: &str, kind: AssetKind) -> Result<ImportedRoot> {
        let file = SceneFile::read(source_path)?;
        let root = file.instantiate_asset(scene, source_path, name, kind)?;
        info!("Imported the {kind} '{name}' from \"{}\"", source_path.display());
        Ok(root)
    }
}
