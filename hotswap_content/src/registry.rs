use std::path::{Path, PathBuf};

use hotswap_shared::{log::trace, pathdiff};
use serde::{Deserialize, Serialize};

use crate::common::{normalize_lexically, normalize_separators, to_portable_string, AssetKind, SourceVersion, Uid};

/// Record of one import: where the asset came from and which version of the source was imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReference {
    pub uid: Uid,
    /// Source path relative to the document directory with `/` separators.
    pub path: String,
    pub version: SourceVersion,
    pub data_type: AssetKind,
    pub data_name: String,
}

impl AssetReference {
    /// Returns the absolute path of the source.
    pub fn resolve(&self, document_dir: Option<&Path>) -> PathBuf {
        resolve_path(&self.path, document_dir)
    }
}

/// Ordered collection of all [`AssetReference`]s of a scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRegistry {
    references: Vec<AssetReference>,
}

impl AssetRegistry {
    /// Registers an asset. An existing entry with the same uid is replaced.
    pub fn register(
        &mut self,
        uid: Uid,
        source_path: &Path,
        data_type: AssetKind,
        data_name: &str,
        version: SourceVersion,
        document_dir: Option<&Path>,
    ) -> &AssetReference {
        let reference = AssetReference {
            uid,
            path: store_path(source_path, document_dir),
            version,
            data_type,
            data_name: data_name.to_owned(),
        };
        trace!("Registering '{}' ({uid}) at '{}'", reference.data_name, reference.path);
        let index = match self.references.iter().position(|existing| existing.uid == uid) {
            Some(index) => {
                self.references[index] = reference;
                index
            }
            None => {
                self.references.push(reference);
                self.references.len() - 1
            }
        };
        &self.references[index]
    }

    pub fn lookup(&self, uid: Uid) -> Option<&AssetReference> {
        self.references.iter().find(|reference| reference.uid == uid)
    }

    /// Removes the entry of the uid. Removing an absent uid does nothing.
    pub fn unregister(&mut self, uid: Uid) -> Option<AssetReference> {
        let index = self.references.iter().position(|reference| reference.uid == uid)?;
        Some(self.references.remove(index))
    }

    /// Sets the stored version of the source.
    pub fn touch(&mut self, uid: Uid, version: SourceVersion) -> bool {
        match self.references.iter_mut().find(|reference| reference.uid == uid) {
            Some(reference) => {
                reference.version = version;
                true
            }
            None => false,
        }
    }

    /// Stores the path of the entry relative to `document_dir` again. Entries that were
    /// registered in an unsaved document become relative once the document has a location.
    pub fn normalize_path(&mut self, uid: Uid, document_dir: Option<&Path>) -> bool {
        let Some(reference) = self.references.iter_mut().find(|reference| reference.uid == uid) else {
            return false;
        };
        let normalized = store_path(&resolve_path(&reference.path, document_dir), document_dir);
        if normalized == reference.path {
            return false;
        }
        trace!("Normalized the path of '{}' from '{}' to '{normalized}'", reference.data_name, reference.path);
        reference.path = normalized;
        true
    }

    /// Re-relativizes all paths from one document directory to another, e.g. when the document is saved elsewhere.
    pub fn rebase(&mut self, from: Option<&Path>, to: Option<&Path>) {
        for reference in &mut self.references {
            reference.path = store_path(&resolve_path(&reference.path, from), to);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetReference> {
        self.references.iter()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

/// Formats a source path for storage: relative to `document_dir` if there is one, with `/` separators.
pub fn store_path(path: &Path, document_dir: Option<&Path>) -> String {
    let path = normalize_lexically(path);
    let relative = document_dir
        .filter(|_| path.is_absolute())
        .and_then(|document_dir| pathdiff::diff_paths(&path, normalize_lexically(document_dir)));
    to_portable_string(relative.as_deref().unwrap_or(&path))
}

/// Turns a stored path back into a path on this platform. Relative paths are resolved against `document_dir`.
pub fn resolve_path(stored: &str, document_dir: Option<&Path>) -> PathBuf {
    let path = normalize_separators(stored);
    match document_dir {
        Some(document_dir) if path.is_relative() => normalize_lexically(&document_dir.join(path)),
        _ => normalize_lexically(&path),
    }
}
