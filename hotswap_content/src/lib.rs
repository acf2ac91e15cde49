//! # Overview
//!
//! Crate for [loading](AssetLoader) assets from a library into a working [`Scene`] and for
//! [relinking](RelinkEngine) them when their source changes.
//!
//! An asset is a collection or an object inside a library source. It is described by a descriptor
//! file that lives in the library root:
//!
//! ```text
//! [ASSET]
//! relative_path = props/chair.yaml
//! data_type = collections
//! name = Chair
//! ```
//!
//! Loading an asset copies its datablocks into the scene, tags every one of them with a fresh
//! [`Uid`] and records the uid in the [`AssetRegistry`] of the scene together with the source path
//! and the modification time of the source. The registry is saved with the working document.
//!
//! When the modification time of a source no longer matches the registered version, the asset is
//! stale. Relinking deletes the old datablocks, imports the source again and carries the local
//! modifications over to the new datablocks:
//!
//! * actions that were assigned to objects and node trees,
//! * constraints that were added after the import,
//! * transforms that are not driven by an action,
//! * input values of group nodes that are flagged as overrides.
//!
//! The new datablocks are registered under a new uid.
//!
//! # Components
//!
//! * [`AssetLoader`] resolves descriptors and appends assets to the scene.
//! * [`RelinkEngine`] reimports stale assets.
//! * [`staleness`] compares registered versions with the sources.
//! * [`convert()`] turns tracked assets into untracked local datablocks.
//! * [`document`] reads and writes working documents and library sources.

mod common;

pub mod config;
pub mod convert;
pub mod document;
pub mod library;
pub mod loader;
pub mod locator;
pub mod registry;
pub mod relink;
pub mod scene;
pub mod snapshot;
pub mod staleness;
pub mod tagger;
pub mod traversal;
pub mod update;

pub use common::{
    absolute_path, normalize_lexically, normalize_separators, strip_numeric_suffix, to_portable_string, AssetKind, Error, Result,
    SourceVersion, Uid,
};
pub use config::{Config, CONFIG_FILE_NAME};
pub use convert::{convert, ConvertConfig, ConvertReport};
pub use library::{FileLibrary, ImportSource};
pub use loader::{AssetLoader, LoadTarget, LoadedAsset};
pub use registry::{AssetReference, AssetRegistry};
pub use relink::{RelinkEngine, RelinkResult};
pub use scene::{DataRef, ImportedRoot, Scene, SharedScene};
pub use staleness::{AssetInfo, StalenessReport};
pub use update::{UpdatePolicy, UpdateReport};
