use std::{
    env,
    fmt::{self, Formatter},
    io,
    path::{Component, Path, PathBuf},
    result,
    str::FromStr,
    time::SystemTime,
};

use hotswap_shared::{
    chrono::{DateTime, Utc},
    uuid::Uuid,
};
use serde::{Deserialize, Serialize};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("Invalid descriptor {path}: {reason}")]
    InvalidDescriptor { path: PathBuf, reason: String },
    #[error("Unknown asset: {0}")]
    UnknownAsset(Uid),
    #[error("Asset '{name}' of type '{kind}' not found in {path}")]
    AssetNotInSource { path: PathBuf, name: String, kind: AssetKind },
    #[error("Asset {0} is already being relinked")]
    RelinkInProgress(Uid),
    #[error("Node '{0}' is not part of a tracked asset")]
    NotTracked(String),
    #[error("Invalid document {path}: {reason}")]
    InvalidDocument { path: PathBuf, reason: String },
    #[error("IoError: {0}")]
    IoError(#[from] io::Error),
    #[error("YamlError: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Correlation id shared by all nodes that were produced by one import.
///
/// Uids are UUIDv7 values so that they sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(Uuid);

impl Uid {
    /// Creates a new time-ordered uid.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for Uid {
    type Err = hotswap_shared::uuid::Error;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Kind of data an asset descriptor points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    #[serde(rename = "collections")]
    Collection,
    #[serde(rename = "objects")]
    Object,
}

impl AssetKind {
    /// Returns the name used for the kind in descriptors and documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Collection => "collections",
            AssetKind::Object => "objects",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        match s.trim() {
            "collections" => Ok(AssetKind::Collection),
            "objects" => Ok(AssetKind::Object),
            other => Err(format!("unknown data type '{other}'")),
        }
    }
}

/// Modification time of an asset source at the moment it was imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceVersion(DateTime<Utc>);

impl SourceVersion {
    /// Reads the modification time of the file at `path`.
    pub fn of_file(path: &Path) -> Option<Self> {
        modified_system_time(path).map(Self::from)
    }
}

impl From<SystemTime> for SourceVersion {
    fn from(value: SystemTime) -> Self {
        Self(DateTime::<Utc>::from(value))
    }
}

impl fmt::Display for SourceVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.f"))
    }
}

pub(crate) fn modified_system_time(path: &Path) -> Option<SystemTime> {
    path.metadata().ok().and_then(|metadata| metadata.modified().ok())
}

/// Splits a path on both `/` and `\` so that paths written on another platform resolve.
pub fn normalize_separators(path: &str) -> PathBuf {
    let mut result = PathBuf::new();
    if path.starts_with('/') {
        result.push("/");
    }
    for part in path.split(['/', '\\']).filter(|part| !part.is_empty()) {
        result.push(part);
    }
    result
}

/// Removes `.` and resolves `..` components without touching the file system.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    result.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    result.pop();
                } else if !result.has_root() {
                    result.push("..");
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// Makes the path absolute by joining it to the working directory.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize_lexically(path));
    }
    Ok(normalize_lexically(&env::current_dir()?.join(path)))
}

/// Formats a path with `/` separators, which is how paths are stored in documents.
pub fn to_portable_string(path: &Path) -> String {
    let mut result = String::new();
    for component in path.components() {
        match component {
            Component::RootDir => result.push('/'),
            Component::Prefix(prefix) => result.push_str(&prefix.as_os_str().to_string_lossy()),
            other => {
                if !result.is_empty() && !result.ends_with('/') {
                    result.push('/');
                }
                result.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    result
}

/// Removes a numeric disambiguation suffix like `.001` from a name.
pub fn strip_numeric_suffix(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((base, suffix)) if !base.is_empty() && suffix.len() >= 3 && suffix.bytes().all(|b| b.is_ascii_digit()) => base,
        _ => name,
    }
}
