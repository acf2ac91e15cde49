use std::{
    fs,
    path::{Path, PathBuf},
};

use hotswap_shared::log::trace;
use ini::{Ini, ParseOption};

use crate::{
    common::{absolute_path, normalize_separators, AssetKind},
    Error, Result,
};

/// Name of the only section a descriptor has.
pub const DESCRIPTOR_SECTION: &str = "ASSET";

const KEYS: [&str; 3] = ["relative_path", "data_type", "name"];

/// Content of a descriptor file that points to an asset inside a library source.
///
/// ```text
/// [ASSET]
/// relative_path = props/chair.yaml
/// data_type = collections
/// name = Chair
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub relative_path: String,
    pub data_type: AssetKind,
    pub name: String,
}

impl Descriptor {
    /// Reads and parses the descriptor at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(path.to_owned()));
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    /// Parses the content of a descriptor. `path` is only used for error messages.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidDescriptor {
            path: path.to_owned(),
            reason,
        };

        // Backslashes are path separators on Windows and not escapes.
        let option = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..Default::default()
        };
        let ini = Ini::load_from_str_opt(content, option).map_err(|err| invalid(err.to_string()))?;
        let section = ini
            .section(Some(DESCRIPTOR_SECTION))
            .ok_or_else(|| invalid(format!("missing [{DESCRIPTOR_SECTION}] section")))?;
        for (key, _) in section.iter() {
            if !KEYS.iter().any(|known| known.eq_ignore_ascii_case(key)) {
                trace!("Ignoring the unknown key '{key}' in \"{}\"", path.display());
            }
        }
        let value = |key: &str| section.get(key).map(str::trim).map(str::to_owned);
        let (relative_path, data_type, name) = (value("relative_path"), value("data_type"), value("name"));

        let relative_path = relative_path
            .filter(|value| !value.is_empty())
            .ok_or_else(|| invalid("missing key 'relative_path'".to_owned()))?;
        let data_type = data_type
            .ok_or_else(|| invalid("missing key 'data_type'".to_owned()))?
            .parse::<AssetKind>()
            .map_err(invalid)?;
        let name = name
            .filter(|value| !value.is_empty())
            .ok_or_else(|| invalid("missing key 'name'".to_owned()))?;

        Ok(Self {
            relative_path,
            data_type,
            name,
        })
    }
}

/// Asset that a descriptor resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedAsset {
    pub name: String,
    pub kind: AssetKind,
    /// Absolute path of the library source.
    pub path: PathBuf,
}

/// Reads the descriptor and resolves the source it points to against the library root.
pub fn locate(descriptor_path: &Path, library_root: &Path) -> Result<LocatedAsset> {
    let descriptor = Descriptor::read(descriptor_path)?;
    let path = absolute_path(&library_root.join(normalize_separators(&descriptor.relative_path)))?;
    if !path.is_file() {
        return Err(Error::NotFound(path));
    }
    trace!(
        "Located the {} '{}' in \"{}\"",
        descriptor.data_type,
        descriptor.name,
        path.display()
    );
    Ok(LocatedAsset {
        name: descriptor.name,
        kind: descriptor.data_type,
        path,
    })
}
