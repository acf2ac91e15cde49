use std::{
    fs,
    path::{Path, PathBuf},
};

use hotswap_shared::log::trace;
use serde::{Deserialize, Serialize};

use crate::{convert::ConvertConfig, update::UpdatePolicy, Error, Result};

/// Name of the configuration file that is looked up next to a document.
pub const CONFIG_FILE_NAME: &str = "hotswap.yaml";

/// Settings of a project.
///
/// ```yaml
/// library_root: ../library
/// update_policy: automatic
/// rig_marker: rig
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory against which descriptors are resolved. Relative paths are relative to the config file.
    pub library_root: Option<PathBuf>,
    pub update_policy: UpdatePolicy,
    pub rig_marker: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_root: None,
            update_policy: UpdatePolicy::default(),
            rig_marker: ConvertConfig::default().rig_marker,
        }
    }
}

impl Config {
    /// Reads the config file at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(path.to_owned()));
        }
        let content = fs::read_to_string(path)?;
        let mut config = serde_yaml::from_str::<Config>(&content)?;
        if let (Some(library_root), Some(dir)) = (&config.library_root, path.parent()) {
            if library_root.is_relative() {
                config.library_root = Some(dir.join(library_root));
            }
        }
        trace!("Read the config \"{}\"", path.display());
        Ok(config)
    }

    /// Reads the config file in `dir` or falls back to the defaults when there is none.
    pub fn read_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::read(&path)
        } else {
            trace!("No config in \"{}\". Using the defaults", dir.display());
            Ok(Self::default())
        }
    }

    pub fn convert_config(&self) -> ConvertConfig {
        ConvertConfig {
            rig_marker: self.rig_marker.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use hotswap_shared::indoc::indoc;
    use hotswap_test::{spectral::assert_that, test_library};

    use super::*;

    #[test]
    fn read_config() {
        let library = test_library!();
        let path = library.path().join("scenes").join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            indoc! {"
                library_root: ../library
                update_policy: automatic
            "},
        )
        .unwrap();

        let config = Config::read(&path).unwrap();
        assert_that!(config.update_policy).is_equal_to(UpdatePolicy::Automatic);
        assert_that!(config.rig_marker.as_str()).is_equal_to("rig");
        assert_that!(config.library_root).is_equal_to(Some(library.path().join("scenes").join("../library")));
    }

    #[test]
    fn defaults_without_file() {
        let library = test_library!();
        let config = Config::read_or_default(&library.path().join("scenes")).unwrap();
        assert_that!(config).is_equal_to(Config::default());
    }

    #[test]
    fn invalid_config() {
        let library = test_library!();
        let path = library.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "update_policy: sometimes\n").unwrap();
        assert!(matches!(Config::read(&path), Err(Error::Yaml(_))));
    }
}
