use std::{
    fs,
    path::{Path, PathBuf},
    sync::Once,
    time::{Duration, SystemTime},
};

use hotswap_shared::{indoc::indoc, log};
use tempdir::TempDir;

#[doc(hidden)]
pub use hotswap_shared;
pub use spectral;

/// Library source containing a `Chair` collection with a rig, a shader graph with an
/// override-flagged group node and a node group that references itself.
pub const CHAIR_LIBRARY: &str = indoc! {"
    collections:
      - name: Chair
        children: [Chair Parts]
        objects: [Seat]
      - name: Chair Parts
        objects: [Rig, Legs]
    objects:
      - name: Rig
        data: { name: RigData, kind: armature }
        action: RigAction
        constraints:
          - { name: Copy Location, kind: COPY_LOCATION, target: Seat }
        pose_bones:
          - name: Spine
            constraints:
              - { name: Limit Rotation, kind: LIMIT_ROTATION }
      - name: Seat
        data: { name: SeatMesh, kind: mesh }
        materials: [Wood]
        transform: { location: [0.0, 0.0, 1.0] }
        particle_systems: [Dust]
      - name: Legs
        data: { name: LegsMesh, kind: mesh }
        materials: [Wood]
    materials:
      - { name: Wood, node_tree: Wood }
    node_trees:
      - name: Wood
        action: WoodAction
        nodes:
          - name: Paint
            type: group
            tree: Paint Controls
            override: true
            inputs:
              - { name: Tint, color: [0.8, 0.5, 0.2, 1.0] }
              - { name: Roughness, float: 0.4 }
          - name: Grain
            type: image_texture
            image: grain.png
      - name: Paint Controls
        nodes:
          - name: Nested
            type: group
            tree: Paint Controls
    actions:
      - name: RigAction
        channels:
          - { data_path: rotation_euler, array_index: 2 }
      - name: WoodAction
        channels:
          - { data_path: 'nodes[\"Paint\"].inputs[0].default_value', array_index: 0 }
    particle_settings:
      - { name: Dust }
    images:
      - { name: grain.png, filepath: textures/grain.png }
"};

/// Library source containing a single `Lamp` object.
pub const LAMP_LIBRARY: &str = indoc! {"
    collections: []
    objects:
      - name: Lamp
        data: { name: LampLight, kind: light }
        materials: [Glow]
    materials:
      - { name: Glow }
"};

/// Creates a new [`TestLibrary`] named after the test function in which the macro is executed.
#[macro_export]
macro_rules! test_library {
    () => {{
        let test_name = $crate::hotswap_shared::function_name!().replace("::", ".");
        $crate::TestLibrary::new(&test_name)
    }};
}

/// Sets up the logger once for all tests in the process.
pub fn setup_logger() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Trace)
            .init()
            .expect("failed to initialize the logger");
    });
}

/// Temporary directory containing a library root with source files and descriptors
/// as well as a directory for working documents.
pub struct TestLibrary {
    root: TempDir,
}

impl TestLibrary {
    /// Creates the temporary directory structure.
    pub fn new(test_name: &str) -> Self {
        let root = TempDir::new(test_name).expect("failed to create the temporary directory");
        fs::create_dir_all(root.path().join("library")).expect("failed to create the library directory");
        fs::create_dir_all(root.path().join("scenes")).expect("failed to create the scenes directory");
        Self { root }
    }

    /// Root of the temporary directory.
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Directory against which the `relative_path` of descriptors is resolved.
    pub fn library_root(&self) -> PathBuf {
        self.root.path().join("library")
    }

    /// Path at which tests save their working document.
    pub fn document_path(&self) -> PathBuf {
        self.root.path().join("scenes").join("shot.yaml")
    }

    /// Writes a source file relative to the library root and returns its absolute path.
    pub fn write_source(&self, relative_path: &str, content: &str) -> PathBuf {
        let path = self.library_root().join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create the source directory");
        }
        fs::write(&path, content).expect("failed to write the source file");
        path
    }

    /// Writes a descriptor into the library root and returns its absolute path.
    pub fn write_descriptor(&self, file_name: &str, relative_path: &str, data_type: &str, name: &str) -> PathBuf {
        let path = self.library_root().join(file_name);
        let content = format!("[ASSET]\nrelative_path = {relative_path}\ndata_type = {data_type}\nname = {name}\n");
        fs::write(&path, content).expect("failed to write the descriptor");
        path
    }

    /// Sets the modification time of the given file.
    pub fn set_modified(&self, path: &Path, time: SystemTime) {
        let file = fs::File::options()
            .write(true)
            .open(path)
            .unwrap_or_else(|_| panic!("failed to open \"{}\"", path.display()));
        file.set_modified(time)
            .unwrap_or_else(|_| panic!("failed to set the modification time of \"{}\"", path.display()));
    }

    /// Moves the modification time of the given file ten seconds into the future.
    pub fn bump_modified(&self, path: &Path) {
        let modified = fs::metadata(path)
            .and_then(|metadata| metadata.modified())
            .unwrap_or_else(|_| panic!("failed to read the modification time of \"{}\"", path.display()));
        self.set_modified(path, modified + Duration::from_secs(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_layout() {
        let library = test_library!();
        let path = library.write_descriptor("chair.ini", "props/chair.yaml", "collections", "Chair");
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(
            content,
            "[ASSET]\nrelative_path = props/chair.yaml\ndata_type = collections\nname = Chair\n"
        );
    }

    #[test]
    fn bump_modified_moves_forward() {
        let library = test_library!();
        let path = library.write_source("props/chair.yaml", CHAIR_LIBRARY);
        let before = fs::metadata(&path).unwrap().modified().unwrap();
        library.bump_modified(&path);
        let after = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(after, before + Duration::from_secs(10));
    }
}
