use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use color_eyre as ey;
use ey::eyre::{eyre, Context};
use hotswap_content::{
    convert, document,
    scene::{Collection, Object},
    staleness::{asset_info, check_all},
    update::{on_document_load, update_all},
    AssetLoader, Config, DataRef, FileLibrary, LoadTarget, RelinkEngine, RelinkResult, Scene, Uid,
};
use hotswap_shared::log::{self, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
enum CommandLineArguments {
    /// Open a document and handle stale assets according to the update policy of the config
    Open(DocumentArgs),
    /// Load assets from descriptors into a document
    Load(Load),
    /// List the assets whose source changed
    Check(DocumentArgs),
    /// Relink stale assets
    Update(Update),
    /// Turn assets into local datablocks that are no longer tracked
    Convert(ConvertArgs),
    /// Show the registry entry of the asset an object belongs to
    Info(Named),
    /// Delete an asset and everything only it uses
    Remove(Named),
}

#[derive(Parser, Debug)]
struct DocumentArgs {
    /// Working document
    document: PathBuf,
}

#[derive(Parser, Debug)]
struct Load {
    /// Working document. It is created when it doesn't exist.
    document: PathBuf,

    /// Descriptor files
    #[arg(required = true)]
    descriptors: Vec<PathBuf>,

    /// Collection into which the assets are linked instead of the scene root
    #[arg(short, long)]
    collection: Option<String>,

    /// Directory against which the descriptors are resolved. Overrides the config.
    #[arg(short, long)]
    library_root: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct Update {
    /// Working document
    document: PathBuf,

    /// Uid of the asset to relink
    #[arg(short, long, conflicts_with = "all")]
    uid: Option<Uid>,

    /// Relink all stale assets
    #[arg(short, long)]
    all: bool,
}

#[derive(Parser, Debug)]
struct ConvertArgs {
    #[command(flatten)]
    named: Named,

    /// Objects whose name contains the marker keep their transform and action. Overrides the config.
    #[arg(short, long)]
    rig_marker: Option<String>,
}

#[derive(Parser, Debug)]
struct Named {
    /// Working document
    document: PathBuf,

    /// Names of collections or objects
    #[arg(required = true)]
    names: Vec<String>,
}

fn main() -> ey::Result<()> {
    color_eyre::install()?;

    // Setup logging
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                hotswap_shared::chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(io::stdout())
        .apply()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    let command_line_arguments = CommandLineArguments::parse();
    match &command_line_arguments {
        CommandLineArguments::Open(args) => {
            let (mut scene, config) = open(&args.document)?;
            let engine = RelinkEngine::new(Arc::new(FileLibrary));
            let report = on_document_load(&mut scene, &engine, config.update_policy);
            for name in &report.failed {
                warn!("Failed to update '{name}'");
            }
            if !report.updated.is_empty() {
                document::save(&mut scene, &args.document).wrap_err("Failed to save the document")?;
            }
        }
        CommandLineArguments::Load(load) => {
            let config = read_config(&load.document)?;
            let mut scene = if load.document.is_file() {
                document::load(&load.document).wrap_err("Failed to load the document")?
            } else {
                info!("Creating the document {:?}", load.document);
                Scene::new()
            };
            let library_root = match load.library_root.as_ref().or(config.library_root.as_ref()) {
                Some(library_root) => library_root.clone(),
                None => load.descriptors[0].parent().map(Path::to_path_buf).unwrap_or_default(),
            };
            let target = match &load.collection {
                Some(name) => LoadTarget::Active(
                    scene
                        .find::<Collection>(name)
                        .ok_or_else(|| eyre!("There is no collection named '{name}'"))?,
                ),
                None => LoadTarget::SceneRoot,
            };

            let loader = AssetLoader::new(Arc::new(FileLibrary), library_root);
            let loaded = loader
                .load_descriptors(&mut scene, &load.descriptors, target)
                .wrap_err("Failed to load the assets")?;
            for asset in &loaded {
                info!("Loaded '{}' as {}", asset.name, asset.uid);
            }
            document::save(&mut scene, &load.document).wrap_err("Failed to save the document")?;
        }
        CommandLineArguments::Check(args) => {
            let (mut scene, _) = open(&args.document)?;
            let report = check_all(&mut scene);
            if report.is_empty() {
                info!("All assets are up to date");
            }
            for (uid, name) in report.stale.iter().zip(&report.names) {
                info!("Update available: '{name}' ({uid})");
            }
        }
        CommandLineArguments::Update(update) => {
            let (mut scene, _) = open(&update.document)?;
            let engine = RelinkEngine::new(Arc::new(FileLibrary));
            match (update.uid, update.all) {
                (Some(uid), _) => match engine.relink(&mut scene, uid).wrap_err("Failed to relink")? {
                    RelinkResult::Ok { new_uid } => info!("Relinked {uid} as {new_uid}"),
                    RelinkResult::Warning { new_uid, reason } => warn!("Relinked {uid} as {new_uid}: {reason}"),
                },
                (None, true) => {
                    let report = update_all(&mut scene, &engine);
                    info!("Updated {} of {} stale asset(s)", report.updated.len(), report.stale.len());
                    if !report.failed.is_empty() {
                        warn!("Failed to update: {}", report.failed.join(", "));
                    }
                }
                (None, false) => return Err(eyre!("Either --uid or --all is required")),
            }
            document::save(&mut scene, &update.document).wrap_err("Failed to save the document")?;
        }
        CommandLineArguments::Convert(ConvertArgs { named, rig_marker }) => {
            let (mut scene, mut config) = open(&named.document)?;
            if let Some(rig_marker) = rig_marker {
                config.rig_marker = rig_marker.clone();
            }
            let roots = named
                .names
                .iter()
                .map(|name| find_node(&scene, name))
                .collect::<ey::Result<Vec<_>>>()?;
            let report = convert(&mut scene, &FileLibrary, &roots, &config.convert_config()).wrap_err("Failed to convert")?;
            info!("Converted: {}", report.converted.join(", "));
            document::save(&mut scene, &named.document).wrap_err("Failed to save the document")?;
        }
        CommandLineArguments::Info(named) => {
            let (scene, _) = open(&named.document)?;
            for name in &named.names {
                let object = scene
                    .find::<Object>(name)
                    .ok_or_else(|| eyre!("There is no object named '{name}'"))?;
                let info = asset_info(&scene, object).wrap_err_with(|| format!("Failed to describe '{name}'"))?;
                info!(
                    "'{name}' belongs to '{}' ({}) from \"{}\" imported at {}{}",
                    info.name,
                    info.uid,
                    info.path,
                    info.version,
                    if info.update_available { ", update available" } else { "" }
                );
            }
        }
        CommandLineArguments::Remove(named) => {
            let (mut scene, _) = open(&named.document)?;
            for name in &named.names {
                let node = find_node(&scene, name)?;
                let removed = scene.delete(node);
                info!("Removed '{name}' and {} datablock(s) with it", removed.saturating_sub(1));
            }
            document::save(&mut scene, &named.document).wrap_err("Failed to save the document")?;
        }
    }
    Ok(())
}

fn read_config(document: &Path) -> ey::Result<Config> {
    let dir = document.parent().unwrap_or(Path::new("."));
    Config::read_or_default(dir).wrap_err("Failed to read the config")
}

fn open(document: &Path) -> ey::Result<(Scene, Config)> {
    let config = read_config(document)?;
    let scene = document::load(document).wrap_err_with(|| format!("Failed to load the document {document:?}"))?;
    Ok((scene, config))
}

/// Collections are preferred over objects of the same name.
fn find_node(scene: &Scene, name: &str) -> ey::Result<DataRef> {
    scene
        .find::<Collection>(name)
        .map(DataRef::from)
        .or_else(|| scene.find::<Object>(name).map(DataRef::from))
        .ok_or_else(|| eyre!("There is no collection or object named '{name}'"))
}
