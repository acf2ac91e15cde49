use hotswap_shared::log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    relink::{RelinkEngine, RelinkResult},
    scene::Scene,
    staleness::{check_all, StalenessReport},
};

/// What happens with stale assets when a document is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Stale assets are only reported.
    #[default]
    Report,
    /// Stale assets are relinked right away.
    Automatic,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Names of the assets that were out of date.
    pub stale: Vec<String>,
    /// Names of the assets that were relinked.
    pub updated: Vec<String>,
    pub warnings: Vec<String>,
    /// Names of the assets whose relink failed.
    pub failed: Vec<String>,
}

/// Checks the scene of a freshly opened document and, depending on the policy, relinks what is stale.
pub fn on_document_load(scene: &mut Scene, engine: &RelinkEngine, policy: UpdatePolicy) -> UpdateReport {
    let staleness = check_all(scene);
    if staleness.is_empty() {
        info!("All assets are up to date");
        return UpdateReport::default();
    }
    match policy {
        UpdatePolicy::Report => {
            for name in &staleness.names {
                info!("'{name}' has an update available");
            }
            UpdateReport {
                stale: staleness.names,
                ..Default::default()
            }
        }
        UpdatePolicy::Automatic => relink_stale(scene, engine, staleness),
    }
}

/// Relinks every stale asset of the scene.
pub fn update_all(scene: &mut Scene, engine: &RelinkEngine) -> UpdateReport {
    let staleness = check_all(scene);
    relink_stale(scene, engine, staleness)
}

fn relink_stale(scene: &mut Scene, engine: &RelinkEngine, staleness: StalenessReport) -> UpdateReport {
    let mut report = UpdateReport {
        stale: staleness.names.clone(),
        ..Default::default()
    };
    for (uid, name) in staleness.stale.into_iter().zip(staleness.names) {
        match engine.relink(scene, uid) {
            Ok(RelinkResult::Ok { .. }) => report.updated.push(name),
            Ok(RelinkResult::Warning { reason, .. }) => {
                warn!("'{name}' was updated with warnings: {reason}");
                report.warnings.push(format!("{name}: {reason}"));
                report.updated.push(name);
            }
            Err(err) => {
                error!("Failed to update '{name}': {err}");
                report.failed.push(name);
            }
        }
    }
    report
}
