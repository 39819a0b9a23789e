use chrono::{DateTime, Utc};
use gondola_core::UpdateId;
use gondola_db::{UpdateEntity, UpdateStatus};

use super::{
    satisfies_filters, LauncherSelectionPolicy, LoaderSelectionPolicy, ManifestFilters,
    ReaperSelectionPolicy,
};

/// Default launcher choice: among candidates matching the binary's
/// runtime version and the current filters, the largest commit time wins,
/// ties broken by id. Updates that failed their only launch are excluded.
pub struct DefaultLauncherPolicy {
    runtime_version: String,
}

impl DefaultLauncherPolicy {
    #[must_use]
    pub fn new(runtime_version: String) -> Self {
        Self { runtime_version }
    }
}

impl LauncherSelectionPolicy for DefaultLauncherPolicy {
    fn launchable_update(
        &self,
        candidates: &[UpdateEntity],
        filters: &ManifestFilters,
    ) -> Option<UpdateEntity> {
        candidates
            .iter()
            .filter(|u| u.status.is_launch_candidate())
            .filter(|u| u.runtime_version == self.runtime_version)
            .filter(|u| !u.has_failed_without_success())
            .filter(|u| satisfies_filters(u, filters))
            .max_by(|a, b| {
                a.commit_time
                    .cmp(&b.commit_time)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned()
    }
}

/// Default remote-content decisions: only strictly newer content wins.
pub struct DefaultLoaderPolicy;

impl LoaderSelectionPolicy for DefaultLoaderPolicy {
    fn should_load_new_update(
        &self,
        candidate: &UpdateEntity,
        launched: Option<&UpdateEntity>,
        filters: &ManifestFilters,
    ) -> bool {
        if !satisfies_filters(candidate, filters) {
            return false;
        }
        launched.is_none_or(|l| candidate.commit_time > l.commit_time)
    }

    fn should_load_rollback_directive(
        &self,
        directive_commit_time: DateTime<Utc>,
        embedded: Option<&UpdateEntity>,
        launched: Option<&UpdateEntity>,
        filters: &ManifestFilters,
    ) -> bool {
        let Some(embedded) = embedded else {
            return false;
        };
        if !satisfies_filters(embedded, filters) {
            return false;
        }
        launched.is_none_or(|l| directive_commit_time > l.commit_time)
    }
}

/// Default reaper: keep the launched update, the newest launchable and
/// every embedded update; everything older than the newest launchable is
/// eligible for deletion.
pub struct DefaultReaperPolicy {
    launcher: DefaultLauncherPolicy,
}

impl DefaultReaperPolicy {
    #[must_use]
    pub fn new(runtime_version: String) -> Self {
        Self {
            launcher: DefaultLauncherPolicy::new(runtime_version),
        }
    }
}

impl ReaperSelectionPolicy for DefaultReaperPolicy {
    fn updates_to_delete(
        &self,
        all: &[UpdateEntity],
        launched: Option<&UpdateEntity>,
        filters: &ManifestFilters,
    ) -> Vec<UpdateId> {
        let Some(newest) = self.launcher.launchable_update(all, filters) else {
            return Vec::new();
        };

        all.iter()
            .filter(|u| u.status != UpdateStatus::Embedded)
            .filter(|u| launched.is_none_or(|l| l.id != u.id))
            .filter(|u| u.id != newest.id && u.commit_time < newest.commit_time)
            .map(|u| u.id)
            .collect()
    }
}

/// Reaper for the developer client: a development host switches between
/// many published updates, so nothing is ever deleted automatically.
pub struct DevelopmentReaperPolicy;

impl ReaperSelectionPolicy for DevelopmentReaperPolicy {
    fn updates_to_delete(
        &self,
        _all: &[UpdateEntity],
        _launched: Option<&UpdateEntity>,
        _filters: &ManifestFilters,
    ) -> Vec<UpdateId> {
        Vec::new()
    }
}
