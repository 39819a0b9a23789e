//! Pure selection decisions: which stored update to launch, whether a
//! remote update or rollback directive is worth taking, and which stored
//! updates the reaper may delete.
//!
//! The three axes are independent trait objects so a host (for example a
//! developer client) can swap one without affecting the others.

mod default;
mod one_shot;

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use gondola_core::UpdateId;
use gondola_db::UpdateEntity;

pub use default::{DefaultLauncherPolicy, DefaultLoaderPolicy, DefaultReaperPolicy, DevelopmentReaperPolicy};
pub use one_shot::PolicySlot;

/// Server-driven filter map restricting which updates a client considers.
///
/// Keys are lowercase: the filters header codec and the manifest parser
/// both normalize at construction, so matching here is case-insensitive
/// without per-lookup folding.
pub type ManifestFilters = BTreeMap<String, String>;

/// An update satisfies the filters iff, for every filter key it carries a
/// value for, that value matches. Keys the update does not mention pass.
#[must_use]
pub fn satisfies_filters(update: &UpdateEntity, filters: &ManifestFilters) -> bool {
    filters.iter().all(|(key, value)| {
        update
            .manifest_filters
            .get(key)
            .is_none_or(|actual| actual == value)
    })
}

/// Picks the best stored update to launch.
pub trait LauncherSelectionPolicy: Send + Sync {
    fn launchable_update(
        &self,
        candidates: &[UpdateEntity],
        filters: &ManifestFilters,
    ) -> Option<UpdateEntity>;
}

/// Decides whether remote content is worth persisting.
pub trait LoaderSelectionPolicy: Send + Sync {
    fn should_load_new_update(
        &self,
        candidate: &UpdateEntity,
        launched: Option<&UpdateEntity>,
        filters: &ManifestFilters,
    ) -> bool;

    fn should_load_rollback_directive(
        &self,
        directive_commit_time: DateTime<Utc>,
        embedded: Option<&UpdateEntity>,
        launched: Option<&UpdateEntity>,
        filters: &ManifestFilters,
    ) -> bool;
}

/// Decides which stored updates may be deleted.
///
/// Implementations must never name the currently launched update or an
/// embedded update; the reaper deletes exactly what is returned.
pub trait ReaperSelectionPolicy: Send + Sync {
    fn updates_to_delete(
        &self,
        all: &[UpdateEntity],
        launched: Option<&UpdateEntity>,
        filters: &ManifestFilters,
    ) -> Vec<UpdateId>;
}

/// The three policy axes bundled for the engine.
#[derive(Clone)]
pub struct SelectionPolicy {
    pub launcher: Arc<dyn LauncherSelectionPolicy>,
    pub loader: Arc<dyn LoaderSelectionPolicy>,
    pub reaper: Arc<dyn ReaperSelectionPolicy>,
}

impl SelectionPolicy {
    /// Default policy set for a binary with the given runtime version.
    #[must_use]
    pub fn standard(runtime_version: impl Into<String>) -> Self {
        let runtime_version = runtime_version.into();
        Self {
            launcher: Arc::new(DefaultLauncherPolicy::new(runtime_version.clone())),
            loader: Arc::new(DefaultLoaderPolicy),
            reaper: Arc::new(DefaultReaperPolicy::new(runtime_version)),
        }
    }

    /// Developer-client policy set: same launcher/loader decisions, but
    /// the reaper keeps every stored update.
    #[must_use]
    pub fn development(runtime_version: impl Into<String>) -> Self {
        let runtime_version = runtime_version.into();
        Self {
            launcher: Arc::new(DefaultLauncherPolicy::new(runtime_version)),
            loader: Arc::new(DefaultLoaderPolicy),
            reaper: Arc::new(DevelopmentReaperPolicy),
        }
    }
}
