use std::{path::PathBuf, time::Duration};

use derive_setters::Setters;
use gondola_net::{Headers, NetOptions};
use url::Url;

use crate::{EngineError, EngineResult};

/// When the cold-start loader task contacts the update server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckOnLaunch {
    /// Check on every cold start.
    #[default]
    Always,
    /// Check only when the device reports a wifi connection.
    WifiOnly,
    /// Never check at cold start; only error recovery may load remotely.
    ErrorRecoveryOnly,
    /// Never check automatically.
    Never,
}

/// Connectivity hint the host supplies at startup, consulted by the
/// `WifiOnly` launch policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Connectivity {
    /// Not reported; `WifiOnly` skips the remote check.
    #[default]
    Unknown,
    Wifi,
    Cellular,
}

/// Configuration for the update engine.
///
/// Used with `UpdatesEngine::new(config, host)`.
#[derive(Clone, Debug, Setters)]
#[setters(prefix = "with_", strip_option)]
pub struct UpdatesConfig {
    /// Master switch; false forces an embedded-only launch.
    pub enabled: bool,
    /// HTTPS endpoint returning manifest/directive responses.
    pub update_url: Option<Url>,
    /// Logical app identifier; scopes everything stored in the catalog.
    pub scope_key: Option<String>,
    /// Binary-compatibility tag; only matching updates are considered.
    pub runtime_version: String,
    /// Directory for the catalog database and content-addressed assets.
    pub updates_dir: PathBuf,
    /// Directory holding the payload shipped inside the binary.
    pub embedded_dir: Option<PathBuf>,
    pub has_embedded_update: bool,
    /// Cold-start budget: how long `launch_asset_file` may wait for a
    /// remote update before serving a cached one.
    pub launch_wait: Duration,
    pub check_on_launch: CheckOnLaunch,
    pub connectivity: Connectivity,
    /// Additional headers for every server request.
    pub request_headers: Headers,
    pub net: NetOptions,
    /// Parallel asset downloads per loader invocation.
    pub asset_parallelism: usize,
    /// Quiet period after JS start before a launch counts as successful.
    pub success_timeout: Duration,
    /// Event bus channel capacity.
    pub event_channel_capacity: usize,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_url: None,
            scope_key: None,
            runtime_version: String::new(),
            updates_dir: std::env::temp_dir().join("gondola"),
            embedded_dir: None,
            has_embedded_update: false,
            launch_wait: Duration::ZERO,
            check_on_launch: CheckOnLaunch::Always,
            connectivity: Connectivity::Unknown,
            request_headers: Headers::new(),
            net: NetOptions::default(),
            asset_parallelism: 4,
            success_timeout: Duration::from_secs(10),
            event_channel_capacity: 16,
        }
    }
}

impl UpdatesConfig {
    /// `update_url` and `scope_key` are mandatory for an enabled engine.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.update_url.is_none() {
            return Err(EngineError::ConfigInvalid(
                "updateUrl is required when updates are enabled".into(),
            ));
        }
        if self.scope_key.as_deref().is_none_or(str::is_empty) {
            return Err(EngineError::ConfigInvalid(
                "scopeKey is required when updates are enabled".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn scope_key(&self) -> &str {
        self.scope_key.as_deref().unwrap_or_default()
    }

    /// Whether the cold-start loader should contact the server.
    #[must_use]
    pub fn should_check_on_launch(&self) -> bool {
        if !self.enabled || self.update_url.is_none() {
            return false;
        }
        match self.check_on_launch {
            CheckOnLaunch::Always => true,
            CheckOnLaunch::WifiOnly => self.connectivity == Connectivity::Wifi,
            CheckOnLaunch::ErrorRecoveryOnly | CheckOnLaunch::Never => false,
        }
    }
}
