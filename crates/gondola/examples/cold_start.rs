//! Example: run one cold start against an update server.
//!
//! Demonstrates the top-level `UpdatesEngine` API:
//! - `UpdatesConfig` names the server, scope and runtime version
//! - `start()` spawns the loader task
//! - `launch_asset_file_async()` resolves once a launcher is chosen
//!
//! Run with:
//! ```
//! cargo run -p gondola --example cold_start [UPDATE_URL]
//! ```

use std::{env::args, error::Error, sync::Arc};

use gondola::{prelude::*, NoopHostReloader};
use tracing::{info, metadata::LevelFilter};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("gondola=debug".parse()?)
                .add_directive("gondola_net=info".parse()?)
                .add_directive("gondola_db=info".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_line_number(false)
        .with_file(false)
        .init();

    let url = args()
        .nth(1)
        .unwrap_or_else(|| "https://u.expo.dev/your-project-id".to_string());

    let config = UpdatesConfig::default()
        .with_update_url(url.parse()?)
        .with_scope_key("com.example.demo".to_string())
        .with_runtime_version("1.0".to_string())
        .with_updates_dir(std::env::temp_dir().join("gondola-demo"))
        .with_launch_wait(std::time::Duration::from_secs(5));

    let engine = UpdatesEngine::new(config, Arc::new(NoopHostReloader));

    // Watch state snapshots while the loader task runs.
    let mut events = engine.event_bus().subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            if let Event::StateChange(change) = ev {
                info!(event = ?change.event_type, seq = change.context.sequence_number, "state");
            }
        }
    });

    engine.start().await?;

    match engine.launch_asset_file_async().await {
        Some(path) => info!(path = %path.display(), "launching stored update"),
        None => info!(
            bundle = ?engine.bundle_asset_name(),
            emergency = engine.is_emergency_launch(),
            "launching embedded payload"
        ),
    }

    Ok(())
}
