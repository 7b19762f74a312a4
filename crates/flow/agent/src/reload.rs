//! Reload the flow configuration file when its content changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use flow_engine::import::revision_of;
use flow_engine::Flow;
use tokio_util::sync::CancellationToken;

/// Read and load `path` into `flow`; returns the loaded content's revision.
pub async fn load_file(flow: &Flow, path: &Path) -> anyhow::Result<String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    flow.load_source(&text)
        .await
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(revision_of(&text))
}

/// Poll `path` every `interval` and reload on change, until cancelled.
///
/// A rejected configuration is logged; the running graph stays as it was
/// and the same content is not retried.
pub async fn watch_file(
    flow: Flow,
    path: PathBuf,
    mut revision: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read configuration");
                continue;
            }
        };
        let next = revision_of(&text);
        if next == revision {
            continue;
        }
        revision = next;

        match flow.load_source(&text).await {
            Ok(()) => tracing::info!(path = %path.display(), revision = %revision, "Configuration reloaded"),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "Configuration reload rejected"),
        }
    }
}
