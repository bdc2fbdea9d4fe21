//! Background sweeper for idle upload sessions.
//!
//! Sessions idle past the configured TTL transition to `expired` and their
//! staging objects are reclaimed. Cancelled commits may also leave staging
//! garbage behind; the sweep picks those up through the same path.

use crate::metrics;
use crate::state::AppState;
use time::OffsetDateTime;
use wharf_core::upload::UploadState;

/// Sessions processed per sweep pass.
const SWEEP_BATCH: i64 = 100;

/// Spawn the periodic sweeper task.
pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval = state.config.oci.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(&state).await {
                tracing::error!(error = %e, "upload sweep failed");
            }
        }
    })
}

/// One sweep pass. Public so tests can drive it directly.
pub async fn sweep_once(state: &AppState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ttl = state.config.oci.upload_idle_ttl();
    let cutoff = OffsetDateTime::now_utc() - time::Duration::seconds(ttl.as_secs() as i64);

    let idle = state.metadata.get_idle_uploads(cutoff, SWEEP_BATCH).await?;
    if idle.is_empty() {
        return Ok(());
    }

    tracing::info!(count = idle.len(), "expiring idle upload sessions");
    for session in idle {
        let expired = state
            .metadata
            .update_upload_state(
                session.id,
                &[UploadState::Open.as_str(), UploadState::Receiving.as_str()],
                UploadState::Expired.as_str(),
                OffsetDateTime::now_utc(),
            )
            .await?;
        if !expired {
            // Lost a race against a commit or cancel; nothing to clean.
            continue;
        }

        // Staging keys are tenant-scoped; resolve the root identifier.
        let root_identifier = match state.metadata.get_registry(session.registry_id).await? {
            Some(registry) => match state.metadata.get_space(registry.root_space_id).await? {
                Some(space) => space.identifier,
                None => continue,
            },
            None => continue,
        };

        if let Err(e) = state
            .cas
            .delete_staged(&root_identifier, &session.id)
            .await
        {
            tracing::warn!(upload_id = %session.id, error = %e, "failed to delete staging object");
        }
        metrics::UPLOAD_SESSIONS_EXPIRED.inc();
        tracing::debug!(upload_id = %session.id, "upload session expired");
    }
    Ok(())
}
