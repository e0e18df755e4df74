//! Long-running host
//!
//! One task owns every environment-facing effect: it drains the release
//! queue fed by the expiration sweep, applies each batch through the manager
//! and works out where each released subject goes. Signals stop or reload it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use warden_core::{
    ChannelReleaseSink, ManagerBuilder, OpenWorld, RestrictionManager, Settings, SubjectId,
    TracingObserver,
};

use crate::signals::{signal_channel, HostSignal};

/// World assumed for a subject whose zone is gone.
const FALLBACK_WORLD: &str = "world";

pub fn open(settings: &Settings) -> Result<RestrictionManager> {
    let manager = ManagerBuilder::from_settings(settings)
        .world(Arc::new(OpenWorld))
        .build();
    manager
        .load()
        .with_context(|| format!("Failed to load data from {}", settings.data_dir.display()))?;
    Ok(manager)
}

pub async fn run(settings: Settings) -> Result<()> {
    let (sink, mut batches) = ChannelReleaseSink::new();
    let manager = ManagerBuilder::from_settings(&settings)
        .world(Arc::new(OpenWorld))
        .observer(Arc::new(TracingObserver))
        .release_sink(Arc::new(sink))
        .build();

    manager
        .load()
        .with_context(|| format!("Failed to load data from {}", settings.data_dir.display()))?;
    manager
        .start()
        .await
        .context("Failed to start expiration sweep")?;
    let mut signals = signal_channel()?;

    info!(
        data_dir = %settings.data_dir.display(),
        interval_secs = settings.sweep.interval_secs,
        "warden running"
    );

    loop {
        tokio::select! {
            Some(batch) = batches.recv() => apply_releases(&manager, &batch),
            signal = signals.recv() => match signal {
                Some(HostSignal::Reload) => {
                    if let Err(e) = manager.reload().await {
                        error!(error = %e, "Reload failed");
                    }
                }
                Some(HostSignal::Shutdown) | None => break,
            },
        }
    }

    manager.shutdown().await.context("Final save failed")
}

fn apply_releases(manager: &RestrictionManager, batch: &[SubjectId]) {
    let applied = manager.release_expired(batch);

    for record in &applied.value {
        let world = manager
            .zone(record.zone.as_str())
            .map_or_else(|| FALLBACK_WORLD.to_string(), |zone| zone.location.world);
        match manager.restore_location(record, &world) {
            Ok(target) => info!(
                subject = %record.subject_id,
                subject_name = %record.subject_name,
                to = %target,
                "Restoring released subject"
            ),
            Err(e) => warn!(subject = %record.subject_id, error = %e, "No location to restore subject to"),
        }
    }

    if let Err(e) = applied.saved {
        error!(error = %e, "Releases applied but not saved, retrying at shutdown");
    }
}
