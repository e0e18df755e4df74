//! Periodic expiration sweep
//!
//! The sweep never releases anyone itself. It snapshots the store, collects
//! the subjects whose sentence has run out and posts them as one batch to a
//! [`ReleaseSink`]. The host drains that sink on its mutation thread and
//! calls [`crate::RestrictionManager::release_expired`], which re-checks
//! expiry per subject.

use std::{fmt, sync::Arc, time::Duration};

use strum::Display;
use tokio::{
    runtime::Handle,
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{clock::Clock, record::SubjectId, store::RestrictionStore, Error, Result};

/// Receiver of expired-subject batches
pub trait ReleaseSink: Send + Sync + fmt::Debug {
    fn submit(&self, batch: Vec<SubjectId>);
}

/// Posts each batch onto an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelReleaseSink {
    tx: mpsc::UnboundedSender<Vec<SubjectId>>,
}

impl ChannelReleaseSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<SubjectId>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReleaseSink for ChannelReleaseSink {
    fn submit(&self, batch: Vec<SubjectId>) {
        let count = batch.len();
        if self.tx.send(batch).is_err() {
            warn!(count, "Release queue closed, dropping expired batch");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug)]
struct RunningSweep {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the single background sweep task
#[derive(Debug)]
pub struct ExpirationScheduler {
    period: Duration,
    running: Option<RunningSweep>,
}

impl ExpirationScheduler {
    /// A zero period is raised to one second.
    pub fn new(period: Duration) -> Self {
        let period = if period.is_zero() {
            Duration::from_secs(1)
        } else {
            period
        };
        Self {
            period,
            running: None,
        }
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    pub const fn state(&self) -> SchedulerState {
        if self.running.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Spawn the sweep task on the current tokio runtime.
    ///
    /// Starting an already running scheduler is a no-op.
    pub fn start(
        &mut self,
        store: Arc<RestrictionStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ReleaseSink>,
    ) -> Result<()> {
        if self.running.is_some() {
            debug!("Expiration sweep already running");
            return Ok(());
        }

        let runtime = Handle::try_current()
            .map_err(|e| Error::Scheduler(format!("no async runtime available: {e}")))?;
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run(self.period, store, clock, sink, cancel.clone()));

        self.running = Some(RunningSweep { cancel, handle });
        Ok(())
    }

    /// Cancel the sweep and wait for the task to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Expiration sweep task ended abnormally");
            }
        }
    }
}

impl Drop for ExpirationScheduler {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

/// Subjects whose sentence has elapsed at `now`.
pub fn sweep(store: &RestrictionStore, now: i64) -> Vec<SubjectId> {
    store.expired(now)
}

async fn run(
    period: Duration,
    store: Arc<RestrictionStore>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ReleaseSink>,
    cancel: CancellationToken,
) {
    info!(interval_secs = period.as_secs(), "Expiration sweep started");

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Expiration sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                let expired = sweep(&store, clock.now());
                if expired.is_empty() {
                    debug!("Expiration sweep: nothing expired");
                } else {
                    info!(count = expired.len(), "Expiration sweep: posting releases");
                    sink.submit(expired);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        record::NewRestriction,
        sentence::Sentence,
        zone::ZoneName,
    };

    fn confine(store: &RestrictionStore, secs: u64, now: i64) -> Result<SubjectId> {
        let record = store.assign(
            NewRestriction {
                subject_id: SubjectId::random(),
                subject_name: "alice".to_string(),
                zone: ZoneName::new("yard")?,
                sentence: Sentence::Seconds(secs),
                reason: "test".to_string(),
                issuer: "Console".to_string(),
                prior_location: None,
            },
            now,
        )?;
        Ok(record.subject_id)
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let mut scheduler = ExpirationScheduler::new(Duration::from_secs(30));
        let (sink, _rx) = ChannelReleaseSink::new();
        let result = scheduler.start(
            Arc::new(RestrictionStore::new()),
            Arc::new(ManualClock::new(0)),
            Arc::new(sink),
        );
        assert!(matches!(result, Err(Error::Scheduler(_))));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_zero_period_is_raised() {
        let scheduler = ExpirationScheduler::new(Duration::ZERO);
        assert_eq!(scheduler.period(), Duration::from_secs(1));
    }

    #[test]
    fn test_sweep_does_not_mutate_store() -> Result<()> {
        let store = RestrictionStore::new();
        let id = confine(&store, 30, 0)?;
        assert_eq!(sweep(&store, 31), vec![id]);
        assert!(store.is_restricted(&id));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_sweep_posts_expired_batch() -> Result<()> {
        let store = Arc::new(RestrictionStore::new());
        let clock = ManualClock::new(1_000);
        let id = confine(&store, 30, 1_000)?;
        let (sink, mut rx) = ChannelReleaseSink::new();

        let mut scheduler = ExpirationScheduler::new(Duration::from_secs(30));
        scheduler.start(Arc::clone(&store), Arc::new(clock.clone()), Arc::new(sink))?;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        clock.advance(31);
        let batch = rx.recv().await;
        assert_eq!(batch, Some(vec![id]));

        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_restart_keeps_one_task() -> Result<()> {
        let store = Arc::new(RestrictionStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let (sink, mut rx) = ChannelReleaseSink::new();
        let sink: Arc<dyn ReleaseSink> = Arc::new(sink);

        let mut scheduler = ExpirationScheduler::new(Duration::from_secs(10));
        scheduler.start(Arc::clone(&store), clock.clone(), Arc::clone(&sink))?;
        scheduler.stop().await;
        scheduler.start(Arc::clone(&store), clock.clone(), Arc::clone(&sink))?;
        // second start while running is ignored
        scheduler.start(Arc::clone(&store), clock.clone(), Arc::clone(&sink))?;

        let id = confine(&store, 5, 0)?;
        clock.advance(6);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(rx.recv().await, Some(vec![id]));
        assert!(rx.try_recv().is_err());

        scheduler.stop().await;
        Ok(())
    }
}
