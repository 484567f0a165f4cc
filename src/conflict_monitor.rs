//! Background rechecking of a pending proposal.
//!
//! The monitor reloads the provider's snapshot on every tick and publishes
//! the conflicts it finds. It only reports and never writes.

use crate::{
    backend::AvailabilityService,
    conflict_detector::{self, DetectionSettings, ScheduleConflict},
    schedule_model::ScheduleSnapshot,
    types::{AvailabilitySlot, ProviderId},
};
use chrono::Utc;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::watch::{self, Receiver},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

pub struct ConflictMonitor {
    receiver: Receiver<Vec<ScheduleConflict>>,
    task: JoinHandle<()>,
    started_at: Instant,
}

impl ConflictMonitor {
    pub fn spawn<S: AvailabilityService + ?Sized>(
        service: Arc<S>,
        provider_id: ProviderId,
        proposed: Vec<AvailabilitySlot>,
        settings: DetectionSettings,
        interval: Duration,
    ) -> Self {
        let (sender, receiver) = watch::channel(Vec::new());
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let loaded = ScheduleSnapshot::load_for_proposal(service.as_ref(), provider_id, &proposed).await;
                let snapshot = match loaded {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        warn!(%provider_id, %err, "Recheck skipped, snapshot unavailable");
                        continue;
                    }
                };
                let conflicts =
                    conflict_detector::detect(provider_id, &proposed, &snapshot, &settings.options(Utc::now()));
                sender.send_if_modified(|current| {
                    if *current == conflicts {
                        return false;
                    }
                    info!(%provider_id, conflicts = conflicts.len(), "Conflicts changed");
                    *current = conflicts;
                    true
                });
                if sender.is_closed() {
                    break;
                }
            }
        });
        Self {
            receiver,
            task,
            started_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn latest(&self) -> Vec<ScheduleConflict> {
        self.receiver.borrow().clone()
    }

    pub fn stream(&self) -> WatchStream<Vec<ScheduleConflict>> {
        WatchStream::new(self.receiver.clone())
    }
}

impl Drop for ConflictMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
