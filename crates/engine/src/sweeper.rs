//! Periodic release of reservations whose TTL ran out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reservation_store::{
    Reservation, ReservationQuery, ReservationStatus, ReservationStore, ReservationStoreExt,
    UnitOfWork,
};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ReservationConfig;
use crate::error::Result;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records moved from `Reserved` to `Released`.
    pub swept: usize,
    /// Records whose release failed; they are picked up again next tick.
    pub failed: usize,
}

/// Converts passively expired holds to `Released` in storage.
///
/// Availability already ignores expired holds, so sweeping only cleans up.
/// Sweeps are single-flight: a tick that finds another sweep running is
/// skipped. Multiple processes sweeping the same store do redundant work but
/// cannot corrupt it, since every release re-checks the record first.
pub struct ExpirationSweeper<S: ReservationStore> {
    store: S,
    interval: Duration,
    in_flight: Mutex<()>,
}

impl<S: ReservationStore + 'static> ExpirationSweeper<S> {
    pub fn new(store: S, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(MIN_INTERVAL),
            in_flight: Mutex::new(()),
        }
    }

    pub fn from_config(store: S, config: &ReservationConfig) -> Self {
        Self::new(store, config.cleanup_interval)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one sweep. Returns `None` when another sweep is still in flight.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<Option<SweepReport>> {
        let Ok(_running) = self.in_flight.try_lock() else {
            tracing::debug!("previous sweep still running, skipping tick");
            return Ok(None);
        };

        let now = Utc::now();
        let expired = self.store.find(ReservationQuery::expired(now)).await?;
        let mut report = SweepReport::default();

        for reservation in &expired {
            match self.release_expired(reservation, now).await {
                Ok(true) => report.swept += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        reservation_id = %reservation.id,
                        order_id = %reservation.order_id,
                        error = %e,
                        "failed to release expired reservation"
                    );
                }
            }
        }

        metrics::counter!("reservations_swept_total").increment(report.swept as u64);
        if report.failed > 0 {
            metrics::counter!("reservations_sweep_failures_total").increment(report.failed as u64);
        }
        if report.swept > 0 || report.failed > 0 {
            tracing::info!(
                swept = report.swept,
                failed = report.failed,
                "released expired reservations"
            );
        }

        Ok(Some(report))
    }

    /// Releases one record in its own unit of work, provided it is still an
    /// expired `Reserved` hold once its stock unit is locked.
    async fn release_expired(&self, candidate: &Reservation, now: DateTime<Utc>) -> Result<bool> {
        let mut work = self.store.begin().await?;
        work.lock_stock_unit(&candidate.stock_unit()).await?;

        let query = ReservationQuery::by_id(candidate.id)
            .status(ReservationStatus::Reserved)
            .expired_before(now)
            .for_update();
        let Some(mut reservation) = work.find(&query).await?.into_iter().next() else {
            return Ok(false);
        };

        reservation.transition_to(ReservationStatus::Released, Utc::now())?;
        work.upsert(&reservation).await?;
        work.commit().await?;

        tracing::debug!(reservation_id = %reservation.id, "expired reservation released");
        Ok(true)
    }

    /// Spawns the periodic sweep task. The first tick fires one interval after
    /// start; ticks that would overlap a running sweep are dropped.
    pub fn start(self: Arc<Self>) -> SweeperHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);

        let task = tokio::spawn(async move {
            tracing::info!(interval_ms = self.interval.as_millis() as u64, "expiration sweeper started");

            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = signal.notified() => {
                        tracing::info!("expiration sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            tracing::warn!(error = %e, "expiration sweep failed");
                        }
                    }
                }
            }

            tracing::info!("expiration sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops future ticks and waits for a sweep already in flight to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "expiration sweeper task panicked");
        }
    }
}
