use roadly_core::repository::BookingRepository;
use roadly_core::Clock;
use roadly_hold::SeatLockManager;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::BookingError;
use crate::service::BookingService;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_bookings: usize,
    pub failed_payments: usize,
    pub purged_holds: usize,
}

/// Periodically expires held bookings past their window and clears lapsed
/// seat holds.
pub struct HoldExpiryReaper {
    bookings: Arc<dyn BookingRepository>,
    service: Arc<BookingService>,
    holds: Arc<SeatLockManager>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl HoldExpiryReaper {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        service: Arc<BookingService>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        let holds = service.holds().clone();
        Self {
            bookings,
            service,
            holds,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, BookingError> {
        let mut report = SweepReport::default();

        let stale = self
            .bookings
            .list_expired_holds(self.clock.now(), self.batch_size)
            .await?;
        for booking in stale {
            match self.service.expire_booking(&booking).await {
                Ok(Some(failed)) => {
                    report.expired_bookings += 1;
                    report.failed_payments += failed;
                }
                Ok(None) => debug!("Booking {} moved on before expiry", booking.booking_code),
                Err(e) => error!("Failed to expire booking {}: {}", booking.booking_code, e),
            }
        }

        report.purged_holds = self.holds.purge_expired().await?.len();
        if report != SweepReport::default() {
            info!(
                "Reaper expired {} bookings, failed {} payments, purged {} holds",
                report.expired_bookings, report.failed_payments, report.purged_holds
            );
        }
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to true.
    pub async fn run<F>(&self, interval: Duration, mut shutdown: watch::Receiver<bool>, mut on_sweep: F)
    where
        F: FnMut(&SweepReport) + Send,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Hold expiry reaper started, sweeping every {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) => on_sweep(&report),
                        Err(e) => error!("Reaper sweep failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Hold expiry reaper stopping");
                        break;
                    }
                }
            }
        }
    }
}
