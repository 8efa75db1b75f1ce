use chrono::{DateTime, Utc};
use roadly_core::repository::{EventPublisher, SeatLockStore, TripRepository};
use roadly_core::{ClaimOutcome, Clock, CommitOutcome, SeatHold, SeatLock, Trip};
use roadly_shared::models::events::{
    ReleaseReason, SeatsBookedEvent, SeatsHeldEvent, SeatsReleasedEvent,
};
use roadly_shared::DomainEvent;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::HoldError;
use crate::policy::HoldPolicy;
use crate::seat_map::SeatMap;

/// What a session currently holds on one trip.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HoldSummary {
    pub trip_id: Uuid,
    pub seats: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub extensions_left: u32,
}

/// Short-lived exclusive claims on seats during checkout.
///
/// Availability checks and writes happen inside one `SeatLockStore` call, so
/// two sessions racing for the same seat cannot both win.
pub struct SeatLockManager {
    trips: Arc<dyn TripRepository>,
    store: Arc<dyn SeatLockStore>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
}

impl SeatLockManager {
    pub fn new(
        trips: Arc<dyn TripRepository>,
        store: Arc<dyn SeatLockStore>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: HoldPolicy,
    ) -> Self {
        Self { trips, store, events, clock, policy }
    }

    pub fn policy(&self) -> &HoldPolicy {
        &self.policy
    }

    pub async fn trip(&self, trip_id: Uuid) -> Result<Trip, HoldError> {
        self.trips
            .get_trip(trip_id)
            .await?
            .ok_or(HoldError::TripNotFound(trip_id))
    }

    pub async fn hold_seats(
        &self,
        trip_id: Uuid,
        session_id: &str,
        seats: &[String],
    ) -> Result<HoldSummary, HoldError> {
        let seats = normalize_seats(seats)?;
        let now = self.clock.now();
        let trip = self.trip(trip_id).await?;
        if !trip.accepts_holds(now, self.policy.cutoff()) {
            return Err(HoldError::TripClosed(trip_id));
        }

        let unknown: Vec<String> = seats
            .iter()
            .filter(|seat| !trip.seat_layout.contains(seat))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(HoldError::UnknownSeats(unknown));
        }

        let current = self.live_holds(trip_id, session_id, now).await?;
        let total = current
            .iter()
            .map(|hold| hold.seat_number.as_str())
            .chain(seats.iter().map(String::as_str))
            .collect::<HashSet<_>>()
            .len();
        if total > self.policy.max_seats_per_session {
            return Err(HoldError::TooManySeats {
                requested: total,
                max: self.policy.max_seats_per_session,
            });
        }

        // New seats join the session's existing window on this trip.
        let (expires_at, extensions) = match window(&current) {
            Some(window) => window,
            None => (now + self.policy.hold_duration(), 0),
        };

        let holds = match self
            .store
            .claim(trip_id, &seats, session_id, expires_at, extensions, now)
            .await?
        {
            ClaimOutcome::Claimed(holds) => holds,
            ClaimOutcome::Conflict(conflicts) => {
                info!("Hold conflict on trip {} for seats {:?}", trip_id, conflicts);
                return Err(HoldError::Conflict(conflicts));
            }
        };

        info!("Session held seats {:?} on trip {} until {}", seats, trip_id, expires_at);
        self.publish(DomainEvent::SeatsHeld(SeatsHeldEvent {
            trip_id,
            seat_numbers: seats,
            expires_at: expires_at.timestamp(),
            timestamp: now.timestamp(),
        }))
        .await;

        self.summarize(trip_id, &holds)
            .ok_or(HoldError::NoActiveHold)
    }

    pub async fn extend_hold(&self, trip_id: Uuid, session_id: &str) -> Result<HoldSummary, HoldError> {
        let now = self.clock.now();
        let trip = self.trip(trip_id).await?;
        let current = self.live_holds(trip_id, session_id, now).await?;
        let (expires_at, extensions) = window(&current).ok_or(HoldError::NoActiveHold)?;

        if extensions >= self.policy.max_extensions {
            return Err(HoldError::ExtensionLimit { max: self.policy.max_extensions });
        }

        let new_expiry = (expires_at + self.policy.extension()).min(trip.sales_close_at(self.policy.cutoff()));
        if new_expiry <= expires_at {
            return Err(HoldError::TripClosed(trip_id));
        }

        let holds = self.store.extend(trip_id, session_id, new_expiry, now).await?;
        let summary = self.summarize(trip_id, &holds).ok_or(HoldError::NoActiveHold)?;

        info!("Extended hold on trip {} to {}", trip_id, new_expiry);
        self.publish(DomainEvent::SeatsHeld(SeatsHeldEvent {
            trip_id,
            seat_numbers: summary.seats.clone(),
            expires_at: new_expiry.timestamp(),
            timestamp: now.timestamp(),
        }))
        .await;

        Ok(summary)
    }

    /// Releases the session's own holds. Calling it again is a no-op.
    pub async fn release_seats(
        &self,
        trip_id: Uuid,
        session_id: &str,
        seats: Option<&[String]>,
    ) -> Result<Vec<String>, HoldError> {
        self.release_with_reason(trip_id, session_id, seats, ReleaseReason::Released)
            .await
    }

    pub async fn release_with_reason(
        &self,
        trip_id: Uuid,
        session_id: &str,
        seats: Option<&[String]>,
        reason: ReleaseReason,
    ) -> Result<Vec<String>, HoldError> {
        let wanted = seats.map(|seats| {
            seats
                .iter()
                .map(|s| s.trim().to_uppercase())
                .collect::<Vec<_>>()
        });
        let released = self
            .store
            .release(trip_id, session_id, wanted.as_deref())
            .await?;

        if !released.is_empty() {
            info!("Released seats {:?} on trip {} ({:?})", released, trip_id, reason);
            self.publish(DomainEvent::SeatsReleased(SeatsReleasedEvent {
                trip_id,
                seat_numbers: released.clone(),
                reason,
                timestamp: self.clock.now().timestamp(),
            }))
            .await;
        }
        Ok(released)
    }

    /// Drops every lapsed hold from the store and announces them per trip.
    pub async fn purge_expired(&self) -> Result<Vec<SeatHold>, HoldError> {
        let now = self.clock.now();
        let purged = self.store.purge_expired(now).await?;

        let mut by_trip: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();
        for hold in &purged {
            by_trip.entry(hold.trip_id).or_default().push(hold.seat_number.clone());
        }
        for (trip_id, mut seat_numbers) in by_trip {
            seat_numbers.sort();
            self.publish(DomainEvent::SeatsReleased(SeatsReleasedEvent {
                trip_id,
                seat_numbers,
                reason: ReleaseReason::Expired,
                timestamp: now.timestamp(),
            }))
            .await;
        }
        Ok(purged)
    }

    pub async fn session_hold(&self, trip_id: Uuid, session_id: &str) -> Result<Option<HoldSummary>, HoldError> {
        let holds = self.live_holds(trip_id, session_id, self.clock.now()).await?;
        Ok(self.summarize(trip_id, &holds))
    }

    pub async fn seat_map(&self, trip_id: Uuid, viewer: Option<&str>) -> Result<SeatMap, HoldError> {
        let now = self.clock.now();
        let trip = self.trip(trip_id).await?;
        let locks = self.store.locks_for_trip(trip_id, now).await?;
        Ok(SeatMap::build(&trip, &locks, viewer, now))
    }

    /// Turns the session's live holds into booked seats for `booking_code`.
    pub async fn commit_seats(
        &self,
        trip_id: Uuid,
        session_id: &str,
        seats: &[String],
        booking_code: &str,
    ) -> Result<(), HoldError> {
        let now = self.clock.now();
        match self.store.commit(trip_id, session_id, seats, booking_code, now).await? {
            CommitOutcome::Committed => {
                info!("Booked seats {:?} on trip {} for {}", seats, trip_id, booking_code);
                self.publish(DomainEvent::SeatsBooked(SeatsBookedEvent {
                    trip_id,
                    seat_numbers: seats.to_vec(),
                    booking_code: booking_code.to_string(),
                    timestamp: now.timestamp(),
                }))
                .await;
                Ok(())
            }
            CommitOutcome::Lost(lost) => {
                warn!("Booking {} lost its hold on seats {:?}", booking_code, lost);
                Err(HoldError::HoldLost(lost))
            }
        }
    }

    pub async fn free_booked_seats(
        &self,
        trip_id: Uuid,
        seats: &[String],
        booking_code: &str,
    ) -> Result<Vec<String>, HoldError> {
        let freed = self.store.unbook(trip_id, seats, booking_code).await?;
        if !freed.is_empty() {
            info!("Freed booked seats {:?} on trip {} from {}", freed, trip_id, booking_code);
            self.publish(DomainEvent::SeatsReleased(SeatsReleasedEvent {
                trip_id,
                seat_numbers: freed.clone(),
                reason: ReleaseReason::Cancelled,
                timestamp: self.clock.now().timestamp(),
            }))
            .await;
        }
        Ok(freed)
    }

    async fn live_holds(
        &self,
        trip_id: Uuid,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatHold>, HoldError> {
        Ok(self
            .store
            .locks_for_trip(trip_id, now)
            .await?
            .into_iter()
            .filter_map(|lock| match lock {
                SeatLock::Held(hold) if hold.session_id == session_id && hold.is_live(now) => Some(hold),
                _ => None,
            })
            .collect())
    }

    fn summarize(&self, trip_id: Uuid, holds: &[SeatHold]) -> Option<HoldSummary> {
        let (expires_at, extensions) = window(holds)?;
        let mut seats: Vec<String> = holds.iter().map(|h| h.seat_number.clone()).collect();
        seats.sort();
        Some(HoldSummary {
            trip_id,
            seats,
            expires_at,
            extensions_left: self.policy.extensions_left(extensions),
        })
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!("Failed to publish {}: {}", event.topic(), e);
        }
    }
}

/// The session's shared window: latest expiry and highest extension count.
fn window(holds: &[SeatHold]) -> Option<(DateTime<Utc>, u32)> {
    let expires_at = holds.iter().map(|h| h.expires_at).max()?;
    let extensions = holds.iter().map(|h| h.extensions).max().unwrap_or(0);
    Some((expires_at, extensions))
}

fn normalize_seats(seats: &[String]) -> Result<Vec<String>, HoldError> {
    if seats.is_empty() {
        return Err(HoldError::EmptySelection);
    }
    let mut seen = HashSet::with_capacity(seats.len());
    let mut normalized = Vec::with_capacity(seats.len());
    for seat in seats {
        let seat = seat.trim().to_uppercase();
        if seat.is_empty() {
            return Err(HoldError::EmptySelection);
        }
        if !seen.insert(seat.clone()) {
            return Err(HoldError::DuplicateSeat(seat));
        }
        normalized.push(seat);
    }
    Ok(normalized)
}
