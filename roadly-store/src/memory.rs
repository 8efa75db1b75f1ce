//! In-process implementations of every store trait. Used by the `memory`
//! storage backend and by the test suites of the domain crates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roadly_core::repository::{
    BookingRepository, EventPublisher, PaymentRepository, SeatLockStore, TripRepository,
    VoucherRepository,
};
use roadly_core::{
    BookedSeat, Booking, BookingStatus, ClaimOutcome, CommitOutcome, CoreResult, Payment,
    PaymentStatus, SeatHold, SeatLock, Trip, Voucher,
};
use roadly_shared::DomainEvent;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Trips
// ============================================================================

#[derive(Default)]
pub struct MemoryTripRepository {
    trips: Mutex<HashMap<Uuid, Trip>>,
}

impl MemoryTripRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TripRepository for MemoryTripRepository {
    async fn save_trip(&self, trip: &Trip) -> CoreResult<()> {
        guard(&self.trips).insert(trip.id, trip.clone());
        Ok(())
    }

    async fn get_trip(&self, id: Uuid) -> CoreResult<Option<Trip>> {
        Ok(guard(&self.trips).get(&id).cloned())
    }

    async fn list_trips(&self) -> CoreResult<Vec<Trip>> {
        let mut trips: Vec<Trip> = guard(&self.trips).values().cloned().collect();
        trips.sort_by_key(|t| t.departure_at);
        Ok(trips)
    }
}

// ============================================================================
// Seat locks
// ============================================================================

type SeatKey = (Uuid, String);

/// Seat locks in one map behind one mutex: every trait call is a single
/// critical section, which is what makes claims all-or-nothing.
#[derive(Default)]
pub struct MemorySeatLockStore {
    locks: Mutex<HashMap<SeatKey, SeatLock>>,
}

impl MemorySeatLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_holds(
        locks: &HashMap<SeatKey, SeatLock>,
        trip_id: Uuid,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<SeatHold> {
        let mut holds: Vec<SeatHold> = locks
            .iter()
            .filter(|((trip, _), _)| *trip == trip_id)
            .filter_map(|(_, lock)| match lock {
                SeatLock::Held(hold) if hold.session_id == session_id && hold.is_live(now) => {
                    Some(hold.clone())
                }
                _ => None,
            })
            .collect();
        holds.sort_by(|a, b| a.seat_number.cmp(&b.seat_number));
        holds
    }
}

#[async_trait]
impl SeatLockStore for MemorySeatLockStore {
    async fn claim(
        &self,
        trip_id: Uuid,
        seats: &[String],
        session_id: &str,
        expires_at: DateTime<Utc>,
        extensions: u32,
        now: DateTime<Utc>,
    ) -> CoreResult<ClaimOutcome> {
        let mut locks = guard(&self.locks);

        let conflicts: Vec<String> = seats
            .iter()
            .filter(|seat| match locks.get(&(trip_id, (*seat).clone())) {
                Some(lock) => lock.is_active(now) && !lock.is_held_by(session_id, now),
                None => false,
            })
            .cloned()
            .collect();

        if !conflicts.is_empty() {
            return Ok(ClaimOutcome::Conflict(conflicts));
        }

        for seat in seats {
            let key = (trip_id, seat.clone());
            if locks.get(&key).is_some_and(|lock| lock.is_held_by(session_id, now)) {
                continue;
            }
            locks.insert(
                key,
                SeatLock::Held(SeatHold {
                    trip_id,
                    seat_number: seat.clone(),
                    session_id: session_id.to_string(),
                    held_at: now,
                    expires_at,
                    extensions,
                }),
            );
        }

        Ok(ClaimOutcome::Claimed(Self::session_holds(&locks, trip_id, session_id, now)))
    }

    async fn extend(
        &self,
        trip_id: Uuid,
        session_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<SeatHold>> {
        let mut locks = guard(&self.locks);
        for ((trip, _), lock) in locks.iter_mut() {
            if *trip != trip_id {
                continue;
            }
            if let SeatLock::Held(hold) = lock {
                if hold.session_id == session_id && hold.is_live(now) {
                    hold.expires_at = expires_at;
                    hold.extensions += 1;
                }
            }
        }
        Ok(Self::session_holds(&locks, trip_id, session_id, now))
    }

    async fn release(
        &self,
        trip_id: Uuid,
        session_id: &str,
        seats: Option<&[String]>,
    ) -> CoreResult<Vec<String>> {
        let mut locks = guard(&self.locks);
        let targets: Vec<SeatKey> = locks
            .iter()
            .filter(|((trip, seat), lock)| {
                *trip == trip_id
                    && seats.map_or(true, |wanted| wanted.contains(seat))
                    && matches!(lock, SeatLock::Held(hold) if hold.session_id == session_id)
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut released: Vec<String> = targets
            .into_iter()
            .filter_map(|key| locks.remove(&key).map(|_| key.1))
            .collect();
        released.sort();
        Ok(released)
    }

    async fn commit(
        &self,
        trip_id: Uuid,
        session_id: &str,
        seats: &[String],
        booking_code: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<CommitOutcome> {
        let mut locks = guard(&self.locks);
        let lost: Vec<String> = seats
            .iter()
            .filter(|seat| match locks.get(&(trip_id, (*seat).clone())) {
                Some(SeatLock::Booked(booked)) => booked.booking_code != booking_code,
                Some(lock) => !lock.is_held_by(session_id, now),
                None => true,
            })
            .cloned()
            .collect();

        if !lost.is_empty() {
            return Ok(CommitOutcome::Lost(lost));
        }

        for seat in seats {
            let key = (trip_id, seat.clone());
            if matches!(locks.get(&key), Some(SeatLock::Booked(_))) {
                continue;
            }
            locks.insert(
                key,
                SeatLock::Booked(BookedSeat {
                    trip_id,
                    seat_number: seat.clone(),
                    booking_code: booking_code.to_string(),
                    booked_at: now,
                }),
            );
        }
        Ok(CommitOutcome::Committed)
    }

    async fn unbook(
        &self,
        trip_id: Uuid,
        seats: &[String],
        booking_code: &str,
    ) -> CoreResult<Vec<String>> {
        let mut locks = guard(&self.locks);
        let mut freed = Vec::new();
        for seat in seats {
            let key = (trip_id, seat.clone());
            let owned = matches!(
                locks.get(&key),
                Some(SeatLock::Booked(booked)) if booked.booking_code == booking_code
            );
            if owned {
                locks.remove(&key);
                freed.push(seat.clone());
            }
        }
        Ok(freed)
    }

    async fn locks_for_trip(&self, trip_id: Uuid, now: DateTime<Utc>) -> CoreResult<Vec<SeatLock>> {
        let locks = guard(&self.locks);
        let mut active: Vec<SeatLock> = locks
            .iter()
            .filter(|((trip, _), lock)| *trip == trip_id && lock.is_active(now))
            .map(|(_, lock)| lock.clone())
            .collect();
        active.sort_by(|a, b| a.seat_number().cmp(b.seat_number()));
        Ok(active)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<Vec<SeatHold>> {
        let mut locks = guard(&self.locks);
        let stale: Vec<SeatKey> = locks
            .iter()
            .filter(|(_, lock)| !lock.is_active(now))
            .map(|(key, _)| key.clone())
            .collect();

        Ok(stale
            .into_iter()
            .filter_map(|key| match locks.remove(&key) {
                Some(SeatLock::Held(hold)) => Some(hold),
                _ => None,
            })
            .collect())
    }
}

// ============================================================================
// Bookings
// ============================================================================

#[derive(Default)]
pub struct MemoryBookingRepository {
    bookings: Mutex<HashMap<String, Booking>>,
}

impl MemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for MemoryBookingRepository {
    async fn insert_booking(&self, booking: &Booking) -> CoreResult<()> {
        guard(&self.bookings).insert(booking.booking_code.clone(), booking.clone());
        Ok(())
    }

    async fn get_booking(&self, booking_code: &str) -> CoreResult<Option<Booking>> {
        Ok(guard(&self.bookings).get(booking_code).cloned())
    }

    async fn update_booking(&self, booking: &Booking, expected: BookingStatus) -> CoreResult<bool> {
        let mut bookings = guard(&self.bookings);
        match bookings.get_mut(&booking.booking_code) {
            Some(stored) if stored.status == expected => {
                *stored = booking.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expired_holds(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<Booking>> {
        let mut expired: Vec<Booking> = guard(&self.bookings)
            .values()
            .filter(|b| b.is_hold_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|b| b.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn list_held_for_session(&self, trip_id: Uuid, session_id: &str) -> CoreResult<Vec<Booking>> {
        Ok(guard(&self.bookings)
            .values()
            .filter(|b| {
                b.trip_id == trip_id && b.session_id == session_id && b.status == BookingStatus::Held
            })
            .cloned()
            .collect())
    }

    async fn list_for_trip(&self, trip_id: Uuid) -> CoreResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = guard(&self.bookings)
            .values()
            .filter(|b| b.trip_id == trip_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }
}

// ============================================================================
// Vouchers
// ============================================================================

#[derive(Default)]
pub struct MemoryVoucherRepository {
    vouchers: Mutex<HashMap<String, Voucher>>,
}

impl MemoryVoucherRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoucherRepository for MemoryVoucherRepository {
    async fn save_voucher(&self, voucher: &Voucher) -> CoreResult<()> {
        let mut stored = voucher.clone();
        stored.code = Voucher::normalize_code(&voucher.code);
        guard(&self.vouchers).insert(stored.code.clone(), stored);
        Ok(())
    }

    async fn get_voucher(&self, code: &str) -> CoreResult<Option<Voucher>> {
        Ok(guard(&self.vouchers).get(&Voucher::normalize_code(code)).cloned())
    }

    async fn reserve_use(&self, code: &str) -> CoreResult<bool> {
        let mut vouchers = guard(&self.vouchers);
        match vouchers.get_mut(&Voucher::normalize_code(code)) {
            Some(voucher) if voucher.has_uses_left() => {
                voucher.used_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_use(&self, code: &str) -> CoreResult<()> {
        if let Some(voucher) = guard(&self.vouchers).get_mut(&Voucher::normalize_code(code)) {
            voucher.used_count = voucher.used_count.saturating_sub(1);
        }
        Ok(())
    }
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Default)]
pub struct MemoryPaymentRepository {
    payments: Mutex<HashMap<String, Payment>>,
    callbacks: Mutex<HashSet<String>>,
}

impl MemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for MemoryPaymentRepository {
    async fn insert_payment(&self, payment: &Payment) -> CoreResult<()> {
        guard(&self.payments).insert(payment.payment_code.clone(), payment.clone());
        Ok(())
    }

    async fn get_payment(&self, payment_code: &str) -> CoreResult<Option<Payment>> {
        Ok(guard(&self.payments).get(payment_code).cloned())
    }

    async fn list_for_booking(&self, booking_code: &str) -> CoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = guard(&self.payments)
            .values()
            .filter(|p| p.booking_code == booking_code)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn update_payment(&self, payment: &Payment, expected: PaymentStatus) -> CoreResult<bool> {
        let mut payments = guard(&self.payments);
        match payments.get_mut(&payment.payment_code) {
            Some(stored) if stored.status == expected => {
                *stored = payment.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn callback_seen(&self, event_id: &str) -> CoreResult<bool> {
        Ok(guard(&self.callbacks).contains(event_id))
    }

    async fn record_callback(&self, event_id: &str, _received_at: DateTime<Utc>) -> CoreResult<bool> {
        Ok(guard(&self.callbacks).insert(event_id.to_string()))
    }
}

// ============================================================================
// Events
// ============================================================================

/// Publisher that keeps everything it is given, for assertions in tests.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        guard(&self.events).clone()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        guard(&self.events).iter().map(DomainEvent::topic).collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventLog {
    async fn publish(&self, event: &DomainEvent) -> CoreResult<()> {
        guard(&self.events).push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seats(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_claim_is_all_or_nothing() {
        let store = MemorySeatLockStore::new();
        let trip = Uuid::new_v4();
        let now = Utc::now();
        let until = now + Duration::minutes(10);

        let first = store.claim(trip, &seats(&["A1", "A2"]), "s1", until, 0, now).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(ref h) if h.len() == 2));

        let second = store.claim(trip, &seats(&["A2", "A3"]), "s2", until, 0, now).await.unwrap();
        assert_eq!(second, ClaimOutcome::Conflict(seats(&["A2"])));

        // A3 must not have been claimed by the failed request
        let locks = store.locks_for_trip(trip, now).await.unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_expired_hold_can_be_reclaimed() {
        let store = MemorySeatLockStore::new();
        let trip = Uuid::new_v4();
        let now = Utc::now();

        store.claim(trip, &seats(&["B1"]), "s1", now + Duration::minutes(1), 0, now).await.unwrap();
        let later = now + Duration::minutes(2);
        let outcome = store.claim(trip, &seats(&["B1"]), "s2", later + Duration::minutes(10), 0, later).await.unwrap();
        match outcome {
            ClaimOutcome::Claimed(holds) => assert_eq!(holds[0].session_id, "s2"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commit_and_unbook() {
        let store = MemorySeatLockStore::new();
        let trip = Uuid::new_v4();
        let now = Utc::now();
        let until = now + Duration::minutes(10);
        store.claim(trip, &seats(&["C1", "C2"]), "s1", until, 0, now).await.unwrap();

        let lost = store.commit(trip, "s2", &seats(&["C1"]), "BK1", now).await.unwrap();
        assert_eq!(lost, CommitOutcome::Lost(seats(&["C1"])));

        let ok = store.commit(trip, "s1", &seats(&["C1", "C2"]), "BK1", now).await.unwrap();
        assert_eq!(ok, CommitOutcome::Committed);

        // committing again under the same code is a no-op, under another it is lost
        let again = store.commit(trip, "s1", &seats(&["C1", "C2"]), "BK1", now).await.unwrap();
        assert_eq!(again, CommitOutcome::Committed);
        let other = store.commit(trip, "s1", &seats(&["C1"]), "BK2", now).await.unwrap();
        assert_eq!(other, CommitOutcome::Lost(seats(&["C1"])));

        // booked seats survive any purge
        assert!(store.purge_expired(now + Duration::days(1)).await.unwrap().is_empty());

        let freed = store.unbook(trip, &seats(&["C1", "C2"]), "BK-OTHER").await.unwrap();
        assert!(freed.is_empty());
        let freed = store.unbook(trip, &seats(&["C1", "C2"]), "BK1").await.unwrap();
        assert_eq!(freed, seats(&["C1", "C2"]));
    }

    #[tokio::test]
    async fn test_purge_returns_lapsed_holds_only() {
        let store = MemorySeatLockStore::new();
        let trip = Uuid::new_v4();
        let now = Utc::now();
        store.claim(trip, &seats(&["A1"]), "s1", now + Duration::minutes(1), 0, now).await.unwrap();
        store.claim(trip, &seats(&["A2"]), "s2", now + Duration::minutes(20), 0, now).await.unwrap();

        let purged = store.purge_expired(now + Duration::minutes(5)).await.unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].seat_number, "A1");
    }

    #[tokio::test]
    async fn test_booking_update_is_compare_and_set() {
        let repo = MemoryBookingRepository::new();
        let now = Utc::now();
        let mut booking = Booking {
            booking_code: "BK22222222".to_string(),
            trip_id: Uuid::new_v4(),
            session_id: "s1".to_string(),
            status: BookingStatus::Held,
            seats: seats(&["A1"]),
            contact_info: roadly_core::ContactInfo {
                full_name: "Nguyen Van A".to_string(),
                phone: "0901234567".to_string().into(),
                email: None,
            },
            base_price: 100,
            discount: 0,
            final_price: 100,
            currency: "VND".to_string(),
            voucher_code: None,
            expires_at: now,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        };
        repo.insert_booking(&booking).await.unwrap();

        booking.status = BookingStatus::Expired;
        assert!(repo.update_booking(&booking, BookingStatus::Held).await.unwrap());
        booking.status = BookingStatus::Confirmed;
        assert!(!repo.update_booking(&booking, BookingStatus::Held).await.unwrap());
        assert_eq!(
            repo.get_booking("BK22222222").await.unwrap().unwrap().status,
            BookingStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_voucher_uses_are_bounded() {
        let repo = MemoryVoucherRepository::new();
        let now = Utc::now();
        repo.save_voucher(&Voucher {
            code: "once".to_string(),
            description: "single use".to_string(),
            discount: roadly_core::DiscountRule::Fixed { amount: 10 },
            valid_from: now,
            valid_until: now + Duration::days(1),
            max_uses: Some(1),
            used_count: 0,
            min_order_amount: 0,
            route_codes: vec![],
            is_active: true,
        })
        .await
        .unwrap();

        assert!(repo.reserve_use("ONCE").await.unwrap());
        assert!(!repo.reserve_use("once").await.unwrap());
        repo.release_use("Once").await.unwrap();
        assert!(repo.reserve_use("ONCE").await.unwrap());
    }

    #[tokio::test]
    async fn test_callbacks_recorded_once() {
        let repo = MemoryPaymentRepository::new();
        assert!(!repo.callback_seen("evt_1").await.unwrap());
        assert!(repo.record_callback("evt_1", Utc::now()).await.unwrap());
        assert!(!repo.record_callback("evt_1", Utc::now()).await.unwrap());
        assert!(repo.callback_seen("evt_1").await.unwrap());
    }
}
