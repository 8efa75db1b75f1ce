use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, RedisResult, Script};
use roadly_core::repository::SeatLockStore;
use roadly_core::{
    BookedSeat, ClaimOutcome, CommitOutcome, CoreError, CoreResult, SeatHold, SeatLock,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

const EXPIRY_INDEX: &str = "holds:expiry";
const SEAT_KEY_PREFIX: &str = "seat:";
const TRIP_KEY_PREFIX: &str = "trip:";
const TRIP_KEY_SUFFIX: &str = ":seats";
// Hold keys outlive their expiry a little so the reaper can still read and
// announce them before Redis drops them on its own.
const HOLD_GRACE_MS: i64 = 120_000;

/// Seat value as stored in Redis. Timestamps are epoch millis so the Lua
/// scripts can compare them.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum SeatRecord {
    Held {
        session_id: String,
        held_at_ms: i64,
        expires_at_ms: i64,
        extensions: u32,
    },
    Booked {
        booking_code: String,
        booked_at_ms: i64,
    },
}

fn storage(err: impl std::fmt::Display) -> CoreError {
    CoreError::StorageError(err.to_string())
}

fn from_millis(ms: i64) -> CoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CoreError::StorageError(format!("timestamp out of range: {}", ms)))
}

impl SeatRecord {
    fn into_lock(self, trip_id: Uuid, seat_number: String) -> CoreResult<SeatLock> {
        Ok(match self {
            SeatRecord::Held { session_id, held_at_ms, expires_at_ms, extensions } => {
                SeatLock::Held(SeatHold {
                    trip_id,
                    seat_number,
                    session_id,
                    held_at: from_millis(held_at_ms)?,
                    expires_at: from_millis(expires_at_ms)?,
                    extensions,
                })
            }
            SeatRecord::Booked { booking_code, booked_at_ms } => SeatLock::Booked(BookedSeat {
                trip_id,
                seat_number,
                booking_code,
                booked_at: from_millis(booked_at_ms)?,
            }),
        })
    }
}

const CLAIM_LUA: &str = r#"
local prefix, trip, session = ARGV[1], ARGV[2], ARGV[3]
local now = tonumber(ARGV[4])
local conflicts = {}
for i = 8, #ARGV do
  local raw = redis.call('GET', prefix .. ARGV[i])
  if raw then
    local lock = cjson.decode(raw)
    if lock.state == 'booked' then
      table.insert(conflicts, ARGV[i])
    elseif tonumber(lock.expires_at_ms) > now and lock.session_id ~= session then
      table.insert(conflicts, ARGV[i])
    end
  end
end
if #conflicts > 0 then
  return {0, conflicts}
end
for i = 8, #ARGV do
  local key = prefix .. ARGV[i]
  local raw = redis.call('GET', key)
  local mine = false
  if raw then
    local lock = cjson.decode(raw)
    mine = lock.state == 'held' and lock.session_id == session and tonumber(lock.expires_at_ms) > now
  end
  if not mine then
    redis.call('SET', key, ARGV[5], 'PX', ARGV[7])
    redis.call('SADD', KEYS[1], ARGV[i])
    redis.call('ZADD', KEYS[2], ARGV[6], trip .. '|' .. ARGV[i])
  end
end
return {1, {}}
"#;

const EXTEND_LUA: &str = r#"
local prefix, trip, session = ARGV[1], ARGV[2], ARGV[3]
local now = tonumber(ARGV[4])
local updated = {}
for i = 7, #ARGV do
  local key = prefix .. ARGV[i]
  local raw = redis.call('GET', key)
  if raw then
    local lock = cjson.decode(raw)
    if lock.state == 'held' and lock.session_id == session and tonumber(lock.expires_at_ms) > now then
      lock.expires_at_ms = tonumber(ARGV[5])
      lock.extensions = (tonumber(lock.extensions) or 0) + 1
      redis.call('SET', key, cjson.encode(lock), 'PX', ARGV[6])
      redis.call('ZADD', KEYS[1], ARGV[5], trip .. '|' .. ARGV[i])
      table.insert(updated, ARGV[i])
    end
  end
end
return updated
"#;

const RELEASE_LUA: &str = r#"
local prefix, trip, session = ARGV[1], ARGV[2], ARGV[3]
local released = {}
for i = 4, #ARGV do
  local key = prefix .. ARGV[i]
  local raw = redis.call('GET', key)
  if raw then
    local lock = cjson.decode(raw)
    if lock.state == 'held' and lock.session_id == session then
      redis.call('DEL', key)
      redis.call('SREM', KEYS[1], ARGV[i])
      redis.call('ZREM', KEYS[2], trip .. '|' .. ARGV[i])
      table.insert(released, ARGV[i])
    end
  end
end
return released
"#;

const COMMIT_LUA: &str = r#"
local prefix, trip, session, code = ARGV[1], ARGV[2], ARGV[3], ARGV[6]
local now = tonumber(ARGV[4])
local lost = {}
local fresh = {}
for i = 7, #ARGV do
  local raw = redis.call('GET', prefix .. ARGV[i])
  local mine, done = false, false
  if raw then
    local lock = cjson.decode(raw)
    done = lock.state == 'booked' and lock.booking_code == code
    mine = lock.state == 'held' and lock.session_id == session and tonumber(lock.expires_at_ms) > now
  end
  if mine then
    table.insert(fresh, ARGV[i])
  elseif not done then
    table.insert(lost, ARGV[i])
  end
end
if #lost > 0 then
  return {0, lost}
end
for _, seat in ipairs(fresh) do
  redis.call('SET', prefix .. seat, ARGV[5])
  redis.call('ZREM', KEYS[1], trip .. '|' .. seat)
end
return {1, {}}
"#;

const UNBOOK_LUA: &str = r#"
local prefix, code = ARGV[1], ARGV[2]
local freed = {}
for i = 3, #ARGV do
  local key = prefix .. ARGV[i]
  local raw = redis.call('GET', key)
  if raw then
    local lock = cjson.decode(raw)
    if lock.state == 'booked' and lock.booking_code == code then
      redis.call('DEL', key)
      redis.call('SREM', KEYS[1], ARGV[i])
      table.insert(freed, ARGV[i])
    end
  end
end
return freed
"#;

const PURGE_LUA: &str = r#"
local now = tonumber(ARGV[1])
local seat_prefix, trip_prefix, trip_suffix = ARGV[3], ARGV[4], ARGV[5]
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now, 'LIMIT', 0, tonumber(ARGV[2]))
local out = {}
for _, member in ipairs(due) do
  redis.call('ZREM', KEYS[1], member)
  local sep = string.find(member, '|', 1, true)
  local trip = string.sub(member, 1, sep - 1)
  local seat = string.sub(member, sep + 1)
  local key = seat_prefix .. trip .. ':' .. seat
  local index = trip_prefix .. trip .. trip_suffix
  local raw = redis.call('GET', key)
  if raw then
    local lock = cjson.decode(raw)
    if lock.state == 'held' and tonumber(lock.expires_at_ms) <= now then
      redis.call('DEL', key)
      redis.call('SREM', index, seat)
      table.insert(out, member .. '|' .. raw)
    end
  else
    redis.call('SREM', index, seat)
  end
end
return out
"#;

const PURGE_BATCH: usize = 500;

/// Seat locks in Redis. One string key per seat (`seat:{trip}:{seat}`), a set
/// per trip listing locked seats, and a sorted set of hold expiries. Every
/// mutation is a Lua script so check-and-set happens in one step.
#[derive(Clone)]
pub struct RedisSeatLockStore {
    client: redis::Client,
    claim: Script,
    extend: Script,
    release: Script,
    commit: Script,
    unbook: Script,
    purge: Script,
}

impl RedisSeatLockStore {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            claim: Script::new(CLAIM_LUA),
            extend: Script::new(EXTEND_LUA),
            release: Script::new(RELEASE_LUA),
            commit: Script::new(COMMIT_LUA),
            unbook: Script::new(UNBOOK_LUA),
            purge: Script::new(PURGE_LUA),
        })
    }

    fn seat_prefix(trip_id: Uuid) -> String {
        format!("{}{}:", SEAT_KEY_PREFIX, trip_id)
    }

    fn trip_index(trip_id: Uuid) -> String {
        format!("{}{}{}", TRIP_KEY_PREFIX, trip_id, TRIP_KEY_SUFFIX)
    }

    async fn connection(&self) -> CoreResult<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await.map_err(storage)
    }

    async fn indexed_seats(&self, trip_id: Uuid) -> CoreResult<Vec<String>> {
        let mut conn = self.connection().await?;
        let seats: Vec<String> = conn.smembers(Self::trip_index(trip_id)).await.map_err(storage)?;
        Ok(seats)
    }

    async fn session_holds(&self, trip_id: Uuid, session_id: &str, now: DateTime<Utc>) -> CoreResult<Vec<SeatHold>> {
        Ok(self
            .locks_for_trip(trip_id, now)
            .await?
            .into_iter()
            .filter_map(|lock| match lock {
                SeatLock::Held(hold) if hold.session_id == session_id => Some(hold),
                _ => None,
            })
            .collect())
    }

    fn ttl_ms(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        (expires_at - now).num_milliseconds().max(1) + HOLD_GRACE_MS
    }
}

#[async_trait]
impl SeatLockStore for RedisSeatLockStore {
    async fn claim(
        &self,
        trip_id: Uuid,
        seats: &[String],
        session_id: &str,
        expires_at: DateTime<Utc>,
        extensions: u32,
        now: DateTime<Utc>,
    ) -> CoreResult<ClaimOutcome> {
        let record = serde_json::to_string(&SeatRecord::Held {
            session_id: session_id.to_string(),
            held_at_ms: now.timestamp_millis(),
            expires_at_ms: expires_at.timestamp_millis(),
            extensions,
        })?;

        let mut invocation = self.claim.prepare_invoke();
        invocation
            .key(Self::trip_index(trip_id))
            .key(EXPIRY_INDEX)
            .arg(Self::seat_prefix(trip_id))
            .arg(trip_id.to_string())
            .arg(session_id)
            .arg(now.timestamp_millis())
            .arg(record)
            .arg(expires_at.timestamp_millis())
            .arg(Self::ttl_ms(expires_at, now));
        for seat in seats {
            invocation.arg(seat);
        }

        let mut conn = self.connection().await?;
        let (claimed, conflicts): (i64, Vec<String>) =
            invocation.invoke_async(&mut conn).await.map_err(storage)?;

        if claimed == 0 {
            debug!("Seat claim on trip {} rejected: {:?}", trip_id, conflicts);
            return Ok(ClaimOutcome::Conflict(conflicts));
        }
        Ok(ClaimOutcome::Claimed(self.session_holds(trip_id, session_id, now).await?))
    }

    async fn extend(
        &self,
        trip_id: Uuid,
        session_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<SeatHold>> {
        let seats = self.indexed_seats(trip_id).await?;
        if seats.is_empty() {
            return Ok(Vec::new());
        }

        let mut invocation = self.extend.prepare_invoke();
        invocation
            .key(EXPIRY_INDEX)
            .arg(Self::seat_prefix(trip_id))
            .arg(trip_id.to_string())
            .arg(session_id)
            .arg(now.timestamp_millis())
            .arg(expires_at.timestamp_millis())
            .arg(Self::ttl_ms(expires_at, now));
        for seat in &seats {
            invocation.arg(seat);
        }

        let mut conn = self.connection().await?;
        let updated: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(storage)?;
        debug!("Extended {} holds on trip {}", updated.len(), trip_id);
        self.session_holds(trip_id, session_id, now).await
    }

    async fn release(
        &self,
        trip_id: Uuid,
        session_id: &str,
        seats: Option<&[String]>,
    ) -> CoreResult<Vec<String>> {
        let targets = match seats {
            Some(seats) => seats.to_vec(),
            None => self.indexed_seats(trip_id).await?,
        };
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut invocation = self.release.prepare_invoke();
        invocation
            .key(Self::trip_index(trip_id))
            .key(EXPIRY_INDEX)
            .arg(Self::seat_prefix(trip_id))
            .arg(trip_id.to_string())
            .arg(session_id);
        for seat in &targets {
            invocation.arg(seat);
        }

        let mut conn = self.connection().await?;
        let mut released: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(storage)?;
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
        let record = serde_json::to_string(&SeatRecord::Booked {
            booking_code: booking_code.to_string(),
            booked_at_ms: now.timestamp_millis(),
        })?;

        let mut invocation = self.commit.prepare_invoke();
        invocation
            .key(EXPIRY_INDEX)
            .arg(Self::seat_prefix(trip_id))
            .arg(trip_id.to_string())
            .arg(session_id)
            .arg(now.timestamp_millis())
            .arg(record)
            .arg(booking_code);
        for seat in seats {
            invocation.arg(seat);
        }

        let mut conn = self.connection().await?;
        let (committed, lost): (i64, Vec<String>) =
            invocation.invoke_async(&mut conn).await.map_err(storage)?;

        if committed == 0 {
            return Ok(CommitOutcome::Lost(lost));
        }
        info!("Seats {:?} on trip {} booked under {}", seats, trip_id, booking_code);
        Ok(CommitOutcome::Committed)
    }

    async fn unbook(
        &self,
        trip_id: Uuid,
        seats: &[String],
        booking_code: &str,
    ) -> CoreResult<Vec<String>> {
        let mut invocation = self.unbook.prepare_invoke();
        invocation
            .key(Self::trip_index(trip_id))
            .arg(Self::seat_prefix(trip_id))
            .arg(booking_code);
        for seat in seats {
            invocation.arg(seat);
        }

        let mut conn = self.connection().await?;
        invocation.invoke_async(&mut conn).await.map_err(storage)
    }

    async fn locks_for_trip(&self, trip_id: Uuid, now: DateTime<Utc>) -> CoreResult<Vec<SeatLock>> {
        let seats = self.indexed_seats(trip_id).await?;
        if seats.is_empty() {
            return Ok(Vec::new());
        }

        let prefix = Self::seat_prefix(trip_id);
        let keys: Vec<String> = seats.iter().map(|seat| format!("{}{}", prefix, seat)).collect();
        let mut conn = self.connection().await?;
        let values: RedisResult<Vec<Option<String>>> =
            redis::cmd("MGET").arg(&keys).query_async(&mut conn).await;

        let mut locks = Vec::new();
        for (seat, raw) in seats.into_iter().zip(values.map_err(storage)?) {
            let Some(raw) = raw else { continue };
            let record: SeatRecord = serde_json::from_str(&raw)?;
            let lock = record.into_lock(trip_id, seat)?;
            if lock.is_active(now) {
                locks.push(lock);
            }
        }
        locks.sort_by(|a, b| a.seat_number().cmp(b.seat_number()));
        Ok(locks)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<Vec<SeatHold>> {
        let mut conn = self.connection().await?;
        let entries: Vec<String> = self
            .purge
            .key(EXPIRY_INDEX)
            .arg(now.timestamp_millis())
            .arg(PURGE_BATCH)
            .arg(SEAT_KEY_PREFIX)
            .arg(TRIP_KEY_PREFIX)
            .arg(TRIP_KEY_SUFFIX)
            .invoke_async(&mut conn)
            .await
            .map_err(storage)?;

        let mut purged = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut parts = entry.splitn(3, '|');
            let (Some(trip), Some(seat), Some(raw)) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            let trip_id = Uuid::parse_str(trip).map_err(storage)?;
            let record: SeatRecord = serde_json::from_str(raw)?;
            if let SeatLock::Held(hold) = record.into_lock(trip_id, seat.to_string())? {
                purged.push(hold);
            }
        }
        Ok(purged)
    }
}
