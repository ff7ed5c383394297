//! SQLite-backed storage for chairs, rides and their logs.
//!
//! The store owns a single in-memory connection. Every unit of work runs as
//! one closure inside [`Store::transaction`]: it commits when the closure
//! returns `Ok` and rolls back otherwise, so a failed unit of work leaves no
//! trace.

pub mod fixture;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::geo::{manhattan_distance, Coordinate};
use crate::models::chair::Chair;
use crate::models::location::ChairLocation;
use crate::models::ride::{Ride, RideStatus, RideStatusKind};
use crate::models::user::User;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable")]
    Unavailable,

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("ride {0} is already assigned")]
    AlreadyAssigned(Uuid),

    #[error("invalid fixture: {0}")]
    Fixture(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

const SCHEMA: &str = "
CREATE TABLE chair_models (
    name  TEXT PRIMARY KEY,
    speed INTEGER NOT NULL
);
CREATE TABLE users (
    id         BLOB PRIMARY KEY,
    firstname  TEXT NOT NULL,
    lastname   TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE chairs (
    id                        BLOB PRIMARY KEY,
    owner_id                  BLOB NOT NULL,
    name                      TEXT NOT NULL,
    model                     TEXT NOT NULL,
    is_active                 INTEGER NOT NULL,
    access_token              TEXT NOT NULL,
    latitude                  INTEGER,
    longitude                 INTEGER,
    total_distance            INTEGER NOT NULL DEFAULT 0,
    total_distance_updated_at INTEGER,
    created_at                INTEGER NOT NULL,
    updated_at                INTEGER NOT NULL
);
CREATE UNIQUE INDEX idx_chairs_access_token ON chairs(access_token);
CREATE TABLE chair_locations (
    seq        INTEGER PRIMARY KEY,
    id         BLOB NOT NULL UNIQUE,
    chair_id   BLOB NOT NULL,
    latitude   INTEGER NOT NULL,
    longitude  INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX idx_chair_locations_chair ON chair_locations(chair_id, seq);
CREATE TABLE rides (
    id                    BLOB PRIMARY KEY,
    user_id               BLOB NOT NULL,
    chair_id              BLOB,
    pickup_latitude       INTEGER NOT NULL,
    pickup_longitude      INTEGER NOT NULL,
    destination_latitude  INTEGER NOT NULL,
    destination_longitude INTEGER NOT NULL,
    evaluation            INTEGER,
    created_at            INTEGER NOT NULL,
    updated_at            INTEGER NOT NULL
);
CREATE INDEX idx_rides_chair ON rides(chair_id, updated_at);
CREATE TABLE ride_statuses (
    seq           INTEGER PRIMARY KEY,
    id            BLOB NOT NULL UNIQUE,
    ride_id       BLOB NOT NULL,
    status        TEXT NOT NULL,
    created_at    INTEGER NOT NULL,
    chair_sent_at INTEGER
);
CREATE INDEX idx_ride_statuses_ride ON ride_statuses(ride_id, seq);
";

const CHAIR_COLUMNS: &str = "id, owner_id, name, model, is_active, access_token, latitude, \
     longitude, total_distance, total_distance_updated_at, created_at, updated_at";
const RIDE_COLUMNS: &str = "id, user_id, chair_id, pickup_latitude, pickup_longitude, \
     destination_latitude, destination_longitude, evaluation, created_at, updated_at";
const STATUS_COLUMNS: &str = "id, ride_id, status, created_at, chair_sent_at";
const LOCATION_COLUMNS: &str = "id, chair_id, latitude, longitude, created_at";

struct Database {
    conn: Connection,
    last_timestamp: Option<DateTime<Utc>>,
}

pub struct Store {
    db: Mutex<Database>,
    suspended: AtomicBool,
}

impl Store {
    pub fn new() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Mutex::new(Database {
                conn,
                last_timestamp: None,
            }),
            suspended: AtomicBool::new(false),
        })
    }

    /// Puts the store into maintenance: new transactions and pending commits
    /// fail with [`StoreError::Unavailable`] until [`Store::resume`].
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
        warn!("storage suspended");
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        debug!("storage resumed");
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Runs `work` in one SQLite transaction while holding the connection.
    /// Concurrent callers are serialised.
    pub async fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        if self.is_suspended() {
            return Err(StoreError::Unavailable.into());
        }

        let mut db = self.db.lock().await;
        let Database {
            conn,
            last_timestamp,
        } = &mut *db;
        let sql = conn.transaction().map_err(StoreError::from)?;
        let mut tx = Transaction {
            sql,
            last_timestamp,
        };

        let output = match work(&mut tx) {
            Ok(output) => output,
            Err(err) => {
                debug!("rolling back transaction");
                return Err(err);
            }
        };

        if self.is_suspended() {
            debug!("storage suspended before commit; rolling back");
            return Err(StoreError::Unavailable.into());
        }
        tx.sql.commit().map_err(StoreError::from)?;
        Ok(output)
    }
}

pub struct Transaction<'c> {
    sql: rusqlite::Transaction<'c>,
    last_timestamp: &'c mut Option<DateTime<Utc>>,
}

fn not_found(entity: &'static str, id: &Uuid) -> StoreError {
    StoreError::NotFound { entity, id: *id }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(micros) => DateTime::from_timestamp_micros(micros)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros)),
        None => Ok(None),
    }
}

fn chair_from_row(row: &Row<'_>) -> rusqlite::Result<Chair> {
    let latitude: Option<i32> = row.get(6)?;
    let longitude: Option<i32> = row.get(7)?;
    Ok(Chair {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        model: row.get(3)?,
        is_active: row.get(4)?,
        access_token: row.get(5)?,
        location: latitude.zip(longitude).map(|(lat, lon)| Coordinate::new(lat, lon)),
        total_distance: row.get(8)?,
        total_distance_updated_at: optional_timestamp(row, 9)?,
        created_at: timestamp(row, 10)?,
        updated_at: timestamp(row, 11)?,
    })
}

fn ride_from_row(row: &Row<'_>) -> rusqlite::Result<Ride> {
    Ok(Ride {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chair_id: row.get(2)?,
        pickup: Coordinate::new(row.get(3)?, row.get(4)?),
        destination: Coordinate::new(row.get(5)?, row.get(6)?),
        evaluation: row.get(7)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
    })
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<RideStatus> {
    let raw: String = row.get(2)?;
    let status = raw.parse::<RideStatusKind>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, err.into())
    })?;
    Ok(RideStatus {
        id: row.get(0)?,
        ride_id: row.get(1)?,
        status,
        created_at: timestamp(row, 3)?,
        chair_sent_at: optional_timestamp(row, 4)?,
    })
}

fn location_from_row(row: &Row<'_>) -> rusqlite::Result<ChairLocation> {
    Ok(ChairLocation {
        id: row.get(0)?,
        chair_id: row.get(1)?,
        coordinate: Coordinate::new(row.get(2)?, row.get(3)?),
        created_at: timestamp(row, 4)?,
    })
}

impl Transaction<'_> {
    /// Strictly increasing clock so log entries never share a creation time.
    fn now(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let next = match *self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        *self.last_timestamp = Some(next);
        next
    }

    // ---- reads ----

    pub fn chair(&self, id: &Uuid) -> Result<Option<Chair>, StoreError> {
        let chair = self
            .sql
            .query_row(
                &format!("SELECT {CHAIR_COLUMNS} FROM chairs WHERE id = ?1"),
                params![id],
                chair_from_row,
            )
            .optional()?;
        Ok(chair)
    }

    pub fn chair_by_access_token(&self, token: &str) -> Result<Option<Chair>, StoreError> {
        let chair = self
            .sql
            .query_row(
                &format!("SELECT {CHAIR_COLUMNS} FROM chairs WHERE access_token = ?1"),
                params![token],
                chair_from_row,
            )
            .optional()?;
        Ok(chair)
    }

    /// All chairs in identity order.
    pub fn chairs(&self) -> Result<Vec<Chair>, StoreError> {
        let mut stmt = self
            .sql
            .prepare(&format!("SELECT {CHAIR_COLUMNS} FROM chairs ORDER BY id"))?;
        let chairs = stmt
            .query_map([], chair_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chairs)
    }

    pub fn chair_speeds(&self) -> Result<HashMap<String, i32>, StoreError> {
        let mut stmt = self.sql.prepare("SELECT name, speed FROM chair_models")?;
        let speeds = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(speeds)
    }

    pub fn user(&self, id: &Uuid) -> Result<Option<User>, StoreError> {
        let user = self
            .sql
            .query_row(
                "SELECT id, firstname, lastname, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        firstname: row.get(1)?,
                        lastname: row.get(2)?,
                        created_at: timestamp(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn ride(&self, id: &Uuid) -> Result<Option<Ride>, StoreError> {
        let ride = self
            .sql
            .query_row(
                &format!("SELECT {RIDE_COLUMNS} FROM rides WHERE id = ?1"),
                params![id],
                ride_from_row,
            )
            .optional()?;
        Ok(ride)
    }

    pub fn rides(&self) -> Result<Vec<Ride>, StoreError> {
        let mut stmt = self.sql.prepare(&format!(
            "SELECT {RIDE_COLUMNS} FROM rides ORDER BY created_at, id"
        ))?;
        let rides = stmt
            .query_map([], ride_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rides)
    }

    /// Rides without a chair, oldest request first.
    pub fn unassigned_rides(&self) -> Result<Vec<Ride>, StoreError> {
        let mut stmt = self.sql.prepare(&format!(
            "SELECT {RIDE_COLUMNS} FROM rides WHERE chair_id IS NULL ORDER BY created_at, id"
        ))?;
        let rides = stmt
            .query_map([], ride_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rides)
    }

    /// The ride most recently assigned to or updated for this chair.
    pub fn latest_ride_for_chair(&self, chair_id: &Uuid) -> Result<Option<Ride>, StoreError> {
        let ride = self
            .sql
            .query_row(
                &format!(
                    "SELECT {RIDE_COLUMNS} FROM rides WHERE chair_id = ?1 \
                     ORDER BY updated_at DESC, id DESC LIMIT 1"
                ),
                params![chair_id],
                ride_from_row,
            )
            .optional()?;
        Ok(ride)
    }

    pub fn ride_statuses(&self, ride_id: &Uuid) -> Result<Vec<RideStatus>, StoreError> {
        let mut stmt = self.sql.prepare(&format!(
            "SELECT {STATUS_COLUMNS} FROM ride_statuses WHERE ride_id = ?1 ORDER BY seq"
        ))?;
        let log = stmt
            .query_map(params![ride_id], status_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(log)
    }

    pub fn latest_status(&self, ride_id: &Uuid) -> Result<Option<RideStatus>, StoreError> {
        let status = self
            .sql
            .query_row(
                &format!(
                    "SELECT {STATUS_COLUMNS} FROM ride_statuses WHERE ride_id = ?1 \
                     ORDER BY seq DESC LIMIT 1"
                ),
                params![ride_id],
                status_from_row,
            )
            .optional()?;
        Ok(status)
    }

    pub fn oldest_unsent_status(&self, ride_id: &Uuid) -> Result<Option<RideStatus>, StoreError> {
        let status = self
            .sql
            .query_row(
                &format!(
                    "SELECT {STATUS_COLUMNS} FROM ride_statuses \
                     WHERE ride_id = ?1 AND chair_sent_at IS NULL ORDER BY seq LIMIT 1"
                ),
                params![ride_id],
                status_from_row,
            )
            .optional()?;
        Ok(status)
    }

    /// A ride stops holding its chair once it reached a terminal status and
    /// the chair acknowledged every entry of its log.
    pub fn is_ride_settled(&self, ride_id: &Uuid) -> Result<bool, StoreError> {
        let terminal = self
            .latest_status(ride_id)?
            .is_some_and(|latest| latest.status.is_terminal());
        Ok(terminal && self.oldest_unsent_status(ride_id)?.is_none())
    }

    pub fn is_chair_idle(&self, chair_id: &Uuid) -> Result<bool, StoreError> {
        let mut stmt = self.sql.prepare("SELECT id FROM rides WHERE chair_id = ?1")?;
        let ride_ids = stmt
            .query_map(params![chair_id], |row| row.get::<_, Uuid>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for ride_id in &ride_ids {
            if !self.is_ride_settled(ride_id)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Position history of one chair in ingestion order.
    pub fn locations_for_chair(&self, chair_id: &Uuid) -> Result<Vec<ChairLocation>, StoreError> {
        let mut stmt = self.sql.prepare(&format!(
            "SELECT {LOCATION_COLUMNS} FROM chair_locations WHERE chair_id = ?1 ORDER BY seq"
        ))?;
        let locations = stmt
            .query_map(params![chair_id], location_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locations)
    }

    pub fn location_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .sql
            .query_row("SELECT COUNT(*) FROM chair_locations", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ---- writes ----

    pub fn upsert_chair_model(&mut self, name: &str, speed: i32) -> Result<(), StoreError> {
        self.sql.execute(
            "INSERT OR REPLACE INTO chair_models (name, speed) VALUES (?1, ?2)",
            params![name, speed],
        )?;
        Ok(())
    }

    pub fn upsert_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.sql.execute(
            "INSERT OR REPLACE INTO users (id, firstname, lastname, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id,
                user.firstname,
                user.lastname,
                user.created_at.timestamp_micros()
            ],
        )?;
        Ok(())
    }

    pub fn upsert_chair(&mut self, chair: &Chair) -> Result<(), StoreError> {
        self.sql.execute(
            &format!(
                "INSERT OR REPLACE INTO chairs ({CHAIR_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                chair.id,
                chair.owner_id,
                chair.name,
                chair.model,
                chair.is_active,
                chair.access_token,
                chair.location.map(|c| c.latitude),
                chair.location.map(|c| c.longitude),
                chair.total_distance,
                chair.total_distance_updated_at.map(|at| at.timestamp_micros()),
                chair.created_at.timestamp_micros(),
                chair.updated_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    pub fn set_chair_active(&mut self, chair_id: &Uuid, is_active: bool) -> Result<(), StoreError> {
        let now = self.now();
        let changed = self.sql.execute(
            "UPDATE chairs SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![chair_id, is_active, now.timestamp_micros()],
        )?;
        if changed == 0 {
            return Err(not_found("chair", chair_id));
        }
        Ok(())
    }

    /// Persists one position report and moves the chair there, extending its
    /// cumulative travel distance by the hop from its previous position.
    pub fn record_location(
        &mut self,
        chair_id: &Uuid,
        coordinate: Coordinate,
    ) -> Result<ChairLocation, StoreError> {
        let chair = self
            .chair(chair_id)?
            .ok_or_else(|| not_found("chair", chair_id))?;
        let now = self.now();
        let total_distance = chair.total_distance
            + chair
                .location
                .map_or(0, |previous| manhattan_distance(&previous, &coordinate));

        self.sql.execute(
            "UPDATE chairs SET latitude = ?2, longitude = ?3, total_distance = ?4, \
             total_distance_updated_at = ?5, updated_at = ?5 WHERE id = ?1",
            params![
                chair_id,
                coordinate.latitude,
                coordinate.longitude,
                total_distance,
                now.timestamp_micros()
            ],
        )?;

        let location = ChairLocation {
            id: Uuid::new_v4(),
            chair_id: *chair_id,
            coordinate,
            created_at: now,
        };
        self.sql.execute(
            &format!("INSERT INTO chair_locations ({LOCATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                location.id,
                location.chair_id,
                coordinate.latitude,
                coordinate.longitude,
                now.timestamp_micros()
            ],
        )?;
        Ok(location)
    }

    /// Recomputes every chair's last-known position and travel distance from
    /// its persisted history. Returns the number of chairs with history.
    pub fn replay_chair_locations(&mut self) -> Result<usize, StoreError> {
        let mut replayed: HashMap<Uuid, (Coordinate, i64, DateTime<Utc>)> = HashMap::new();
        {
            let mut stmt = self.sql.prepare(&format!(
                "SELECT {LOCATION_COLUMNS} FROM chair_locations ORDER BY seq"
            ))?;
            let history = stmt.query_map([], location_from_row)?;
            for location in history {
                let location = location?;
                replayed
                    .entry(location.chair_id)
                    .and_modify(|(last, total, at)| {
                        *total += manhattan_distance(last, &location.coordinate);
                        *last = location.coordinate;
                        *at = location.created_at;
                    })
                    .or_insert((location.coordinate, 0, location.created_at));
            }
        }

        for (chair_id, (last, total, at)) in &replayed {
            self.sql.execute(
                "UPDATE chairs SET latitude = ?2, longitude = ?3, total_distance = ?4, \
                 total_distance_updated_at = ?5 WHERE id = ?1",
                params![
                    chair_id,
                    last.latitude,
                    last.longitude,
                    total,
                    at.timestamp_micros()
                ],
            )?;
        }
        Ok(replayed.len())
    }

    /// Creates a ride request with its initial `MATCHING` log entry.
    pub fn insert_ride(
        &mut self,
        user_id: &Uuid,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<Ride, StoreError> {
        if self.user(user_id)?.is_none() {
            return Err(not_found("user", user_id));
        }

        let now = self.now();
        let ride = Ride {
            id: Uuid::new_v4(),
            user_id: *user_id,
            chair_id: None,
            pickup,
            destination,
            evaluation: None,
            created_at: now,
            updated_at: now,
        };
        self.sql.execute(
            &format!(
                "INSERT INTO rides ({RIDE_COLUMNS}) \
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, NULL, ?7, ?7)"
            ),
            params![
                ride.id,
                ride.user_id,
                pickup.latitude,
                pickup.longitude,
                destination.latitude,
                destination.longitude,
                now.timestamp_micros()
            ],
        )?;
        self.append_ride_status(&ride.id, RideStatusKind::Matching)?;
        Ok(ride)
    }

    pub fn assign_ride(&mut self, ride_id: &Uuid, chair_id: &Uuid) -> Result<Ride, StoreError> {
        if self.chair(chair_id)?.is_none() {
            return Err(not_found("chair", chair_id));
        }
        let mut ride = self.ride(ride_id)?.ok_or_else(|| not_found("ride", ride_id))?;
        if ride.chair_id.is_some() {
            return Err(StoreError::AlreadyAssigned(*ride_id));
        }

        let now = self.now();
        self.sql.execute(
            "UPDATE rides SET chair_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![ride_id, chair_id, now.timestamp_micros()],
        )?;
        ride.chair_id = Some(*chair_id);
        ride.updated_at = now;
        Ok(ride)
    }

    pub fn append_ride_status(
        &mut self,
        ride_id: &Uuid,
        status: RideStatusKind,
    ) -> Result<RideStatus, StoreError> {
        let now = self.now();
        let changed = self.sql.execute(
            "UPDATE rides SET updated_at = ?2 WHERE id = ?1",
            params![ride_id, now.timestamp_micros()],
        )?;
        if changed == 0 {
            return Err(not_found("ride", ride_id));
        }

        let entry = RideStatus {
            id: Uuid::new_v4(),
            ride_id: *ride_id,
            status,
            created_at: now,
            chair_sent_at: None,
        };
        self.sql.execute(
            &format!("INSERT INTO ride_statuses ({STATUS_COLUMNS}) VALUES (?1, ?2, ?3, ?4, NULL)"),
            params![entry.id, entry.ride_id, status.as_str(), now.timestamp_micros()],
        )?;
        Ok(entry)
    }

    /// Stamps the chair acknowledgement on one log entry. An entry that was
    /// already acknowledged keeps its first timestamp.
    pub fn mark_status_sent(
        &mut self,
        ride_id: &Uuid,
        status_id: &Uuid,
    ) -> Result<RideStatus, StoreError> {
        let mut entry = self
            .sql
            .query_row(
                &format!("SELECT {STATUS_COLUMNS} FROM ride_statuses WHERE id = ?1 AND ride_id = ?2"),
                params![status_id, ride_id],
                status_from_row,
            )
            .optional()?
            .ok_or_else(|| not_found("ride status", status_id))?;

        if entry.chair_sent_at.is_none() {
            let now = self.now();
            self.sql.execute(
                "UPDATE ride_statuses SET chair_sent_at = ?2 WHERE id = ?1",
                params![status_id, now.timestamp_micros()],
            )?;
            entry.chair_sent_at = Some(now);
        }
        Ok(entry)
    }
}
