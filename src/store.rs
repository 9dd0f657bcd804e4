//! Durable trip storage on sled
//!
//! Trips live in the `trips` tree as CBOR-encoded [`TripRecord`]s keyed by
//! trip id. The `call_sessions` tree maps a session id to its trip id. Every
//! mutation runs inside one transaction spanning both trees, so the guard,
//! the trip write and the session index write either all land or none do.
use super::error::TripError;
use super::legacy::{LegacyTrip, upgrade_legacy};
use super::trip::Trip;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, Transactional, TransactionalTree,
};
use sled::{Db, Tree};
use std::sync::Arc;
use tracing::{debug, warn};

const TRIPS_TREE: &str = "trips";
const SESSIONS_TREE: &str = "call_sessions";

/// Stored representation. Writers only ever produce `Current`.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub enum TripRecord {
    #[n(0)]
    Legacy(#[n(0)] LegacyTrip),
    #[n(1)]
    Current(#[n(0)] Trip),
}

impl TripRecord {
    pub fn encode(&self) -> Result<Vec<u8>, TripError> {
        minicbor::to_vec(self).map_err(|e| TripError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TripError> {
        minicbor::decode(bytes).map_err(|e| TripError::Codec(e.to_string()))
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }

    /// Resolves either shape into the current model.
    pub fn into_trip(self) -> Result<Trip, TripError> {
        match self {
            Self::Current(trip) => Ok(trip),
            Self::Legacy(legacy) => upgrade_legacy(legacy),
        }
    }
}

/// Result of walking the `trips` tree for records to migrate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyScan {
    pub legacy: Vec<String>,
    pub undecodable: Vec<String>,
}

pub struct TripStore {
    trips: Tree,
    sessions: Tree,
}

fn abort<T>(err: TripError) -> Result<T, ConflictableTransactionError<TripError>> {
    Err(ConflictableTransactionError::Abort(err))
}

fn flatten(err: TransactionError<TripError>) -> TripError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => TripError::Storage(e),
    }
}

fn index_sessions(
    sessions: &TransactionalTree,
    trip: &Trip,
) -> Result<(), ConflictableTransactionError<TripError>> {
    for session in &trip.call_sessions {
        sessions.insert(session.id.as_bytes(), trip.id.as_bytes())?;
    }
    Ok(())
}

impl TripStore {
    pub fn open(db: Arc<Db>) -> Result<Self, TripError> {
        Ok(Self {
            trips: db.open_tree(TRIPS_TREE)?,
            sessions: db.open_tree(SESSIONS_TREE)?,
        })
    }

    /// Writes a brand new trip. Fails if the id is already taken.
    pub fn insert_new(&self, trip: &Trip) -> Result<(), TripError> {
        let bytes = TripRecord::Current(trip.clone()).encode()?;
        self.trips
            .compare_and_swap(trip.id.as_bytes(), None as Option<&[u8]>, Some(bytes))?
            .map_err(|_| TripError::conflict(format!("trip {} already exists", trip.id)))?;
        debug!(trip_id = %trip.id, "trip inserted");
        Ok(())
    }

    /// Stores a record verbatim, whatever its shape. Used by imports of data
    /// written by older deployments.
    pub fn put_record(&self, trip_id: &str, record: &TripRecord) -> Result<(), TripError> {
        self.trips.insert(trip_id.as_bytes(), record.encode()?)?;
        Ok(())
    }

    pub fn record(&self, trip_id: &str) -> Result<TripRecord, TripError> {
        let bytes = self
            .trips
            .get(trip_id.as_bytes())?
            .ok_or_else(|| TripError::not_found("trip", trip_id))?;
        TripRecord::decode(&bytes)
    }

    /// Loads a trip, upgrading legacy records in memory.
    pub fn load(&self, trip_id: &str) -> Result<Trip, TripError> {
        self.record(trip_id)?.into_trip()
    }

    pub fn trip_id_for_session(&self, session_id: &str) -> Result<String, TripError> {
        let raw = self
            .sessions
            .get(session_id.as_bytes())?
            .ok_or_else(|| TripError::not_found("call session", session_id))?;
        String::from_utf8(raw.to_vec()).map_err(|e| TripError::Codec(e.to_string()))
    }

    /// Ids of every record still stored in the legacy shape. Records that
    /// do not decode are reported apart instead of failing the scan.
    pub fn legacy_trip_ids(&self) -> Result<LegacyScan, TripError> {
        let mut scan = LegacyScan::default();
        for entry in self.trips.iter() {
            let (key, value) = entry?;
            let trip_id = String::from_utf8_lossy(&key).into_owned();
            match TripRecord::decode(&value) {
                Ok(record) if record.is_legacy() => scan.legacy.push(trip_id),
                Ok(_) => {}
                Err(e) => {
                    warn!(trip_id = %trip_id, error = %e, "undecodable trip record skipped");
                    scan.undecodable.push(trip_id);
                }
            }
        }
        Ok(scan)
    }

    /// Atomic read-guard-write on one trip.
    ///
    /// `mutate` sees the current trip (legacy records already upgraded) and
    /// either changes it and returns a value, or returns an error which
    /// aborts the whole transaction. The closure may run more than once when
    /// sled retries after a concurrent write, so it must not have side
    /// effects outside the trip. The lifecycle invariants are checked before
    /// anything is written.
    pub fn update<T, F>(&self, trip_id: &str, mutate: F) -> Result<(Trip, T), TripError>
    where
        F: Fn(&mut Trip) -> Result<T, TripError>,
    {
        (&self.trips, &self.sessions)
            .transaction(|(trips, sessions)| {
                let Some(before) = trips.get(trip_id.as_bytes())? else {
                    return abort(TripError::not_found("trip", trip_id));
                };
                let mut trip = match TripRecord::decode(&before).and_then(TripRecord::into_trip) {
                    Ok(trip) => trip,
                    Err(e) => return abort(e),
                };

                let out = match mutate(&mut trip) {
                    Ok(out) => out,
                    Err(e) => return abort(e),
                };
                if let Err(reason) = trip.check_invariants() {
                    return abort(TripError::conflict(format!(
                        "trip {trip_id} would violate lifecycle invariants: {reason}"
                    )));
                }

                let after = match TripRecord::Current(trip.clone()).encode() {
                    Ok(after) => after,
                    Err(e) => return abort(e),
                };
                // identical bytes mean the mutation was a no-op
                if before[..] != after[..] {
                    trips.insert(trip_id.as_bytes(), after)?;
                    index_sessions(sessions, &trip)?;
                }
                Ok((trip, out))
            })
            .map_err(flatten)
    }

    /// Rewrites a legacy record in the current shape. Returns `false` when
    /// the record was already current.
    pub fn rewrite_legacy(&self, trip_id: &str) -> Result<bool, TripError> {
        let was_legacy = (&self.trips, &self.sessions)
            .transaction(|(trips, sessions)| {
                let Some(bytes) = trips.get(trip_id.as_bytes())? else {
                    return abort(TripError::not_found("trip", trip_id));
                };
                let record = match TripRecord::decode(&bytes) {
                    Ok(record) => record,
                    Err(e) => return abort(e),
                };
                if !record.is_legacy() {
                    return Ok(false);
                }
                let trip = match record.into_trip() {
                    Ok(trip) => trip,
                    Err(e) => return abort(e),
                };
                let encoded = match TripRecord::Current(trip.clone()).encode() {
                    Ok(encoded) => encoded,
                    Err(e) => return abort(e),
                };
                trips.insert(trip_id.as_bytes(), encoded)?;
                index_sessions(sessions, &trip)?;
                Ok(true)
            })
            .map_err(flatten)?;
        Ok(was_legacy)
    }
}
