//! Guide-side confirmation and legacy record upgrades
use super::error::{TripError, ValidationError};
use super::lifecycle::TripEvent;
use super::service::Actor;
use super::store::TripStore;
use super::trip::{TimeStamp, Trip};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    pub final_price: Option<u64>,
}

/// Outcome of one pass over the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub already_current: usize,
    pub failed: Vec<String>,
}

pub struct ConfirmationCoordinator {
    store: Arc<TripStore>,
}

impl ConfirmationCoordinator {
    pub fn new(store: Arc<TripStore>) -> Self {
        Self { store }
    }

    /// The bound guide accepts. Without an explicit price the last
    /// negotiated one is used.
    pub fn guide_accept(
        &self,
        trip_id: &str,
        actor: &Actor,
        request: &AcceptRequest,
    ) -> Result<Trip, TripError> {
        if request.final_price == Some(0) {
            return Err(ValidationError::InvalidPrice.into());
        }
        let now = TimeStamp::new();

        let (trip, _) = self.store.update(trip_id, |trip| {
            ensure_bound_guide(trip, actor)?;
            let next = trip.status.apply(TripEvent::GuideAccept)?;
            let price = request
                .final_price
                .or_else(|| trip.last_negotiated_price())
                .ok_or(ValidationError::MissingField("finalPrice"))?;

            trip.final_price = Some(price);
            trip.status = next;
            trip.updated_at = now.clone();
            Ok(())
        })?;

        info!(trip_id = %trip.id, final_price = ?trip.final_price, "trip confirmed by guide");
        Ok(trip)
    }

    pub fn guide_reject(&self, trip_id: &str, actor: &Actor) -> Result<Trip, TripError> {
        let now = TimeStamp::new();

        let (trip, _) = self.store.update(trip_id, |trip| {
            ensure_bound_guide(trip, actor)?;
            trip.status = trip.status.apply(TripEvent::GuideReject)?;
            trip.updated_at = now.clone();
            Ok(())
        })?;

        info!(trip_id = %trip.id, "trip rejected by guide");
        Ok(trip)
    }

    /// Rewrites every legacy record in the current shape. Each record is
    /// upgraded in its own transaction; running the pass again finds
    /// nothing left to do. Records that fail to decode or upgrade land in
    /// `failed` and never stop the pass.
    pub fn upgrade_legacy_trips(&self) -> Result<MigrationReport, TripError> {
        let mut report = MigrationReport::default();
        let scan = self.store.legacy_trip_ids()?;

        report.scanned += scan.undecodable.len();
        report.failed.extend(scan.undecodable);

        for trip_id in scan.legacy {
            report.scanned += 1;
            match self.store.rewrite_legacy(&trip_id) {
                Ok(true) => {
                    info!(trip_id = %trip_id, "legacy trip upgraded");
                    report.migrated += 1;
                }
                Ok(false) => report.already_current += 1,
                Err(e) => {
                    warn!(trip_id = %trip_id, error = %e, "legacy trip could not be upgraded");
                    report.failed.push(trip_id);
                }
            }
        }

        Ok(report)
    }
}

fn ensure_bound_guide(trip: &Trip, actor: &Actor) -> Result<(), TripError> {
    if actor.is_bound_guide(trip) {
        Ok(())
    } else {
        Err(TripError::conflict(format!(
            "{} is not the selected guide of trip {}",
            actor.id(),
            trip.id
        )))
    }
}
