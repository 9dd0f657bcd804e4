//! Service layer API for trip workflow operations
use super::calls::{CallHandle, CallSessionManager, CallTransport, EndCallRequest};
use super::config::TripConfig;
use super::confirmation::{AcceptRequest, ConfirmationCoordinator, MigrationReport};
use super::creation::{CreateTripRequest, CreationWarning, PlaceDirectory};
use super::error::{TripError, ValidationError};
use super::lifecycle::{TripEvent, TripStatus};
use super::matcher::{GuideCandidate, GuideDirectory, GuideMatcher};
use super::request_response::{OfferRequest, SelectGuideRequest};
use super::store::TripStore;
use super::trip::{CallSession, Offer, TimeStamp, Trip};
use super::utils;
use std::sync::Arc;
use tracing::{debug, info};

/// Caller identity, already authenticated upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Tourist(String),
    Guide(String),
}

impl Actor {
    pub fn id(&self) -> &str {
        match self {
            Self::Tourist(id) | Self::Guide(id) => id,
        }
    }

    pub fn is_owner(&self, trip: &Trip) -> bool {
        matches!(self, Self::Tourist(id) if *id == trip.tourist_id)
    }

    pub fn is_bound_guide(&self, trip: &Trip) -> bool {
        matches!(self, Self::Guide(id) if trip.selected_guide.as_deref() == Some(id.as_str()))
    }

    pub fn is_candidate(&self, trip: &Trip) -> bool {
        matches!(self, Self::Guide(id) if trip.candidate_guides.contains(id))
    }
}

/// External services the core talks to.
pub struct Collaborators {
    pub guides: Arc<dyn GuideDirectory>,
    pub places: Arc<dyn PlaceDirectory>,
    pub transport: Arc<dyn CallTransport>,
}

#[derive(Debug, Clone)]
pub struct CreatedTrip {
    pub trip: Trip,
    pub candidates: Vec<GuideCandidate>,
    pub warnings: Vec<CreationWarning>,
}

pub struct TripService {
    store: Arc<TripStore>,
    matcher: GuideMatcher,
    places: Arc<dyn PlaceDirectory>,
    calls: CallSessionManager,
    confirmations: ConfirmationCoordinator,
    config: TripConfig,
}

impl TripService {
    pub fn new(
        instance: Arc<sled::Db>,
        collaborators: Collaborators,
        config: TripConfig,
    ) -> Result<Self, TripError> {
        let store = Arc::new(TripStore::open(instance)?);
        Ok(Self {
            matcher: GuideMatcher::new(collaborators.guides, config.require_verified_guides),
            places: collaborators.places,
            calls: CallSessionManager::new(store.clone(), collaborators.transport),
            confirmations: ConfirmationCoordinator::new(store.clone()),
            store,
            config,
        })
    }

    /// Opens the database named in the configuration.
    pub fn open(config: TripConfig, collaborators: Collaborators) -> Result<Self, TripError> {
        info!(path = %config.database_path.display(), "opening trip store");
        let db = sled::open(&config.database_path)?;
        Self::new(Arc::new(db), collaborators, config)
    }

    pub fn store(&self) -> &TripStore {
        &self.store
    }

    /// `POST /trips`
    pub fn create_trip(
        &self,
        actor: &Actor,
        request: &CreateTripRequest,
    ) -> Result<CreatedTrip, TripError> {
        let Actor::Tourist(tourist_id) = actor else {
            return Err(TripError::conflict("only tourists can create trips"));
        };
        let now = TimeStamp::new();
        let (draft, warnings) = request.normalize(
            now.to_datetime_utc(),
            self.config.creation_limits(),
            self.places.as_ref(),
        )?;

        let mut trip = Trip {
            id: utils::new_trip_id()?,
            status: TripStatus::SelectingGuide,
            tourist_id: tourist_id.clone(),
            meeting_point: draft.meeting_point,
            meeting_address: draft.meeting_address,
            start_at: draft.start_at,
            total_duration_minutes: draft.total_duration_minutes,
            itinerary: draft.itinerary,
            notes: draft.notes,
            created_from_place_id: draft.created_from_place_id,
            preferred_language: draft.preferred_language,
            candidate_guides: vec![],
            selected_guide: None,
            offers: vec![],
            call_sessions: vec![],
            final_price: None,
            meta: draft.meta,
            created_at: now.clone(),
            updated_at: now,
        };

        let mut candidates = self.matcher.find_compatible_guides(&trip)?;
        candidates.truncate(self.config.max_candidates);
        trip.candidate_guides = candidates.iter().map(|c| c.guide_id.clone()).collect();

        self.store.insert_new(&trip)?;
        info!(
            trip_id = %trip.id,
            tourist_id = %trip.tourist_id,
            candidates = candidates.len(),
            "trip created"
        );

        Ok(CreatedTrip {
            trip,
            candidates,
            warnings,
        })
    }

    /// `GET /trips/{id}/guides`
    ///
    /// While the trip is still choosing, newly compatible guides are appended
    /// to its candidate list. Afterwards the stored list is returned as is.
    pub fn candidate_guides(
        &self,
        trip_id: &str,
        actor: &Actor,
    ) -> Result<Vec<GuideCandidate>, TripError> {
        let mut trip = self.store.load(trip_id)?;
        ensure_owner(&trip, actor)?;

        if trip.status == TripStatus::SelectingGuide {
            let room = self
                .config
                .max_candidates
                .saturating_sub(trip.candidate_guides.len());
            let fresh: Vec<String> = self
                .matcher
                .find_compatible_guides(&trip)?
                .into_iter()
                .map(|c| c.guide_id)
                .filter(|id| !trip.candidate_guides.contains(id))
                .take(room)
                .collect();

            if !fresh.is_empty() {
                let now = TimeStamp::new();
                (trip, _) = self.store.update(trip_id, |trip| {
                    if trip.status != TripStatus::SelectingGuide {
                        return Ok(());
                    }
                    for id in &fresh {
                        if !trip.candidate_guides.contains(id) {
                            trip.candidate_guides.push(id.clone());
                        }
                    }
                    trip.updated_at = now.clone();
                    Ok(())
                })?;
                debug!(trip_id, added = fresh.len(), "candidate guides refreshed");
            }
        }

        self.matcher.resolve(&trip.candidate_guides)
    }

    /// `GET /trips/{id}/guides?offset=&limit=`
    ///
    /// Browses the live compatible set without touching the stored list.
    pub fn browse_guides(
        &self,
        trip_id: &str,
        actor: &Actor,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<GuideCandidate>, TripError> {
        let trip = self.store.load(trip_id)?;
        ensure_owner(&trip, actor)?;
        self.matcher.page(&trip, offset, limit)
    }

    /// `POST /trips/{id}/select-guide`
    pub fn select_guide(
        &self,
        trip_id: &str,
        actor: &Actor,
        request: &SelectGuideRequest,
    ) -> Result<Trip, TripError> {
        let guide_id = request.guide_id.trim();
        if guide_id.is_empty() {
            return Err(ValidationError::EmptyField("guideId").into());
        }

        let current = self.store.load(trip_id)?;
        ensure_owner(&current, actor)?;
        // guides outside the stored list are re-checked against the directory
        let revalidated = !current.candidate_guides.iter().any(|g| g == guide_id)
            && self.matcher.compatible_guide(&current, guide_id)?.is_some();

        let now = TimeStamp::new();
        let (trip, _) = self.store.update(trip_id, |trip| {
            let next = trip.status.apply(TripEvent::SelectGuide)?;
            if let Some(bound) = &trip.selected_guide {
                return Err(TripError::conflict(format!(
                    "trip {} already has guide {bound}",
                    trip.id
                )));
            }
            let listed = trip.candidate_guides.iter().any(|g| g == guide_id);
            if !listed && !revalidated {
                return Err(TripError::conflict(format!(
                    "guide {guide_id} is not a compatible candidate for trip {}",
                    trip.id
                )));
            }
            if !listed {
                trip.candidate_guides.push(guide_id.to_string());
            }

            trip.selected_guide = Some(guide_id.to_string());
            trip.status = next;
            trip.updated_at = now.clone();
            Ok(())
        })?;

        info!(trip_id = %trip.id, guide_id, "guide selected");
        Ok(trip)
    }

    /// A candidate guide proposes terms before selection.
    pub fn submit_offer(
        &self,
        trip_id: &str,
        actor: &Actor,
        request: &OfferRequest,
    ) -> Result<Trip, TripError> {
        if request.price == 0 {
            return Err(ValidationError::InvalidPrice.into());
        }
        let now = TimeStamp::new();

        let (trip, _) = self.store.update(trip_id, |trip| {
            if !actor.is_candidate(trip) {
                return Err(TripError::conflict(format!(
                    "{} is not a candidate guide of trip {}",
                    actor.id(),
                    trip.id
                )));
            }
            if trip.status != TripStatus::SelectingGuide {
                return Err(TripError::conflict(format!(
                    "offers are closed while trip is {}",
                    trip.status.as_str()
                )));
            }
            trip.offers.push(Offer {
                guide_id: actor.id().to_string(),
                price: request.price,
                notes: request.notes.clone(),
                submitted_at: now.clone(),
            });
            trip.updated_at = now.clone();
            Ok(())
        })?;

        debug!(trip_id = %trip.id, guide_id = actor.id(), "offer submitted");
        Ok(trip)
    }

    /// `POST /trips/{id}/calls/initiate`
    pub fn initiate_call(&self, trip_id: &str, actor: &Actor) -> Result<CallHandle, TripError> {
        self.calls.initiate(trip_id, actor)
    }

    /// `POST /calls/{sessionId}/end`
    pub fn end_call(
        &self,
        session_id: &str,
        actor: &Actor,
        request: &EndCallRequest,
    ) -> Result<(CallSession, Trip), TripError> {
        self.calls.end(session_id, actor, request)
    }

    /// `PUT /trips/{id}/accept`
    pub fn accept(
        &self,
        trip_id: &str,
        actor: &Actor,
        request: &AcceptRequest,
    ) -> Result<Trip, TripError> {
        self.confirmations.guide_accept(trip_id, actor, request)
    }

    /// `PUT /trips/{id}/reject`
    pub fn reject(&self, trip_id: &str, actor: &Actor) -> Result<Trip, TripError> {
        self.confirmations.guide_reject(trip_id, actor)
    }

    /// `GET /trips/{id}`. Visible to the owner, the selected guide and the
    /// candidate guides; anyone else gets `NotFound`.
    pub fn get_trip(&self, trip_id: &str, actor: &Actor) -> Result<Trip, TripError> {
        let trip = self.store.load(trip_id)?;
        if actor.is_owner(&trip) || actor.is_bound_guide(&trip) || actor.is_candidate(&trip) {
            Ok(trip)
        } else {
            Err(TripError::not_found("trip", trip_id))
        }
    }

    pub fn upgrade_legacy_trips(&self) -> Result<MigrationReport, TripError> {
        self.confirmations.upgrade_legacy_trips()
    }
}

fn ensure_owner(trip: &Trip, actor: &Actor) -> Result<(), TripError> {
    if actor.is_owner(trip) {
        Ok(())
    } else {
        Err(TripError::conflict(format!(
            "{} does not own trip {}",
            actor.id(),
            trip.id
        )))
    }
}
