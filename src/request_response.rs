//! Wire shapes for the request surface
//!
//! Request bodies that only carry an id or a price live here; the richer
//! ones sit next to the logic that normalizes them. Responses are
//! camelCase projections of the domain types.
use super::calls::{CallCredentials, CallHandle};
use super::error::TripError;
use super::matcher::GuideCandidate;
use super::service::CreatedTrip;
use super::trip::{CallSession, GeoPoint, ItineraryStop, Offer, Trip};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectGuideRequest {
    pub guide_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    pub price: u64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSessionView {
    pub id: String,
    pub guide_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub end_reason: Option<&'static str>,
    pub summary: Option<String>,
    pub negotiated_price: Option<u64>,
}

impl From<&CallSession> for CallSessionView {
    fn from(session: &CallSession) -> Self {
        Self {
            id: session.id.clone(),
            guide_id: session.guide_id.clone(),
            started_at: session.started_at.to_rfc3339(),
            ended_at: session.ended_at.as_ref().map(|t| t.to_rfc3339()),
            end_reason: session.end_reason.map(|r| r.as_str()),
            summary: session.summary.clone(),
            negotiated_price: session.negotiated_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferView {
    pub guide_id: String,
    pub price: u64,
    pub notes: Option<String>,
    pub submitted_at: String,
}

impl From<&Offer> for OfferView {
    fn from(offer: &Offer) -> Self {
        Self {
            guide_id: offer.guide_id.clone(),
            price: offer.price,
            notes: offer.notes.clone(),
            submitted_at: offer.submitted_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaView {
    pub agreement_source: Option<&'static str>,
}

/// Full trip projection returned by `GET /trips/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripView {
    pub id: String,
    pub status: &'static str,
    pub tourist_id: String,
    pub meeting_point: GeoPoint,
    pub meeting_address: String,
    pub start_at: String,
    pub total_duration_minutes: u32,
    pub itinerary: Vec<ItineraryStop>,
    pub notes: Option<String>,
    pub created_from_place_id: Option<String>,
    pub preferred_language: Option<String>,
    pub candidate_guides: Vec<String>,
    pub selected_guide: Option<String>,
    pub offers: Vec<OfferView>,
    pub call_sessions: Vec<CallSessionView>,
    pub final_price: Option<u64>,
    pub meta: MetaView,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Trip> for TripView {
    fn from(trip: &Trip) -> Self {
        Self {
            id: trip.id.clone(),
            status: trip.status.as_str(),
            tourist_id: trip.tourist_id.clone(),
            meeting_point: trip.meeting_point,
            meeting_address: trip.meeting_address.clone(),
            start_at: trip.start_at.to_rfc3339(),
            total_duration_minutes: trip.total_duration_minutes,
            itinerary: trip.itinerary.clone(),
            notes: trip.notes.clone(),
            created_from_place_id: trip.created_from_place_id.clone(),
            preferred_language: trip.preferred_language.clone(),
            candidate_guides: trip.candidate_guides.clone(),
            selected_guide: trip.selected_guide.clone(),
            offers: trip.offers.iter().map(OfferView::from).collect(),
            call_sessions: trip.call_sessions.iter().map(CallSessionView::from).collect(),
            final_price: trip.final_price,
            meta: MetaView {
                agreement_source: trip.meta.agreement_source.map(|s| s.as_str()),
            },
            created_at: trip.created_at.to_rfc3339(),
            updated_at: trip.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTripResponse {
    pub trip: TripView,
    pub candidates: Vec<GuideCandidate>,
    pub warnings: Vec<String>,
}

impl From<&CreatedTrip> for CreateTripResponse {
    fn from(created: &CreatedTrip) -> Self {
        Self {
            trip: TripView::from(&created.trip),
            candidates: created.candidates.clone(),
            warnings: created.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallResponse {
    pub session_id: String,
    pub session: CallSessionView,
    pub credentials: Option<CallCredentials>,
}

impl From<&CallHandle> for InitiateCallResponse {
    fn from(handle: &CallHandle) -> Self {
        Self {
            session_id: handle.session.id.clone(),
            session: CallSessionView::from(&handle.session),
            credentials: handle.credentials.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub kind: &'static str,
    pub message: String,
}

impl From<&TripError> for ErrorResponse {
    fn from(err: &TripError) -> Self {
        Self {
            kind: err.kind().as_str(),
            message: err.public_message(),
        }
    }
}
