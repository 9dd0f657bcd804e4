//! Pre-redesign trip records
//!
//! Older deployments stored a single `guide`, a single `call_id` and a
//! narrower status vocabulary. Some of those records were later touched by
//! partial migrations and already carry a few of the new fields, so every
//! new field is optional here and wins over its legacy counterpart.
use super::error::TripError;
use super::lifecycle::TripStatus;
use super::trip::{
    AgreementSource, CallSession, EndReason, GeoPoint, ItineraryStop, Offer, TimeStamp, Trip,
    TripMeta,
};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct LegacyTrip {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub status: Option<String>,
    #[n(2)]
    pub tourist_id: String,
    #[n(3)]
    pub meeting_point: GeoPoint,
    #[n(4)]
    pub meeting_address: String,
    #[n(5)]
    pub start_at: TimeStamp<Utc>,
    #[n(6)]
    pub total_duration_minutes: u32,
    #[n(7)]
    pub itinerary: Option<Vec<ItineraryStop>>,
    #[n(8)]
    pub notes: Option<String>,
    #[n(9)]
    pub created_from_place_id: Option<String>,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub guide: Option<String>,
    #[n(12)]
    pub call_id: Option<String>,
    #[n(13)]
    pub negotiated_price: Option<u64>,
    #[n(14)]
    pub agreement_source: Option<String>,
    // fields a partial migration may already have written
    #[n(15)]
    pub selected_guide: Option<String>,
    #[n(16)]
    pub call_sessions: Option<Vec<CallSession>>,
    #[n(17)]
    pub candidate_guides: Option<Vec<String>>,
    #[n(18)]
    pub offers: Option<Vec<Offer>>,
    #[n(19)]
    pub final_price: Option<u64>,
    #[n(20)]
    pub preferred_language: Option<String>,
    #[n(21)]
    pub updated_at: Option<TimeStamp<Utc>>,
}

/// Builds the current representation of a legacy record.
///
/// Deterministic and non-destructive: fields already in the new shape are
/// kept as they are, legacy fields only fill gaps. Feeding the result back
/// through [`LegacyTrip::from`] and upgrading again yields the same trip.
pub fn upgrade_legacy(legacy: LegacyTrip) -> Result<Trip, TripError> {
    // implicit pending status in the oldest flow
    let raw_status = legacy.status.as_deref().unwrap_or("pending");
    let status = TripStatus::from_legacy(raw_status).ok_or_else(|| {
        TripError::Codec(format!(
            "trip {} has unknown legacy status {raw_status}",
            legacy.id
        ))
    })?;

    let selected_guide = legacy.selected_guide.or(legacy.guide);

    let mut call_sessions = legacy.call_sessions.unwrap_or_default();
    if call_sessions.is_empty() {
        if let (Some(call_id), Some(guide_id)) = (legacy.call_id, selected_guide.as_ref()) {
            call_sessions.push(CallSession {
                id: call_id,
                guide_id: guide_id.clone(),
                started_at: legacy.created_at.clone(),
                ended_at: Some(legacy.created_at.clone()),
                end_reason: Some(EndReason::Completed),
                summary: None,
                negotiated_price: legacy.negotiated_price,
                close_fingerprint: None,
            });
        }
    }

    let candidate_guides = match legacy.candidate_guides {
        Some(candidates) => candidates,
        None => selected_guide.iter().cloned().collect(),
    };

    let final_price = legacy.final_price.or_else(|| {
        status
            .requires_final_price()
            .then_some(legacy.negotiated_price)
            .flatten()
    });

    let agreement_source = legacy
        .agreement_source
        .as_deref()
        .and_then(AgreementSource::from_raw);

    Ok(Trip {
        id: legacy.id,
        status,
        tourist_id: legacy.tourist_id,
        meeting_point: legacy.meeting_point,
        meeting_address: legacy.meeting_address,
        start_at: legacy.start_at,
        total_duration_minutes: legacy.total_duration_minutes,
        itinerary: legacy.itinerary.unwrap_or_default(),
        notes: legacy.notes,
        created_from_place_id: legacy.created_from_place_id,
        preferred_language: legacy.preferred_language,
        candidate_guides,
        selected_guide,
        offers: legacy.offers.unwrap_or_default(),
        call_sessions,
        final_price,
        meta: TripMeta { agreement_source },
        updated_at: legacy.updated_at.unwrap_or_else(|| legacy.created_at.clone()),
        created_at: legacy.created_at,
    })
}

impl From<&Trip> for LegacyTrip {
    /// A fully migrated document: every new field set, legacy fields empty.
    fn from(trip: &Trip) -> Self {
        Self {
            id: trip.id.clone(),
            status: Some(trip.status.as_str().to_string()),
            tourist_id: trip.tourist_id.clone(),
            meeting_point: trip.meeting_point,
            meeting_address: trip.meeting_address.clone(),
            start_at: trip.start_at.clone(),
            total_duration_minutes: trip.total_duration_minutes,
            itinerary: Some(trip.itinerary.clone()),
            notes: trip.notes.clone(),
            created_from_place_id: trip.created_from_place_id.clone(),
            created_at: trip.created_at.clone(),
            guide: None,
            call_id: None,
            negotiated_price: None,
            agreement_source: trip.meta.agreement_source.map(|s| s.as_str().to_string()),
            selected_guide: trip.selected_guide.clone(),
            call_sessions: Some(trip.call_sessions.clone()),
            candidate_guides: Some(trip.candidate_guides.clone()),
            offers: Some(trip.offers.clone()),
            final_price: trip.final_price,
            preferred_language: trip.preferred_language.clone(),
            updated_at: Some(trip.updated_at.clone()),
        }
    }
}
