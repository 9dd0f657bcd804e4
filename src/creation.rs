//! Trip creation input
//!
//! Clients have sent several body shapes over time. All of them deserialize
//! into [`CreateTripRequest`] and go through [`CreateTripRequest::normalize`];
//! nothing downstream branches on which shape arrived. Of `meta` only
//! `agreementSource` is kept; other keys are dropped with a warning.
use super::error::ValidationError;
use super::trip::{AgreementSource, GeoPoint, ItineraryStop, TimeStamp, TripMeta};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Point-of-interest lookup owned by another service.
pub trait PlaceDirectory: Send + Sync {
    fn contains_place(&self, place_id: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct StaticPlaceDirectory {
    places: HashSet<String>,
}

impl StaticPlaceDirectory {
    pub fn new<I, S>(places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            places: places.into_iter().map(Into::into).collect(),
        }
    }
}

impl PlaceDirectory for StaticPlaceDirectory {
    fn contains_place(&self, place_id: &str) -> bool {
        self.places.contains(place_id)
    }
}

/// `{lat, lng}` or a GeoJSON point (`coordinates` are `[lng, lat]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MeetingPointInput {
    LatLng { lat: f64, lng: f64 },
    GeoJson { coordinates: [f64; 2] },
}

impl MeetingPointInput {
    fn to_point(&self) -> GeoPoint {
        match *self {
            Self::LatLng { lat, lng } => GeoPoint { lat, lng },
            Self::GeoJson {
                coordinates: [lng, lat],
            } => GeoPoint { lat, lng },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryStopInput {
    pub name: Option<String>,
    pub place_id: Option<String>,
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTripRequest {
    pub start_at: Option<String>,
    pub meeting_address: Option<String>,
    pub meeting_point: Option<MeetingPointInput>,
    pub total_duration_minutes: Option<u32>,
    pub itinerary: Option<Vec<ItineraryStopInput>>,
    pub notes: Option<String>,
    pub preferred_language: Option<String>,
    // any JSON type is tolerated; only known place ids survive
    pub created_from_place_id: Option<Value>,
    pub meta: Option<Value>,
}

/// Input that was dropped instead of failing the request.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CreationWarning {
    #[error("createdFromPlaceId {0} is unknown and was ignored")]
    UnknownPlace(String),
    #[error("createdFromPlaceId is malformed and was ignored")]
    MalformedPlaceId,
    #[error("meta.agreementSource {0} is not recognized and was ignored")]
    UnrecognizedAgreementSource(String),
    #[error("meta is not an object and was ignored")]
    MalformedMeta,
    #[error("meta.{0} is not a known key and was ignored")]
    UnknownMetaKey(String),
}

/// Limits applied while validating a creation request.
#[derive(Debug, Clone, Copy)]
pub struct CreationLimits {
    pub min_start_lead: Duration,
    pub max_duration_minutes: u32,
}

/// Canonical trip shape, ready to become a [`super::trip::Trip`].
#[derive(Debug, Clone, PartialEq)]
pub struct TripDraft {
    pub start_at: TimeStamp<Utc>,
    pub meeting_address: String,
    pub meeting_point: GeoPoint,
    pub total_duration_minutes: u32,
    pub itinerary: Vec<ItineraryStop>,
    pub notes: Option<String>,
    pub preferred_language: Option<String>,
    pub created_from_place_id: Option<String>,
    pub meta: TripMeta,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn well_formed_place_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= 128
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl CreateTripRequest {
    /// Validates hard constraints and normalizes soft ones. Hard failures
    /// return before anything is written; soft fields are dropped with a
    /// warning.
    pub fn normalize(
        &self,
        now: DateTime<Utc>,
        limits: CreationLimits,
        places: &dyn PlaceDirectory,
    ) -> Result<(TripDraft, Vec<CreationWarning>), ValidationError> {
        let raw_start = self
            .start_at
            .as_deref()
            .ok_or(ValidationError::MissingField("startAt"))?;
        let start_at = DateTime::parse_from_rfc3339(raw_start)
            .map_err(|_| ValidationError::InvalidStartTime(raw_start.to_string()))?
            .with_timezone(&Utc);
        // never earlier than now, whatever lead was configured
        let earliest = now
            .checked_add_signed(limits.min_start_lead.max(Duration::zero()))
            .ok_or(ValidationError::StartNotInFuture)?;
        if start_at <= earliest {
            return Err(ValidationError::StartNotInFuture);
        }

        let meeting_address = non_empty(self.meeting_address.as_deref())
            .ok_or(ValidationError::EmptyField("meetingAddress"))?;

        let meeting_point = self
            .meeting_point
            .as_ref()
            .ok_or(ValidationError::MissingField("meetingPoint"))?
            .to_point();
        if !meeting_point.is_in_range() {
            return Err(ValidationError::InvalidCoordinates {
                lat: meeting_point.lat,
                lng: meeting_point.lng,
            });
        }

        let total_duration_minutes = self
            .total_duration_minutes
            .ok_or(ValidationError::MissingField("totalDurationMinutes"))?;
        if total_duration_minutes == 0 || total_duration_minutes > limits.max_duration_minutes {
            return Err(ValidationError::InvalidDuration {
                got: total_duration_minutes,
                max: limits.max_duration_minutes,
            });
        }

        let mut itinerary = Vec::new();
        for stop in self.itinerary.iter().flatten() {
            let name = non_empty(stop.name.as_deref())
                .ok_or(ValidationError::EmptyField("itinerary[].name"))?;
            itinerary.push(ItineraryStop {
                name,
                place_id: non_empty(stop.place_id.as_deref()),
                duration_minutes: stop.duration_minutes,
            });
        }

        let mut warnings = Vec::new();
        let created_from_place_id = self.place_reference(places, &mut warnings);
        let meta = self.normalized_meta(&mut warnings);

        for warning in &warnings {
            warn!(%warning, "trip creation input dropped");
        }

        let draft = TripDraft {
            start_at: start_at.into(),
            meeting_address,
            meeting_point,
            total_duration_minutes,
            itinerary,
            notes: non_empty(self.notes.as_deref()),
            preferred_language: non_empty(self.preferred_language.as_deref())
                .map(|l| l.to_ascii_lowercase()),
            created_from_place_id,
            meta,
        };

        Ok((draft, warnings))
    }

    fn place_reference(
        &self,
        places: &dyn PlaceDirectory,
        warnings: &mut Vec<CreationWarning>,
    ) -> Option<String> {
        match self.created_from_place_id.as_ref()? {
            Value::Null => None,
            Value::String(raw) if well_formed_place_id(raw.trim()) => {
                let id = raw.trim();
                if places.contains_place(id) {
                    Some(id.to_string())
                } else {
                    warnings.push(CreationWarning::UnknownPlace(id.to_string()));
                    None
                }
            }
            _ => {
                warnings.push(CreationWarning::MalformedPlaceId);
                None
            }
        }
    }

    fn normalized_meta(&self, warnings: &mut Vec<CreationWarning>) -> TripMeta {
        let object = match self.meta.as_ref() {
            None | Some(Value::Null) => return TripMeta::default(),
            Some(Value::Object(object)) => object,
            Some(_) => {
                warnings.push(CreationWarning::MalformedMeta);
                return TripMeta::default();
            }
        };

        let agreement_source = match object.get("agreementSource") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => {
                let source = AgreementSource::from_raw(raw);
                if source.is_none() {
                    warnings.push(CreationWarning::UnrecognizedAgreementSource(raw.clone()));
                }
                source
            }
            Some(other) => {
                warnings.push(CreationWarning::UnrecognizedAgreementSource(other.to_string()));
                None
            }
        };

        // agreementSource is the only key the trip keeps
        for key in object.keys().filter(|k| k.as_str() != "agreementSource") {
            warnings.push(CreationWarning::UnknownMetaKey(key.clone()));
        }

        TripMeta { agreement_source }
    }
}
