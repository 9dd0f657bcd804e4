//! Trip aggregate and the records nested under it
use super::lifecycle::TripStatus;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// WGS84 coordinate pair.
#[derive(
    Debug, Clone, Copy, PartialEq, minicbor::Encode, minicbor::Decode, serde::Serialize, serde::Deserialize,
)]
pub struct GeoPoint {
    #[n(0)]
    pub lat: f64,
    #[n(1)]
    pub lng: f64,
}

impl GeoPoint {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    pub fn is_in_range(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * Self::EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

#[derive(
    Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryStop {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub place_id: Option<String>,
    #[n(2)]
    pub duration_minutes: Option<u32>,
}

/// Where the agreement on price was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum AgreementSource {
    #[n(0)]
    InApp,
    #[n(1)]
    Offline,
}

/// Every raw value clients have ever sent, with its canonical meaning.
/// Values missing from this table are dropped on write.
pub const AGREEMENT_SOURCE_ALIASES: &[(&str, AgreementSource)] = &[
    ("in_app", AgreementSource::InApp),
    ("new_flow", AgreementSource::InApp),
    ("offline", AgreementSource::Offline),
];

impl AgreementSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InApp => "in_app",
            Self::Offline => "offline",
        }
    }

    pub fn from_raw(raw: &str) -> Option<Self> {
        AGREEMENT_SOURCE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == raw)
            .map(|(_, source)| *source)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct TripMeta {
    #[n(0)]
    pub agreement_source: Option<AgreementSource>,
}

/// Terms a guide proposed before being selected.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Offer {
    #[n(0)]
    pub guide_id: String,
    #[n(1)]
    pub price: u64,
    #[n(2)]
    pub notes: Option<String>,
    #[n(3)]
    pub submitted_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum EndReason {
    #[n(0)]
    Completed,
    #[n(1)]
    Abandoned,
}

impl EndReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse_str(raw: &str) -> Option<Self> {
        match raw {
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

/// A negotiation call between the tourist and the selected guide.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CallSession {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub guide_id: String,
    #[n(2)]
    pub started_at: TimeStamp<Utc>,
    #[n(3)]
    pub ended_at: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub end_reason: Option<EndReason>,
    #[n(5)]
    pub summary: Option<String>,
    #[n(6)]
    pub negotiated_price: Option<u64>,
    // sha256 of the payload that closed the session
    #[n(7)]
    pub close_fingerprint: Option<String>,
}

impl CallSession {
    pub fn open(id: String, guide_id: String, started_at: TimeStamp<Utc>) -> Self {
        Self {
            id,
            guide_id,
            started_at,
            ended_at: None,
            end_reason: None,
            summary: None,
            negotiated_price: None,
            close_fingerprint: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// The booking aggregate. Mutated only through the store's atomic update.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Trip {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub status: TripStatus,
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
    pub itinerary: Vec<ItineraryStop>,
    #[n(8)]
    pub notes: Option<String>,
    #[n(9)]
    pub created_from_place_id: Option<String>,
    #[n(10)]
    pub preferred_language: Option<String>,
    #[n(11)]
    pub candidate_guides: Vec<String>,
    #[n(12)]
    pub selected_guide: Option<String>,
    #[n(13)]
    pub offers: Vec<Offer>,
    #[n(14)]
    pub call_sessions: Vec<CallSession>,
    #[n(15)]
    pub final_price: Option<u64>,
    #[n(16)]
    pub meta: TripMeta,
    #[n(17)]
    pub created_at: TimeStamp<Utc>,
    #[n(18)]
    pub updated_at: TimeStamp<Utc>,
}

impl Trip {
    pub fn open_session(&self) -> Option<&CallSession> {
        self.call_sessions.iter().find(|s| s.is_open())
    }

    pub fn session(&self, session_id: &str) -> Option<&CallSession> {
        self.call_sessions.iter().find(|s| s.id == session_id)
    }

    /// Price recorded by the most recent closed call that carried one.
    pub fn last_negotiated_price(&self) -> Option<u64> {
        self.call_sessions
            .iter()
            .rev()
            .filter(|s| !s.is_open())
            .find_map(|s| s.negotiated_price)
    }

    /// Checks the cross-field invariants tying `selected_guide`,
    /// `final_price` and open sessions to the status. Side-branch terminal
    /// states are exempt from the presence checks.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.call_sessions.iter().filter(|s| s.is_open()).count() > 1 {
            return Err("more than one open call session".to_string());
        }
        if self.status.is_side_branch() {
            return Ok(());
        }
        if self.selected_guide.is_some() != self.status.requires_selected_guide() {
            return Err(format!(
                "selectedGuide presence does not match status {}",
                self.status.as_str()
            ));
        }
        if self.final_price.is_some() != self.status.requires_final_price() {
            return Err(format!(
                "finalPrice presence does not match status {}",
                self.status.as_str()
            ));
        }
        Ok(())
    }
}
