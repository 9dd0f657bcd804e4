//! Negotiation call sessions
//!
//! A trip has at most one open call at a time. Opening and closing a call
//! both go through [`TripStore::update`], so the "no open session" guard and
//! the write are one atomic step, and closing a call advances the trip in
//! the same write.
use super::error::{TripError, ValidationError};
use super::lifecycle::TripEvent;
use super::service::Actor;
use super::store::TripStore;
use super::trip::{CallSession, EndReason, TimeStamp, Trip};
use super::utils;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Opaque credentials for the third-party call transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCredentials {
    pub channel: String,
    pub token: String,
}

/// Issues transport credentials for a session about to be opened.
pub trait CallTransport: Send + Sync {
    fn issue_credentials(
        &self,
        trip_id: &str,
        session_id: &str,
    ) -> Result<Option<CallCredentials>, TripError>;
}

/// Transport that hands out nothing; calls happen out of band.
#[derive(Debug, Default)]
pub struct NoCallTransport;

impl CallTransport for NoCallTransport {
    fn issue_credentials(&self, _: &str, _: &str) -> Result<Option<CallCredentials>, TripError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallHandle {
    pub session: CallSession,
    pub credentials: Option<CallCredentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, minicbor::Encode)]
#[serde(rename_all = "camelCase")]
pub struct EndCallRequest {
    #[n(0)]
    pub end_reason: Option<String>,
    #[n(1)]
    pub summary: Option<String>,
    #[n(2)]
    pub negotiated_price: Option<u64>,
}

struct CallOutcome {
    reason: EndReason,
    summary: Option<String>,
    negotiated_price: Option<u64>,
    fingerprint: String,
}

impl EndCallRequest {
    pub fn completed(summary: &str, negotiated_price: u64) -> Self {
        Self {
            end_reason: Some(EndReason::Completed.as_str().to_string()),
            summary: Some(summary.to_string()),
            negotiated_price: Some(negotiated_price),
        }
    }

    pub fn abandoned() -> Self {
        Self {
            end_reason: Some(EndReason::Abandoned.as_str().to_string()),
            ..Self::default()
        }
    }

    /// sha256 over the CBOR encoding of the payload, used to recognize a
    /// retried request.
    pub fn fingerprint(&self) -> Result<String, TripError> {
        let cbor = minicbor::to_vec(self).map_err(|e| TripError::Codec(e.to_string()))?;
        Ok(sha256::digest(cbor))
    }

    fn validate(&self) -> Result<CallOutcome, TripError> {
        let reason = match self.end_reason.as_deref() {
            None => EndReason::Completed,
            Some(raw) => EndReason::parse_str(raw)
                .ok_or_else(|| ValidationError::InvalidEndReason(raw.to_string()))?,
        };
        let negotiated_price = match (reason, self.negotiated_price) {
            (EndReason::Completed, None) => {
                return Err(ValidationError::MissingField("negotiatedPrice").into());
            }
            (_, Some(0)) => return Err(ValidationError::InvalidPrice.into()),
            (_, price) => price,
        };
        Ok(CallOutcome {
            reason,
            summary: self
                .summary
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            negotiated_price,
            fingerprint: self.fingerprint()?,
        })
    }
}

pub struct CallSessionManager {
    store: Arc<TripStore>,
    transport: Arc<dyn CallTransport>,
}

impl CallSessionManager {
    pub fn new(store: Arc<TripStore>, transport: Arc<dyn CallTransport>) -> Self {
        Self { store, transport }
    }

    /// Opens a call between the trip's tourist and its selected guide.
    pub fn initiate(&self, trip_id: &str, actor: &Actor) -> Result<CallHandle, TripError> {
        let session_id = utils::new_call_id()?;
        // issued before the write so a transport failure leaves no session behind
        let credentials = self.transport.issue_credentials(trip_id, &session_id)?;
        let now = TimeStamp::new();

        let (trip, session) = self.store.update(trip_id, |trip| {
            ensure_participant(trip, actor)?;
            let next = trip.status.apply(TripEvent::InitiateCall)?;
            if let Some(open) = trip.open_session() {
                return Err(TripError::conflict(format!(
                    "call {} is already open for trip {}",
                    open.id, trip.id
                )));
            }
            let guide_id = trip
                .selected_guide
                .clone()
                .ok_or_else(|| TripError::conflict("trip has no selected guide"))?;

            let session = CallSession::open(session_id.clone(), guide_id, now.clone());
            trip.call_sessions.push(session.clone());
            trip.status = next;
            trip.updated_at = now.clone();
            Ok(session)
        })?;

        info!(trip_id = %trip.id, session_id = %session.id, guide_id = %session.guide_id, "call opened");
        Ok(CallHandle {
            session,
            credentials,
        })
    }

    /// Closes a call and records its outcome. A completed call moves the trip
    /// to `awaiting_guide_confirmation`; an abandoned one leaves it waiting
    /// for another call. Repeating the exact same request is a no-op.
    pub fn end(
        &self,
        session_id: &str,
        actor: &Actor,
        request: &EndCallRequest,
    ) -> Result<(CallSession, Trip), TripError> {
        let outcome = request.validate()?;
        let trip_id = self.store.trip_id_for_session(session_id)?;
        let now = TimeStamp::new();

        let (trip, (session, replay)) = self.store.update(&trip_id, |trip| {
            ensure_participant(trip, actor)?;
            let index = trip
                .call_sessions
                .iter()
                .position(|s| s.id == session_id)
                .ok_or_else(|| TripError::not_found("call session", session_id))?;

            let existing = &trip.call_sessions[index];
            if !existing.is_open() {
                return if existing.close_fingerprint.as_deref() == Some(outcome.fingerprint.as_str()) {
                    Ok((existing.clone(), true))
                } else {
                    Err(TripError::not_found("open call session", session_id))
                };
            }

            let event = match outcome.reason {
                EndReason::Completed => TripEvent::EndCall,
                EndReason::Abandoned => TripEvent::AbandonCall,
            };
            let next = trip.status.apply(event)?;

            let session = &mut trip.call_sessions[index];
            session.ended_at = Some(now.clone());
            session.end_reason = Some(outcome.reason);
            session.summary = outcome.summary.clone();
            session.negotiated_price = outcome.negotiated_price;
            session.close_fingerprint = Some(outcome.fingerprint.clone());
            let closed = session.clone();

            trip.status = next;
            trip.updated_at = now.clone();
            Ok((closed, false))
        })?;

        if replay {
            debug!(trip_id = %trip.id, session_id, "repeated end-call ignored");
        } else {
            info!(
                trip_id = %trip.id,
                session_id,
                reason = outcome.reason.as_str(),
                price = ?session.negotiated_price,
                status = trip.status.as_str(),
                "call closed"
            );
        }
        Ok((session, trip))
    }
}

/// Calls are between the trip's tourist and its selected guide only.
fn ensure_participant(trip: &Trip, actor: &Actor) -> Result<(), TripError> {
    if actor.is_owner(trip) || actor.is_bound_guide(trip) {
        Ok(())
    } else {
        Err(TripError::conflict(format!(
            "{} is not a participant of trip {}",
            actor.id(),
            trip.id
        )))
    }
}
