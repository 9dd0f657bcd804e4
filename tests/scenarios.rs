//! End-to-end trip flows against a real sled database

use anyhow::Context;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::{TempDir, tempdir};
use trip_lifecycle::{
    calls::{EndCallRequest, NoCallTransport},
    config::TripConfig,
    confirmation::AcceptRequest,
    creation::{CreateTripRequest, StaticPlaceDirectory},
    error::TripError,
    legacy::LegacyTrip,
    lifecycle::TripStatus,
    matcher::{GuideProfile, StaticGuideDirectory},
    request_response::SelectGuideRequest,
    service::{Actor, Collaborators, TripService},
    store::TripRecord,
    trip::{EndReason, GeoPoint, TimeStamp},
};

const TOURIST: &str = "user_tourist";

fn collaborators() -> Collaborators {
    Collaborators {
        guides: Arc::new(StaticGuideDirectory::new([
            GuideProfile::new("guide_ana").with_rating(4.9).with_language("en"),
            GuideProfile::new("guide_bruno").with_rating(4.7).with_language("pt"),
            GuideProfile::new("guide_carla").with_rating(4.7).with_language("en"),
            GuideProfile::new("guide_unverified").with_rating(5.0).with_verified(false),
        ])),
        places: Arc::new(StaticPlaceDirectory::new(["place_belem_tower"])),
        transport: Arc::new(NoCallTransport),
    }
}

// Sled locks its directory, so every test gets its own database in a temp dir.
fn setup(name: &str) -> anyhow::Result<(TempDir, Arc<TripService>)> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join(name))?;
    let service = TripService::new(Arc::new(db), collaborators(), TripConfig::default())?;
    Ok((temp_dir, Arc::new(service)))
}

fn create_body() -> CreateTripRequest {
    serde_json::from_value(json!({
        "startAt": (Utc::now() + Duration::days(7)).to_rfc3339(),
        "meetingAddress": "Praça do Comércio, Lisboa",
        "meetingPoint": { "lat": 38.7075, "lng": -9.1364 },
        "totalDurationMinutes": 180
    }))
    .expect("static body")
}

fn tourist() -> Actor {
    Actor::Tourist(TOURIST.to_string())
}

fn guide(id: &str) -> Actor {
    Actor::Guide(id.to_string())
}

/// Creates a trip and drives it to `awaiting_call` with the top candidate.
fn trip_awaiting_call(service: &TripService) -> anyhow::Result<(String, String)> {
    let created = service.create_trip(&tourist(), &create_body())?;
    let guide_id = created.candidates[0].guide_id.clone();
    service.select_guide(
        &created.trip.id,
        &tourist(),
        &SelectGuideRequest {
            guide_id: guide_id.clone(),
        },
    )?;
    Ok((created.trip.id, guide_id))
}

#[test]
fn create_select_call_and_confirm() -> anyhow::Result<()> {
    let (_dir, service) = setup("end_to_end.db")?;

    let created = service
        .create_trip(&tourist(), &create_body())
        .context("Trip failed on create: ")?;
    assert_eq!(created.trip.status, TripStatus::SelectingGuide);

    let guides = service.candidate_guides(&created.trip.id, &tourist())?;
    assert!(!guides.is_empty());
    let chosen = guides[0].guide_id.clone();
    assert_eq!(chosen, "guide_ana");

    let trip = service.select_guide(
        &created.trip.id,
        &tourist(),
        &SelectGuideRequest {
            guide_id: chosen.clone(),
        },
    )?;
    assert_eq!(trip.status, TripStatus::AwaitingCall);

    let call = service
        .initiate_call(&trip.id, &tourist())
        .context("Trip failed on initiate call: ")?;
    assert!(call.session.is_open());
    assert_eq!(call.session.guide_id, chosen);

    let (session, trip) = service.end_call(
        &call.session.id,
        &guide(&chosen),
        &EndCallRequest::completed("two hours around Alfama", 450),
    )?;
    assert_eq!(session.negotiated_price, Some(450));
    assert_eq!(trip.status, TripStatus::AwaitingGuideConfirmation);

    service.accept(
        &trip.id,
        &guide(&chosen),
        &AcceptRequest {
            final_price: Some(450),
        },
    )?;

    let trip = service.get_trip(&trip.id, &tourist())?;
    assert_eq!(trip.status, TripStatus::Confirmed);
    assert_eq!(trip.final_price, Some(450));
    assert_eq!(trip.call_sessions.len(), 1);
    assert!(trip.check_invariants().is_ok());

    Ok(())
}

#[test]
fn concurrent_guide_selection_has_one_winner() -> anyhow::Result<()> {
    let (_dir, service) = setup("concurrent_select.db")?;
    let created = service.create_trip(&tourist(), &create_body())?;
    let trip_id = created.trip.id.clone();

    let contenders = ["guide_ana", "guide_bruno"];
    let barrier = Arc::new(Barrier::new(contenders.len()));

    let results: Vec<(String, Result<_, TripError>)> = thread::scope(|scope| {
        let handles: Vec<_> = contenders
            .iter()
            .map(|guide_id| {
                let (service, barrier, trip_id) = (service.clone(), barrier.clone(), trip_id.clone());
                scope.spawn(move || {
                    barrier.wait();
                    let res = service.select_guide(
                        &trip_id,
                        &tourist(),
                        &SelectGuideRequest {
                            guide_id: guide_id.to_string(),
                        },
                    );
                    (guide_id.to_string(), res)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("thread")).collect()
    });

    let winners: Vec<&String> = results
        .iter()
        .filter(|(_, res)| res.is_ok())
        .map(|(g, _)| g)
        .collect();
    assert_eq!(winners.len(), 1);
    for (_, res) in results.iter().filter(|(_, res)| res.is_err()) {
        assert!(matches!(res, Err(TripError::StateConflict(_))));
    }

    let trip = service.get_trip(&trip_id, &tourist())?;
    assert_eq!(trip.selected_guide.as_ref(), Some(winners[0]));
    assert_eq!(trip.status, TripStatus::AwaitingCall);
    Ok(())
}

#[test]
fn concurrent_end_call_closes_the_session_once() -> anyhow::Result<()> {
    let (_dir, service) = setup("concurrent_end.db")?;
    let (trip_id, guide_id) = trip_awaiting_call(&service)?;
    let call = service.initiate_call(&trip_id, &tourist())?;
    let session_id = call.session.id.clone();

    let attempts = [
        (tourist(), EndCallRequest::completed("tourist's notes", 400)),
        (guide(&guide_id), EndCallRequest::completed("guide's notes", 500)),
    ];
    let barrier = Arc::new(Barrier::new(attempts.len()));

    let results: Vec<(u64, Result<_, TripError>)> = thread::scope(|scope| {
        let handles: Vec<_> = attempts
            .iter()
            .map(|(actor, request)| {
                let (service, barrier, session_id) =
                    (service.clone(), barrier.clone(), session_id.clone());
                scope.spawn(move || {
                    barrier.wait();
                    let res = service.end_call(&session_id, actor, request);
                    (request.negotiated_price.unwrap_or_default(), res)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("thread")).collect()
    });

    let winners: Vec<u64> = results
        .iter()
        .filter(|(_, res)| res.is_ok())
        .map(|(price, _)| *price)
        .collect();
    assert_eq!(winners.len(), 1);
    for (_, res) in results.iter().filter(|(_, res)| res.is_err()) {
        assert!(matches!(res, Err(TripError::NotFound { .. })));
    }

    let trip = service.get_trip(&trip_id, &tourist())?;
    assert_eq!(trip.status, TripStatus::AwaitingGuideConfirmation);
    assert_eq!(trip.call_sessions.len(), 1);
    assert!(!trip.call_sessions[0].is_open());
    assert_eq!(trip.call_sessions[0].negotiated_price, Some(winners[0]));
    Ok(())
}

#[test]
fn concurrent_accept_and_reject_have_one_winner() -> anyhow::Result<()> {
    let (_dir, service) = setup("accept_or_reject.db")?;
    let (trip_id, guide_id) = trip_awaiting_call(&service)?;
    let call = service.initiate_call(&trip_id, &tourist())?;
    service.end_call(
        &call.session.id,
        &tourist(),
        &EndCallRequest::completed("three hours, two stops", 450),
    )?;

    let barrier = Arc::new(Barrier::new(2));
    let (accepted, rejected) = thread::scope(|scope| {
        let accept = {
            let (service, barrier, trip_id, guide_id) =
                (service.clone(), barrier.clone(), trip_id.clone(), guide_id.clone());
            scope.spawn(move || {
                barrier.wait();
                service.accept(&trip_id, &guide(&guide_id), &AcceptRequest::default())
            })
        };
        let reject = {
            let (service, barrier, trip_id, guide_id) =
                (service.clone(), barrier.clone(), trip_id.clone(), guide_id.clone());
            scope.spawn(move || {
                barrier.wait();
                service.reject(&trip_id, &guide(&guide_id))
            })
        };
        (
            accept.join().expect("thread"),
            reject.join().expect("thread"),
        )
    });

    assert!(accepted.is_ok() != rejected.is_ok());
    let trip = service.get_trip(&trip_id, &tourist())?;
    match (accepted, rejected) {
        (Ok(confirmed), Err(TripError::StateConflict(_))) => {
            assert_eq!(trip.status, TripStatus::Confirmed);
            assert_eq!(trip.final_price, Some(450));
            assert_eq!(confirmed, trip);
        }
        (Err(TripError::StateConflict(_)), Ok(rejected)) => {
            assert_eq!(trip.status, TripStatus::Rejected);
            assert_eq!(trip.final_price, None);
            assert_eq!(rejected, trip);
        }
        other => panic!("expected exactly one winner, got {other:?}"),
    }
    Ok(())
}

#[test]
fn only_one_call_can_be_open() -> anyhow::Result<()> {
    let (_dir, service) = setup("concurrent_calls.db")?;

    let created = service.create_trip(&tourist(), &create_body())?;
    // too early: no guide yet
    assert!(matches!(
        service.initiate_call(&created.trip.id, &tourist()),
        Err(TripError::StateConflict(_))
    ));

    let (trip_id, guide_id) = {
        let guide_id = created.candidates[0].guide_id.clone();
        service.select_guide(
            &created.trip.id,
            &tourist(),
            &SelectGuideRequest {
                guide_id: guide_id.clone(),
            },
        )?;
        (created.trip.id.clone(), guide_id)
    };

    let callers = [tourist(), guide(&guide_id), tourist(), guide(&guide_id)];
    let barrier = Arc::new(Barrier::new(callers.len()));
    let opened = thread::scope(|scope| {
        let handles: Vec<_> = callers
            .iter()
            .map(|actor| {
                let (service, barrier, trip_id) = (service.clone(), barrier.clone(), trip_id.clone());
                scope.spawn(move || {
                    barrier.wait();
                    service.initiate_call(&trip_id, actor)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(Result::is_ok)
            .count()
    });

    assert_eq!(opened, 1);
    let trip = service.get_trip(&trip_id, &tourist())?;
    assert_eq!(trip.call_sessions.len(), 1);
    assert!(trip.open_session().is_some());
    Ok(())
}

#[test]
fn repeated_end_call_is_a_no_op() -> anyhow::Result<()> {
    let (_dir, service) = setup("end_call_retry.db")?;
    let (trip_id, guide_id) = trip_awaiting_call(&service)?;
    let call = service.initiate_call(&trip_id, &tourist())?;

    // price is mandatory for a completed call
    let missing_price = EndCallRequest {
        end_reason: Some("completed".into()),
        summary: Some("agreed".into()),
        negotiated_price: None,
    };
    assert!(matches!(
        service.end_call(&call.session.id, &tourist(), &missing_price),
        Err(TripError::Validation(_))
    ));

    let request = EndCallRequest::completed("agreed on the long route", 450);
    let (first, trip) = service.end_call(&call.session.id, &guide(&guide_id), &request)?;
    let record_after_first = service.store().record(&trip_id)?;

    let (second, again) = service.end_call(&call.session.id, &tourist(), &request)?;
    assert_eq!(first, second);
    assert_eq!(trip, again);
    assert_eq!(service.store().record(&trip_id)?, record_after_first);

    let stored = service.get_trip(&trip_id, &tourist())?;
    assert_eq!(stored.call_sessions.len(), 1);
    assert_eq!(stored.call_sessions[0].negotiated_price, Some(450));
    assert_eq!(stored.status, TripStatus::AwaitingGuideConfirmation);

    // a different payload against a closed session
    assert!(matches!(
        service.end_call(
            &call.session.id,
            &tourist(),
            &EndCallRequest::completed("changed my mind", 500)
        ),
        Err(TripError::NotFound { .. })
    ));
    assert!(matches!(
        service.end_call("call_missing", &tourist(), &request),
        Err(TripError::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn abandoned_call_allows_another_attempt() -> anyhow::Result<()> {
    let (_dir, service) = setup("abandoned_call.db")?;
    let (trip_id, guide_id) = trip_awaiting_call(&service)?;

    let first = service.initiate_call(&trip_id, &guide(&guide_id))?;
    let (session, trip) =
        service.end_call(&first.session.id, &tourist(), &EndCallRequest::abandoned())?;
    assert_eq!(session.end_reason, Some(EndReason::Abandoned));
    assert_eq!(trip.status, TripStatus::AwaitingCall);

    let second = service.initiate_call(&trip_id, &tourist())?;
    let (_, trip) = service.end_call(
        &second.session.id,
        &tourist(),
        &EndCallRequest::completed("settled", 380),
    )?;
    assert_eq!(trip.status, TripStatus::AwaitingGuideConfirmation);
    assert_eq!(trip.call_sessions.len(), 2);
    assert_eq!(trip.last_negotiated_price(), Some(380));
    Ok(())
}

#[test]
fn accept_is_reserved_to_the_selected_guide() -> anyhow::Result<()> {
    let (_dir, service) = setup("accept.db")?;
    let (trip_id, guide_id) = trip_awaiting_call(&service)?;

    // accepting before any call
    assert!(matches!(
        service.accept(&trip_id, &guide(&guide_id), &AcceptRequest::default()),
        Err(TripError::StateConflict(_))
    ));

    let call = service.initiate_call(&trip_id, &tourist())?;
    service.end_call(
        &call.session.id,
        &tourist(),
        &EndCallRequest::completed("deal", 450),
    )?;

    for outsider in [guide("guide_carla"), tourist()] {
        assert!(matches!(
            service.accept(&trip_id, &outsider, &AcceptRequest::default()),
            Err(TripError::StateConflict(_))
        ));
    }

    let trip = service.accept(&trip_id, &guide(&guide_id), &AcceptRequest::default())?;
    assert_eq!(trip.status, TripStatus::Confirmed);
    assert_eq!(trip.final_price, Some(450));

    // final price cannot be renegotiated
    assert!(matches!(
        service.accept(
            &trip_id,
            &guide(&guide_id),
            &AcceptRequest {
                final_price: Some(999)
            }
        ),
        Err(TripError::StateConflict(_))
    ));
    assert_eq!(service.get_trip(&trip_id, &tourist())?.final_price, Some(450));
    Ok(())
}

#[test]
fn rejection_is_terminal() -> anyhow::Result<()> {
    let (_dir, service) = setup("reject.db")?;
    let (trip_id, guide_id) = trip_awaiting_call(&service)?;
    let call = service.initiate_call(&trip_id, &tourist())?;
    service.end_call(
        &call.session.id,
        &tourist(),
        &EndCallRequest::completed("too expensive", 900),
    )?;

    assert!(matches!(
        service.reject(&trip_id, &guide("guide_carla")),
        Err(TripError::StateConflict(_))
    ));
    let trip = service.reject(&trip_id, &guide(&guide_id))?;
    assert_eq!(trip.status, TripStatus::Rejected);

    assert!(service.accept(&trip_id, &guide(&guide_id), &AcceptRequest::default()).is_err());
    assert!(service.reject(&trip_id, &guide(&guide_id)).is_err());
    assert!(service.initiate_call(&trip_id, &tourist()).is_err());
    assert_eq!(
        service.get_trip(&trip_id, &tourist())?.status,
        TripStatus::Rejected
    );
    Ok(())
}

fn legacy_record(id: &str) -> anyhow::Result<LegacyTrip> {
    let created_at = TimeStamp::new_with(2023, 4, 10, 8, 0, 0).context("valid date")?;
    Ok(LegacyTrip {
        id: id.into(),
        status: Some("pending".into()),
        tourist_id: TOURIST.into(),
        meeting_point: GeoPoint {
            lat: 38.6916,
            lng: -9.2160,
        },
        meeting_address: "Torre de Belém".into(),
        start_at: TimeStamp::new_with(2023, 5, 1, 9, 0, 0).context("valid date")?,
        total_duration_minutes: 120,
        itinerary: None,
        notes: Some("booked by phone".into()),
        created_from_place_id: None,
        created_at,
        guide: Some("guide_ana".into()),
        call_id: Some("call_legacy".into()),
        negotiated_price: Some(320),
        agreement_source: None,
        selected_guide: None,
        call_sessions: None,
        candidate_guides: None,
        offers: None,
        final_price: None,
        preferred_language: None,
        updated_at: None,
    })
}

#[test]
fn legacy_trips_are_upgraded_once() -> anyhow::Result<()> {
    let (_dir, service) = setup("legacy.db")?;
    service
        .store()
        .put_record("trip_legacy", &TripRecord::Legacy(legacy_record("trip_legacy")?))?;

    // readable before any migration pass
    let trip = service.get_trip("trip_legacy", &tourist())?;
    assert_eq!(
        Some(trip.status),
        TripStatus::parse_str("pending_confirmation")
    );
    assert_eq!(trip.selected_guide.as_deref(), Some("guide_ana"));
    assert_eq!(trip.call_sessions.len(), 1);
    assert_eq!(trip.call_sessions[0].id, "call_legacy");

    let report = service.upgrade_legacy_trips()?;
    assert_eq!(report.migrated, 1);
    assert!(report.failed.is_empty());
    let upgraded = service.store().record("trip_legacy")?;
    assert!(!upgraded.is_legacy());

    let report = service.upgrade_legacy_trips()?;
    assert_eq!(report.scanned, 0);
    assert_eq!(service.store().record("trip_legacy")?, upgraded);
    assert_eq!(service.store().trip_id_for_session("call_legacy")?, "trip_legacy");

    // the upgraded trip continues in the new flow
    let trip = service.accept("trip_legacy", &guide("guide_ana"), &AcceptRequest::default())?;
    assert_eq!(trip.status, TripStatus::Confirmed);
    assert_eq!(trip.final_price, Some(320));
    Ok(())
}

#[test]
fn corrupt_record_does_not_stop_migration() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("corrupt.db"))?);
    db.open_tree("trips")?
        .insert("trip_corrupt", vec![0xffu8, 0x00, 0x13])?;
    let service = TripService::new(db.clone(), collaborators(), TripConfig::default())?;
    service
        .store()
        .put_record("trip_a", &TripRecord::Legacy(legacy_record("trip_a")?))?;

    let report = service.upgrade_legacy_trips()?;
    assert_eq!(report.migrated, 1);
    assert_eq!(report.scanned, 2);
    assert_eq!(report.failed, vec!["trip_corrupt".to_string()]);
    assert!(!service.store().record("trip_a")?.is_legacy());
    Ok(())
}
