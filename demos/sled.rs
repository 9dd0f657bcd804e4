//! Walks one trip through its whole lifecycle against a throwaway sled
//! database, then upgrades a hand-written legacy record.
//!
//! `RUST_LOG=debug cargo run --example sled [config.json]`

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use trip_lifecycle::{
    calls::{EndCallRequest, NoCallTransport},
    config::TripConfig,
    confirmation::AcceptRequest,
    creation::{CreateTripRequest, StaticPlaceDirectory},
    legacy::LegacyTrip,
    matcher::{GuideProfile, StaticGuideDirectory},
    request_response::{ErrorResponse, SelectGuideRequest, TripView},
    service::{Actor, Collaborators, TripService},
    store::TripRecord,
    trip::{GeoPoint, TimeStamp},
};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let scratch = tempfile::tempdir()?;
    let config = match std::env::args().nth(1) {
        Some(path) => TripConfig::from_json_file(path)?,
        None => TripConfig {
            database_path: scratch.path().join("trips.db"),
            ..TripConfig::default()
        },
    };

    let collaborators = Collaborators {
        guides: Arc::new(StaticGuideDirectory::new([
            GuideProfile::new("guide_marta").with_rating(4.8).with_language("es"),
            GuideProfile::new("guide_jordi")
                .with_rating(4.6)
                .with_language("es")
                .with_language("ca"),
        ])),
        places: Arc::new(StaticPlaceDirectory::new(["place_sagrada_familia"])),
        transport: Arc::new(NoCallTransport),
    };
    let service = TripService::open(config, collaborators)?;

    let tourist = Actor::Tourist("user_lena".into());
    let request: CreateTripRequest = serde_json::from_value(json!({
        "startAt": (Utc::now() + Duration::days(2)).to_rfc3339(),
        "meetingAddress": "Carrer de Mallorca 401",
        "meetingPoint": { "type": "Point", "coordinates": [2.1744, 41.4036] },
        "totalDurationMinutes": 180,
        "preferredLanguage": "es",
        "createdFromPlaceId": "place_sagrada_familia",
        "meta": { "agreementSource": "new_flow" }
    }))?;

    let created = service.create_trip(&tourist, &request)?;
    let trip_id = created.trip.id.clone();
    let guide_id = created.candidates[0].guide_id.clone();
    println!("created {trip_id} with {} candidates", created.candidates.len());

    service.select_guide(&trip_id, &tourist, &SelectGuideRequest { guide_id: guide_id.clone() })?;
    let handle = service.initiate_call(&trip_id, &tourist)?;

    // a second call while one is open is refused
    if let Err(err) = service.initiate_call(&trip_id, &tourist) {
        println!("second call refused: {:?}", ErrorResponse::from(&err));
    }

    let end = EndCallRequest::completed("Sagrada Familia and Park Güell, lunch included", 420);
    service.end_call(&handle.session.id, &tourist, &end)?;
    // retried by a flaky client
    service.end_call(&handle.session.id, &tourist, &end)?;

    let guide = Actor::Guide(guide_id);
    let trip = service.accept(&trip_id, &guide, &AcceptRequest { final_price: None })?;
    println!("{}", serde_json::to_string_pretty(&TripView::from(&trip))?);

    let created_at = TimeStamp::from(Utc::now() - Duration::days(400));
    let legacy = LegacyTrip {
        id: "trip_from_the_old_flow".into(),
        status: None,
        tourist_id: "user_old".into(),
        meeting_point: GeoPoint { lat: 41.3809, lng: 2.1228 },
        meeting_address: "Camp Nou".into(),
        start_at: created_at.clone(),
        total_duration_minutes: 120,
        itinerary: None,
        notes: None,
        created_from_place_id: None,
        created_at,
        guide: Some("guide_jordi".into()),
        call_id: Some("call_old".into()),
        negotiated_price: Some(150),
        agreement_source: Some("offline".into()),
        selected_guide: None,
        call_sessions: None,
        candidate_guides: None,
        offers: None,
        final_price: None,
        preferred_language: None,
        updated_at: None,
    };
    service
        .store()
        .put_record(&legacy.id, &TripRecord::Legacy(legacy.clone()))?;

    let report = service.upgrade_legacy_trips()?;
    println!("migration: {report:?}");
    let upgraded = service.get_trip(&legacy.id, &Actor::Tourist("user_old".into()))?;
    println!("{}", serde_json::to_string_pretty(&TripView::from(&upgraded))?);

    Ok(())
}
