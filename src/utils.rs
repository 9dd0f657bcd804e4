//! Identifier helpers

use bech32::Bech32m;
use uuid7::uuid7;

pub const TRIP_HRP: &str = "trip_";
pub const CALL_HRP: &str = "call_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub fn new_trip_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(TRIP_HRP)
}

pub fn new_call_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(CALL_HRP)
}
