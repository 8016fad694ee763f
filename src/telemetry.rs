//! Normalized vehicle telemetry and its wire form.

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub longitude: f64,
    pub latitude: f64,
}

impl Position {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// One vehicle's reported state, as extracted from a feed entity.
///
/// Only [`crate::extract`] builds these, and only when every field resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleTelemetry {
    pub source: String,
    pub trip_id: String,
    pub route_id: String,
    pub vehicle_id: String,
    pub status: String,
    pub timestamp: i64,
    pub position: Position,
}

impl VehicleTelemetry {
    /// Generic object id used by the telemetry service; always the vehicle id.
    pub fn object_id(&self) -> &str {
        &self.vehicle_id
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord<'a> {
    source: &'a str,
    trip_id: &'a str,
    route_id: &'a str,
    object_id: &'a str,
    vehicle_id: &'a str,
    status: &'a str,
    timestamp: i64,
    position: Position,
}

impl Serialize for VehicleTelemetry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireRecord {
            source: &self.source,
            trip_id: &self.trip_id,
            route_id: &self.route_id,
            object_id: self.object_id(),
            vehicle_id: &self.vehicle_id,
            status: &self.status,
            timestamp: self.timestamp,
            position: self.position,
        }
        .serialize(serializer)
    }
}
