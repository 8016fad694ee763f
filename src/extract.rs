//! Typed extraction of vehicle telemetry from raw feed entities.

use serde_json::Value;
use tracing::debug;

use crate::error::ExtractionError;
use crate::metrics::MetricsRegistry;
use crate::telemetry::{Position, VehicleTelemetry};

/// Walks a dotted path through nested objects.
fn lookup<'a>(entity: &'a Value, path: &'static str) -> Result<&'a Value, ExtractionError> {
    path.split('.').try_fold(entity, |node, key| match node {
        Value::Object(map) => map.get(key).ok_or(ExtractionError::MissingField(path)),
        _ => Err(ExtractionError::MissingField(path)),
    })
}

fn string_at(entity: &Value, path: &'static str) -> Result<String, ExtractionError> {
    lookup(entity, path)?
        .as_str()
        .map(str::to_string)
        .ok_or(ExtractionError::WrongType {
            path,
            expected: "a string",
        })
}

fn integer_at(entity: &Value, path: &'static str) -> Result<i64, ExtractionError> {
    lookup(entity, path)?
        .as_i64()
        .ok_or(ExtractionError::WrongType {
            path,
            expected: "an integer",
        })
}

fn number_at(entity: &Value, path: &'static str) -> Result<f64, ExtractionError> {
    lookup(entity, path)?
        .as_f64()
        .ok_or(ExtractionError::WrongType {
            path,
            expected: "a number",
        })
}

fn read_entity(entity: &Value, source: &str) -> Result<VehicleTelemetry, ExtractionError> {
    if !entity.is_object() {
        return Err(ExtractionError::NotAnObject);
    }

    Ok(VehicleTelemetry {
        source: source.to_string(),
        trip_id: string_at(entity, "vehicle.trip.trip_id")?,
        route_id: string_at(entity, "vehicle.trip.route_id")?,
        vehicle_id: string_at(entity, "vehicle.vehicle.id")?,
        status: string_at(entity, "vehicle.current_status")?,
        timestamp: integer_at(entity, "vehicle.timestamp")?,
        position: Position::new(
            number_at(entity, "vehicle.position.longitude")?,
            number_at(entity, "vehicle.position.latitude")?,
        ),
    })
}

/// Extracts one [`VehicleTelemetry`] from a feed entity.
///
/// Every attempt is timed in `record_extraction_seconds`. A success bumps
/// `record_count_total`; a failure bumps `exceptions_total` only, and the
/// caller decides how to count it.
///
/// # Errors
///
/// Returns [`ExtractionError`] if the entity is not an object or any required
/// field is missing or of the wrong type.
pub fn extract(
    entity: &Value,
    source: &str,
    metrics: &MetricsRegistry,
) -> Result<VehicleTelemetry, ExtractionError> {
    let _timer = metrics.extraction_duration.start_timer();

    let telemetry = metrics.track(read_entity(entity, source))?;
    metrics.records_extracted.inc();
    debug!(vehicle_id = %telemetry.vehicle_id, "Extracted vehicle telemetry");
    Ok(telemetry)
}
