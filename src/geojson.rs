//! GeoJSON wire format for survey records.
//!
//! A saved record is a `FeatureCollection` holding one `Point` feature whose
//! coordinates are `[lon, lat]`. Batch inputs may carry several features; each
//! one is validated on its own so a single bad feature never poisons the file.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SurveyError, SurveyResult};
use crate::models::SurveyRecord;

// ---

const FEATURE_COLLECTION: &str = "FeatureCollection";
const FEATURE: &str = "Feature";
const POINT: &str = "Point";

#[derive(Debug, Serialize, Deserialize)]
pub struct FeatureCollection {
    // ---
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Feature {
    // ---
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: Geometry,
    pub properties: Properties,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Geometry {
    // ---
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Properties {
    // ---
    pub name: String,
    #[serde(default)]
    pub placename: Option<String>,
    #[serde(default)]
    pub road_address: Option<String>,
    pub accuracy: f64,
    pub timestamp: String,
}

/// Records recovered from one batch input file.
#[derive(Debug, Default)]
pub struct ParsedCollection {
    // ---
    pub records: Vec<SurveyRecord>,
    pub skipped_features: usize,
}

// ---

pub fn to_feature_collection(record: &SurveyRecord) -> FeatureCollection {
    // ---
    FeatureCollection {
        kind: FEATURE_COLLECTION.to_string(),
        features: vec![Feature {
            kind: FEATURE.to_string(),
            geometry: Geometry {
                kind: POINT.to_string(),
                coordinates: vec![record.longitude, record.latitude],
            },
            properties: Properties {
                name: record.investigator_name.clone(),
                placename: Some(record.place_name.clone()),
                road_address: Some(record.road_address.clone()),
                accuracy: record.accuracy_meters,
                timestamp: record
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            },
        }],
    }
}

/// Serialize a record as pretty-printed GeoJSON (two-space indent).
pub fn encode_record(record: &SurveyRecord) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(&to_feature_collection(record))
}

/// Decode a single-record file. Fails unless the file holds at least one
/// valid feature; the first valid one wins.
pub fn decode_record(file: &str, bytes: &[u8]) -> SurveyResult<SurveyRecord> {
    // ---
    parse_collection(file, bytes)?
        .records
        .into_iter()
        .next()
        .ok_or_else(|| SurveyError::Format {
            file: file.to_string(),
            reason: "no valid feature".to_string(),
        })
}

/// Parse a batch input file.
///
/// A wrong top-level type or a missing/non-array `features` member rejects
/// the whole file. Individual features that fail validation are counted in
/// [`ParsedCollection::skipped_features`].
pub fn parse_collection(file: &str, bytes: &[u8]) -> SurveyResult<ParsedCollection> {
    // ---
    let format_error = |reason: String| SurveyError::Format {
        file: file.to_string(),
        reason,
    };

    let root: Value =
        serde_json::from_slice(bytes).map_err(|e| format_error(format!("invalid JSON: {e}")))?;

    if root.get("type").and_then(Value::as_str) != Some(FEATURE_COLLECTION) {
        return Err(format_error("top-level type is not FeatureCollection".to_string()));
    }

    let features = root
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| format_error("missing or malformed features array".to_string()))?;

    let mut parsed = ParsedCollection::default();
    for (i, item) in features.iter().enumerate() {
        match feature_to_record(item) {
            Ok(record) => parsed.records.push(record),
            Err(reason) => {
                tracing::debug!(file, feature = i, %reason, "skipping malformed feature");
                parsed.skipped_features += 1;
            }
        }
    }

    Ok(parsed)
}

fn feature_to_record(item: &Value) -> Result<SurveyRecord, String> {
    // ---
    let geometry = item.get("geometry").ok_or("missing geometry")?;
    if geometry.get("type").and_then(Value::as_str) != Some(POINT) {
        return Err("geometry is not a Point".to_string());
    }

    let coords: Vec<f64> = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .ok_or("missing coordinates")?
        .iter()
        .map(|c| c.as_f64().filter(|v| v.is_finite()))
        .collect::<Option<_>>()
        .ok_or("coordinates are not numbers")?;
    let &[longitude, latitude, ..] = coords.as_slice() else {
        return Err("coordinates need at least [lon, lat]".to_string());
    };

    let props: Properties = serde_json::from_value(
        item.get("properties").cloned().ok_or("missing properties")?,
    )
    .map_err(|e| format!("bad properties: {e}"))?;

    if props.name.trim().is_empty() {
        return Err("empty investigator name".to_string());
    }
    if !props.accuracy.is_finite() || props.accuracy < 0.0 {
        return Err(format!("invalid accuracy {}", props.accuracy));
    }
    let timestamp = DateTime::parse_from_rfc3339(&props.timestamp)
        .map_err(|e| format!("bad timestamp {:?}: {e}", props.timestamp))?
        .with_timezone(&Utc);

    Ok(SurveyRecord {
        investigator_name: props.name,
        place_name: props.placename.unwrap_or_default(),
        road_address: props.road_address.unwrap_or_default(),
        accuracy_meters: props.accuracy,
        timestamp,
        longitude,
        latitude,
    })
}
