//! Simple data models for the survey pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SurveyError, SurveyResult};

// ---

/// One raw sample from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFix {
    // ---
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of the 68% confidence circle, in meters.
    pub accuracy_meters: f64,
    pub timestamp_millis: i64,
}

/// The durable unit: one address-annotated best fix plus operator metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyRecord {
    // ---
    pub investigator_name: String,
    pub place_name: String,
    pub road_address: String,
    pub accuracy_meters: f64,
    pub timestamp: DateTime<Utc>,
    pub longitude: f64,
    pub latitude: f64,
}

/// Operator-entered metadata that travels with a sampling session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyMetadata {
    // ---
    pub investigator_name: String,
    pub place_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhotoSlot {
    Wide,
    Close,
}

/// Photo blob for one slot. Consumed by the artifact write.
#[derive(Clone)]
pub struct PhotoAttachment {
    // ---
    pub slot: PhotoSlot,
    pub bytes: Vec<u8>,
}

// ---

impl GeoFix {
    // ---
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: f64, timestamp_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            timestamp_millis,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_millis)
    }

    /// Annotate the fix with metadata and a resolved address.
    pub fn to_record(&self, meta: &SurveyMetadata, road_address: String) -> SurveyResult<SurveyRecord> {
        // ---
        let timestamp = self.timestamp().ok_or_else(|| {
            SurveyError::Validation(format!(
                "fix timestamp {} ms is out of range",
                self.timestamp_millis
            ))
        })?;

        Ok(SurveyRecord {
            investigator_name: meta.investigator_name.clone(),
            place_name: meta.place_name.clone(),
            road_address,
            accuracy_meters: self.accuracy_meters,
            timestamp,
            longitude: self.longitude,
            latitude: self.latitude,
        })
    }
}

impl SurveyMetadata {
    // ---
    /// Trim operator input and reject an empty investigator name.
    pub fn new(investigator_name: &str, place_name: &str) -> SurveyResult<Self> {
        // ---
        let investigator_name = investigator_name.trim();
        if investigator_name.is_empty() {
            return Err(SurveyError::Validation(
                "investigator name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            investigator_name: investigator_name.to_string(),
            place_name: place_name.trim().to_string(),
        })
    }
}

impl PhotoSlot {
    // ---
    pub const ALL: [PhotoSlot; 2] = [PhotoSlot::Wide, PhotoSlot::Close];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoSlot::Wide => "wide",
            PhotoSlot::Close => "close",
        }
    }

    /// Filename suffix appended to the artifact base name.
    pub fn file_suffix(&self) -> String {
        format!("_{}.jpg", self.as_str())
    }
}

impl fmt::Display for PhotoSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PhotoAttachment {
    pub fn new(slot: PhotoSlot, bytes: Vec<u8>) -> Self {
        Self { slot, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for PhotoAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoAttachment")
            .field("slot", &self.slot)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn create_test_fix(accuracy: f64) -> GeoFix {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        GeoFix::new(37.4979, 127.0276, accuracy, ts.timestamp_millis())
    }

    #[test]
    fn test_fix_to_record() {
        // ---
        let meta = SurveyMetadata::new("kim", "Gangnam station").unwrap();
        let record = create_test_fix(4.5)
            .to_record(&meta, "서울특별시 강남구 강남대로 396".to_string())
            .unwrap();

        assert_eq!(record.investigator_name, "kim");
        assert_eq!(record.place_name, "Gangnam station");
        assert_eq!(record.road_address, "서울특별시 강남구 강남대로 396");
        assert_eq!(record.accuracy_meters, 4.5);
        assert_eq!(record.latitude, 37.4979);
        assert_eq!(record.longitude, 127.0276);
        assert_eq!(record.timestamp.hour(), 18);
    }

    #[test]
    fn test_metadata_trims_and_validates() {
        // ---
        let meta = SurveyMetadata::new("  lee  ", " park ").unwrap();
        assert_eq!(meta.investigator_name, "lee");
        assert_eq!(meta.place_name, "park");

        // Place name may be empty
        assert!(SurveyMetadata::new("lee", "").is_ok());

        // Investigator name may not
        assert!(matches!(
            SurveyMetadata::new("   ", "park"),
            Err(SurveyError::Validation(_))
        ));
    }

    #[test]
    fn test_out_of_range_timestamp_is_rejected() {
        // ---
        let meta = SurveyMetadata::new("kim", "").unwrap();
        let fix = GeoFix::new(0.0, 0.0, 1.0, i64::MAX);
        assert!(matches!(
            fix.to_record(&meta, String::new()),
            Err(SurveyError::Validation(_))
        ));
    }

    #[test]
    fn test_photo_slot_suffixes() {
        // ---
        assert_eq!(PhotoSlot::Wide.file_suffix(), "_wide.jpg");
        assert_eq!(PhotoSlot::Close.file_suffix(), "_close.jpg");
        assert_eq!(PhotoSlot::Close.to_string(), "close");
    }

    #[test]
    fn test_fix_json_shape() {
        // ---
        let fix: GeoFix = serde_json::from_str(
            r#"{"latitude":35.84,"longitude":128.76,"accuracyMeters":12.0,"timestampMillis":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(fix.accuracy_meters, 12.0);
        assert_eq!(fix.timestamp_millis, 1_700_000_000_000);
    }
}
