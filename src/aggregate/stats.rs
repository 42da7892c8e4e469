//! Summary statistics over a set of survey records.

use std::collections::BTreeMap;

use chrono::{FixedOffset, Timelike};
use serde::Serialize;

use crate::models::SurveyRecord;

// ---

pub const UNKNOWN_REGION: &str = "unknown";

/// Width of one accuracy histogram bucket, in meters.
pub const BUCKET_WIDTH: f64 = 10.0;

/// Counts over one batch. Ordered maps and a sorted value list keep the
/// result identical regardless of the order records were folded in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    // ---
    pub by_investigator: BTreeMap<String, usize>,
    pub by_region: BTreeMap<String, usize>,
    /// Hour of day (0-23) in the batch's offset.
    pub by_time_of_day: BTreeMap<u32, usize>,
    /// Bucket floor in meters.
    pub accuracy_histogram: BTreeMap<i64, usize>,
    /// Ascending.
    pub accuracy_values: Vec<f64>,
}

impl AggregateStats {
    // ---
    pub fn add(&mut self, record: &SurveyRecord, offset: &FixedOffset) {
        // ---
        *self
            .by_investigator
            .entry(record.investigator_name.clone())
            .or_default() += 1;
        *self
            .by_region
            .entry(region_of(&record.road_address).to_string())
            .or_default() += 1;

        let hour = record.timestamp.with_timezone(offset).hour();
        *self.by_time_of_day.entry(hour).or_default() += 1;

        let accuracy = record.accuracy_meters;
        *self
            .accuracy_histogram
            .entry(bucket_of(accuracy))
            .or_default() += 1;

        let at = self
            .accuracy_values
            .partition_point(|v| v.total_cmp(&accuracy).is_le());
        self.accuracy_values.insert(at, accuracy);
    }

    pub fn total(&self) -> usize {
        self.accuracy_values.len()
    }

    /// Arithmetic mean of all accuracy readings, `None` for an empty batch.
    pub fn mean_accuracy(&self) -> Option<f64> {
        // ---
        if self.accuracy_values.is_empty() {
            return None;
        }
        let sum: f64 = self.accuracy_values.iter().sum();
        Some(sum / self.accuracy_values.len() as f64)
    }

    /// Histogram entries with their display labels, lowest bucket first.
    pub fn histogram_labels(&self) -> Vec<(String, usize)> {
        self.accuracy_histogram
            .iter()
            .map(|(b, n)| (bucket_label(*b), *n))
            .collect()
    }
}

/// Second whitespace-separated token of a road address (the district in
/// Korean addresses), or [`UNKNOWN_REGION`].
pub fn region_of(road_address: &str) -> &str {
    road_address
        .split_whitespace()
        .nth(1)
        .unwrap_or(UNKNOWN_REGION)
}

pub fn bucket_of(accuracy: f64) -> i64 {
    ((accuracy / BUCKET_WIDTH).floor() * BUCKET_WIDTH) as i64
}

/// Label for the half-open bucket `[floor, floor + 10)`.
pub fn bucket_label(floor: i64) -> String {
    format!("{}–{}", floor, floor + BUCKET_WIDTH as i64)
}
