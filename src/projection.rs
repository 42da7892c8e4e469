//! Plain-data payloads for the map, chart, and report renderers.
//!
//! Nothing here draws. Markers carry a color token, rows flatten records for
//! charting, and [`render_text_report`] produces the printable summary.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::Serialize;

use crate::aggregate::{region_of, BatchReport};
use crate::models::SurveyRecord;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorToken {
    Red,
    Blue,
    Green,
    Orange,
    Purple,
    Black,
    Brown,
    Magenta,
}

/// Red is reserved for the record sampled in this session.
const PALETTE: [ColorToken; 7] = [
    ColorToken::Blue,
    ColorToken::Green,
    ColorToken::Orange,
    ColorToken::Purple,
    ColorToken::Black,
    ColorToken::Brown,
    ColorToken::Magenta,
];

/// Per-session color assignment for loaded files. Wraps around the palette.
#[derive(Debug, Clone, Default)]
pub struct ColorCycle {
    issued: usize,
}

impl ColorCycle {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// How many colors have been handed out so far.
    pub fn issued(&self) -> usize {
        self.issued
    }
}

impl Iterator for ColorCycle {
    type Item = ColorToken;

    fn next(&mut self) -> Option<ColorToken> {
        let color = PALETTE[self.issued % PALETTE.len()];
        self.issued += 1;
        Some(color)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerSpec {
    // ---
    pub latitude: f64,
    pub longitude: f64,
    pub place_name: String,
    pub investigator: String,
    pub accuracy: f64,
    pub address: String,
    pub is_today: bool,
    pub color: ColorToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegendItem {
    pub label: String,
    pub color: ColorToken,
}

/// Markers and legend entries for one batch of loaded files.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapLayers {
    pub markers: Vec<MarkerSpec>,
    pub legend: Vec<LegendItem>,
}

/// One record flattened for chart and table renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRow {
    // ---
    pub investigator: String,
    pub place_name: String,
    pub road_address: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
    pub hour: u32,
    pub source_file: String,
    /// Index of the owning [`FileSummary`](crate::aggregate::FileSummary).
    #[serde(skip)]
    pub file_index: usize,
}

impl RecordRow {
    // ---
    pub fn from_record(
        record: &SurveyRecord,
        source_file: &str,
        file_index: usize,
        offset: &FixedOffset,
    ) -> Self {
        Self {
            investigator: record.investigator_name.clone(),
            place_name: record.place_name.clone(),
            road_address: record.road_address.clone(),
            region: region_of(&record.road_address).to_string(),
            latitude: record.latitude,
            longitude: record.longitude,
            accuracy: record.accuracy_meters,
            timestamp: record.timestamp,
            hour: record.timestamp.with_timezone(offset).hour(),
            source_file: source_file.to_string(),
            file_index,
        }
    }

    /// Timestamp, then investigator; remaining fields only break exact ties.
    pub fn cmp_display_order(a: &Self, b: &Self) -> Ordering {
        // ---
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.investigator.cmp(&b.investigator))
            .then_with(|| a.place_name.cmp(&b.place_name))
            .then_with(|| a.source_file.cmp(&b.source_file))
            .then_with(|| a.accuracy.total_cmp(&b.accuracy))
            .then_with(|| a.latitude.total_cmp(&b.latitude))
            .then_with(|| a.longitude.total_cmp(&b.longitude))
            .then_with(|| a.file_index.cmp(&b.file_index))
    }
}

// ---

/// Marker and legend entry for the record saved in this session.
pub fn today_marker(record: &SurveyRecord) -> (MarkerSpec, LegendItem) {
    // ---
    let marker = MarkerSpec {
        latitude: record.latitude,
        longitude: record.longitude,
        place_name: record.place_name.clone(),
        investigator: record.investigator_name.clone(),
        accuracy: record.accuracy_meters,
        address: record.road_address.clone(),
        is_today: true,
        color: ColorToken::Red,
    };
    let legend = LegendItem {
        label: format!("{} (today)", record.investigator_name),
        color: ColorToken::Red,
    };
    (marker, legend)
}

/// One color and legend entry per accepted file, in input order.
///
/// Files whose features were all skipped still take a color and fall back to
/// an `investigator {n}` label.
pub fn project_batch(report: &BatchReport, cycle: &mut ColorCycle) -> MapLayers {
    // ---
    let mut layers = MapLayers::default();

    for file in &report.files {
        let ordinal = cycle.issued() + 1;
        let Some(color) = cycle.next() else { break };

        let label = file
            .investigator
            .clone()
            .unwrap_or_else(|| format!("investigator {ordinal}"));
        layers.legend.push(LegendItem { label, color });

        layers.markers.extend(
            report
                .rows
                .iter()
                .filter(|row| row.file_index == file.index)
                .map(|row| MarkerSpec {
                    latitude: row.latitude,
                    longitude: row.longitude,
                    place_name: row.place_name.clone(),
                    investigator: row.investigator.clone(),
                    accuracy: row.accuracy,
                    address: row.road_address.clone(),
                    is_today: false,
                    color,
                }),
        );
    }

    layers
}

/// Printable analysis summary.
pub fn render_text_report(report: &BatchReport, generated_at: DateTime<FixedOffset>) -> String {
    // ---
    let stats = &report.stats;
    let mut lines = vec![
        "Field Survey Analysis Report".to_string(),
        format!("Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S %:z")),
        format!("Total locations: {}", stats.total()),
        "Locations by investigator:".to_string(),
    ];

    lines.extend(stats.by_investigator.iter().map(|(k, v)| format!("  {k}: {v}")));
    lines.push("Distribution by region:".to_string());
    lines.extend(stats.by_region.iter().map(|(k, v)| format!("  {k}: {v}")));

    lines.push(match stats.mean_accuracy() {
        Some(mean) => format!("Mean accuracy: {mean:.1} m"),
        None => "Mean accuracy: no data".to_string(),
    });

    lines.push("Accuracy histogram:".to_string());
    lines.extend(
        stats
            .histogram_labels()
            .into_iter()
            .map(|(label, n)| format!("  {label} m: {n}")),
    );

    lines.push(format!(
        "Skipped: {} file(s), {} feature(s)",
        report.skipped_files(),
        report.skipped_features
    ));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::aggregate::{aggregate, InputFile};
    use chrono::TimeZone;

    fn create_test_record(name: &str) -> SurveyRecord {
        // ---
        SurveyRecord {
            investigator_name: name.to_string(),
            place_name: "gate".to_string(),
            road_address: "서울특별시 중구 세종대로 110".to_string(),
            accuracy_meters: 7.5,
            timestamp: Utc.with_ymd_and_hms(2025, 5, 5, 2, 0, 0).unwrap(),
            longitude: 126.97,
            latitude: 37.56,
        }
    }

    fn create_test_input(name: &str, investigator: &str) -> InputFile {
        // ---
        let record = create_test_record(investigator);
        InputFile::new(name, crate::geojson::encode_record(&record).unwrap())
    }

    #[test]
    fn test_color_cycle_wraps_and_skips_red() {
        // ---
        let colors: Vec<_> = ColorCycle::new().take(9).collect();
        assert_eq!(colors[0], ColorToken::Blue);
        assert_eq!(colors[6], ColorToken::Magenta);
        assert_eq!(colors[7], ColorToken::Blue);
        assert!(!colors.contains(&ColorToken::Red));
    }

    #[test]
    fn test_today_marker_is_red() {
        // ---
        let (marker, legend) = today_marker(&create_test_record("jung"));
        assert!(marker.is_today);
        assert_eq!(marker.color, ColorToken::Red);
        assert_eq!(legend.label, "jung (today)");
    }

    #[test]
    fn test_one_color_per_file() {
        // ---
        let empty = InputFile::new(
            "empty.geojson",
            br#"{"type":"FeatureCollection","features":[]}"#.to_vec(),
        );
        let report = aggregate(&[
            create_test_input("a.geojson", "kim"),
            empty,
            create_test_input("b.geojson", "lee"),
        ]);

        let mut cycle = ColorCycle::new();
        let layers = project_batch(&report, &mut cycle);

        assert_eq!(cycle.issued(), 3);
        assert_eq!(
            layers.legend,
            vec![
                LegendItem { label: "kim".to_string(), color: ColorToken::Blue },
                LegendItem { label: "investigator 2".to_string(), color: ColorToken::Green },
                LegendItem { label: "lee".to_string(), color: ColorToken::Orange },
            ]
        );
        assert_eq!(layers.markers.len(), 2);
        assert!(layers.markers.iter().all(|m| !m.is_today));
    }

    #[test]
    fn test_same_named_files_keep_their_own_markers() {
        // ---
        let report = aggregate(&[
            create_test_input("kim.geojson", "kim"),
            create_test_input("kim.geojson", "lee"),
        ]);

        let layers = project_batch(&report, &mut ColorCycle::new());

        assert_eq!(report.rows.len(), 2);
        assert_eq!(layers.markers.len(), 2);
        for legend in &layers.legend {
            let markers: Vec<_> = layers
                .markers
                .iter()
                .filter(|m| m.investigator == legend.label)
                .collect();
            assert_eq!(markers.len(), 1, "{}", legend.label);
            assert_eq!(markers[0].color, legend.color);
        }
        assert_ne!(layers.legend[0].color, layers.legend[1].color);
    }

    #[test]
    fn test_marker_serializes_color_token() {
        // ---
        let (marker, _) = today_marker(&create_test_record("jung"));
        let value = serde_json::to_value(&marker).unwrap();
        assert_eq!(value["color"], "red");
        assert_eq!(value["isToday"], true);
    }

    #[test]
    fn test_text_report() {
        // ---
        let report = aggregate(&[
            create_test_input("a.geojson", "kim"),
            InputFile::new("bad.geojson", b"not json".to_vec()),
        ]);
        let at = FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 5, 5, 11, 0, 0)
            .unwrap();
        let text = render_text_report(&report, at);

        assert!(text.starts_with("Field Survey Analysis Report\n"));
        assert!(text.contains("Generated: 2025-05-05 11:00:00 +09:00"));
        assert!(text.contains("Total locations: 1"));
        assert!(text.contains("  kim: 1"));
        assert!(text.contains("  중구: 1"));
        assert!(text.contains("Mean accuracy: 7.5 m"));
        assert!(text.contains("  0–10 m: 1"));
        assert!(text.contains("Skipped: 1 file(s), 0 feature(s)"));
    }

    #[test]
    fn test_text_report_without_data() {
        // ---
        let at = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let text = render_text_report(&aggregate(&[]), at);
        assert!(text.contains("Total locations: 0"));
        assert!(text.contains("Mean accuracy: no data"));
    }
}
