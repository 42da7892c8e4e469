//! Artifact filenames: `{investigator}_{YYYYMMDD}_{HHMMSS}` plus suffixes.

use chrono::{DateTime, TimeZone};

use crate::models::PhotoSlot;

// ---

pub const RECORD_SUFFIX: &str = ".geojson";

/// Base name shared by a record and its photos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    base: String,
}

impl ArtifactName {
    // ---
    pub fn new<Tz: TimeZone>(investigator_name: &str, at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            base: format!(
                "{}_{}",
                sanitize(investigator_name),
                at.format("%Y%m%d_%H%M%S")
            ),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn record(&self) -> String {
        format!("{}{}", self.base, RECORD_SUFFIX)
    }

    pub fn photo(&self, slot: PhotoSlot) -> String {
        format!("{}{}", self.base, slot.file_suffix())
    }
}

/// Replace characters that would escape or break a single path component.
fn sanitize(name: &str) -> String {
    // ---
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
