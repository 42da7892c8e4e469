//! Artifact persistence for a finished survey record.
//!
//! One record produces up to three independent writes: the GeoJSON file and
//! one JPEG per photo slot. Photo validation and re-encoding run before any
//! write is attempted; a failure in one write leaves the others untouched.

use std::path::PathBuf;

use chrono::Local;
use tracing::{info, warn};

use crate::config::PhotoConfig;
use crate::error::{SurveyError, SurveyResult};
use crate::geojson;
use crate::models::{PhotoAttachment, PhotoSlot, SurveyRecord};

mod naming;
mod photo;
mod sink;

pub use naming::{ArtifactName, RECORD_SUFFIX};
pub use photo::prepare_photo;
pub use sink::{
    select_sink, ArtifactSink, DirectDownload, PlatformCapabilities, SharePrompt, ShareHandoff,
    SinkKind,
};

// ---

/// Outcome of one photo slot.
#[derive(Debug)]
pub enum PhotoWrite {
    /// No attachment was supplied for the slot.
    Missing,
    Written(PathBuf),
    Failed(SurveyError),
}

#[derive(Debug)]
pub struct WriteReport {
    // ---
    pub name: ArtifactName,
    pub record: SurveyResult<PathBuf>,
    pub wide: PhotoWrite,
    pub close: PhotoWrite,
}

impl WriteReport {
    // ---
    pub fn record_saved(&self) -> bool {
        self.record.is_ok()
    }

    pub fn photo(&self, slot: PhotoSlot) -> &PhotoWrite {
        match slot {
            PhotoSlot::Wide => &self.wide,
            PhotoSlot::Close => &self.close,
        }
    }

    /// Every failed write, record first.
    pub fn failures(&self) -> Vec<&SurveyError> {
        // ---
        let mut out = Vec::new();
        if let Err(e) = &self.record {
            out.push(e);
        }
        for slot in PhotoSlot::ALL {
            if let PhotoWrite::Failed(e) = self.photo(slot) {
                out.push(e);
            }
        }
        out
    }
}

pub struct ArtifactWriter {
    // ---
    sink: Box<dyn ArtifactSink>,
    photo: PhotoConfig,
}

impl ArtifactWriter {
    // ---
    pub fn new(sink: Box<dyn ArtifactSink>, photo: PhotoConfig) -> Self {
        Self { sink, photo }
    }

    /// Persist a record and its photos, naming them from the local clock.
    pub async fn write(&self, record: &SurveyRecord, photos: Vec<PhotoAttachment>) -> WriteReport {
        let name = ArtifactName::new(&record.investigator_name, &Local::now());
        self.write_named(name, record, photos).await
    }

    #[tracing::instrument(skip_all, fields(base = %name.base(), sink = ?self.sink.kind()))]
    pub async fn write_named(
        &self,
        name: ArtifactName,
        record: &SurveyRecord,
        photos: Vec<PhotoAttachment>,
    ) -> WriteReport {
        // ---
        // Photo checks and re-encoding finish before anything is written.
        let mut photos = photos;
        let wide = take_slot(&mut photos, PhotoSlot::Wide);
        let close = take_slot(&mut photos, PhotoSlot::Close);
        drop(photos);
        let (wide, close) = tokio::join!(self.prepare_slot(wide), self.prepare_slot(close));

        let record_result = self.write_record(&name, record).await;

        let (wide, close) = tokio::join!(
            self.write_photo(&name, PhotoSlot::Wide, wide),
            self.write_photo(&name, PhotoSlot::Close, close),
        );

        WriteReport {
            name,
            record: record_result,
            wide,
            close,
        }
    }

    /// Decode and re-encode on the blocking pool.
    async fn prepare_slot(&self, photo: Option<PhotoAttachment>) -> Option<SurveyResult<Vec<u8>>> {
        // ---
        let photo = photo?;
        let slot = photo.slot;
        let config = self.photo;

        match tokio::task::spawn_blocking(move || prepare_photo(&photo, &config)).await {
            Ok(result) => Some(result),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Some(Err(SurveyError::Image {
                slot,
                source: image::ImageError::IoError(std::io::Error::other(e)),
            })),
        }
    }

    async fn write_record(&self, name: &ArtifactName, record: &SurveyRecord) -> SurveyResult<PathBuf> {
        // ---
        let filename = name.record();
        let bytes = geojson::encode_record(record).map_err(|e| SurveyError::Format {
            file: filename.clone(),
            reason: e.to_string(),
        })?;

        let result = self.sink.write(&bytes, &filename).await;
        log_outcome(&filename, &result);
        result
    }

    async fn write_photo(
        &self,
        name: &ArtifactName,
        slot: PhotoSlot,
        prepared: Option<SurveyResult<Vec<u8>>>,
    ) -> PhotoWrite {
        // ---
        let filename = name.photo(slot);
        let bytes = match prepared {
            None => {
                tracing::debug!(%slot, "no photo attached");
                return PhotoWrite::Missing;
            }
            Some(Err(e)) => {
                warn!(%slot, error = %e, "photo skipped");
                return PhotoWrite::Failed(e);
            }
            Some(Ok(bytes)) => bytes,
        };

        let result = self.sink.write(&bytes, &filename).await;
        log_outcome(&filename, &result);
        match result {
            Ok(path) => PhotoWrite::Written(path),
            Err(e) => PhotoWrite::Failed(e),
        }
    }
}

/// First non-empty attachment for `slot`.
fn take_slot(photos: &mut Vec<PhotoAttachment>, slot: PhotoSlot) -> Option<PhotoAttachment> {
    let index = photos.iter().position(|p| p.slot == slot && !p.is_empty())?;
    Some(photos.remove(index))
}

fn log_outcome(filename: &str, result: &SurveyResult<PathBuf>) {
    // ---
    match result {
        Ok(path) => info!(file = filename, path = %path.display(), "artifact saved"),
        Err(e) if e.is_user_decision() => info!(file = filename, "{}", e),
        Err(e) => warn!(file = filename, error = %e, "artifact write failed"),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};

    /// Records filenames; refuses any listed in `refuse`.
    #[derive(Clone, Default)]
    struct MemorySink {
        written: Arc<Mutex<Vec<String>>>,
        refuse: Vec<String>,
    }

    #[async_trait]
    impl ArtifactSink for MemorySink {
        fn kind(&self) -> SinkKind {
            SinkKind::DirectDownload
        }

        async fn write(&self, _bytes: &[u8], filename: &str) -> SurveyResult<PathBuf> {
            if self.refuse.iter().any(|r| filename.ends_with(r.as_str())) {
                return Err(SurveyError::PersistenceCancelled {
                    filename: filename.to_string(),
                });
            }
            self.written.lock().unwrap().push(filename.to_string());
            Ok(PathBuf::from(filename))
        }
    }

    fn create_test_record() -> SurveyRecord {
        // ---
        SurveyRecord {
            investigator_name: "han".to_string(),
            place_name: "pier".to_string(),
            road_address: String::new(),
            accuracy_meters: 3.0,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
            longitude: 129.07,
            latitude: 35.18,
        }
    }

    fn create_test_name() -> ArtifactName {
        ArtifactName::new("han", &Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 5).unwrap())
    }

    fn create_test_jpeg() -> Vec<u8> {
        // ---
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_missing_photos_are_not_errors() {
        // ---
        let sink = MemorySink::default();
        let writer = ArtifactWriter::new(Box::new(sink.clone()), PhotoConfig::default());

        let report = writer
            .write_named(create_test_name(), &create_test_record(), vec![])
            .await;

        assert!(report.record_saved());
        assert!(matches!(report.wide, PhotoWrite::Missing));
        assert!(matches!(report.close, PhotoWrite::Missing));
        assert!(report.failures().is_empty());
        assert_eq!(*sink.written.lock().unwrap(), vec!["han_20250601_100005.geojson"]);
    }

    #[tokio::test]
    async fn test_oversize_photo_does_not_block_others() {
        // ---
        let sink = MemorySink::default();
        let writer = ArtifactWriter::new(Box::new(sink.clone()), PhotoConfig::default());
        let photos = vec![
            PhotoAttachment::new(PhotoSlot::Wide, vec![0u8; 5 * 1024 * 1024 + 1]),
            PhotoAttachment::new(PhotoSlot::Close, create_test_jpeg()),
        ];

        let report = writer
            .write_named(create_test_name(), &create_test_record(), photos)
            .await;

        assert!(report.record_saved());
        assert!(matches!(
            report.wide,
            PhotoWrite::Failed(SurveyError::OversizeAttachment { .. })
        ));
        assert!(matches!(report.close, PhotoWrite::Written(_)));

        let written = sink.written.lock().unwrap().clone();
        assert_eq!(written[0], "han_20250601_100005.geojson");
        assert!(written.contains(&"han_20250601_100005_close.jpg".to_string()));
        assert!(!written.iter().any(|f| f.ends_with("_wide.jpg")));
    }

    #[tokio::test]
    async fn test_record_failure_does_not_block_photos() {
        // ---
        let sink = MemorySink {
            refuse: vec![".geojson".to_string()],
            ..MemorySink::default()
        };
        let writer = ArtifactWriter::new(Box::new(sink.clone()), PhotoConfig::default());
        let photos = vec![
            PhotoAttachment::new(PhotoSlot::Wide, create_test_jpeg()),
            PhotoAttachment::new(PhotoSlot::Close, create_test_jpeg()),
        ];

        let report = writer
            .write_named(create_test_name(), &create_test_record(), photos)
            .await;

        assert!(!report.record_saved());
        assert!(matches!(report.wide, PhotoWrite::Written(_)));
        assert!(matches!(report.close, PhotoWrite::Written(_)));
        assert_eq!(report.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_photo_fails_only_its_slot() {
        // ---
        let sink = MemorySink::default();
        let writer = ArtifactWriter::new(Box::new(sink.clone()), PhotoConfig::default());
        let photos = vec![
            PhotoAttachment::new(PhotoSlot::Wide, create_test_jpeg()),
            PhotoAttachment::new(PhotoSlot::Close, b"not an image".to_vec()),
        ];

        let report = writer
            .write_named(create_test_name(), &create_test_record(), photos)
            .await;

        assert!(report.record_saved());
        assert!(matches!(report.wide, PhotoWrite::Written(_)));
        assert!(matches!(
            report.close,
            PhotoWrite::Failed(SurveyError::Image { slot: PhotoSlot::Close, .. })
        ));
        assert_eq!(sink.written.lock().unwrap().len(), 2);
    }
}
