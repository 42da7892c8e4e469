//! Single-record path: sample, resolve, write.

use tracing::{debug, info};
use uuid::Uuid;

use crate::artifact::{ArtifactWriter, WriteReport};
use crate::error::SurveyResult;
use crate::geocode::AddressResolver;
use crate::models::{PhotoAttachment, SurveyRecord};
use crate::projection::{today_marker, LegendItem, MarkerSpec};
use crate::sampler::{FixSampler, SampleOutcome, SampleRequest};

// ---

#[derive(Debug)]
pub struct SavedSurvey {
    // ---
    pub session_id: Uuid,
    pub record: SurveyRecord,
    pub fixes_collected: usize,
    pub report: WriteReport,
    pub marker: MarkerSpec,
    pub legend: LegendItem,
}

#[derive(Debug)]
pub enum SurveyOutcome {
    Saved(Box<SavedSurvey>),
    /// Declined at the confirmation gate. Nothing was resolved or written.
    Cancelled { session_id: Uuid },
}

pub struct SurveyPipeline {
    // ---
    sampler: FixSampler,
    resolver: Box<dyn AddressResolver>,
    writer: ArtifactWriter,
}

impl SurveyPipeline {
    // ---
    pub fn new(
        sampler: FixSampler,
        resolver: impl AddressResolver + 'static,
        writer: ArtifactWriter,
    ) -> Self {
        Self {
            sampler,
            resolver: Box::new(resolver),
            writer,
        }
    }

    pub fn with_boxed_resolver(
        sampler: FixSampler,
        resolver: Box<dyn AddressResolver>,
        writer: ArtifactWriter,
    ) -> Self {
        Self {
            sampler,
            resolver,
            writer,
        }
    }

    /// Run one survey end to end.
    ///
    /// Sampling errors (`Validation`, `ProviderUnavailable`, `NoFix`) end the
    /// run before anything is written. Per-artifact write failures are
    /// reported in [`SavedSurvey::report`] rather than returned.
    pub async fn run(
        &self,
        request: SampleRequest,
        photos: Vec<PhotoAttachment>,
    ) -> SurveyResult<SurveyOutcome> {
        // ---
        // Step 1: sampling window
        debug!("survey - Step 1");
        let selected = match self.sampler.sample(request).await? {
            SampleOutcome::Selected(selected) => selected,
            SampleOutcome::Cancelled { session_id } => {
                return Ok(SurveyOutcome::Cancelled { session_id });
            }
        };

        // Step 2: address lookup
        debug!("survey - Step 2");
        let fix = selected.fix;
        let road_address = self.resolver.resolve(fix.latitude, fix.longitude).await;

        // Step 3: write record and photos
        debug!("survey - Step 3");
        let record = fix.to_record(&selected.metadata, road_address)?;
        let report = self.writer.write(&record, photos).await;

        let (marker, legend) = today_marker(&record);
        info!(
            session = %selected.session_id,
            accuracy_meters = record.accuracy_meters,
            record_saved = report.record_saved(),
            failures = report.failures().len(),
            "survey complete"
        );

        Ok(SurveyOutcome::Saved(Box::new(SavedSurvey {
            session_id: selected.session_id,
            record,
            fixes_collected: selected.fixes_collected,
            report,
            marker,
            legend,
        })))
    }
}
