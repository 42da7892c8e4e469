//! Field-survey toolkit.
//!
//! Two independent paths share one record schema:
//! - single record: [`sampler`] → [`geocode`] → [`artifact`], driven end to
//!   end by [`pipeline::SurveyPipeline`]
//! - batch analysis: [`aggregate`] → [`projection`]
//!
//! The binary in `main.rs` is a thin CLI over these modules; everything it
//! does is reachable from the library.

pub mod aggregate;
pub mod artifact;
pub mod config;
pub mod error;
pub mod geocode;
pub mod geojson;
pub mod models;
pub mod pipeline;
pub mod projection;
pub mod prompt;
pub mod sampler;

pub use aggregate::{aggregate, AggregateStats, Aggregator, BatchReport, InputFile};
pub use artifact::{select_sink, ArtifactSink, ArtifactWriter, PlatformCapabilities, WriteReport};
pub use config::{Config, PhotoConfig};
pub use error::{SurveyError, SurveyResult};
pub use geocode::{AddressResolver, KakaoResolver, NullResolver};
pub use models::{GeoFix, PhotoAttachment, PhotoSlot, SurveyMetadata, SurveyRecord};
pub use pipeline::{SavedSurvey, SurveyOutcome, SurveyPipeline};
pub use projection::{render_text_report, ColorCycle, ColorToken, LegendItem, MarkerSpec, RecordRow};
pub use sampler::{FixSampler, LocationProvider, SampleRequest, SamplerStatus, SelectionPolicy};
