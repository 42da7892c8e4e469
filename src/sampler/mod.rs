//! Timed location sampling and best-fix selection.
//!
//! A [`FixSampler`] runs one window per [`FixSampler::sample`] call: it
//! subscribes to a [`LocationProvider`], counts down while collecting fixes,
//! releases the subscription at expiry, asks a [`ConfirmationGate`], and
//! finally applies its [`SelectionPolicy`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SurveyError, SurveyResult};
use crate::models::{GeoFix, SurveyMetadata};

mod gpsd;
mod provider;
mod selection;
mod session;

pub use gpsd::{parse_report as parse_gpsd_report, GpsdProvider};
pub use provider::{
    parse_replay_line, LocationEvent, LocationProvider, ReplayProvider, ScriptedProvider,
    Subscription,
};
pub use selection::{best_fix, SelectionPolicy};
pub use session::{SamplerState, SamplingSession};

// ---

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Operator input for one window.
#[derive(Debug, Clone)]
pub struct SampleRequest {
    // ---
    pub investigator_name: String,
    pub place_name: String,
    pub duration: Duration,
}

/// Progress updates for whoever renders the sampling UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SamplerStatus {
    Started { session_id: Uuid, duration_secs: u64 },
    Countdown { remaining_secs: u64 },
    FixReceived { accuracy_meters: f64, collected: usize },
    ProviderError { message: String },
    CountdownCleared,
    Selected { accuracy_meters: f64 },
    Cancelled,
    NoFix,
}

/// What the gate sees when the window closes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    // ---
    pub session_id: Uuid,
    pub fixes_collected: usize,
    pub provider_errors: usize,
    pub duration_secs: u64,
}

/// Post-window confirmation step.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// `false` cancels the session: nothing is selected or written.
    async fn confirm(&self, summary: &WindowSummary) -> bool;
}

/// Deployments without a confirmation step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl ConfirmationGate for AutoConfirm {
    async fn confirm(&self, _summary: &WindowSummary) -> bool {
        true
    }
}

/// The chosen fix and the metadata that travels downstream with it.
#[derive(Debug, Clone)]
pub struct SelectedFix {
    // ---
    pub session_id: Uuid,
    pub fix: GeoFix,
    pub metadata: SurveyMetadata,
    pub fixes_collected: usize,
}

#[derive(Debug, Clone)]
pub enum SampleOutcome {
    Selected(SelectedFix),
    Cancelled { session_id: Uuid },
}

pub struct FixSampler {
    // ---
    provider: Box<dyn LocationProvider>,
    gate: Box<dyn ConfirmationGate>,
    policy: SelectionPolicy,
    status: Option<mpsc::UnboundedSender<SamplerStatus>>,
}

impl FixSampler {
    // ---
    pub fn new(provider: impl LocationProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            gate: Box::new(AutoConfirm),
            policy: SelectionPolicy::default(),
            status: None,
        }
    }

    pub fn with_gate(mut self, gate: impl ConfirmationGate + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_status(mut self, status: mpsc::UnboundedSender<SamplerStatus>) -> Self {
        self.status = Some(status);
        self
    }

    fn emit(&self, update: SamplerStatus) {
        if let Some(tx) = &self.status {
            // A dropped receiver just means nobody is watching.
            let _ = tx.send(update);
        }
    }

    /// Run one sampling window to completion.
    ///
    /// Returns `Err(Validation)` before any side effect when the request is
    /// incomplete, `Err(ProviderUnavailable)` when the location source cannot
    /// be subscribed, and `Err(NoFix)` when an accepted window collected
    /// nothing.
    #[tracing::instrument(skip_all, fields(investigator = %request.investigator_name))]
    pub async fn sample(&self, request: SampleRequest) -> SurveyResult<SampleOutcome> {
        // ---
        let metadata = SurveyMetadata::new(&request.investigator_name, &request.place_name)?;
        if request.duration.is_zero() {
            return Err(SurveyError::Validation(
                "sampling duration must be positive".to_string(),
            ));
        }

        let mut session = SamplingSession::new(metadata, request.duration);
        let subscription = self.provider.subscribe().await?;
        session.begin();

        info!(session = %session.id, duration_secs = request.duration.as_secs(), "sampling window started");
        self.emit(SamplerStatus::Started {
            session_id: session.id,
            duration_secs: request.duration.as_secs(),
        });
        self.emit(SamplerStatus::Countdown {
            remaining_secs: whole_secs_ceil(request.duration),
        });

        self.run_window(&mut session, subscription).await;
        self.emit(SamplerStatus::CountdownCleared);

        let summary = WindowSummary {
            session_id: session.id,
            fixes_collected: session.fixes().len(),
            provider_errors: session.provider_errors(),
            duration_secs: request.duration.as_secs(),
        };
        info!(
            session = %session.id,
            fixes = summary.fixes_collected,
            provider_errors = summary.provider_errors,
            "sampling window closed"
        );

        if !self.gate.confirm(&summary).await {
            session.cancel();
            info!(session = %session.id, "sampling cancelled at confirmation");
            self.emit(SamplerStatus::Cancelled);
            return Ok(SampleOutcome::Cancelled {
                session_id: session.id,
            });
        }

        let Some(fix) = session.finish(&self.policy) else {
            warn!(session = %session.id, "no fix received");
            self.emit(SamplerStatus::NoFix);
            return Err(SurveyError::NoFix);
        };

        info!(
            session = %session.id,
            accuracy_m = fix.accuracy_meters,
            policy = %self.policy,
            "best fix selected"
        );
        self.emit(SamplerStatus::Selected {
            accuracy_meters: fix.accuracy_meters,
        });

        Ok(SampleOutcome::Selected(SelectedFix {
            session_id: session.id,
            fix,
            metadata: session.metadata.clone(),
            fixes_collected: summary.fixes_collected,
        }))
    }

    /// Collect until the deadline, then drain what was already delivered and
    /// release the subscription. The subscription is consumed on every path.
    async fn run_window(&self, session: &mut SamplingSession, mut subscription: Subscription) {
        // ---
        let deadline = session
            .deadline()
            .unwrap_or_else(|| Instant::now() + session.duration);
        let expiry = time::sleep_until(deadline);
        tokio::pin!(expiry);

        let mut countdown = time::interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);
        let mut stream_open = true;

        loop {
            tokio::select! {
                biased;
                _ = &mut expiry => break,
                _ = countdown.tick() => {
                    let remaining = whole_secs_ceil(deadline.saturating_duration_since(Instant::now()));
                    if remaining > 0 {
                        self.emit(SamplerStatus::Countdown { remaining_secs: remaining });
                    }
                }
                event = subscription.next_event(), if stream_open => match event {
                    Some(event) => self.handle_event(session, event),
                    None => {
                        debug!(session = %session.id, "provider stream ended before expiry");
                        stream_open = false;
                    }
                },
            }
        }

        // Delivered before the cancel takes effect: still part of the window.
        while let Some(event) = subscription.try_next_event() {
            self.handle_event(session, event);
        }
        subscription.close().await;
        debug!(session = %session.id, "location subscription released");
    }

    fn handle_event(&self, session: &mut SamplingSession, event: LocationEvent) {
        // ---
        match event {
            LocationEvent::Fix(fix) => {
                if session.record_fix(fix) {
                    debug!(session = %session.id, accuracy_m = fix.accuracy_meters, "fix received");
                    self.emit(SamplerStatus::FixReceived {
                        accuracy_meters: fix.accuracy_meters,
                        collected: session.fixes().len(),
                    });
                } else {
                    warn!(session = %session.id, ?fix, "discarding fix with invalid values");
                    self.emit(SamplerStatus::ProviderError {
                        message: "discarded a fix with invalid values".to_string(),
                    });
                }
            }
            LocationEvent::Error(message) => {
                session.record_provider_error();
                warn!(session = %session.id, %message, "location provider error");
                self.emit(SamplerStatus::ProviderError { message });
            }
        }
    }
}

fn whole_secs_ceil(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
