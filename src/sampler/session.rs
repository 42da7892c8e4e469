//! Per-invocation sampling state.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::selection::SelectionPolicy;
use crate::models::{GeoFix, SurveyMetadata};

// ---

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SamplerState {
    /// No subscription is active.
    Idle,
    /// Subscription and countdown are running.
    Sampling,
    /// The operator declined at the confirmation gate.
    Cancelled,
    /// The window ran to expiry and was accepted.
    TimedOut,
}

impl SamplerState {
    // ---
    pub fn allowed_transitions(self) -> &'static [SamplerState] {
        use SamplerState::*;
        match self {
            Idle => &[Sampling],
            Sampling => &[Cancelled, TimedOut],
            Cancelled | TimedOut => &[],
        }
    }

    pub fn can_transition_to(self, next: SamplerState) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

/// Everything one sampling window owns. Built per `sample` call and dropped
/// with it, so a fresh window always starts from an empty fix sequence.
#[derive(Debug)]
pub struct SamplingSession {
    // ---
    pub id: Uuid,
    pub metadata: SurveyMetadata,
    pub duration: Duration,
    deadline: Option<Instant>,
    state: SamplerState,
    fixes: Vec<GeoFix>,
    provider_errors: usize,
}

impl SamplingSession {
    // ---
    pub fn new(metadata: SurveyMetadata, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata,
            duration,
            deadline: None,
            state: SamplerState::Idle,
            fixes: Vec::new(),
            provider_errors: 0,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn fixes(&self) -> &[GeoFix] {
        &self.fixes
    }

    pub fn provider_errors(&self) -> usize {
        self.provider_errors
    }

    /// When the window closes. Set by [`begin`](Self::begin).
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn transition(&mut self, next: SamplerState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal sampler transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(session = %self.id, from = ?self.state, to = ?next, "sampler transition");
        self.state = next;
    }

    pub fn begin(&mut self) {
        self.deadline = Some(Instant::now() + self.duration);
        self.transition(SamplerState::Sampling);
    }

    /// Append a fix. Fixes with a negative or non-finite radius or position
    /// are refused and counted as provider errors.
    pub fn record_fix(&mut self, fix: GeoFix) -> bool {
        // ---
        let valid = fix.accuracy_meters.is_finite()
            && fix.accuracy_meters >= 0.0
            && fix.latitude.is_finite()
            && fix.longitude.is_finite();
        if valid {
            self.fixes.push(fix);
        } else {
            self.provider_errors += 1;
        }
        valid
    }

    pub fn record_provider_error(&mut self) {
        self.provider_errors += 1;
    }

    /// Decline at the gate; collected fixes are discarded.
    pub fn cancel(&mut self) {
        self.fixes.clear();
        self.transition(SamplerState::Cancelled);
    }

    /// Accept the window and pick the best fix. The fix sequence is consumed
    /// either way.
    pub fn finish(&mut self, policy: &SelectionPolicy) -> Option<GeoFix> {
        // ---
        let fixes = std::mem::take(&mut self.fixes);
        self.transition(SamplerState::TimedOut);
        policy.select(&fixes)
    }
}
