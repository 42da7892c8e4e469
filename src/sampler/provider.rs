//! Location sources and the subscription handle the sampler drains.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{SurveyError, SurveyResult};
use crate::models::GeoFix;

// ---

const SUBSCRIPTION_BUFFER: usize = 64;

/// One item of a location stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Fix(GeoFix),
    /// A non-fatal provider problem (timeout, lost signal, garbled report).
    Error(String),
}

/// A continuous location subscription.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Start delivering events. Fails only when the source cannot be used at
    /// all; problems after that arrive as [`LocationEvent::Error`].
    async fn subscribe(&self) -> SurveyResult<Subscription>;
}

/// Receiving end of a provider's event stream.
///
/// The producing task is aborted by [`Subscription::close`] or, failing that,
/// when the handle is dropped, so a subscription can never outlive its owner.
pub struct Subscription {
    // ---
    rx: mpsc::Receiver<LocationEvent>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    // ---
    /// Run `producer` as a background task feeding this subscription.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<LocationEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(producer(tx));
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Wait for the next event. `None` once the producer has finished.
    pub async fn next_event(&mut self) -> Option<LocationEvent> {
        self.rx.recv().await
    }

    /// An event that was already delivered, without waiting.
    pub fn try_next_event(&mut self) -> Option<LocationEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop the producer and wait until it has been torn down.
    pub async fn close(mut self) {
        // ---
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancelled is the expected outcome here.
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---

/// Replays a JSON-lines file of [`GeoFix`] values at a fixed pace.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    // ---
    path: PathBuf,
    interval: Duration,
}

impl ReplayProvider {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }
}

/// Parse one replay line. Blank lines yield `None`.
pub fn parse_replay_line(line: &str) -> Option<LocationEvent> {
    // ---
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<GeoFix>(line) {
        Ok(fix) => LocationEvent::Fix(fix),
        Err(e) => LocationEvent::Error(format!("unreadable replay line: {e}")),
    })
}

#[async_trait]
impl LocationProvider for ReplayProvider {
    async fn subscribe(&self) -> SurveyResult<Subscription> {
        // ---
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SurveyError::ProviderUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let events: Vec<LocationEvent> = text.lines().filter_map(parse_replay_line).collect();
        tracing::debug!(path = %self.path.display(), events = events.len(), "replay loaded");

        let interval = self.interval;
        Ok(Subscription::spawn(move |tx| async move {
            for event in events {
                tokio::time::sleep(interval).await;
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }))
    }
}

// ---

/// Emits a prepared list of `(delay, event)` pairs, then stays open until
/// cancelled. Records whether its producer was released.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    // ---
    script: Vec<(Duration, LocationEvent)>,
    unavailable: bool,
    subscriptions: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ScriptedProvider {
    // ---
    pub fn new(script: Vec<(Duration, LocationEvent)>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// A provider whose subscribe call always fails.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Each fix delivered `every` apart.
    pub fn fixes_every(every: Duration, fixes: impl IntoIterator<Item = GeoFix>) -> Self {
        Self::new(
            fixes
                .into_iter()
                .map(|fix| (every, LocationEvent::Fix(fix)))
                .collect(),
        )
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// True once the most recent subscription's producer has been torn down.
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for ScriptedProvider {
    async fn subscribe(&self) -> SurveyResult<Subscription> {
        // ---
        if self.unavailable {
            return Err(SurveyError::ProviderUnavailable(
                "scripted provider has no location capability".to_string(),
            ));
        }

        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.released.store(false, Ordering::SeqCst);

        let script = self.script.clone();
        let guard = ReleaseGuard(self.released.clone());
        Ok(Subscription::spawn(move |tx| async move {
            let _guard = guard;
            for (delay, event) in script {
                tokio::time::sleep(delay).await;
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        }))
    }
}
