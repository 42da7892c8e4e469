//! gpsd client: streams `TPV` reports from a local gpsd daemon.
//!
//! Protocol reference: gpsd speaks newline-delimited JSON. After `?WATCH=`
//! with `"json":true` it pushes `VERSION`, `DEVICES`, `WATCH`, `SKY` and
//! `TPV` objects; only `TPV` (time-position-velocity) carries a position.

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::provider::{LocationEvent, LocationProvider, Subscription};
use crate::error::{SurveyError, SurveyResult};
use crate::models::GeoFix;

// ---

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Debug, Clone)]
pub struct GpsdProvider {
    addr: String,
}

impl GpsdProvider {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl LocationProvider for GpsdProvider {
    async fn subscribe(&self) -> SurveyResult<Subscription> {
        // ---
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| SurveyError::ProviderUnavailable(format!("gpsd at {}: {e}", self.addr)))?;
        stream
            .write_all(WATCH_COMMAND)
            .await
            .map_err(|e| SurveyError::ProviderUnavailable(format!("gpsd watch request: {e}")))?;

        tracing::info!(addr = %self.addr, "subscribed to gpsd");

        Ok(Subscription::spawn(move |tx| async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                let (event, done) = match lines.next_line().await {
                    Ok(Some(line)) => match parse_report(&line) {
                        Some(event) => (event, false),
                        None => continue,
                    },
                    Ok(None) => (LocationEvent::Error("gpsd closed the connection".to_string()), true),
                    Err(e) => (LocationEvent::Error(format!("gpsd read failed: {e}")), true),
                };
                if tx.send(event).await.is_err() || done {
                    return;
                }
            }
        }))
    }
}

/// Map one gpsd report line to a location event.
///
/// Non-position classes and `TPV` reports without a 2D/3D fix yield `None`.
pub fn parse_report(line: &str) -> Option<LocationEvent> {
    // ---
    let report: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Some(LocationEvent::Error(format!("garbled gpsd report: {e}"))),
    };

    if report.get("class").and_then(Value::as_str) != Some("TPV") {
        return None;
    }
    if report.get("mode").and_then(Value::as_i64).unwrap_or(0) < 2 {
        tracing::trace!("gpsd TPV without fix");
        return None;
    }

    let field = |name: &str| report.get(name).and_then(Value::as_f64);
    let (Some(latitude), Some(longitude)) = (field("lat"), field("lon")) else {
        return Some(LocationEvent::Error("gpsd fix without position".to_string()));
    };

    let accuracy = field("eph").or_else(|| match (field("epx"), field("epy")) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    });
    let Some(accuracy_meters) = accuracy else {
        return Some(LocationEvent::Error("gpsd fix without error estimate".to_string()));
    };

    let timestamp_millis = report
        .get("time")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.timestamp_millis())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    Some(LocationEvent::Fix(GeoFix::new(
        latitude,
        longitude,
        accuracy_meters,
        timestamp_millis,
    )))
}
