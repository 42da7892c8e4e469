//! Best-fix selection over one sampling window.

use std::fmt;
use std::str::FromStr;

use crate::models::GeoFix;

// ---

/// How a window's fixes collapse into the one that gets recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// The fix with the smallest accuracy radius; ties go to the first seen.
    #[default]
    MinAccuracy,

    /// Mean position of the `k` most accurate fixes. Accuracy is the mean of
    /// their radii; the timestamp is that of the single most accurate fix.
    TrimmedMean { k: usize },
}

impl SelectionPolicy {
    // ---
    pub fn select(&self, fixes: &[GeoFix]) -> Option<GeoFix> {
        match *self {
            SelectionPolicy::MinAccuracy => best_fix(fixes),
            SelectionPolicy::TrimmedMean { k } => trimmed_mean(fixes, k),
        }
    }
}

/// Minimum-accuracy fix, first seen on ties.
pub fn best_fix(fixes: &[GeoFix]) -> Option<GeoFix> {
    // ---
    fixes.iter().copied().fold(None, |best, fix| match best {
        Some(b) if b.accuracy_meters <= fix.accuracy_meters => Some(b),
        _ => Some(fix),
    })
}

fn trimmed_mean(fixes: &[GeoFix], k: usize) -> Option<GeoFix> {
    // ---
    let mut ranked: Vec<&GeoFix> = fixes.iter().collect();
    // Stable sort keeps first-seen order among equal radii.
    ranked.sort_by(|a, b| a.accuracy_meters.total_cmp(&b.accuracy_meters));
    ranked.truncate(k.max(1));

    let top = **ranked.first()?;
    let n = ranked.len() as f64;
    let mean = |f: fn(&GeoFix) -> f64| ranked.iter().map(|fix| f(fix)).sum::<f64>() / n;

    Some(GeoFix {
        latitude: mean(|f| f.latitude),
        longitude: mean(|f| f.longitude),
        accuracy_meters: mean(|f| f.accuracy_meters),
        timestamp_millis: top.timestamp_millis,
    })
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::MinAccuracy => f.write_str("min"),
            SelectionPolicy::TrimmedMean { k } => write!(f, "trimmed-mean:{k}"),
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let s = s.trim();
        if s.eq_ignore_ascii_case("min") || s.eq_ignore_ascii_case("min-accuracy") {
            return Ok(SelectionPolicy::MinAccuracy);
        }

        let k = s
            .strip_prefix("trimmed-mean:")
            .ok_or_else(|| format!("unknown policy {s:?}, expected `min` or `trimmed-mean:K`"))?
            .parse::<usize>()
            .map_err(|e| format!("bad trimmed-mean size: {e}"))?;
        if k == 0 {
            return Err("trimmed-mean size must be at least 1".to_string());
        }
        Ok(SelectionPolicy::TrimmedMean { k })
    }
}
