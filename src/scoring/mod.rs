use crate::config::ScoringConfig;
use crate::core::{Finding, FindingStatus};

pub const MAX_SCORE: u8 = 100;

/// Severity-weighted deduction over the NON_COMPLIANT findings, clamped to
/// `[0, 100]` after every step.
pub fn score<'a, I>(findings: I, weights: &ScoringConfig) -> u8
where
    I: IntoIterator<Item = &'a Finding>,
{
    let mut total = u32::from(MAX_SCORE);
    for f in findings {
        if f.status != FindingStatus::NonCompliant {
            continue;
        }
        total = total.saturating_sub(weights.weight(f.severity));
    }
    total.min(u32::from(MAX_SCORE)) as u8
}

/// Global score: mean of per-resource scores. An empty run is fully healthy.
pub fn average(scores: &[u8]) -> f64 {
    if scores.is_empty() {
        return f64::from(MAX_SCORE);
    }
    let sum: u32 = scores.iter().map(|s| u32::from(*s)).sum();
    f64::from(sum) / scores.len() as f64
}
