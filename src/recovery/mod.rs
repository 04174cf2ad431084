//! Time-series analysis of recovery-point history.
//!
//! Pure functions only: nothing here emits findings. The backup checks in
//! [`crate::rules`] and the report assembler both consume [`analyze`].

use time::OffsetDateTime;

use crate::config::BackupConfig;
use crate::core::{
    FindingStatus, RecoveryAnalysis, RecoveryPoint, RecoveryPointStatus, Resource,
};

/// Trailing failures at or above this count break compliance.
pub const FAILURE_RUN_LIMIT: usize = 2;

pub fn analyze(
    resource: &Resource,
    points: &[RecoveryPoint],
    backup: &BackupConfig,
) -> Option<RecoveryAnalysis> {
    if points.is_empty() {
        return None;
    }

    let ordered = sorted_points(points);
    let gaps_hours = gap_hours(&ordered);
    let max_gap_hours = gaps_hours.iter().copied().fold(0.0_f64, f64::max);
    let consecutive_failures = trailing_failures(&ordered);

    let sla_hours = f64::from(backup.sla_hours(resource.tier));
    let compliance_status =
        if max_gap_hours > sla_hours || consecutive_failures >= FAILURE_RUN_LIMIT {
            FindingStatus::NonCompliant
        } else {
            FindingStatus::Compliant
        };

    Some(RecoveryAnalysis {
        resource_id: resource.id.clone(),
        resource_type: resource.resource_type(),
        last_recovery_point: ordered.last().map(|p| p.created_at),
        recovery_point_count: ordered.len(),
        gaps_hours,
        max_gap_hours,
        consecutive_failures,
        compliance_status,
        calculated_rpo_hours: max_gap_hours,
        estimated_rto_hours: backup.rto_hours(resource.tier),
    })
}

/// Ascending by creation time; `sort_by_key` is stable so ties keep
/// discovery order.
pub fn sorted_points(points: &[RecoveryPoint]) -> Vec<&RecoveryPoint> {
    let mut ordered: Vec<&RecoveryPoint> = points.iter().collect();
    ordered.sort_by_key(|p| p.created_at);
    ordered
}

pub fn latest_completed(points: &[RecoveryPoint]) -> Option<OffsetDateTime> {
    points
        .iter()
        .filter(|p| p.status == RecoveryPointStatus::Completed)
        .map(|p| p.created_at)
        .max()
}

fn gap_hours(ordered: &[&RecoveryPoint]) -> Vec<f64> {
    ordered
        .windows(2)
        .map(|w| (w[1].created_at - w[0].created_at).as_seconds_f64() / 3600.0)
        .collect()
}

fn trailing_failures(ordered: &[&RecoveryPoint]) -> usize {
    ordered
        .iter()
        .rev()
        .take_while(|p| p.status == RecoveryPointStatus::Failed)
        .count()
}
