use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::{FindingStatus, ResourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryPointStatus {
    Completed,
    Failed,
    Partial,
}

/// One backup or snapshot event for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPoint {
    pub resource_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub status: RecoveryPointStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAnalysis {
    pub resource_id: String,
    pub resource_type: ResourceType,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_recovery_point: Option<OffsetDateTime>,
    pub recovery_point_count: usize,
    pub gaps_hours: Vec<f64>,
    pub max_gap_hours: f64,
    pub consecutive_failures: usize,
    pub compliance_status: FindingStatus,
    pub calculated_rpo_hours: f64,
    pub estimated_rto_hours: f64,
}
