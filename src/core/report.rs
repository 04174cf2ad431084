use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::{
    Category, CriticalityTier, Finding, RecoveryAnalysis, ResourceType, Severity,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_resources: usize,
    /// `total_<type>` counts, one entry per resource type.
    #[serde(flatten)]
    pub totals_by_type: BTreeMap<String, usize>,
    pub total_findings: usize,
    pub total_issues: usize,
    pub degraded_findings: usize,
    pub compliant_resources: usize,
    pub average_health_score: f64,
    pub total_estimated_monthly_cost: f64,
    pub potential_monthly_savings: f64,
    pub severity_counts: BTreeMap<Severity, usize>,
    pub discovery_errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDetail {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub tier: CriticalityTier,
    pub health_score: u8,
    pub issues: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub estimated_monthly_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryAnalysis>,
    /// Reported attributes no check reads.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Decommissioning candidate. Listed only, never acted upon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnusedAsset {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub estimated_monthly_cost: f64,
    pub checks: Vec<String>,
    pub idle_metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub schema_version: String,
    pub tool_version: String,
    pub catalog_version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub audit_timestamp: OffsetDateTime,
    pub summary: ReportSummary,
    pub findings_by_severity: BTreeMap<Severity, Vec<Finding>>,
    pub findings_by_category: BTreeMap<Category, Vec<Finding>>,
    pub findings: Vec<Finding>,
    pub resources: Vec<ResourceDetail>,
    pub recovery_analysis: Vec<RecoveryAnalysis>,
    pub unused_assets: Vec<UnusedAsset>,
}
