use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::{Category, ResourceType, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingStatus {
    Compliant,
    NonCompliant,
    Warning,
    NotApplicable,
    InsufficientData,
}

impl FindingStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            FindingStatus::Compliant => "COMPLIANT",
            FindingStatus::NonCompliant => "NON_COMPLIANT",
            FindingStatus::Warning => "WARNING",
            FindingStatus::NotApplicable => "NOT_APPLICABLE",
            FindingStatus::InsufficientData => "INSUFFICIENT_DATA",
        }
    }

    /// Counted in `total_issues`.
    pub const fn is_issue(self) -> bool {
        matches!(self, FindingStatus::NonCompliant | FindingStatus::Warning)
    }

    /// The check could not reach a verdict for this resource.
    pub const fn is_degraded(self) -> bool {
        matches!(
            self,
            FindingStatus::NotApplicable | FindingStatus::InsufficientData
        )
    }
}

impl std::fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub check_id: String,
    pub severity: Severity,
    pub category: Category,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub description: String,
    pub details: BTreeMap<String, serde_json::Value>,
    pub recommendation: String,
    pub status: FindingStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Finding {
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_status(mut self, status: FindingStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// `details.estimated_cost` when it is a usable amount.
    pub fn estimated_cost(&self) -> Option<f64> {
        self.details
            .get("estimated_cost")
            .and_then(serde_json::Value::as_f64)
            .filter(|c| c.is_finite())
    }
}
