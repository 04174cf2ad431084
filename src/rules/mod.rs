use std::collections::BTreeMap;

use serde::Serialize;
use time::OffsetDateTime;

use crate::config::AuditConfig;
use crate::core::{
    BackupVaultAttributes, BucketAttributes, Category, Finding, FindingStatus,
    FunctionAttributes, LoadBalancerAttributes, RecoveryPoint, Resource, ResourceAttributes,
    ResourceType, Severity, TableAttributes, VolumeAttributes,
};

mod catalog;

pub use catalog::{CATALOG, CATALOG_VERSION};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("属性が取得できていません: {0}")]
    MissingAttribute(&'static str),
    #[error("属性の値が不正です: {name}（{reason}）")]
    InvalidAttribute { name: &'static str, reason: String },
    #[error("復旧ポイント履歴を取得できませんでした: {0}")]
    HistoryUnavailable(String),
    #[error("リソース種別が一致しません: 期待={expected} 実際={actual}")]
    WrongResourceType {
        expected: ResourceType,
        actual: ResourceType,
    },
}

pub type EvalFn = fn(&CheckContext<'_>) -> Result<Vec<Finding>, EvalError>;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Check {
    pub id: &'static str,
    pub name: &'static str,
    pub category: Category,
    pub default_severity: Severity,
    pub applies_to: &'static [ResourceType],
    #[serde(skip)]
    pub evaluate: EvalFn,
}

impl Check {
    pub fn applies(&self, resource_type: ResourceType) -> bool {
        self.applies_to.contains(&resource_type)
    }
}

/// Recovery-point history as handed over by discovery.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryHistory {
    /// The resource type has no backups to collect.
    NotCollected,
    Available(Vec<RecoveryPoint>),
    Unavailable(String),
}

impl RecoveryHistory {
    pub fn points(&self) -> Option<&[RecoveryPoint]> {
        match self {
            RecoveryHistory::Available(points) => Some(points),
            _ => None,
        }
    }
}

/// One discovered resource together with its recovery history.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInput {
    pub resource: Resource,
    pub history: RecoveryHistory,
}

pub struct CheckContext<'a> {
    pub check: &'a Check,
    pub resource: &'a Resource,
    pub history: &'a RecoveryHistory,
    pub config: &'a AuditConfig,
    pub now: OffsetDateTime,
}

impl CheckContext<'_> {
    pub fn finding(
        &self,
        status: FindingStatus,
        description: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Finding {
        Finding {
            check_id: self.check.id.to_string(),
            severity: self.check.default_severity,
            category: self.check.category,
            resource_id: self.resource.id.clone(),
            resource_type: self.resource.resource_type(),
            description: description.into(),
            details: BTreeMap::new(),
            recommendation: recommendation.into(),
            status,
            timestamp: self.now,
        }
    }

    pub fn non_compliant(
        &self,
        description: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Finding {
        self.finding(FindingStatus::NonCompliant, description, recommendation)
    }

    pub fn warning(
        &self,
        description: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Finding {
        self.finding(FindingStatus::Warning, description, recommendation)
    }

    /// Idle/unused checks only look at resources older than the configured
    /// minimum age. Unknown age counts as old enough.
    pub fn old_enough(&self) -> bool {
        let filters = &self.config.filters;
        if filters.skip_age_check {
            return true;
        }
        self.resource
            .age_days(self.now)
            .is_none_or(|days| days >= filters.min_age_days)
    }

    pub fn load_balancer(&self) -> Result<&LoadBalancerAttributes, EvalError> {
        match &self.resource.attributes {
            ResourceAttributes::LoadBalancer(a) => Ok(a),
            _ => Err(self.wrong_type(ResourceType::LoadBalancer)),
        }
    }

    pub fn backup_vault(&self) -> Result<&BackupVaultAttributes, EvalError> {
        match &self.resource.attributes {
            ResourceAttributes::BackupVault(a) => Ok(a),
            _ => Err(self.wrong_type(ResourceType::BackupVault)),
        }
    }

    pub fn function(&self) -> Result<&FunctionAttributes, EvalError> {
        match &self.resource.attributes {
            ResourceAttributes::Function(a) => Ok(a),
            _ => Err(self.wrong_type(ResourceType::Function)),
        }
    }

    pub fn table(&self) -> Result<&TableAttributes, EvalError> {
        match &self.resource.attributes {
            ResourceAttributes::Table(a) => Ok(a),
            _ => Err(self.wrong_type(ResourceType::Table)),
        }
    }

    pub fn bucket(&self) -> Result<&BucketAttributes, EvalError> {
        match &self.resource.attributes {
            ResourceAttributes::Bucket(a) => Ok(a),
            _ => Err(self.wrong_type(ResourceType::Bucket)),
        }
    }

    pub fn volume(&self) -> Result<&VolumeAttributes, EvalError> {
        match &self.resource.attributes {
            ResourceAttributes::Volume(a) => Ok(a),
            _ => Err(self.wrong_type(ResourceType::Volume)),
        }
    }

    fn wrong_type(&self, expected: ResourceType) -> EvalError {
        EvalError::WrongResourceType {
            expected,
            actual: self.resource.resource_type(),
        }
    }
}

pub fn require<T: Copy>(value: Option<T>, name: &'static str) -> Result<T, EvalError> {
    value.ok_or(EvalError::MissingAttribute(name))
}

/// Runs every applicable check against every resource, resource-major in
/// catalog order. A failing check yields one degraded finding and the run
/// carries on.
pub fn evaluate_all(
    inputs: &[ResourceInput],
    checks: &[Check],
    config: &AuditConfig,
    now: OffsetDateTime,
) -> Vec<Finding> {
    let mut out = Vec::new();
    for input in inputs {
        let resource_type = input.resource.resource_type();
        for check in checks.iter().filter(|c| c.applies(resource_type)) {
            let ctx = CheckContext {
                check,
                resource: &input.resource,
                history: &input.history,
                config,
                now,
            };
            match (check.evaluate)(&ctx) {
                Ok(findings) => out.extend(findings),
                Err(err) => {
                    tracing::warn!(
                        check = check.id,
                        resource = %input.resource.id,
                        error = %err,
                        "check evaluation failed; recording degraded finding"
                    );
                    out.push(degraded_finding(&ctx, &err));
                }
            }
        }
    }
    out
}

fn degraded_finding(ctx: &CheckContext<'_>, err: &EvalError) -> Finding {
    let status = if ctx.check.category == Category::Compliance {
        FindingStatus::InsufficientData
    } else {
        FindingStatus::NotApplicable
    };
    ctx.finding(
        status,
        format!("チェックを評価できませんでした: {}", ctx.check.name),
        "検出データを確認し、再度監査を実行してください。",
    )
    .with_severity(Severity::Info)
    .with_detail("error", err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BucketAttributes, PublicAccessBlock};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-06-10 12:00 UTC);

    fn input(resource: Resource) -> ResourceInput {
        ResourceInput {
            resource,
            history: RecoveryHistory::NotCollected,
        }
    }

    fn always_fails(_: &CheckContext<'_>) -> Result<Vec<Finding>, EvalError> {
        Err(EvalError::MissingAttribute("probe"))
    }

    fn two_findings(ctx: &CheckContext<'_>) -> Result<Vec<Finding>, EvalError> {
        Ok(vec![
            ctx.non_compliant("first", "fix"),
            ctx.warning("second", "fix"),
        ])
    }

    const FAILING: Check = Check {
        id: "TEST-FAIL",
        name: "always fails",
        category: Category::Security,
        default_severity: Severity::High,
        applies_to: &[ResourceType::Bucket],
        evaluate: always_fails,
    };

    const FAILING_COMPLIANCE: Check = Check {
        id: "TEST-FAIL-C",
        name: "always fails",
        category: Category::Compliance,
        default_severity: Severity::High,
        applies_to: &[ResourceType::Bucket],
        evaluate: always_fails,
    };

    const MULTI: Check = Check {
        id: "TEST-MULTI",
        name: "two findings",
        category: Category::Performance,
        default_severity: Severity::Medium,
        applies_to: &[ResourceType::Bucket, ResourceType::Volume],
        evaluate: two_findings,
    };

    fn bucket(id: &str) -> Resource {
        Resource::new(id, ResourceAttributes::Bucket(BucketAttributes::default()))
    }

    #[test]
    fn failing_check_is_isolated_and_run_continues() {
        let inputs = vec![input(bucket("a")), input(bucket("b"))];
        let findings = evaluate_all(
            &inputs,
            &[FAILING, MULTI],
            &AuditConfig::default(),
            NOW,
        );
        assert_eq!(findings.len(), 6);

        let degraded: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.check_id == "TEST-FAIL")
            .collect();
        assert_eq!(degraded.len(), 2);
        for f in degraded {
            assert_eq!(f.status, FindingStatus::NotApplicable);
            assert_eq!(f.severity, Severity::Info);
            let error = f.details.get("error").and_then(|v| v.as_str()).unwrap_or("");
            assert!(error.contains("probe"), "error={error}");
        }
    }

    #[test]
    fn compliance_checks_degrade_to_insufficient_data() {
        let inputs = vec![input(bucket("a"))];
        let findings = evaluate_all(
            &inputs,
            &[FAILING_COMPLIANCE],
            &AuditConfig::default(),
            NOW,
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].status, FindingStatus::InsufficientData);
    }

    #[test]
    fn findings_are_resource_major_in_check_order() {
        let inputs = vec![input(bucket("a")), input(bucket("b"))];
        let findings = evaluate_all(&inputs, &[MULTI, FAILING], &AuditConfig::default(), NOW);
        let order: Vec<(&str, &str)> = findings
            .iter()
            .map(|f| (f.resource_id.as_str(), f.check_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a", "TEST-MULTI"),
                ("a", "TEST-MULTI"),
                ("a", "TEST-FAIL"),
                ("b", "TEST-MULTI"),
                ("b", "TEST-MULTI"),
                ("b", "TEST-FAIL"),
            ]
        );
    }

    #[test]
    fn checks_only_run_on_their_resource_types() {
        let lb = Resource::new(
            "lb",
            ResourceAttributes::LoadBalancer(LoadBalancerAttributes::default()),
        );
        let findings = evaluate_all(&[input(lb)], &[FAILING, MULTI], &AuditConfig::default(), NOW);
        assert!(findings.is_empty());
    }

    #[test]
    fn every_catalog_finding_uses_closed_taxonomy() {
        let mut b = bucket("open");
        if let ResourceAttributes::Bucket(attrs) = &mut b.attributes {
            attrs.public_access_block = Some(PublicAccessBlock::default());
        }
        let findings = evaluate_all(&[input(b)], CATALOG, &AuditConfig::default(), NOW);
        assert!(!findings.is_empty());
        for f in &findings {
            assert!(Severity::ALL.contains(&f.severity));
            assert!(Category::ALL.contains(&f.category));
            assert_eq!(f.timestamp, NOW);
        }
    }

    #[test]
    fn evaluation_leaves_inputs_untouched() {
        let inputs = vec![input(bucket("a"))];
        let before = inputs.clone();
        let _ = evaluate_all(&inputs, CATALOG, &AuditConfig::default(), NOW);
        assert_eq!(inputs, before);
    }
}
