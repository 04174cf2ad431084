use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::config::{AuditConfig, IdleConfig};
use crate::core::{
    AuditReport, Category, Finding, FindingStatus, RecoveryAnalysis, ReportSummary, Resource,
    ResourceAttributes, ResourceDetail, ResourceType, Severity, UnusedAsset, VolumeState,
};

pub const SCHEMA_VERSION: &str = "1.0";

/// Immutable products of one run, ready to be assembled.
#[derive(Debug, Clone)]
pub struct AssemblyInput<'a> {
    pub timestamp: OffsetDateTime,
    pub resources: &'a [Resource],
    pub findings: Vec<Finding>,
    pub recovery_analyses: Vec<RecoveryAnalysis>,
    /// Parallel to `resources`.
    pub scores: &'a [u8],
    pub discovery_errors: Vec<String>,
}

pub fn assemble(input: AssemblyInput<'_>, config: &AuditConfig) -> AuditReport {
    let AssemblyInput {
        timestamp,
        resources,
        findings,
        recovery_analyses,
        scores,
        discovery_errors,
    } = input;

    let mut findings_by_severity: BTreeMap<Severity, Vec<Finding>> =
        Severity::ALL.into_iter().map(|s| (s, Vec::new())).collect();
    let mut findings_by_category: BTreeMap<Category, Vec<Finding>> =
        Category::ALL.into_iter().map(|c| (c, Vec::new())).collect();
    for f in &findings {
        findings_by_severity
            .entry(f.severity)
            .or_default()
            .push(f.clone());
        findings_by_category
            .entry(f.category)
            .or_default()
            .push(f.clone());
    }

    let mut details = Vec::with_capacity(resources.len());
    let mut unused_assets = Vec::new();
    for (idx, resource) in resources.iter().enumerate() {
        let own: Vec<&Finding> = findings_of(&findings, resource).collect();
        let recovery = recovery_analyses
            .iter()
            .find(|a| a.resource_id == resource.id && a.resource_type == resource.resource_type())
            .cloned();
        details.push(ResourceDetail {
            id: resource.id.clone(),
            name: resource.display_name().to_string(),
            resource_type: resource.resource_type(),
            tier: resource.tier,
            health_score: scores.get(idx).copied().unwrap_or(crate::scoring::MAX_SCORE),
            issues: own
                .iter()
                .filter(|f| f.status.is_issue())
                .map(|f| f.check_id.clone())
                .collect(),
            metrics: resource.metrics.clone(),
            estimated_monthly_cost: resource.monthly_cost(),
            recovery,
            extra: resource.extra().clone(),
        });
        if let Some(asset) = unused_asset(resource, &own, &config.idle) {
            unused_assets.push(asset);
        }
    }

    let summary = summarize(
        resources,
        &findings,
        scores,
        &unused_assets,
        discovery_errors,
    );

    AuditReport {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        catalog_version: crate::rules::CATALOG_VERSION.to_string(),
        audit_timestamp: timestamp,
        summary,
        findings_by_severity,
        findings_by_category,
        findings,
        resources: details,
        recovery_analysis: recovery_analyses,
        unused_assets,
    }
}

pub fn findings_of<'a>(
    findings: &'a [Finding],
    resource: &'a Resource,
) -> impl Iterator<Item = &'a Finding> + 'a {
    let resource_type = resource.resource_type();
    findings
        .iter()
        .filter(move |f| f.resource_id == resource.id && f.resource_type == resource_type)
}

/// Idle signals backing a decommissioning suggestion. Unattached volumes are
/// idle by construction.
pub fn idle_evidence(resource: &Resource, idle: &IdleConfig) -> Option<BTreeMap<String, f64>> {
    if let Some(signals) = idle.idle_signals(&resource.metrics) {
        return Some(signals);
    }
    match &resource.attributes {
        ResourceAttributes::Volume(v) if v.state == VolumeState::Available => {
            Some(BTreeMap::from([("attachments".to_string(), 0.0)]))
        }
        _ => None,
    }
}

fn unused_asset(resource: &Resource, own: &[&Finding], idle: &IdleConfig) -> Option<UnusedAsset> {
    if own.is_empty() || own.iter().any(|f| f.category != Category::Cost) {
        return None;
    }
    if !own.iter().any(|f| f.status == FindingStatus::NonCompliant) {
        return None;
    }
    let idle_metrics = idle_evidence(resource, idle)?;
    Some(UnusedAsset {
        id: resource.id.clone(),
        name: resource.display_name().to_string(),
        resource_type: resource.resource_type(),
        estimated_monthly_cost: resource.monthly_cost(),
        checks: own.iter().map(|f| f.check_id.clone()).collect(),
        idle_metrics,
    })
}

fn summarize(
    resources: &[Resource],
    findings: &[Finding],
    scores: &[u8],
    unused_assets: &[UnusedAsset],
    discovery_errors: Vec<String>,
) -> ReportSummary {
    let totals_by_type = ResourceType::ALL
        .into_iter()
        .map(|t| {
            let count = resources.iter().filter(|r| r.resource_type() == t).count();
            (format!("total_{}", t.plural()), count)
        })
        .collect();

    let mut severity_counts: BTreeMap<Severity, usize> =
        Severity::ALL.into_iter().map(|s| (s, 0)).collect();
    for f in findings {
        *severity_counts.entry(f.severity).or_default() += 1;
    }

    let compliant_resources = resources
        .iter()
        .filter(|r| {
            !findings_of(findings, r).any(|f| f.status == FindingStatus::NonCompliant)
        })
        .count();

    let total_estimated_monthly_cost = findings
        .iter()
        .filter(|f| f.category == Category::Cost)
        .filter_map(Finding::estimated_cost)
        .map(|c| c.max(0.0))
        .fold(0.0, |acc, c| acc + c);

    ReportSummary {
        total_resources: resources.len(),
        totals_by_type,
        total_findings: findings.len(),
        total_issues: findings.iter().filter(|f| f.status.is_issue()).count(),
        degraded_findings: findings.iter().filter(|f| f.status.is_degraded()).count(),
        compliant_resources,
        average_health_score: crate::scoring::average(scores),
        total_estimated_monthly_cost,
        potential_monthly_savings: unused_assets
            .iter()
            .map(|a| a.estimated_monthly_cost)
            .fold(0.0, |acc, c| acc + c),
        severity_counts,
        discovery_errors,
    }
}
