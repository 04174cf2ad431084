use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use time::OffsetDateTime;

use crate::config::AuditConfig;
use crate::core::{AuditReport, RecoveryAnalysis, Resource};
use crate::discovery::{DiscoveryContext, DiscoveryStats};
use crate::exit::{ExitCode, ExitError};
use crate::report::AssemblyInput;
use crate::rules::{Check, RecoveryHistory, ResourceInput};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Frozen run clock; every finding and the report share it.
    pub now: OffsetDateTime,
    pub show_progress: bool,
}

/// Result of one audit run.
#[derive(Debug, Clone)]
pub struct AuditRun {
    pub report: AuditReport,
    pub discovery: DiscoveryStats,
}

pub struct Engine {
    opts: EngineOptions,
    config: AuditConfig,
    discovery: DiscoveryContext,
    checks: &'static [Check],
    name_filter: Option<GlobSet>,
}

impl Engine {
    pub fn new(opts: EngineOptions, config: AuditConfig, discovery: DiscoveryContext) -> Result<Self> {
        let name_filter = if config.filters.skip_name_filter {
            None
        } else {
            Some(build_name_filter(&config.filters.exclude_names)?)
        };
        Ok(Self {
            opts,
            config,
            discovery,
            checks: crate::rules::CATALOG,
            name_filter,
        })
    }

    pub fn with_checks(mut self, checks: &'static [Check]) -> Self {
        self.checks = checks;
        self
    }

    pub fn run(self) -> Result<AuditRun> {
        use std::io::IsTerminal;
        let progress_enabled = self.opts.show_progress && std::io::stderr().is_terminal();
        let pb = if progress_enabled {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.set_message("リソースを検出中...");
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let discovered = self.discover();
        let (inputs, discovery_errors) = match discovered {
            Ok(v) => v,
            Err(err) => {
                if let Some(pb) = pb {
                    pb.finish_and_clear();
                }
                return Err(err);
            }
        };

        if let Some(pb) = &pb {
            pb.set_message(format!("{} 件のリソースを監査中...", inputs.len()));
        }
        let findings =
            crate::rules::evaluate_all(&inputs, self.checks, &self.config, self.opts.now);
        let recovery_analyses = self.analyze_gaps(&inputs);
        let resources: Vec<Resource> = inputs.into_iter().map(|i| i.resource).collect();
        let scores: Vec<u8> = resources
            .iter()
            .map(|r| {
                crate::scoring::score(
                    crate::report::findings_of(&findings, r),
                    &self.config.scoring,
                )
            })
            .collect();

        let report = crate::report::assemble(
            AssemblyInput {
                timestamp: self.opts.now,
                resources: &resources,
                findings,
                recovery_analyses,
                scores: &scores,
                discovery_errors,
            },
            &self.config,
        );

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        tracing::info!(
            resources = report.summary.total_resources,
            findings = report.summary.total_findings,
            issues = report.summary.total_issues,
            score = report.summary.average_health_score,
            "audit finished"
        );

        let discovery = self.discovery.teardown();
        Ok(AuditRun { report, discovery })
    }

    /// Per-type failures degrade to "no resources of this type"; the run
    /// only fails when no type could be listed at all.
    fn discover(&self) -> Result<(Vec<ResourceInput>, Vec<String>)> {
        let types = self.discovery.resource_types();
        let mut inputs = Vec::new();
        let mut errors = Vec::new();

        for &resource_type in types {
            let resources = match self.discovery.list_resources(resource_type) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(resource_type = %resource_type, error = %err, "discovery failed; skipping type");
                    errors.push(resource_type.as_str().to_string());
                    continue;
                }
            };
            tracing::debug!(resource_type = %resource_type, count = resources.len(), "discovered");

            for resource in resources {
                if self.excluded(&resource) {
                    tracing::debug!(resource = %resource.id, "excluded by name filter");
                    continue;
                }
                let history = self.history(&resource);
                inputs.push(ResourceInput { resource, history });
            }
        }

        if !types.is_empty() && errors.len() == types.len() {
            return Err(ExitError::new(
                ExitCode::DiscoveryUnavailable,
                anyhow::anyhow!(
                    "すべてのリソース種別で検出に失敗しました: {}",
                    errors.join(", ")
                ),
            )
            .into());
        }
        Ok((inputs, errors))
    }

    fn history(&self, resource: &Resource) -> RecoveryHistory {
        if !resource.resource_type().supports_backups() {
            return RecoveryHistory::NotCollected;
        }
        match self.discovery.list_recovery_points(resource) {
            Ok(points) => RecoveryHistory::Available(points),
            Err(err) => {
                tracing::warn!(resource = %resource.id, error = %err, "recovery points unavailable");
                RecoveryHistory::Unavailable(err.to_string())
            }
        }
    }

    fn excluded(&self, resource: &Resource) -> bool {
        let Some(set) = &self.name_filter else {
            return false;
        };
        set.is_match(&resource.id) || (!resource.name.is_empty() && set.is_match(&resource.name))
    }

    fn analyze_gaps(&self, inputs: &[ResourceInput]) -> Vec<RecoveryAnalysis> {
        inputs
            .iter()
            .filter_map(|input| {
                let points = input.history.points()?;
                crate::recovery::analyze(&input.resource, points, &self.config.backup)
            })
            .collect()
    }
}

pub fn validate_name_filter(patterns: &[String]) -> Result<()> {
    let _ = build_name_filter(patterns)?;
    Ok(())
}

fn build_name_filter(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat).with_context(|| format!("除外パターンが不正です: {pat}"))?);
    }
    Ok(builder.build()?)
}

/// Writes the JSON report then both CSV files into `dir`.
pub fn write_outputs(report: &AuditReport, dir: &Path) -> Result<()> {
    let write = || -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("出力先を作成できません: {}", dir.display()))?;
        crate::export::write_json_file(report, &dir.join(crate::export::REPORT_JSON))?;
        crate::export::write_findings_csv(
            &report.findings,
            &dir.join(crate::export::FINDINGS_CSV),
        )?;
        crate::export::write_recovery_csv(
            &report.recovery_analysis,
            &dir.join(crate::export::RECOVERY_CSV),
        )?;
        Ok(())
    };
    write().map_err(crate::exit::report_write_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        BucketAttributes, Category, FindingStatus, LoadBalancerAttributes, RecoveryPoint,
        RecoveryPointStatus, ResourceAttributes, ResourceType, Severity, VolumeAttributes,
    };
    use crate::discovery::{Discovery, DiscoveryError, Inventory, InventoryDiscovery, InventoryRecoveryPoint};
    use crate::rules::{CheckContext, EvalError};
    use crate::core::Finding;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-06-10 12:00 UTC);

    fn opts() -> EngineOptions {
        EngineOptions {
            now: NOW,
            show_progress: false,
        }
    }

    fn engine(inventory: Inventory) -> Engine {
        let ctx = DiscoveryContext::new(Box::new(InventoryDiscovery::new(inventory)));
        Engine::new(opts(), AuditConfig::default(), ctx).expect("engine")
    }

    fn critical_on_broken(ctx: &CheckContext<'_>) -> Result<Vec<Finding>, EvalError> {
        if ctx.resource.id == "broken" {
            return Ok(vec![ctx.non_compliant("broken", "fix it")]);
        }
        Ok(vec![])
    }

    static CRITICAL_ONLY: &[Check] = &[Check {
        id: "TEST-CRIT",
        name: "critical on broken",
        category: Category::Security,
        default_severity: Severity::Critical,
        applies_to: &[ResourceType::LoadBalancer],
        evaluate: critical_on_broken,
    }];

    fn lb(id: &str) -> Resource {
        Resource::new(
            id,
            ResourceAttributes::LoadBalancer(LoadBalancerAttributes::default()),
        )
    }

    #[test]
    fn two_resources_one_critical_average_87_5() {
        let inventory = Inventory {
            resources: vec![lb("clean"), lb("broken")],
            ..Inventory::default()
        };
        let run = engine(inventory)
            .with_checks(CRITICAL_ONLY)
            .run()
            .expect("run");
        assert_eq!(run.report.summary.average_health_score, 87.5);
        assert_eq!(run.report.summary.total_issues, 1);
        assert_eq!(run.report.resources[1].health_score, 75);
        assert_eq!(run.report.audit_timestamp, NOW);
    }

    #[test]
    fn failing_type_is_skipped_and_recorded() {
        let inventory = Inventory {
            resources: vec![lb("lb-1")],
            unavailable: [ResourceType::Bucket].into_iter().collect(),
            ..Inventory::default()
        };
        let run = engine(inventory).run().expect("run");
        assert_eq!(run.report.summary.discovery_errors, vec!["bucket"]);
        assert_eq!(run.report.summary.total_resources, 1);
        assert_eq!(run.discovery.failures, 1);
    }

    #[test]
    fn all_types_failing_is_discovery_unavailable() {
        let inventory = Inventory {
            unavailable: ResourceType::ALL.into_iter().collect(),
            ..Inventory::default()
        };
        let err = engine(inventory).run().unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 10);
    }

    #[test]
    fn name_filter_excludes_matching_resources_unless_skipped() {
        let mut scratch = lb("lb-1");
        scratch.name = "team-scratch-lb".to_string();
        let inventory = Inventory {
            resources: vec![scratch, lb("lb-2")],
            ..Inventory::default()
        };
        let run = engine(inventory.clone()).run().expect("run");
        let ids: Vec<&str> = run.report.resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["lb-2"]);

        let mut config = AuditConfig::default();
        config.filters.skip_name_filter = true;
        let ctx = DiscoveryContext::new(Box::new(InventoryDiscovery::new(inventory)));
        let run = Engine::new(opts(), config, ctx)
            .expect("engine")
            .run()
            .expect("run");
        assert_eq!(run.report.resources.len(), 2);
    }

    #[test]
    fn volume_without_backups_is_unprotected_and_not_analyzed() {
        let vol = Resource::new(
            "vol-1",
            ResourceAttributes::Volume(VolumeAttributes {
                encrypted: Some(true),
                ..VolumeAttributes::default()
            }),
        );
        let run = engine(Inventory {
            resources: vec![vol],
            ..Inventory::default()
        })
        .run()
        .expect("run");
        assert!(run.report.recovery_analysis.is_empty());
        let backup_003 = run
            .report
            .findings
            .iter()
            .find(|f| f.check_id == "AWS-BACKUP-003")
            .expect("AWS-BACKUP-003");
        assert_eq!(backup_003.severity, Severity::Critical);
        assert_eq!(backup_003.status, FindingStatus::NonCompliant);
    }

    #[test]
    fn recovery_analysis_follows_resource_order() {
        let inventory = Inventory {
            resources: vec![
                Resource::new("b-1", ResourceAttributes::Bucket(BucketAttributes::default())),
                Resource::new("v-1", ResourceAttributes::Volume(VolumeAttributes::default())),
            ],
            recovery_points: vec![
                InventoryRecoveryPoint {
                    resource_id: "v-1".to_string(),
                    created_at: "2024-06-09T00:00:00Z".to_string(),
                    status: RecoveryPointStatus::Completed,
                },
                InventoryRecoveryPoint {
                    resource_id: "b-1".to_string(),
                    created_at: "2024-06-09T00:00:00Z".to_string(),
                    status: RecoveryPointStatus::Completed,
                },
            ],
            ..Inventory::default()
        };
        let run = engine(inventory).run().expect("run");
        let ids: Vec<&str> = run
            .report
            .recovery_analysis
            .iter()
            .map(|a| a.resource_id.as_str())
            .collect();
        // discovery lists types in ResourceType::ALL order: bucket before volume
        assert_eq!(ids, vec!["b-1", "v-1"]);
    }

    struct HistoryDown;

    impl Discovery for HistoryDown {
        fn list_resources(&self, resource_type: ResourceType) -> Result<Vec<Resource>, DiscoveryError> {
            if resource_type != ResourceType::Table {
                return Ok(vec![]);
            }
            Ok(vec![Resource::new(
                "tbl-1",
                ResourceAttributes::Table(Default::default()),
            )])
        }

        fn list_recovery_points(&self, resource: &Resource) -> Result<Vec<RecoveryPoint>, DiscoveryError> {
            Err(DiscoveryError::RecoveryPointsFailed {
                resource_id: resource.id.clone(),
                reason: "throttled".to_string(),
            })
        }
    }

    #[test]
    fn unavailable_history_degrades_backup_checks() {
        let ctx = DiscoveryContext::new(Box::new(HistoryDown));
        let run = Engine::new(opts(), AuditConfig::default(), ctx)
            .expect("engine")
            .run()
            .expect("run");
        let f = run
            .report
            .findings
            .iter()
            .find(|f| f.check_id == "AWS-BACKUP-003")
            .expect("AWS-BACKUP-003");
        assert_eq!(f.status, FindingStatus::InsufficientData);
        assert!(run.report.recovery_analysis.is_empty());
    }

    #[test]
    fn invalid_exclude_pattern_is_rejected() {
        assert!(validate_name_filter(&["[".to_string()]).is_err());
        assert!(validate_name_filter(&["*-tmp-*".to_string()]).is_ok());
    }
}
