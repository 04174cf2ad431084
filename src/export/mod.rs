use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use time::format_description::well_known::Rfc3339;

use crate::core::{AuditReport, Finding, FindingStatus, RecoveryAnalysis, Severity};

pub const REPORT_JSON: &str = "audit-report.json";
pub const FINDINGS_CSV: &str = "audit-findings.csv";
pub const RECOVERY_CSV: &str = "recovery-readiness.csv";

pub const FINDINGS_CSV_HEADER: [&str; 9] = [
    "check_id",
    "severity",
    "category",
    "status",
    "resource_type",
    "resource_id",
    "description",
    "recommendation",
    "timestamp",
];

pub const RECOVERY_CSV_HEADER: [&str; 9] = [
    "resource_id",
    "resource_type",
    "last_recovery_point",
    "recovery_point_count",
    "max_gap_hours",
    "consecutive_failures",
    "calculated_rpo_hours",
    "estimated_rto_hours",
    "compliance_status",
];

pub fn to_json(report: &AuditReport) -> Result<Vec<u8>> {
    let mut buf = serde_json::to_vec_pretty(report)?;
    buf.push(b'\n');
    Ok(buf)
}

pub fn write_json_file(report: &AuditReport, path: &Path) -> Result<()> {
    let buf = to_json(report)?;
    std::fs::write(path, buf)
        .with_context(|| format!("レポートの書き込みに失敗しました: {}", path.display()))
}

pub fn write_json_stdout(report: &AuditReport) -> Result<()> {
    let buf = to_json(report)?;
    write_stdout(&buf)
}

pub fn write_stdout(buf: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// One row per finding that is not COMPLIANT, in report order.
pub fn write_findings_csv(findings: &[Finding], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("CSV を作成できません: {}", path.display()))?;
    write_findings(findings, file)
        .with_context(|| format!("CSV の書き込みに失敗しました: {}", path.display()))
}

pub fn write_findings<W: Write>(findings: &[Finding], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(FINDINGS_CSV_HEADER)?;
    for f in findings.iter().filter(|f| f.status != FindingStatus::Compliant) {
        let timestamp = f.timestamp.format(&Rfc3339)?;
        wtr.write_record([
            f.check_id.as_str(),
            f.severity.as_str(),
            f.category.as_str(),
            f.status.as_str(),
            f.resource_type.as_str(),
            f.resource_id.as_str(),
            f.description.as_str(),
            f.recommendation.as_str(),
            timestamp.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_recovery_csv(analyses: &[RecoveryAnalysis], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("CSV を作成できません: {}", path.display()))?;
    write_recovery(analyses, file)
        .with_context(|| format!("CSV の書き込みに失敗しました: {}", path.display()))
}

pub fn write_recovery<W: Write>(analyses: &[RecoveryAnalysis], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(RECOVERY_CSV_HEADER)?;
    for a in analyses {
        let last = match a.last_recovery_point {
            Some(t) => t.format(&Rfc3339)?,
            None => String::new(),
        };
        wtr.write_record([
            a.resource_id.clone(),
            a.resource_type.as_str().to_string(),
            last,
            a.recovery_point_count.to_string(),
            format_hours(a.max_gap_hours),
            a.consecutive_failures.to_string(),
            format_hours(a.calculated_rpo_hours),
            format_hours(a.estimated_rto_hours),
            a.compliance_status.as_str().to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn format_hours(h: f64) -> String {
    format!("{h:.2}")
}

pub fn format_markdown_summary(report: &AuditReport) -> String {
    use std::fmt::Write as _;

    let s = &report.summary;
    let mut out = String::new();

    let _ = writeln!(out, "# cloudaudit レポート");
    let _ = writeln!(out);
    let _ = writeln!(out, "- ツールバージョン: {}", report.tool_version);
    let _ = writeln!(out, "- カタログ: {}", report.catalog_version);
    let _ = writeln!(
        out,
        "- 監査日時: {}",
        report
            .audit_timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string())
    );
    let _ = writeln!(out, "- リソース数: {}", s.total_resources);
    let _ = writeln!(out, "- 健全性スコア(平均): {:.1}", s.average_health_score);
    let _ = writeln!(out, "- 要対応: {} / 所見 {}", s.total_issues, s.total_findings);
    if s.degraded_findings > 0 {
        let _ = writeln!(out, "- 判定不能: {}", s.degraded_findings);
    }
    let _ = writeln!(
        out,
        "- 推定月額コスト(COST 所見): ${:.2}",
        s.total_estimated_monthly_cost
    );
    for t in &s.discovery_errors {
        let _ = writeln!(out, "- 注記: {t} の検出に失敗しました（結果は部分的です）");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## 重大度別");
    let _ = writeln!(out);
    let _ = writeln!(out, "| 重大度 | 件数 |");
    let _ = writeln!(out, "|---|---:|");
    for sev in Severity::ALL {
        let n = s.severity_counts.get(&sev).copied().unwrap_or(0);
        let _ = writeln!(out, "| {sev} | {n} |");
    }

    let issues: Vec<&Finding> = report
        .findings
        .iter()
        .filter(|f| f.status.is_issue())
        .collect();
    let _ = writeln!(out);
    let _ = writeln!(out, "## 要対応の所見 ({})", issues.len());
    if issues.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "_要対応の所見はありません。_");
    }
    let mut sorted = issues;
    sorted.sort_by(|a, b| {
        (a.severity, &a.check_id, &a.resource_id).cmp(&(b.severity, &b.check_id, &b.resource_id))
    });
    for f in sorted {
        let _ = writeln!(out);
        let _ = writeln!(out, "### [{}] {} `{}`", f.severity, f.check_id, f.resource_id);
        let _ = writeln!(out, "- 状態: {}", f.status);
        let _ = writeln!(out, "- 分類: {}", f.category);
        let _ = writeln!(out, "- 内容: {}", f.description);
        let _ = writeln!(out, "- 推奨: {}", f.recommendation);
    }

    let at_risk: Vec<&RecoveryAnalysis> = report
        .recovery_analysis
        .iter()
        .filter(|a| a.compliance_status == FindingStatus::NonCompliant)
        .collect();
    if !at_risk.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## 復旧準備の不足 ({})", at_risk.len());
        let _ = writeln!(out);
        let _ = writeln!(out, "| リソース | 最大間隔(h) | 連続失敗 | RTO(h) |");
        let _ = writeln!(out, "|---|---:|---:|---:|");
        for a in at_risk {
            let _ = writeln!(
                out,
                "| `{}` | {:.1} | {} | {:.1} |",
                a.resource_id, a.max_gap_hours, a.consecutive_failures, a.estimated_rto_hours
            );
        }
    }

    if !report.unused_assets.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## 未使用の可能性があるリソース ({})", report.unused_assets.len());
        let _ = writeln!(out);
        for u in &report.unused_assets {
            let _ = writeln!(
                out,
                "- `{}` ({}) 月額 ${:.2}",
                u.id, u.resource_type, u.estimated_monthly_cost
            );
        }
        let _ = writeln!(
            out,
            "- 削減見込み: ${:.2}/月",
            s.potential_monthly_savings
        );
    }

    let _ = writeln!(out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::core::{Category, ResourceType};
    use crate::report::AssemblyInput;
    use std::collections::BTreeMap;
    use time::OffsetDateTime;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-06-10 12:00 UTC);

    fn empty_report() -> AuditReport {
        crate::report::assemble(
            AssemblyInput {
                timestamp: NOW,
                resources: &[],
                findings: vec![],
                recovery_analyses: vec![],
                scores: &[],
                discovery_errors: vec![],
            },
            &AuditConfig::default(),
        )
    }

    fn finding(status: FindingStatus, description: &str) -> Finding {
        Finding {
            check_id: "AWS-S3-002".to_string(),
            severity: Severity::Critical,
            category: Category::Security,
            resource_id: "b-1".to_string(),
            resource_type: ResourceType::Bucket,
            description: description.to_string(),
            details: BTreeMap::new(),
            recommendation: "fix".to_string(),
            status,
            timestamp: NOW,
        }
    }

    #[test]
    fn empty_findings_still_write_header() {
        let mut buf = Vec::new();
        write_findings(&[], &mut buf).expect("csv");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(text, format!("{}\n", FINDINGS_CSV_HEADER.join(",")));

        let mut buf = Vec::new();
        write_recovery(&[], &mut buf).expect("csv");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(text, format!("{}\n", RECOVERY_CSV_HEADER.join(",")));
    }

    #[test]
    fn compliant_findings_are_not_exported_and_fields_are_quoted() {
        let findings = vec![
            finding(FindingStatus::Compliant, "ok"),
            finding(FindingStatus::NonCompliant, "public, really"),
            finding(FindingStatus::NotApplicable, "unknown"),
        ];
        let mut buf = Vec::new();
        write_findings(&findings, &mut buf).expect("csv");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("\"public, really\""), "{}", lines[1]);
        assert!(lines[1].ends_with("2024-06-10T12:00:00Z"));
        assert!(lines[2].contains("NOT_APPLICABLE"));
    }

    #[test]
    fn json_is_identical_for_a_frozen_clock() {
        let a = to_json(&empty_report()).expect("json");
        let b = to_json(&empty_report()).expect("json");
        assert_eq!(a, b);
        let v: serde_json::Value = serde_json::from_slice(&a).expect("parse");
        assert_eq!(v["audit_timestamp"], "2024-06-10T12:00:00Z");
        assert_eq!(v["summary"]["average_health_score"], 100.0);
    }

    #[test]
    fn markdown_lists_issues_by_severity() {
        let mut report = empty_report();
        report.findings = vec![finding(FindingStatus::NonCompliant, "公開されています")];
        let md = format_markdown_summary(&report);
        assert!(md.starts_with("# cloudaudit レポート\n"));
        assert!(md.contains("## 要対応の所見 (1)"));
        assert!(md.contains("### [CRITICAL] AWS-S3-002 `b-1`"));
    }
}
