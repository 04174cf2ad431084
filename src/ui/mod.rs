use anyhow::Error;
use std::io::{self, Write};
use std::path::Path;
use unicode_width::UnicodeWidthChar;

use crate::core::{AuditReport, Finding, FindingStatus, Severity};
use crate::rules::Check;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `cloudaudit --help` を参照してください"
    );
}

pub fn print_summary(report: &AuditReport, cfg: &UiConfig, written_to: Option<&Path>) {
    if cfg.quiet {
        return;
    }
    let s = &report.summary;
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "概要: リソース={}  健全性スコア={:.1}  要対応={}  判定不能={}",
        s.total_resources, s.average_health_score, s.total_issues, s.degraded_findings
    );
    let counts: Vec<String> = Severity::ALL
        .into_iter()
        .map(|sev| {
            let n = s.severity_counts.get(&sev).copied().unwrap_or(0);
            format!("{}={n}", format_severity(sev, cfg.color))
        })
        .collect();
    let _ = writeln!(out, "- 重大度: {}", counts.join("  "));
    if s.total_estimated_monthly_cost > 0.0 {
        let _ = writeln!(
            out,
            "- 推定月額コスト: ${:.2}（削減見込み: ${:.2}）",
            s.total_estimated_monthly_cost, s.potential_monthly_savings
        );
    }
    for t in &s.discovery_errors {
        let _ = writeln!(out, "- 注記: {t} の検出に失敗しました（結果は部分的です）");
    }

    let mut issues: Vec<&Finding> = report
        .findings
        .iter()
        .filter(|f| f.status.is_issue())
        .collect();
    issues.sort_by_key(|f| f.severity);
    let total = issues.len();
    let rows = cfg.max_table_rows.min(total);

    let _ = writeln!(out);
    if total == 0 {
        let _ = writeln!(out, "要対応の所見はありません。");
    } else {
        if total > rows {
            let _ = writeln!(out, "要対応の所見（{rows}件表示 / 全{total}件）:");
        } else {
            let _ = writeln!(out, "要対応の所見（{rows}件表示）:");
        }
        print_findings_table(&mut out, &issues[..rows], cfg.color);
    }

    if cfg.verbose {
        let degraded: Vec<&Finding> = report
            .findings
            .iter()
            .filter(|f| f.status.is_degraded())
            .collect();
        if !degraded.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "判定できなかったチェック:");
            for f in degraded {
                let reason = f
                    .details
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("-");
                let _ = writeln!(out, "- {} `{}`: {reason}", f.check_id, f.resource_id);
            }
        }
    }

    if let Some(dir) = written_to {
        let _ = writeln!(out);
        let _ = writeln!(out, "出力: {}", dir.display());
    }
}

pub fn print_checks(checks: &[Check], cfg: &UiConfig) {
    let mut out = io::stdout().lock();
    let id_w = checks
        .iter()
        .map(|c| visible_width_ansi(c.id))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi("ID"));
    let sev_w = visible_width_ansi("重大度").max(8);
    let cat_w = visible_width_ansi("分類").max(11);

    let _ = writeln!(
        out,
        "{}  {}  {}  名称",
        pad_end_display("ID", id_w),
        pad_end_display("重大度", sev_w),
        pad_end_display("分類", cat_w),
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        "-".repeat(id_w),
        "-".repeat(sev_w),
        "-".repeat(cat_w),
        "-".repeat(4)
    );
    for c in checks {
        let types: Vec<&str> = c.applies_to.iter().map(|t| t.as_str()).collect();
        let _ = writeln!(
            out,
            "{}  {}  {}  {} ({})",
            pad_end_display(c.id, id_w),
            pad_end_ansi(&format_severity(c.default_severity, cfg.color), sev_w),
            pad_end_display(c.category.as_str(), cat_w),
            c.name,
            types.join(", ")
        );
    }
}

fn print_findings_table(out: &mut dyn Write, findings: &[&Finding], color: bool) {
    const RESOURCE_MAX: usize = 40;

    let label_sev = "重大度";
    let label_check = "チェック";
    let label_res = "リソース";
    let label_desc = "内容";

    let sev_w = visible_width_ansi(label_sev).max(8);
    let check_w = findings
        .iter()
        .map(|f| visible_width_ansi(&f.check_id))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_check));
    let res_w = findings
        .iter()
        .map(|f| visible_width_ansi(&truncate_middle(&f.resource_id, RESOURCE_MAX)))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_res));

    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        pad_end_display(label_sev, sev_w),
        pad_end_display(label_check, check_w),
        pad_end_display(label_res, res_w),
        label_desc
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  {}",
        "-".repeat(sev_w),
        "-".repeat(check_w),
        "-".repeat(res_w),
        "-".repeat(visible_width_ansi(label_desc))
    );

    for f in findings {
        let mut sev = format_severity(f.severity, color);
        if f.status == FindingStatus::Warning {
            sev.push('?');
        }
        let _ = writeln!(
            out,
            "{}  {}  {}  {}",
            pad_end_ansi(&sev, sev_w),
            pad_end_display(&f.check_id, check_w),
            pad_end_display(&truncate_middle(&f.resource_id, RESOURCE_MAX), res_w),
            f.description
        );
    }
}

fn format_severity(sev: Severity, color: bool) -> String {
    let s = sev.as_str();
    if !color {
        return s.to_string();
    }

    let code = match sev {
        Severity::Critical => "1;31",
        Severity::High => "31",
        Severity::Medium => "33",
        Severity::Low => "32",
        Severity::Info => "90",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s.chars().skip(len - right).collect();

    format!("{prefix}...{suffix}")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_end_display(s: &str, width: usize) -> String {
    pad_end_ansi(s, width)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ansi_codes_do_not_count_towards_width() {
        let colored = format_severity(Severity::Critical, true);
        assert_eq!(visible_width_ansi(&colored), "CRITICAL".len());
        assert_eq!(visible_width_ansi("重大度"), 6);
        assert_eq!(visible_width_ansi(&pad_end_ansi(&colored, 10)), 10);
    }

    #[test]
    fn truncate_middle_keeps_both_ends() {
        let s = truncate_middle("arn:aws:s3:::very-long-bucket-name-for-logs", 16);
        assert_eq!(s.chars().count(), 16);
        assert!(s.starts_with("arn:aw"));
        assert!(s.ends_with("or-logs"));
        assert_eq!(truncate_middle("short", 16), "short");
    }
}
