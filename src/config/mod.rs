use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{CriticalityTier, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub audit: AuditConfig,
    pub ui: UiConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

/// Everything the engine reads while evaluating, analysing and scoring.
#[derive(Debug, Clone, Serialize)]
pub struct AuditConfig {
    pub filters: FilterConfig,
    pub backup: BackupConfig,
    pub idle: IdleConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterConfig {
    pub skip_age_check: bool,
    pub min_age_days: i64,
    pub skip_name_filter: bool,
    pub exclude_names: Vec<String>,
    pub required_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupConfig {
    pub sla_thresholds: BTreeMap<CriticalityTier, u32>,
    pub min_retention_days: u32,
    pub rto_base_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdleConfig {
    pub thresholds: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoringConfig {
    pub severity_weights: BTreeMap<Severity, u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

const FALLBACK_SLA_HOURS: u32 = 48;

impl BackupConfig {
    pub fn sla_hours(&self, tier: CriticalityTier) -> u32 {
        self.sla_thresholds
            .get(&tier)
            .or_else(|| self.sla_thresholds.get(&CriticalityTier::Standard))
            .copied()
            .unwrap_or(FALLBACK_SLA_HOURS)
    }

    pub fn rto_hours(&self, tier: CriticalityTier) -> f64 {
        self.rto_base_hours * tier.rto_multiplier()
    }
}

impl IdleConfig {
    /// Metrics that satisfy the idle predicate, or `None` when the resource
    /// is busy or reports none of the configured signals.
    pub fn idle_signals(&self, metrics: &BTreeMap<String, f64>) -> Option<BTreeMap<String, f64>> {
        let mut observed = BTreeMap::new();
        for (name, threshold) in &self.thresholds {
            let Some(value) = metrics.get(name) else {
                continue;
            };
            if *value > *threshold {
                return None;
            }
            observed.insert(name.clone(), *value);
        }
        if observed.is_empty() {
            None
        } else {
            Some(observed)
        }
    }
}

impl ScoringConfig {
    pub fn weight(&self, severity: Severity) -> u32 {
        self.severity_weights
            .get(&severity)
            .copied()
            .unwrap_or_else(|| severity.default_weight())
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            filters: FilterConfig {
                skip_age_check: false,
                min_age_days: 7,
                skip_name_filter: false,
                exclude_names: vec!["*-scratch-*".to_string()],
                required_tags: vec!["Environment".to_string(), "Owner".to_string()],
            },
            backup: BackupConfig {
                sla_thresholds: BTreeMap::from([
                    (CriticalityTier::Critical, 24),
                    (CriticalityTier::High, 24),
                    (CriticalityTier::Standard, 48),
                    (CriticalityTier::Low, 168),
                ]),
                min_retention_days: 7,
                rto_base_hours: 2.0,
            },
            idle: IdleConfig {
                thresholds: BTreeMap::from([
                    ("active_connections".to_string(), 0.0),
                    ("consumed_capacity".to_string(), 0.0),
                    ("invocations".to_string(), 0.0),
                    ("request_count".to_string(), 0.0),
                ]),
            },
            scoring: ScoringConfig {
                severity_weights: Severity::ALL
                    .into_iter()
                    .map(|s| (s, s.default_weight()))
                    .collect(),
            },
        }
    }
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            audit: AuditConfig::default(),
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    audit: Option<RawAuditConfig>,
    backup: Option<RawBackupConfig>,
    idle: Option<RawIdleConfig>,
    scoring: Option<RawScoringConfig>,
    ui: Option<RawUiConfig>,
}

#[derive(Debug, Deserialize)]
struct RawAuditConfig {
    skip_age_check: Option<bool>,
    min_age_days: Option<i64>,
    skip_name_filter: Option<bool>,
    exclude_names: Option<Vec<String>>,
    required_tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawBackupConfig {
    sla_thresholds: Option<BTreeMap<CriticalityTier, u32>>,
    min_retention_days: Option<u32>,
    rto_base_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawIdleConfig {
    thresholds: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Deserialize)]
struct RawScoringConfig {
    severity_weights: Option<BTreeMap<String, u32>>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/cloudaudit/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw)?;
        cfg.config_path = Some(path.display().to_string());
    } else if config_path.is_some() {
        return Err(anyhow::anyhow!(
            "設定ファイルが見つかりません: {}",
            path.display()
        ));
    }

    apply_env_overrides(&mut cfg)?;
    validate(&cfg.audit)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) -> Result<()> {
    if let Some(audit) = raw.audit {
        let filters = &mut cfg.audit.filters;
        if let Some(v) = audit.skip_age_check {
            filters.skip_age_check = v;
        }
        if let Some(v) = audit.min_age_days {
            filters.min_age_days = v;
        }
        if let Some(v) = audit.skip_name_filter {
            filters.skip_name_filter = v;
        }
        if let Some(v) = audit.exclude_names {
            filters.exclude_names = v;
        }
        if let Some(v) = audit.required_tags {
            filters.required_tags = v;
        }
    }

    if let Some(backup) = raw.backup {
        if let Some(sla) = backup.sla_thresholds {
            cfg.audit.backup.sla_thresholds.extend(sla);
        }
        if let Some(v) = backup.min_retention_days {
            cfg.audit.backup.min_retention_days = v;
        }
        if let Some(v) = backup.rto_base_hours {
            cfg.audit.backup.rto_base_hours = v;
        }
    }

    if let Some(idle) = raw.idle {
        if let Some(thresholds) = idle.thresholds {
            cfg.audit.idle.thresholds = thresholds;
        }
    }

    if let Some(scoring) = raw.scoring {
        if let Some(weights) = scoring.severity_weights {
            for (key, weight) in weights {
                let severity = key
                    .parse::<Severity>()
                    .map_err(anyhow::Error::msg)
                    .context("scoring.severity_weights")?;
                cfg.audit.scoring.severity_weights.insert(severity, weight);
            }
        }
    }

    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    Ok(())
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("CLOUDAUDIT_SKIP_AGE_CHECK") {
        cfg.audit.filters.skip_age_check =
            parse_bool(&v).with_context(|| "CLOUDAUDIT_SKIP_AGE_CHECK")?;
    }
    if let Ok(v) = std::env::var("CLOUDAUDIT_SKIP_NAME_FILTER") {
        cfg.audit.filters.skip_name_filter =
            parse_bool(&v).with_context(|| "CLOUDAUDIT_SKIP_NAME_FILTER")?;
    }
    if let Ok(v) = std::env::var("CLOUDAUDIT_MIN_AGE_DAYS") {
        cfg.audit.filters.min_age_days = v
            .trim()
            .parse::<i64>()
            .with_context(|| "CLOUDAUDIT_MIN_AGE_DAYS")?;
    }
    if let Ok(v) = std::env::var("CLOUDAUDIT_REQUIRED_TAGS") {
        cfg.audit.filters.required_tags = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
    }
    if let Ok(v) = std::env::var("CLOUDAUDIT_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "CLOUDAUDIT_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("CLOUDAUDIT_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "CLOUDAUDIT_UI_MAX_TABLE_ROWS")?;
    }

    Ok(())
}

fn validate(audit: &AuditConfig) -> Result<()> {
    if audit.filters.min_age_days < 0 {
        return Err(anyhow::anyhow!(
            "audit.min_age_days は 0 以上を指定してください: {}",
            audit.filters.min_age_days
        ));
    }
    let rto = audit.backup.rto_base_hours;
    if !rto.is_finite() || rto < 0.0 {
        return Err(anyhow::anyhow!(
            "backup.rto_base_hours は 0 以上の数値を指定してください: {rto}"
        ));
    }
    for (severity, weight) in &audit.scoring.severity_weights {
        if *weight > 100 {
            return Err(anyhow::anyhow!(
                "scoring.severity_weights.{severity} は 0〜100 を指定してください: {weight}"
            ));
        }
    }
    for (name, threshold) in &audit.idle.thresholds {
        if !threshold.is_finite() {
            return Err(anyhow::anyhow!(
                "idle.thresholds.{name} が不正です: {threshold}"
            ));
        }
    }
    crate::engine::validate_name_filter(&audit.filters.exclude_names)?;
    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}
