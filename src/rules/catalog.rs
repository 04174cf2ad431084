use serde_json::json;

use crate::core::{
    BillingMode, Category, EncryptionType, Finding, LoadBalancerKind, ResourceType, Severity,
    VolumeState,
};
use crate::recovery;

use super::{Check, CheckContext, EvalError, RecoveryHistory, require};

pub const CATALOG_VERSION: &str = "2024.06";

const ALL_TYPES: &[ResourceType] = &ResourceType::ALL;
const BACKUP_TYPES: &[ResourceType] = &[
    ResourceType::Table,
    ResourceType::Bucket,
    ResourceType::Volume,
];
const LB: &[ResourceType] = &[ResourceType::LoadBalancer];
const VAULT: &[ResourceType] = &[ResourceType::BackupVault];
const FUNCTION: &[ResourceType] = &[ResourceType::Function];
const TABLE: &[ResourceType] = &[ResourceType::Table];
const BUCKET: &[ResourceType] = &[ResourceType::Bucket];
const VOLUME: &[ResourceType] = &[ResourceType::Volume];

const DEPRECATED_TLS_POLICIES: &[&str] = &[
    "ELBSecurityPolicy-2015-05",
    "ELBSecurityPolicy-2016-08",
    "ELBSecurityPolicy-TLS-1-0-2015-04",
    "ELBSecurityPolicy-TLS-1-1-2017-01",
];

const DEPRECATED_RUNTIMES: &[&str] = &[
    "dotnetcore2.1",
    "dotnetcore3.1",
    "go1.x",
    "java8",
    "nodejs10.x",
    "nodejs12.x",
    "nodejs14.x",
    "nodejs16.x",
    "python2.7",
    "python3.6",
    "python3.7",
    "python3.8",
    "ruby2.5",
    "ruby2.7",
];

/// Upper bound an API gateway waits for a synchronous integration.
const API_INTEGRATION_TIMEOUT_SECS: u32 = 29;

pub static CATALOG: &[Check] = &[
    Check {
        id: "AWS-ELB-001",
        name: "平文 HTTP リスナー",
        category: Category::Security,
        default_severity: Severity::High,
        applies_to: LB,
        evaluate: elb_plaintext_listener,
    },
    Check {
        id: "AWS-ELB-002",
        name: "非推奨 TLS ポリシー",
        category: Category::Security,
        default_severity: Severity::High,
        applies_to: LB,
        evaluate: elb_deprecated_tls_policy,
    },
    Check {
        id: "AWS-ELB-003",
        name: "アクセスログ無効",
        category: Category::Monitoring,
        default_severity: Severity::Medium,
        applies_to: LB,
        evaluate: elb_access_logs,
    },
    Check {
        id: "AWS-ELB-004",
        name: "削除保護無効",
        category: Category::Resilience,
        default_severity: Severity::Medium,
        applies_to: LB,
        evaluate: elb_deletion_protection,
    },
    Check {
        id: "AWS-ELB-005",
        name: "単一アベイラビリティゾーン",
        category: Category::Resilience,
        default_severity: Severity::High,
        applies_to: LB,
        evaluate: elb_single_zone,
    },
    Check {
        id: "AWS-ELB-006",
        name: "異常なターゲット",
        category: Category::Performance,
        default_severity: Severity::High,
        applies_to: LB,
        evaluate: elb_unhealthy_targets,
    },
    Check {
        id: "AWS-ELB-007",
        name: "WAF 未関連付け",
        category: Category::Security,
        default_severity: Severity::Medium,
        applies_to: LB,
        evaluate: elb_missing_waf,
    },
    Check {
        id: "AWS-ELB-008",
        name: "アイドル状態のロードバランサー",
        category: Category::Cost,
        default_severity: Severity::Low,
        applies_to: LB,
        evaluate: elb_idle,
    },
    Check {
        id: "AWS-BACKUP-001",
        name: "カスタマー管理キー未使用のバックアップボールト",
        category: Category::Security,
        default_severity: Severity::Medium,
        applies_to: VAULT,
        evaluate: vault_encryption,
    },
    Check {
        id: "AWS-BACKUP-002",
        name: "ボールトロック/保持期間",
        category: Category::Compliance,
        default_severity: Severity::Medium,
        applies_to: VAULT,
        evaluate: vault_lock,
    },
    Check {
        id: "AWS-BACKUP-003",
        name: "バックアップ未保護のリソース",
        category: Category::Compliance,
        default_severity: Severity::Critical,
        applies_to: BACKUP_TYPES,
        evaluate: backup_unprotected,
    },
    Check {
        id: "AWS-BACKUP-004",
        name: "復旧ポイント間隔の SLA 超過",
        category: Category::Compliance,
        default_severity: Severity::High,
        applies_to: BACKUP_TYPES,
        evaluate: backup_gap_exceeds_sla,
    },
    Check {
        id: "AWS-BACKUP-005",
        name: "バックアップの連続失敗",
        category: Category::Compliance,
        default_severity: Severity::High,
        applies_to: BACKUP_TYPES,
        evaluate: backup_consecutive_failures,
    },
    Check {
        id: "AWS-BACKUP-006",
        name: "最新の復旧ポイントが古い",
        category: Category::Compliance,
        default_severity: Severity::Medium,
        applies_to: BACKUP_TYPES,
        evaluate: backup_stale,
    },
    Check {
        id: "AWS-LAMBDA-001",
        name: "非推奨ランタイム",
        category: Category::Security,
        default_severity: Severity::High,
        applies_to: FUNCTION,
        evaluate: function_deprecated_runtime,
    },
    Check {
        id: "AWS-LAMBDA-002",
        name: "失敗時の送信先なし",
        category: Category::Resilience,
        default_severity: Severity::Medium,
        applies_to: FUNCTION,
        evaluate: function_dead_letter,
    },
    Check {
        id: "AWS-LAMBDA-003",
        name: "トレース無効",
        category: Category::Monitoring,
        default_severity: Severity::Low,
        applies_to: FUNCTION,
        evaluate: function_tracing,
    },
    Check {
        id: "AWS-LAMBDA-004",
        name: "環境変数のカスタマー管理キー未使用",
        category: Category::Security,
        default_severity: Severity::Medium,
        applies_to: FUNCTION,
        evaluate: function_env_encryption,
    },
    Check {
        id: "AWS-LAMBDA-005",
        name: "API 統合上限を超えるタイムアウト",
        category: Category::Performance,
        default_severity: Severity::Medium,
        applies_to: FUNCTION,
        evaluate: function_timeout,
    },
    Check {
        id: "AWS-LAMBDA-006",
        name: "未使用の関数",
        category: Category::Cost,
        default_severity: Severity::Low,
        applies_to: FUNCTION,
        evaluate: function_unused,
    },
    Check {
        id: "AWS-DDB-001",
        name: "テーブルのカスタマー管理キー未使用",
        category: Category::Security,
        default_severity: Severity::Medium,
        applies_to: TABLE,
        evaluate: table_encryption,
    },
    Check {
        id: "AWS-DDB-002",
        name: "ポイントインタイムリカバリ無効",
        category: Category::Resilience,
        default_severity: Severity::High,
        applies_to: TABLE,
        evaluate: table_pitr,
    },
    Check {
        id: "AWS-DDB-003",
        name: "未使用のプロビジョンド容量",
        category: Category::Cost,
        default_severity: Severity::Medium,
        applies_to: TABLE,
        evaluate: table_idle_capacity,
    },
    Check {
        id: "AWS-S3-001",
        name: "デフォルト暗号化なし",
        category: Category::Security,
        default_severity: Severity::High,
        applies_to: BUCKET,
        evaluate: bucket_encryption,
    },
    Check {
        id: "AWS-S3-002",
        name: "パブリックアクセス未ブロック",
        category: Category::Security,
        default_severity: Severity::Critical,
        applies_to: BUCKET,
        evaluate: bucket_public_access,
    },
    Check {
        id: "AWS-S3-003",
        name: "TLS 非強制のバケットポリシー",
        category: Category::Security,
        default_severity: Severity::Medium,
        applies_to: BUCKET,
        evaluate: bucket_tls_policy,
    },
    Check {
        id: "AWS-S3-004",
        name: "バージョニング無効",
        category: Category::Resilience,
        default_severity: Severity::Medium,
        applies_to: BUCKET,
        evaluate: bucket_versioning,
    },
    Check {
        id: "AWS-EBS-001",
        name: "暗号化されていないボリューム",
        category: Category::Security,
        default_severity: Severity::High,
        applies_to: VOLUME,
        evaluate: volume_encryption,
    },
    Check {
        id: "AWS-EBS-002",
        name: "アタッチされていないボリューム",
        category: Category::Cost,
        default_severity: Severity::Low,
        applies_to: VOLUME,
        evaluate: volume_unattached,
    },
    Check {
        id: "AWS-TAG-001",
        name: "必須タグの欠落",
        category: Category::Compliance,
        default_severity: Severity::Low,
        applies_to: ALL_TYPES,
        evaluate: required_tags,
    },
];

type Findings = Result<Vec<Finding>, EvalError>;

fn elb_plaintext_listener(ctx: &CheckContext<'_>) -> Findings {
    let lb = ctx.load_balancer()?;
    if lb.kind == LoadBalancerKind::Network {
        return Ok(vec![]);
    }
    Ok(lb
        .listeners
        .iter()
        .filter(|l| l.protocol.eq_ignore_ascii_case("HTTP") && !l.redirects_to_https)
        .map(|l| {
            ctx.non_compliant(
                format!("HTTPS へリダイレクトしない HTTP リスナー（port {}）", l.port),
                "HTTP リスナーを HTTPS へのリダイレクトに変更してください。",
            )
            .with_detail("port", l.port)
            .with_detail("protocol", l.protocol.clone())
        })
        .collect())
}

fn elb_deprecated_tls_policy(ctx: &CheckContext<'_>) -> Findings {
    let lb = ctx.load_balancer()?;
    Ok(lb
        .listeners
        .iter()
        .filter(|l| l.is_tls())
        .filter_map(|l| {
            let policy = l.ssl_policy.as_deref()?;
            DEPRECATED_TLS_POLICIES.contains(&policy).then(|| {
                ctx.non_compliant(
                    format!("非推奨の TLS ポリシー {policy}（port {}）", l.port),
                    "TLS 1.2 以上のみを許可するポリシー（例: ELBSecurityPolicy-TLS13-1-2-2021-06）へ更新してください。",
                )
                .with_detail("port", l.port)
                .with_detail("ssl_policy", policy)
            })
        })
        .collect())
}

fn elb_access_logs(ctx: &CheckContext<'_>) -> Findings {
    let lb = ctx.load_balancer()?;
    if require(lb.access_logs_enabled, "access_logs_enabled")? {
        return Ok(vec![]);
    }
    Ok(vec![ctx.non_compliant(
        "アクセスログが無効です",
        "アクセスログを有効化し、保存先バケットを指定してください。",
    )])
}

fn elb_deletion_protection(ctx: &CheckContext<'_>) -> Findings {
    let lb = ctx.load_balancer()?;
    if require(lb.deletion_protection, "deletion_protection")? {
        return Ok(vec![]);
    }
    Ok(vec![ctx.non_compliant(
        "削除保護が無効です",
        "本番トラフィックを扱うロードバランサーでは削除保護を有効化してください。",
    )])
}

fn elb_single_zone(ctx: &CheckContext<'_>) -> Findings {
    let lb = ctx.load_balancer()?;
    let zones = lb.availability_zones.len();
    if zones >= 2 {
        return Ok(vec![]);
    }
    Ok(vec![
        ctx.non_compliant(
            format!("アベイラビリティゾーンが {zones} 個しかありません"),
            "少なくとも 2 つのアベイラビリティゾーンにサブネットを割り当ててください。",
        )
        .with_detail("availability_zones", lb.availability_zones.clone()),
    ])
}

fn elb_unhealthy_targets(ctx: &CheckContext<'_>) -> Findings {
    let lb = ctx.load_balancer()?;
    if lb.healthy_targets > lb.registered_targets {
        return Err(EvalError::InvalidAttribute {
            name: "healthy_targets",
            reason: format!(
                "healthy={} が registered={} を超えています",
                lb.healthy_targets, lb.registered_targets
            ),
        });
    }
    if lb.registered_targets == 0 || lb.healthy_targets == lb.registered_targets {
        return Ok(vec![]);
    }
    let finding = if lb.healthy_targets == 0 {
        ctx.non_compliant(
            "正常なターゲットがありません",
            "ターゲットのヘルスチェック設定とアプリケーションの状態を確認してください。",
        )
    } else {
        ctx.warning(
            format!(
                "一部のターゲットが異常です（{}/{} 正常）",
                lb.healthy_targets, lb.registered_targets
            ),
            "異常なターゲットを調査し、必要に応じて置き換えてください。",
        )
        .with_severity(Severity::Medium)
    };
    Ok(vec![
        finding
            .with_detail("registered_targets", lb.registered_targets)
            .with_detail("healthy_targets", lb.healthy_targets),
    ])
}

fn elb_missing_waf(ctx: &CheckContext<'_>) -> Findings {
    let lb = ctx.load_balancer()?;
    if !lb.internet_facing || lb.kind != LoadBalancerKind::Application || lb.waf_acl.is_some() {
        return Ok(vec![]);
    }
    Ok(vec![ctx.non_compliant(
        "インターネット向けロードバランサーに WAF が関連付けられていません",
        "Web ACL を関連付けてください。",
    )])
}

fn elb_idle(ctx: &CheckContext<'_>) -> Findings {
    ctx.load_balancer()?;
    Ok(idle_finding(
        ctx,
        "トラフィックのないロードバランサーです",
        "不要であれば削除を検討してください。",
    )
    .into_iter()
    .collect())
}

fn vault_encryption(ctx: &CheckContext<'_>) -> Findings {
    let vault = ctx.backup_vault()?;
    match require(vault.encryption, "encryption")? {
        EncryptionType::CustomerManaged => Ok(vec![]),
        other => Ok(vec![
            ctx.non_compliant(
                "バックアップボールトがカスタマー管理キーで暗号化されていません",
                "カスタマー管理の KMS キーを使用するボールトへ移行してください。",
            )
            .with_detail("encryption", json!(other)),
        ]),
    }
}

fn vault_lock(ctx: &CheckContext<'_>) -> Findings {
    let vault = ctx.backup_vault()?;
    let mut out = Vec::new();
    if !require(vault.lock_enabled, "lock_enabled")? {
        out.push(ctx.non_compliant(
            "ボールトロックが設定されていません",
            "コンプライアンスモードのボールトロックを設定してください。",
        ));
    }
    let minimum = ctx.config.backup.min_retention_days;
    if let Some(days) = vault.min_retention_days {
        if days < minimum {
            out.push(
                ctx.non_compliant(
                    format!("最小保持期間が {days} 日です（要件: {minimum} 日以上）"),
                    "ボールトロックの最小保持期間を延長してください。",
                )
                .with_detail("min_retention_days", days)
                .with_detail("required_days", minimum),
            );
        }
    }
    Ok(out)
}

fn backup_unprotected(ctx: &CheckContext<'_>) -> Findings {
    match ctx.history {
        RecoveryHistory::NotCollected => Ok(vec![]),
        RecoveryHistory::Unavailable(reason) => Err(EvalError::HistoryUnavailable(reason.clone())),
        RecoveryHistory::Available(points) if points.is_empty() => Ok(vec![ctx.non_compliant(
            "復旧ポイントが存在しません（バックアップ未保護）",
            "バックアッププランにリソースを割り当ててください。",
        )]),
        RecoveryHistory::Available(_) => Ok(vec![]),
    }
}

fn backup_gap_exceeds_sla(ctx: &CheckContext<'_>) -> Findings {
    let Some(points) = ctx.history.points() else {
        return Ok(vec![]);
    };
    let Some(analysis) = recovery::analyze(ctx.resource, points, &ctx.config.backup) else {
        return Ok(vec![]);
    };
    let sla = ctx.config.backup.sla_hours(ctx.resource.tier);
    if analysis.max_gap_hours <= f64::from(sla) {
        return Ok(vec![]);
    }
    Ok(vec![
        ctx.non_compliant(
            format!(
                "復旧ポイントの最大間隔 {:.1} 時間が SLA {sla} 時間を超えています",
                analysis.max_gap_hours
            ),
            "バックアップの頻度を上げるか、ジョブの失敗原因を解消してください。",
        )
        .with_detail("max_gap_hours", analysis.max_gap_hours)
        .with_detail("sla_hours", sla)
        .with_detail("tier", ctx.resource.tier.as_str()),
    ])
}

fn backup_consecutive_failures(ctx: &CheckContext<'_>) -> Findings {
    let Some(points) = ctx.history.points() else {
        return Ok(vec![]);
    };
    let Some(analysis) = recovery::analyze(ctx.resource, points, &ctx.config.backup) else {
        return Ok(vec![]);
    };
    let failures = analysis.consecutive_failures;
    let finding = match failures {
        0 => return Ok(vec![]),
        n if n >= recovery::FAILURE_RUN_LIMIT => ctx.non_compliant(
            format!("直近のバックアップが {n} 回連続で失敗しています"),
            "バックアップジョブのエラーを確認し、手動で復旧ポイントを作成してください。",
        ),
        _ => ctx
            .warning(
                "直近のバックアップが失敗しています",
                "次回のバックアップジョブが成功することを確認してください。",
            )
            .with_severity(Severity::Medium),
    };
    Ok(vec![finding.with_detail("consecutive_failures", failures)])
}

fn backup_stale(ctx: &CheckContext<'_>) -> Findings {
    let Some(points) = ctx.history.points() else {
        return Ok(vec![]);
    };
    if points.is_empty() {
        return Ok(vec![]);
    }
    let sla = ctx.config.backup.sla_hours(ctx.resource.tier);
    let Some(latest) = recovery::latest_completed(points) else {
        return Ok(vec![ctx.non_compliant(
            "成功した復旧ポイントがありません",
            "バックアップジョブを確認し、成功する復旧ポイントを作成してください。",
        )]);
    };
    let age_hours = (ctx.now - latest).as_seconds_f64() / 3600.0;
    if age_hours <= f64::from(sla) {
        return Ok(vec![]);
    }
    Ok(vec![
        ctx.non_compliant(
            format!("最新の成功した復旧ポイントは {age_hours:.1} 時間前です（SLA {sla} 時間）"),
            "バックアップスケジュールが稼働しているか確認してください。",
        )
        .with_detail("hours_since_last_success", age_hours)
        .with_detail("sla_hours", sla),
    ])
}

fn function_deprecated_runtime(ctx: &CheckContext<'_>) -> Findings {
    let f = ctx.function()?;
    let runtime = f
        .runtime
        .as_deref()
        .ok_or(EvalError::MissingAttribute("runtime"))?;
    if !DEPRECATED_RUNTIMES.contains(&runtime) {
        return Ok(vec![]);
    }
    Ok(vec![
        ctx.non_compliant(
            format!("サポート終了のランタイム {runtime} を使用しています"),
            "サポート対象のランタイムへ移行してください。",
        )
        .with_detail("runtime", runtime),
    ])
}

fn function_dead_letter(ctx: &CheckContext<'_>) -> Findings {
    let f = ctx.function()?;
    if f.dead_letter_target.is_some() || f.on_failure_destination.is_some() {
        return Ok(vec![]);
    }
    Ok(vec![ctx.non_compliant(
        "非同期呼び出しの失敗時の送信先（DLQ）がありません",
        "デッドレターキューまたは失敗時の送信先を設定してください。",
    )])
}

fn function_tracing(ctx: &CheckContext<'_>) -> Findings {
    let f = ctx.function()?;
    if require(f.tracing_active, "tracing_active")? {
        return Ok(vec![]);
    }
    Ok(vec![ctx.non_compliant(
        "アクティブトレースが無効です",
        "トレースを Active に設定してください。",
    )])
}

fn function_env_encryption(ctx: &CheckContext<'_>) -> Findings {
    let f = ctx.function()?;
    if f.environment_variable_count == 0 || f.kms_key.is_some() {
        return Ok(vec![]);
    }
    Ok(vec![
        ctx.non_compliant(
            "環境変数がカスタマー管理キーで暗号化されていません",
            "環境変数の暗号化にカスタマー管理の KMS キーを指定し、秘密情報はシークレットストアへ移してください。",
        )
        .with_detail("environment_variable_count", f.environment_variable_count),
    ])
}

fn function_timeout(ctx: &CheckContext<'_>) -> Findings {
    let f = ctx.function()?;
    if !f.api_integrated || f.timeout_seconds <= API_INTEGRATION_TIMEOUT_SECS {
        return Ok(vec![]);
    }
    Ok(vec![
        ctx.non_compliant(
            format!(
                "タイムアウト {} 秒が API 統合の上限 {API_INTEGRATION_TIMEOUT_SECS} 秒を超えています",
                f.timeout_seconds
            ),
            "タイムアウトを短縮するか、処理を非同期化してください。",
        )
        .with_detail("timeout_seconds", f.timeout_seconds),
    ])
}

fn function_unused(ctx: &CheckContext<'_>) -> Findings {
    ctx.function()?;
    Ok(idle_finding(
        ctx,
        "呼び出しのない関数です",
        "不要であれば関数と関連リソースの削除を検討してください。",
    )
    .into_iter()
    .collect())
}

fn table_encryption(ctx: &CheckContext<'_>) -> Findings {
    let t = ctx.table()?;
    let finding = match require(t.encryption, "encryption")? {
        EncryptionType::CustomerManaged => return Ok(vec![]),
        EncryptionType::AwsManaged => ctx
            .warning(
                "テーブルは AWS 管理キーで暗号化されています",
                "鍵のローテーションとアクセス制御が必要ならカスタマー管理キーへ切り替えてください。",
            )
            .with_severity(Severity::Low),
        EncryptionType::AwsOwned => ctx.non_compliant(
            "テーブルは AWS 所有キーでのみ暗号化されています",
            "カスタマー管理の KMS キーで暗号化してください。",
        ),
    };
    Ok(vec![finding])
}

fn table_pitr(ctx: &CheckContext<'_>) -> Findings {
    let t = ctx.table()?;
    if require(t.point_in_time_recovery, "point_in_time_recovery")? {
        return Ok(vec![]);
    }
    Ok(vec![ctx.non_compliant(
        "ポイントインタイムリカバリが無効です",
        "ポイントインタイムリカバリを有効化してください。",
    )])
}

fn table_idle_capacity(ctx: &CheckContext<'_>) -> Findings {
    let t = ctx.table()?;
    if t.billing_mode != BillingMode::Provisioned {
        return Ok(vec![]);
    }
    Ok(idle_finding(
        ctx,
        "プロビジョンド容量が使用されていません",
        "オンデマンド課金への切り替え、または容量の削減を検討してください。",
    )
    .map(|f| {
        f.with_detail("provisioned_read_capacity", t.provisioned_read_capacity)
            .with_detail("provisioned_write_capacity", t.provisioned_write_capacity)
    })
    .into_iter()
    .collect())
}

fn bucket_encryption(ctx: &CheckContext<'_>) -> Findings {
    let b = ctx.bucket()?;
    if b.encryption.is_some() {
        return Ok(vec![]);
    }
    Ok(vec![ctx.non_compliant(
        "デフォルト暗号化が設定されていません",
        "SSE-KMS によるデフォルト暗号化を設定してください。",
    )])
}

fn bucket_public_access(ctx: &CheckContext<'_>) -> Findings {
    let b = ctx.bucket()?;
    let Some(block) = b.public_access_block else {
        return Ok(vec![ctx.non_compliant(
            "パブリックアクセスブロックが設定されていません",
            "4 項目すべてを有効にしたパブリックアクセスブロックを設定してください。",
        )]);
    };
    if block.fully_blocked() {
        return Ok(vec![]);
    }
    let disabled: Vec<&str> = [
        ("block_public_acls", block.block_public_acls),
        ("ignore_public_acls", block.ignore_public_acls),
        ("block_public_policy", block.block_public_policy),
        ("restrict_public_buckets", block.restrict_public_buckets),
    ]
    .into_iter()
    .filter(|(_, enabled)| !enabled)
    .map(|(name, _)| name)
    .collect();
    Ok(vec![
        ctx.non_compliant(
            "パブリックアクセスブロックが一部無効です",
            "パブリックアクセスブロックの全項目を有効化してください。",
        )
        .with_detail("disabled_settings", disabled),
    ])
}

fn bucket_tls_policy(ctx: &CheckContext<'_>) -> Findings {
    let b = ctx.bucket()?;
    if b.policy_enforces_tls == Some(true) {
        return Ok(vec![]);
    }
    Ok(vec![
        ctx.non_compliant(
            "バケットポリシーが TLS 通信を強制していません",
            "aws:SecureTransport が false のリクエストを拒否するステートメントを追加してください。",
        )
        .with_detail("policy_present", b.policy_enforces_tls.is_some()),
    ])
}

fn bucket_versioning(ctx: &CheckContext<'_>) -> Findings {
    let b = ctx.bucket()?;
    if require(b.versioning_enabled, "versioning_enabled")? {
        return Ok(vec![]);
    }
    Ok(vec![ctx.non_compliant(
        "バージョニングが無効です",
        "バージョニングを有効化し、ライフサイクルルールで旧バージョンを整理してください。",
    )])
}

fn volume_encryption(ctx: &CheckContext<'_>) -> Findings {
    let v = ctx.volume()?;
    if require(v.encrypted, "encrypted")? {
        return Ok(vec![]);
    }
    Ok(vec![ctx.non_compliant(
        "ボリュームが暗号化されていません",
        "暗号化したスナップショットから再作成し、アカウントのデフォルト暗号化を有効化してください。",
    )])
}

fn volume_unattached(ctx: &CheckContext<'_>) -> Findings {
    let v = ctx.volume()?;
    if v.state != VolumeState::Available || !ctx.old_enough() {
        return Ok(vec![]);
    }
    Ok(vec![
        ctx.non_compliant(
            format!("どのインスタンスにもアタッチされていないボリューム（{} GiB）", v.size_gib),
            "スナップショットを取得した上で削除を検討してください。",
        )
        .with_detail("size_gib", v.size_gib)
        .with_detail("estimated_cost", ctx.resource.monthly_cost()),
    ])
}

fn required_tags(ctx: &CheckContext<'_>) -> Findings {
    let missing: Vec<&str> = ctx
        .config
        .filters
        .required_tags
        .iter()
        .map(String::as_str)
        .filter(|tag| !ctx.resource.tags.contains_key(*tag))
        .collect();
    if missing.is_empty() {
        return Ok(vec![]);
    }
    Ok(vec![
        ctx.non_compliant(
            format!("必須タグがありません: {}", missing.join(", ")),
            "組織のタグ付けポリシーに従ってタグを付与してください。",
        )
        .with_detail("missing_tags", missing),
    ])
}

/// Shared body of the COST checks driven by utilisation metrics.
fn idle_finding(ctx: &CheckContext<'_>, description: &str, recommendation: &str) -> Option<Finding> {
    if !ctx.old_enough() {
        return None;
    }
    let signals = ctx.config.idle.idle_signals(&ctx.resource.metrics)?;
    Some(
        ctx.non_compliant(description, recommendation)
            .with_detail("idle_metrics", json!(signals))
            .with_detail("estimated_cost", ctx.resource.monthly_cost()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::core::{
        FindingStatus, FunctionAttributes, Listener, LoadBalancerAttributes, RecoveryPoint,
        RecoveryPointStatus, Resource, ResourceAttributes, TableAttributes, VolumeAttributes,
    };
    use crate::rules::{ResourceInput, evaluate_all};
    use std::collections::{BTreeMap, BTreeSet};
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    const NOW: OffsetDateTime = datetime!(2024-06-10 12:00 UTC);

    fn run_one(id: &str, resource: Resource, history: RecoveryHistory) -> Vec<Finding> {
        let check = CATALOG.iter().find(|c| c.id == id).expect("check in catalog");
        evaluate_all(
            &[ResourceInput { resource, history }],
            std::slice::from_ref(check),
            &AuditConfig::default(),
            NOW,
        )
    }

    fn lb(attrs: LoadBalancerAttributes) -> Resource {
        Resource::new("lb-1", ResourceAttributes::LoadBalancer(attrs))
    }

    fn table(tier: crate::core::CriticalityTier) -> Resource {
        let mut r = Resource::new(
            "orders",
            ResourceAttributes::Table(TableAttributes::default()),
        );
        r.tier = tier;
        r
    }

    fn point(hours_ago: i64, status: RecoveryPointStatus) -> RecoveryPoint {
        RecoveryPoint {
            resource_id: "orders".to_string(),
            created_at: NOW - Duration::hours(hours_ago),
            status,
        }
    }

    #[test]
    fn catalog_ids_are_unique_and_stable() {
        let ids: BTreeSet<&str> = CATALOG.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), CATALOG.len());
        assert!(ids.contains("AWS-BACKUP-003"));
        for check in CATALOG {
            assert!(!check.applies_to.is_empty(), "{}", check.id);
        }
    }

    #[test]
    fn one_finding_per_plaintext_listener() {
        let attrs = LoadBalancerAttributes {
            listeners: vec![
                Listener {
                    protocol: "HTTP".to_string(),
                    port: 80,
                    redirects_to_https: false,
                    ssl_policy: None,
                },
                Listener {
                    protocol: "HTTP".to_string(),
                    port: 8080,
                    redirects_to_https: false,
                    ssl_policy: None,
                },
                Listener {
                    protocol: "HTTP".to_string(),
                    port: 81,
                    redirects_to_https: true,
                    ssl_policy: None,
                },
            ],
            ..Default::default()
        };
        let findings = run_one("AWS-ELB-001", lb(attrs), RecoveryHistory::NotCollected);
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.status == FindingStatus::NonCompliant));
    }

    #[test]
    fn missing_attribute_degrades_instead_of_failing() {
        let findings = run_one(
            "AWS-ELB-003",
            lb(LoadBalancerAttributes::default()),
            RecoveryHistory::NotCollected,
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].status, FindingStatus::NotApplicable);
    }

    #[test]
    fn partially_healthy_targets_warn() {
        let attrs = LoadBalancerAttributes {
            registered_targets: 4,
            healthy_targets: 3,
            ..Default::default()
        };
        let findings = run_one("AWS-ELB-006", lb(attrs), RecoveryHistory::NotCollected);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].status, FindingStatus::Warning);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn empty_history_flags_unprotected_resource() {
        let findings = run_one(
            "AWS-BACKUP-003",
            table(crate::core::CriticalityTier::Standard),
            RecoveryHistory::Available(vec![]),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].status, FindingStatus::NonCompliant);
    }

    #[test]
    fn unavailable_history_is_insufficient_data() {
        let findings = run_one(
            "AWS-BACKUP-003",
            table(crate::core::CriticalityTier::Standard),
            RecoveryHistory::Unavailable("timeout".to_string()),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].status, FindingStatus::InsufficientData);
    }

    #[test]
    fn gap_over_sla_is_reported_for_critical_tier() {
        let history = RecoveryHistory::Available(vec![
            point(40, RecoveryPointStatus::Completed),
            point(10, RecoveryPointStatus::Completed),
        ]);
        let findings = run_one(
            "AWS-BACKUP-004",
            table(crate::core::CriticalityTier::Critical),
            history.clone(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].details.get("sla_hours"), Some(&json!(24)));

        let findings = run_one(
            "AWS-BACKUP-004",
            table(crate::core::CriticalityTier::Standard),
            history,
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn single_trailing_failure_warns_and_two_fail() {
        let one = RecoveryHistory::Available(vec![
            point(20, RecoveryPointStatus::Completed),
            point(2, RecoveryPointStatus::Failed),
        ]);
        let findings = run_one(
            "AWS-BACKUP-005",
            table(crate::core::CriticalityTier::Standard),
            one,
        );
        assert_eq!(findings[0].status, FindingStatus::Warning);

        let two = RecoveryHistory::Available(vec![
            point(20, RecoveryPointStatus::Completed),
            point(4, RecoveryPointStatus::Failed),
            point(2, RecoveryPointStatus::Failed),
        ]);
        let findings = run_one(
            "AWS-BACKUP-005",
            table(crate::core::CriticalityTier::Standard),
            two,
        );
        assert_eq!(findings[0].status, FindingStatus::NonCompliant);
        assert_eq!(findings[0].details.get("consecutive_failures"), Some(&json!(2)));
    }

    #[test]
    fn stale_backup_uses_latest_completed_point() {
        let history = RecoveryHistory::Available(vec![
            point(100, RecoveryPointStatus::Completed),
            point(1, RecoveryPointStatus::Failed),
        ]);
        let findings = run_one(
            "AWS-BACKUP-006",
            table(crate::core::CriticalityTier::Standard),
            history,
        );
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn idle_function_respects_age_gate() {
        let mut r = Resource::new(
            "fn-1",
            ResourceAttributes::Function(FunctionAttributes::default()),
        );
        r.metrics = BTreeMap::from([("invocations".to_string(), 0.0)]);
        r.estimated_monthly_cost = Some(3.5);
        r.created_at = Some(NOW - Duration::days(2));

        let findings = run_one("AWS-LAMBDA-006", r.clone(), RecoveryHistory::NotCollected);
        assert!(findings.is_empty());

        r.created_at = Some(NOW - Duration::days(30));
        let findings = run_one("AWS-LAMBDA-006", r.clone(), RecoveryHistory::NotCollected);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].estimated_cost(), Some(3.5));
        assert_eq!(findings[0].category, Category::Cost);
    }

    #[test]
    fn skip_age_check_evaluates_young_resources() {
        let mut r = Resource::new(
            "vol-1",
            ResourceAttributes::Volume(VolumeAttributes {
                state: VolumeState::Available,
                ..Default::default()
            }),
        );
        r.created_at = Some(NOW - Duration::days(1));
        let check = CATALOG
            .iter()
            .find(|c| c.id == "AWS-EBS-002")
            .expect("check");
        let mut cfg = AuditConfig::default();
        let inputs = [ResourceInput {
            resource: r,
            history: RecoveryHistory::NotCollected,
        }];
        assert!(evaluate_all(&inputs, std::slice::from_ref(check), &cfg, NOW).is_empty());

        cfg.filters.skip_age_check = true;
        assert_eq!(
            evaluate_all(&inputs, std::slice::from_ref(check), &cfg, NOW).len(),
            1
        );
    }

    #[test]
    fn required_tags_lists_every_missing_tag() {
        let mut r = lb(LoadBalancerAttributes::default());
        r.tags.insert("Owner".to_string(), "payments".to_string());
        let findings = run_one("AWS-TAG-001", r, RecoveryHistory::NotCollected);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].details.get("missing_tags"),
            Some(&json!(["Environment"]))
        );
    }
}
