use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    LoadBalancer,
    BackupVault,
    Function,
    Table,
    Bucket,
    Volume,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::LoadBalancer,
        ResourceType::BackupVault,
        ResourceType::Function,
        ResourceType::Table,
        ResourceType::Bucket,
        ResourceType::Volume,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceType::LoadBalancer => "load-balancer",
            ResourceType::BackupVault => "backup-vault",
            ResourceType::Function => "function",
            ResourceType::Table => "table",
            ResourceType::Bucket => "bucket",
            ResourceType::Volume => "volume",
        }
    }

    /// Summary key suffix, e.g. `total_load_balancers`.
    pub const fn plural(self) -> &'static str {
        match self {
            ResourceType::LoadBalancer => "load_balancers",
            ResourceType::BackupVault => "backup_vaults",
            ResourceType::Function => "functions",
            ResourceType::Table => "tables",
            ResourceType::Bucket => "buckets",
            ResourceType::Volume => "volumes",
        }
    }

    /// Types whose recovery-point history is collected and analysed.
    pub const fn supports_backups(self) -> bool {
        matches!(
            self,
            ResourceType::Table | ResourceType::Bucket | ResourceType::Volume
        )
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("リソース種別が不正です: {s}"))
    }
}

/// Business criticality; drives the backup SLA and the RTO policy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CriticalityTier {
    Critical,
    High,
    #[default]
    Standard,
    Low,
}

impl CriticalityTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            CriticalityTier::Critical => "critical",
            CriticalityTier::High => "high",
            CriticalityTier::Standard => "standard",
            CriticalityTier::Low => "low",
        }
    }

    pub const fn rto_multiplier(self) -> f64 {
        match self {
            CriticalityTier::Critical => 1.0,
            CriticalityTier::High => 2.0,
            CriticalityTier::Standard => 3.0,
            CriticalityTier::Low => 4.0,
        }
    }
}

impl fmt::Display for CriticalityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionType {
    AwsOwned,
    AwsManaged,
    CustomerManaged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerKind {
    #[default]
    Application,
    Network,
    Classic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub protocol: String,
    pub port: u16,
    #[serde(default)]
    pub redirects_to_https: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_policy: Option<String>,
}

impl Listener {
    pub fn is_tls(&self) -> bool {
        matches!(
            self.protocol.to_ascii_uppercase().as_str(),
            "HTTPS" | "TLS" | "SSL"
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerAttributes {
    pub kind: LoadBalancerKind,
    pub internet_facing: bool,
    pub listeners: Vec<Listener>,
    pub availability_zones: Vec<String>,
    pub access_logs_enabled: Option<bool>,
    pub deletion_protection: Option<bool>,
    pub waf_acl: Option<String>,
    pub registered_targets: u32,
    pub healthy_targets: u32,
    /// Attributes no check reads, kept as reported.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupVaultAttributes {
    pub encryption: Option<EncryptionType>,
    pub lock_enabled: Option<bool>,
    pub min_retention_days: Option<u32>,
    pub recovery_point_count: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionAttributes {
    pub runtime: Option<String>,
    pub timeout_seconds: u32,
    pub memory_mb: u32,
    pub dead_letter_target: Option<String>,
    pub on_failure_destination: Option<String>,
    pub tracing_active: Option<bool>,
    pub environment_variable_count: u32,
    pub kms_key: Option<String>,
    pub api_integrated: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BillingMode {
    Provisioned,
    #[default]
    PayPerRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableAttributes {
    pub encryption: Option<EncryptionType>,
    pub point_in_time_recovery: Option<bool>,
    pub billing_mode: BillingMode,
    pub provisioned_read_capacity: u64,
    pub provisioned_write_capacity: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicAccessBlock {
    pub block_public_acls: bool,
    pub ignore_public_acls: bool,
    pub block_public_policy: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlock {
    pub fn fully_blocked(&self) -> bool {
        self.block_public_acls
            && self.ignore_public_acls
            && self.block_public_policy
            && self.restrict_public_buckets
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketAttributes {
    /// `None` means no default encryption is configured.
    pub encryption: Option<EncryptionType>,
    pub public_access_block: Option<PublicAccessBlock>,
    pub policy_enforces_tls: Option<bool>,
    pub versioning_enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    #[default]
    InUse,
    Available,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeAttributes {
    pub encrypted: Option<bool>,
    pub state: VolumeState,
    pub size_gib: u32,
    pub attached_to: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Per-type attribute schema. Only the properties the check catalog reads
/// are typed; everything else lands in the variant's `extra` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResourceAttributes {
    LoadBalancer(LoadBalancerAttributes),
    BackupVault(BackupVaultAttributes),
    Function(FunctionAttributes),
    Table(TableAttributes),
    Bucket(BucketAttributes),
    Volume(VolumeAttributes),
}

impl ResourceAttributes {
    pub const fn resource_type(&self) -> ResourceType {
        match self {
            ResourceAttributes::LoadBalancer(_) => ResourceType::LoadBalancer,
            ResourceAttributes::BackupVault(_) => ResourceType::BackupVault,
            ResourceAttributes::Function(_) => ResourceType::Function,
            ResourceAttributes::Table(_) => ResourceType::Table,
            ResourceAttributes::Bucket(_) => ResourceType::Bucket,
            ResourceAttributes::Volume(_) => ResourceType::Volume,
        }
    }

    pub fn extra(&self) -> &BTreeMap<String, serde_json::Value> {
        match self {
            ResourceAttributes::LoadBalancer(a) => &a.extra,
            ResourceAttributes::BackupVault(a) => &a.extra,
            ResourceAttributes::Function(a) => &a.extra,
            ResourceAttributes::Table(a) => &a.extra,
            ResourceAttributes::Bucket(a) => &a.extra,
            ResourceAttributes::Volume(a) => &a.extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tier: CriticalityTier,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_monthly_cost: Option<f64>,
    pub attributes: ResourceAttributes,
}

impl Resource {
    pub fn new(id: impl Into<String>, attributes: ResourceAttributes) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            tier: CriticalityTier::default(),
            created_at: None,
            tags: BTreeMap::new(),
            metrics: BTreeMap::new(),
            estimated_monthly_cost: None,
            attributes,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.attributes.resource_type()
    }

    pub fn extra(&self) -> &BTreeMap<String, serde_json::Value> {
        self.attributes.extra()
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Whole days since creation, or `None` when discovery did not report it.
    pub fn age_days(&self, now: OffsetDateTime) -> Option<i64> {
        self.created_at.map(|t| (now - t).whole_days())
    }

    pub fn monthly_cost(&self) -> f64 {
        self.estimated_monthly_cost.unwrap_or(0.0).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_tagged_by_resource_type() {
        let json = r#"{
            "id": "arn:aws:s3:::logs",
            "attributes": { "type": "bucket", "versioning_enabled": true }
        }"#;
        let r: Resource = serde_json::from_str(json).expect("parse resource");
        assert_eq!(r.resource_type(), ResourceType::Bucket);
        assert_eq!(r.tier, CriticalityTier::Standard);
        assert_eq!(r.display_name(), "arn:aws:s3:::logs");
        let ResourceAttributes::Bucket(b) = &r.attributes else {
            panic!("expected bucket attributes");
        };
        assert_eq!(b.versioning_enabled, Some(true));
        assert_eq!(b.encryption, None);
        assert!(r.extra().is_empty());
    }

    #[test]
    fn unknown_attributes_are_kept_in_extra() {
        let json = r#"{
            "id": "vol-1",
            "attributes": {
                "type": "volume",
                "encrypted": true,
                "volume_type": "gp3",
                "iops": 3000
            }
        }"#;
        let r: Resource = serde_json::from_str(json).expect("parse resource");
        let ResourceAttributes::Volume(v) = &r.attributes else {
            panic!("expected volume attributes");
        };
        assert_eq!(v.encrypted, Some(true));
        assert_eq!(r.extra().len(), 2);
        assert_eq!(r.extra()["volume_type"], "gp3");
        assert_eq!(r.extra()["iops"], 3000);
        assert!(!r.extra().contains_key("type"));

        let back = serde_json::to_value(&r).expect("serialize resource");
        assert_eq!(back["attributes"]["type"], "volume");
        assert_eq!(back["attributes"]["volume_type"], "gp3");
    }

    #[test]
    fn resource_type_round_trips_through_from_str() {
        for t in ResourceType::ALL {
            assert_eq!(t.as_str().parse::<ResourceType>(), Ok(t));
        }
    }
}
