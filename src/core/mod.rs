mod category;
mod finding;
mod recovery;
mod report;
mod resource;
mod severity;

pub use category::Category;
pub use finding::{Finding, FindingStatus};
pub use recovery::{RecoveryAnalysis, RecoveryPoint, RecoveryPointStatus};
pub use report::{AuditReport, ReportSummary, ResourceDetail, UnusedAsset};
pub use resource::{
    BackupVaultAttributes, BillingMode, BucketAttributes, CriticalityTier, EncryptionType,
    FunctionAttributes, Listener, LoadBalancerAttributes, LoadBalancerKind, PublicAccessBlock,
    Resource, ResourceAttributes, ResourceType, TableAttributes, VolumeAttributes, VolumeState,
};
pub use severity::Severity;
