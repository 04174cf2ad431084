//! Contract with the component that enumerates live resources.
//!
//! The engine only sees the [`Discovery`] trait through a
//! [`DiscoveryContext`] created for one audit invocation. The crate ships
//! [`InventoryDiscovery`], a typed in-memory source loaded from an inventory
//! snapshot document.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{RecoveryPoint, RecoveryPointStatus, Resource, ResourceType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("{resource_type} の一覧取得に失敗しました: {reason}")]
    ListFailed {
        resource_type: ResourceType,
        reason: String,
    },
    #[error("{resource_id} の復旧ポイント取得に失敗しました: {reason}")]
    RecoveryPointsFailed { resource_id: String, reason: String },
}

pub trait Discovery {
    fn list_resources(&self, resource_type: ResourceType) -> Result<Vec<Resource>, DiscoveryError>;

    /// Only called for types where [`ResourceType::supports_backups`] holds.
    fn list_recovery_points(&self, resource: &Resource)
    -> Result<Vec<RecoveryPoint>, DiscoveryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub calls: usize,
    pub failures: usize,
}

/// Owns the discovery source for the lifetime of one audit run.
pub struct DiscoveryContext {
    source: Box<dyn Discovery>,
    resource_types: Vec<ResourceType>,
    calls: Cell<usize>,
    failures: Cell<usize>,
}

impl DiscoveryContext {
    pub fn new(source: Box<dyn Discovery>) -> Self {
        Self {
            source,
            resource_types: ResourceType::ALL.to_vec(),
            calls: Cell::new(0),
            failures: Cell::new(0),
        }
    }

    pub fn resource_types(&self) -> &[ResourceType] {
        &self.resource_types
    }

    pub fn list_resources(&self, resource_type: ResourceType) -> Result<Vec<Resource>, DiscoveryError> {
        self.record(self.source.list_resources(resource_type))
    }

    pub fn list_recovery_points(
        &self,
        resource: &Resource,
    ) -> Result<Vec<RecoveryPoint>, DiscoveryError> {
        self.record(self.source.list_recovery_points(resource))
    }

    pub fn stats(&self) -> DiscoveryStats {
        DiscoveryStats {
            calls: self.calls.get(),
            failures: self.failures.get(),
        }
    }

    pub fn teardown(self) -> DiscoveryStats {
        let stats = self.stats();
        tracing::debug!(
            calls = stats.calls,
            failures = stats.failures,
            "discovery context closed"
        );
        stats
    }

    fn record<T>(&self, result: Result<T, DiscoveryError>) -> Result<T, DiscoveryError> {
        self.calls.set(self.calls.get() + 1);
        if result.is_err() {
            self.failures.set(self.failures.get() + 1);
        }
        result
    }
}

/// Recovery point as written in an inventory snapshot; the timestamp is
/// validated when the history is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecoveryPoint {
    pub resource_id: String,
    pub created_at: String,
    pub status: RecoveryPointStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub resources: Vec<Resource>,
    pub recovery_points: Vec<InventoryRecoveryPoint>,
    /// Resource types whose listing call fails, e.g. missing permissions.
    pub unavailable: BTreeSet<ResourceType>,
    /// Resource ids whose recovery-point listing fails.
    pub unavailable_recovery_points: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InventoryDiscovery {
    inventory: Inventory,
}

impl InventoryDiscovery {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let inventory: Inventory =
            serde_json::from_str(s).context("インベントリ(JSON)の解析に失敗しました")?;
        Ok(Self::new(inventory))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| {
            format!("インベントリの読み取りに失敗しました: {}", path.display())
        })?;
        Self::from_json(&s).with_context(|| path.display().to_string())
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }
}

impl Discovery for InventoryDiscovery {
    fn list_resources(&self, resource_type: ResourceType) -> Result<Vec<Resource>, DiscoveryError> {
        if self.inventory.unavailable.contains(&resource_type) {
            return Err(DiscoveryError::ListFailed {
                resource_type,
                reason: "サービスが応答しませんでした".to_string(),
            });
        }
        Ok(self
            .inventory
            .resources
            .iter()
            .filter(|r| r.resource_type() == resource_type)
            .cloned()
            .collect())
    }

    fn list_recovery_points(
        &self,
        resource: &Resource,
    ) -> Result<Vec<RecoveryPoint>, DiscoveryError> {
        if self
            .inventory
            .unavailable_recovery_points
            .contains(&resource.id)
        {
            return Err(DiscoveryError::RecoveryPointsFailed {
                resource_id: resource.id.clone(),
                reason: "サービスが応答しませんでした".to_string(),
            });
        }
        self.inventory
            .recovery_points
            .iter()
            .filter(|p| p.resource_id == resource.id)
            .map(|p| {
                let created_at = OffsetDateTime::parse(p.created_at.trim(), &Rfc3339).map_err(
                    |err| DiscoveryError::RecoveryPointsFailed {
                        resource_id: resource.id.clone(),
                        reason: format!("作成日時が不正です: {}（{err}）", p.created_at),
                    },
                )?;
                Ok(RecoveryPoint {
                    resource_id: p.resource_id.clone(),
                    created_at,
                    status: p.status,
                })
            })
            .collect()
    }
}
