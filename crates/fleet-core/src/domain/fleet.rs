//! Fleet エンティティ: registry インスタンスと deployment target
//!
//! 所有者は storage。engine は参照するだけ。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{DeploymentId, RegistryId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryStatus {
    Requested,
    Provisioning,
    Ready,
    Failed,
    Deleting,
}

impl fmt::Display for RegistryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistryStatus::Requested => "REQUESTED",
            RegistryStatus::Provisioning => "PROVISIONING",
            RegistryStatus::Ready => "READY",
            RegistryStatus::Failed => "FAILED",
            RegistryStatus::Deleting => "DELETING",
        };
        f.write_str(s)
    }
}

/// 管理対象の registry インスタンス
///
/// `status` と `deployment` は必ず 1 つの transaction の中で一緒に変える。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInstance {
    pub id: RegistryId,
    pub name: String,
    pub owner_id: String,
    pub org_id: Option<String>,
    pub status: RegistryStatus,
    pub deployment: Option<DeploymentId>,
    pub tenant_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl RegistryInstance {
    pub fn new(
        id: RegistryId,
        name: impl Into<String>,
        owner_id: impl Into<String>,
        org_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner_id: owner_id.into(),
            org_id,
            status: RegistryStatus::Requested,
            deployment: None,
            tenant_url: None,
            created_at: now,
            version: 0,
        }
    }

    /// scheduling の事後条件（deployment あり + `Provisioning` 以降）を満たすか
    pub fn is_scheduled(&self) -> bool {
        self.deployment.is_some()
            && matches!(
                self.status,
                RegistryStatus::Provisioning | RegistryStatus::Ready
            )
    }

    /// deployment に割り当てる。status と参照は一緒に動く
    pub fn assign(&mut self, deployment: DeploymentId) {
        self.deployment = Some(deployment);
        self.status = RegistryStatus::Provisioning;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Available,
    Unavailable,
}

/// registry tenant の provisioning 先
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub id: DeploymentId,
    pub name: String,
    pub tenant_manager_url: String,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub version: u64,
}

impl DeploymentTarget {
    pub fn new(
        id: DeploymentId,
        name: impl Into<String>,
        tenant_manager_url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            tenant_manager_url: tenant_manager_url.into(),
            status: DeploymentStatus::Available,
            version: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == DeploymentStatus::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registry_is_requested_and_unassigned() {
        let r = RegistryInstance::new(RegistryId::generate(), "r1", "alice", None, Utc::now());

        assert_eq!(r.status, RegistryStatus::Requested);
        assert!(r.deployment.is_none());
        assert!(!r.is_scheduled());
    }

    #[test]
    fn assign_moves_status_and_reference_together() {
        let mut r = RegistryInstance::new(RegistryId::generate(), "r1", "alice", None, Utc::now());
        let d = DeploymentId::generate();

        r.assign(d);

        assert_eq!(r.deployment, Some(d));
        assert_eq!(r.status, RegistryStatus::Provisioning);
        assert!(r.is_scheduled());
    }

    #[test]
    fn deployment_reference_alone_is_not_scheduled() {
        let mut r = RegistryInstance::new(RegistryId::generate(), "r1", "alice", None, Utc::now());
        r.deployment = Some(DeploymentId::generate());

        assert!(!r.is_scheduled());
    }
}
