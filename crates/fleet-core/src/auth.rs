//! registry 参照の読み取り権限チェック
//!
//! # ルール
//! - organization のメンバーはその organization の registry をすべて読める
//! - organization が無ければ所有者だけが読める
//! - 別 organization の registry は not found として返す（存在を漏らさない）

use std::future::Future;

use thiserror::Error;
use tracing::info;

use crate::domain::{RegistryId, RegistryInstance, StorageError};
use crate::ports::{AuditEvent, AuditSink, Storage};

/// 呼び出し元の認証情報から取り出した identity
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountInfo {
    pub account_id: Option<String>,
    pub org_id: Option<String>,
    pub username: String,
}

impl AccountInfo {
    pub fn new(account_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            org_id: None,
            username: username.into(),
        }
    }

    pub fn in_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    fn owns(&self, registry: &RegistryInstance) -> bool {
        self.username == registry.owner_id
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("registry {0} not found")]
    NotFound(RegistryId),

    #[error("not authorized")]
    NotAuthorized,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// `account` が `registry` を読めるか。存在しない registry は読める扱いで、
/// 欠落は操作自身が報告する。
pub fn can_read(
    account: &AccountInfo,
    registry: Option<&RegistryInstance>,
) -> Result<bool, AuthError> {
    if account.account_id.is_none() {
        return Err(AuthError::Invariant(
            "account id missing from credentials".to_string(),
        ));
    }
    let Some(registry) = registry else {
        return Ok(true);
    };
    match &account.org_id {
        Some(org) if registry.org_id.as_ref() == Some(org) => Ok(true),
        Some(_) => Err(AuthError::NotFound(registry.id)),
        None => Ok(account.owns(registry)),
    }
}

/// `identity` が `registry_id` を読めるときだけ `op` を実行する。
///
/// identity 無しの呼び出しはチェックせず通す。拒否は監査イベント
/// `authorization_failure` として記録する。
pub async fn with_read_permission<T, E, F, Fut>(
    storage: &dyn Storage,
    audit: &dyn AuditSink,
    identity: Option<&AccountInfo>,
    registry_id: RegistryId,
    op: F,
) -> Result<T, E>
where
    E: From<AuthError>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let Some(account) = identity else {
        return op().await;
    };
    let registry = {
        let mut tx = storage.begin().await.map_err(AuthError::from)?;
        tx.get_registry(registry_id).await.map_err(AuthError::from)?
    };
    if can_read(account, registry.as_ref())? {
        return op().await;
    }

    info!(
        registry_id = %registry_id,
        username = %account.username,
        "attempt to read registry without the proper permissions"
    );
    audit.record(
        AuditEvent::new("authorization_failure")
            .with("target", "registry")
            .with("operation", "read"),
    );
    Err(AuthError::NotAuthorized.into())
}
