//! QuotaAccountManagement - 所有者ごとの quota と規約のチェック

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::QuotaConfig;
use crate::domain::{BusinessError, RegistryId, RegistryInstance};
use crate::ports::AccountManagement;

#[derive(Debug, Default)]
struct Accounts {
    accepted_terms: HashSet<String>,
    eval_owners: HashSet<String>,
    /// registry → owner
    reservations: HashMap<RegistryId, String>,
}

#[derive(Debug)]
pub struct QuotaAccountManagement {
    config: QuotaConfig,
    accounts: Mutex<Accounts>,
}

impl QuotaAccountManagement {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            accounts: Mutex::new(Accounts::default()),
        }
    }

    pub fn accept_terms(&self, owner_id: &str) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.accepted_terms.insert(owner_id.to_string());
        }
    }

    /// 所有者が評価プランを使っている
    pub fn mark_eval(&self, owner_id: &str) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.eval_owners.insert(owner_id.to_string());
        }
    }

    pub fn reserved_for(&self, owner_id: &str) -> usize {
        self.accounts
            .lock()
            .map(|a| a.reservations.values().filter(|o| *o == owner_id).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl AccountManagement for QuotaAccountManagement {
    async fn reserve(&self, registry: &RegistryInstance) -> Result<(), BusinessError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|_| BusinessError::AccountManagement("account state poisoned".into()))?;
        let owner = registry.owner_id.as_str();

        // provisioning の再実行で二重に予約しない
        if accounts.reservations.contains_key(&registry.id) {
            return Ok(());
        }
        if self.config.require_terms && !accounts.accepted_terms.contains(owner) {
            return Err(BusinessError::TermsRequired);
        }

        let owned = accounts
            .reservations
            .values()
            .filter(|o| o.as_str() == owner)
            .count();
        if accounts.eval_owners.contains(owner) {
            if !self.config.allow_eval_instances {
                return Err(BusinessError::EvalInstancesNotAllowed);
            }
            if owned >= self.config.max_eval_instances_per_owner {
                return Err(BusinessError::TooManyEvalInstancesForUser {
                    user: owner.to_string(),
                });
            }
        } else if owned >= self.config.max_registries_per_owner {
            return Err(BusinessError::ResourceLimitReached {
                resource: "registry".to_string(),
            });
        }

        accounts.reservations.insert(registry.id, owner.to_string());
        Ok(())
    }

    async fn release(&self, registry: RegistryId) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.reservations.remove(&registry);
        }
    }
}
