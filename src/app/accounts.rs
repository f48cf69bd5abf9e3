use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::domain::account::Account;
use crate::infra::store::{AccountStore, AccountUpdate};

#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
}

impl AccountService {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.account_by_id(id).await?)
    }

    /// Batch lookup for list endpoints, so a page of edges costs one read.
    pub async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Account>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.accounts.accounts_by_ids(ids).await?)
    }

    pub async fn update(&self, id: Uuid, update: AccountUpdate) -> Result<Option<Account>> {
        Ok(self.accounts.update_account(id, update).await?)
    }

    /// Deletes the account and every relationship edge naming it, on either
    /// side, in one store operation.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.accounts.delete_account(id).await?)
    }
}
