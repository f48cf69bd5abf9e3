use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::account::AccountPrivacy;
use crate::infra::store::StoreError;

/// What the relationship service needs to know about an account before
/// touching its relations: whether it exists, and whether follows go
/// straight through or land in the pending queue.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub privacy: AccountPrivacy,
    pub display_name: String,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn lookup(&self, id: Uuid) -> Result<Option<DirectoryEntry>, StoreError>;
}
