pub mod memory;
pub mod postgres;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::account::{Account, AccountPrivacy};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// The four per-account relationship sets. Each directed edge lives as two
/// independent memberships (one side's `following`, the other's `followers`),
/// which is why writes go through version-guarded [`RelationshipStore::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationField {
    Following,
    Followers,
    Blocked,
    PendingFollowers,
}

impl RelationField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationField::Following => "following",
            RelationField::Followers => "followers",
            RelationField::Blocked => "blocked",
            RelationField::PendingFollowers => "pending_followers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationMutation {
    pub account_id: Uuid,
    pub field: RelationField,
    pub op: SetOp,
    pub member_id: Uuid,
}

impl RelationMutation {
    pub fn add(account_id: Uuid, field: RelationField, member_id: Uuid) -> Self {
        Self {
            account_id,
            field,
            op: SetOp::Add,
            member_id,
        }
    }

    pub fn remove(account_id: Uuid, field: RelationField, member_id: Uuid) -> Self {
        Self {
            account_id,
            field,
            op: SetOp::Remove,
            member_id,
        }
    }
}

/// Record version observed at read time. `apply` refuses to write when any
/// guarded record has moved past this version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGuard {
    pub record_id: Uuid,
    pub version: i64,
}

/// Snapshot of one account's relationship sets.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: Uuid,
    pub version: i64,
    pub following: HashSet<Uuid>,
    pub followers: HashSet<Uuid>,
    pub blocked: HashSet<Uuid>,
    pub pending_followers: HashSet<Uuid>,
}

impl AccountRecord {
    pub fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            following: HashSet::new(),
            followers: HashSet::new(),
            blocked: HashSet::new(),
            pending_followers: HashSet::new(),
        }
    }

    pub fn set(&self, field: RelationField) -> &HashSet<Uuid> {
        match field {
            RelationField::Following => &self.following,
            RelationField::Followers => &self.followers,
            RelationField::Blocked => &self.blocked,
            RelationField::PendingFollowers => &self.pending_followers,
        }
    }

    pub fn has(&self, field: RelationField, member_id: Uuid) -> bool {
        self.set(field).contains(&member_id)
    }

    pub fn guard(&self) -> VersionGuard {
        VersionGuard {
            record_id: self.id,
            version: self.version,
        }
    }
}

/// One membership row, ordered newest-first for cursor pagination.
#[derive(Debug, Clone, Copy)]
pub struct RelationEdge {
    pub member_id: Uuid,
    pub since: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A guarded record changed since it was read. The caller re-reads and
    /// retries; this is the normal outcome of two writers racing.
    #[error("write conflict")]
    Conflict,
    #[error("storage unavailable")]
    Unavailable(#[source] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum InsertAccountError {
    #[error("handle already taken")]
    HandleTaken,
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bounded-retry policy for the optimistic read-validate-write cycle.
#[derive(Debug, Clone, Copy)]
pub struct TxnPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl TxnPolicy {
    /// Linear backoff with jitter so two retrying writers do not stay in
    /// lockstep.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(attempt);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.backoff.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

impl Default for TxnPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Duration::from_millis(25),
        }
    }
}

/// Persistence contract for the relationship sets. No business logic lives
/// here: legality is validated above this seam, and `apply` only promises
/// atomicity plus version-conflict detection.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError>;

    /// One consistent read for both sides of a pair.
    async fn load_pair(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<(Option<AccountRecord>, Option<AccountRecord>), StoreError>;

    /// Execute `mutations` atomically if every guarded record still carries
    /// the observed version. Individual mutations are idempotent set
    /// add/remove, so a retried apply after a partial failure cannot leave a
    /// half-written mirror edge behind.
    async fn apply(
        &self,
        guards: &[VersionGuard],
        mutations: &[RelationMutation],
    ) -> Result<(), StoreError>;

    async fn list(
        &self,
        id: Uuid,
        field: RelationField,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<RelationEdge>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub privacy: AccountPrivacy,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub account_id: Uuid,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub display_name: Option<String>,
    pub privacy: Option<AccountPrivacy>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert_account(&self, account: NewAccount) -> Result<Account, InsertAccountError>;

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn accounts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Account>, StoreError>;

    /// Lookup by handle or email, for login.
    async fn credentials(&self, identifier: &str) -> Result<Option<Credentials>, StoreError>;

    async fn update_account(
        &self,
        id: Uuid,
        update: AccountUpdate,
    ) -> Result<Option<Account>, StoreError>;

    /// Removes the account and every relationship membership naming it on
    /// either side, so no dangling edges survive deletion.
    async fn delete_account(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Admins,
    Members,
}

impl GroupField {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupField::Admins => "admin",
            GroupField::Members => "member",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMutation {
    pub field: GroupField,
    pub op: SetOp,
    pub member_id: Uuid,
}

impl GroupMutation {
    pub fn add(field: GroupField, member_id: Uuid) -> Self {
        Self {
            field,
            op: SetOp::Add,
            member_id,
        }
    }

    pub fn remove(field: GroupField, member_id: Uuid) -> Self {
        Self {
            field,
            op: SetOp::Remove,
            member_id,
        }
    }
}

/// An atomic change to one group: optional owner reassignment plus set
/// mutations, applied as a unit under the group's version guard.
#[derive(Debug, Clone)]
pub struct GroupChange {
    pub new_owner: Option<Uuid>,
    pub mutations: Vec<GroupMutation>,
}

#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub version: i64,
    pub admins: HashSet<Uuid>,
    pub members: HashSet<Uuid>,
    pub created_at: OffsetDateTime,
}

impl GroupRecord {
    pub fn new(id: Uuid, name: String, owner_id: Uuid) -> Self {
        Self {
            id,
            name,
            owner_id,
            version: 0,
            admins: HashSet::new(),
            members: HashSet::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn guard(&self) -> VersionGuard {
        VersionGuard {
            record_id: self.id,
            version: self.version,
        }
    }
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn insert_group(&self, group: &GroupRecord) -> Result<(), StoreError>;

    async fn load_group(&self, id: Uuid) -> Result<Option<GroupRecord>, StoreError>;

    async fn apply_group(&self, guard: VersionGuard, change: &GroupChange)
        -> Result<(), StoreError>;
}
