use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::directory::{AccountDirectory, DirectoryEntry};
use crate::domain::account::Account;

use super::{
    AccountRecord, AccountStore, AccountUpdate, Credentials, GroupChange, GroupField, GroupRecord,
    GroupStore, InsertAccountError, NewAccount, RelationEdge, RelationField, RelationMutation,
    RelationshipStore, SetOp, StoreError, VersionGuard,
};

/// In-process store driver. One mutex acquisition per `apply` gives the same
/// atomicity the postgres driver gets from a transaction, with the identical
/// version-conflict contract, so the engine and its tests run with no
/// infrastructure behind them.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    profiles: HashMap<Uuid, Profile>,
    relations: HashMap<Uuid, RelationDoc>,
    groups: HashMap<Uuid, GroupRecord>,
}

struct Profile {
    account: Account,
    password_hash: String,
}

/// Membership timestamps are kept so list pagination orders the same way the
/// postgres driver does.
#[derive(Default)]
struct RelationDoc {
    version: i64,
    following: HashMap<Uuid, OffsetDateTime>,
    followers: HashMap<Uuid, OffsetDateTime>,
    blocked: HashMap<Uuid, OffsetDateTime>,
    pending_followers: HashMap<Uuid, OffsetDateTime>,
}

impl RelationDoc {
    fn field(&self, field: RelationField) -> &HashMap<Uuid, OffsetDateTime> {
        match field {
            RelationField::Following => &self.following,
            RelationField::Followers => &self.followers,
            RelationField::Blocked => &self.blocked,
            RelationField::PendingFollowers => &self.pending_followers,
        }
    }

    fn field_mut(&mut self, field: RelationField) -> &mut HashMap<Uuid, OffsetDateTime> {
        match field {
            RelationField::Following => &mut self.following,
            RelationField::Followers => &mut self.followers,
            RelationField::Blocked => &mut self.blocked,
            RelationField::PendingFollowers => &mut self.pending_followers,
        }
    }

    fn snapshot(&self, id: Uuid) -> AccountRecord {
        AccountRecord {
            id,
            version: self.version,
            following: self.following.keys().copied().collect(),
            followers: self.followers.keys().copied().collect(),
            blocked: self.blocked.keys().copied().collect(),
            pending_followers: self.pending_followers.keys().copied().collect(),
        }
    }

    fn strip_member(&mut self, member_id: Uuid) -> bool {
        let mut changed = false;
        changed |= self.following.remove(&member_id).is_some();
        changed |= self.followers.remove(&member_id).is_some();
        changed |= self.blocked.remove(&member_id).is_some();
        changed |= self.pending_followers.remove(&member_id).is_some();
        changed
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every relationship record, for invariant sweeps in tests.
    pub fn snapshot_all(&self) -> Vec<AccountRecord> {
        let inner = self.inner.lock();
        inner
            .relations
            .iter()
            .map(|(id, doc)| doc.snapshot(*id))
            .collect()
    }
}

#[async_trait]
impl RelationshipStore for MemoryStore {
    async fn load(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.relations.get(&id).map(|doc| doc.snapshot(id)))
    }

    async fn load_pair(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<(Option<AccountRecord>, Option<AccountRecord>), StoreError> {
        let inner = self.inner.lock();
        let first = inner.relations.get(&a).map(|doc| doc.snapshot(a));
        let second = inner.relations.get(&b).map(|doc| doc.snapshot(b));
        Ok((first, second))
    }

    async fn apply(
        &self,
        guards: &[VersionGuard],
        mutations: &[RelationMutation],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        for guard in guards {
            match inner.relations.get(&guard.record_id) {
                Some(doc) if doc.version == guard.version => {}
                _ => return Err(StoreError::Conflict),
            }
        }
        // A record vanishing between read and apply (account deletion) also
        // surfaces as a conflict so the caller re-reads.
        for mutation in mutations {
            if !inner.relations.contains_key(&mutation.account_id) {
                return Err(StoreError::Conflict);
            }
        }

        let now = OffsetDateTime::now_utc();
        for mutation in mutations {
            if let Some(doc) = inner.relations.get_mut(&mutation.account_id) {
                let set = doc.field_mut(mutation.field);
                match mutation.op {
                    SetOp::Add => {
                        set.entry(mutation.member_id).or_insert(now);
                    }
                    SetOp::Remove => {
                        set.remove(&mutation.member_id);
                    }
                }
            }
        }
        for guard in guards {
            if let Some(doc) = inner.relations.get_mut(&guard.record_id) {
                doc.version += 1;
            }
        }

        Ok(())
    }

    async fn list(
        &self,
        id: Uuid,
        field: RelationField,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<RelationEdge>, StoreError> {
        let inner = self.inner.lock();
        let Some(doc) = inner.relations.get(&id) else {
            return Ok(Vec::new());
        };

        let mut edges: Vec<RelationEdge> = doc
            .field(field)
            .iter()
            .map(|(member_id, since)| RelationEdge {
                member_id: *member_id,
                since: *since,
            })
            .collect();
        edges.sort_by(|a, b| {
            b.since
                .cmp(&a.since)
                .then_with(|| b.member_id.cmp(&a.member_id))
        });

        if let Some((since, member_id)) = cursor {
            edges.retain(|edge| {
                edge.since < since || (edge.since == since && edge.member_id < member_id)
            });
        }
        edges.truncate(limit.max(0) as usize);

        Ok(edges)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: NewAccount) -> Result<Account, InsertAccountError> {
        let mut inner = self.inner.lock();

        for profile in inner.profiles.values() {
            if profile.account.handle.eq_ignore_ascii_case(&account.handle) {
                return Err(InsertAccountError::HandleTaken);
            }
            if profile.account.email.eq_ignore_ascii_case(&account.email) {
                return Err(InsertAccountError::EmailTaken);
            }
        }

        let id = Uuid::new_v4();
        let stored = Account {
            id,
            handle: account.handle,
            email: account.email,
            display_name: account.display_name,
            privacy: account.privacy,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.profiles.insert(
            id,
            Profile {
                account: stored.clone(),
                password_hash: account.password_hash,
            },
        );
        inner.relations.insert(id, RelationDoc::default());

        Ok(stored)
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.profiles.get(&id).map(|p| p.account.clone()))
    }

    async fn accounts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Account>, StoreError> {
        let inner = self.inner.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.profiles.get(id).map(|p| p.account.clone()))
            .collect())
    }

    async fn credentials(&self, identifier: &str) -> Result<Option<Credentials>, StoreError> {
        let inner = self.inner.lock();
        let found = inner.profiles.values().find(|p| {
            p.account.handle.eq_ignore_ascii_case(identifier)
                || p.account.email.eq_ignore_ascii_case(identifier)
        });
        Ok(found.map(|p| Credentials {
            account_id: p.account.id,
            password_hash: p.password_hash.clone(),
        }))
    }

    async fn update_account(
        &self,
        id: Uuid,
        update: AccountUpdate,
    ) -> Result<Option<Account>, StoreError> {
        let mut inner = self.inner.lock();
        let Some(profile) = inner.profiles.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(display_name) = update.display_name {
            profile.account.display_name = display_name;
        }
        if let Some(privacy) = update.privacy {
            profile.account.privacy = privacy;
        }
        Ok(Some(profile.account.clone()))
    }

    async fn delete_account(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.profiles.remove(&id).is_none() {
            return Ok(false);
        }
        inner.relations.remove(&id);
        // Strip the deleted id out of everyone else's sets. Version bumps
        // push any concurrent writer into a conflict-and-reread.
        for doc in inner.relations.values_mut() {
            if doc.strip_member(id) {
                doc.version += 1;
            }
        }
        // Groups owned by the account go with it; seats held in other
        // groups are vacated.
        inner.groups.retain(|_, group| group.owner_id != id);
        for group in inner.groups.values_mut() {
            let was_admin = group.admins.remove(&id);
            let was_member = group.members.remove(&id);
            if was_admin || was_member {
                group.version += 1;
            }
        }
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn lookup(&self, id: Uuid) -> Result<Option<DirectoryEntry>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.profiles.get(&id).map(|p| DirectoryEntry {
            privacy: p.account.privacy,
            display_name: p.account.display_name.clone(),
        }))
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn insert_group(&self, group: &GroupRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn load_group(&self, id: Uuid) -> Result<Option<GroupRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.groups.get(&id).cloned())
    }

    async fn apply_group(
        &self,
        guard: VersionGuard,
        change: &GroupChange,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let Some(group) = inner.groups.get_mut(&guard.record_id) else {
            return Err(StoreError::Conflict);
        };
        if group.version != guard.version {
            return Err(StoreError::Conflict);
        }

        if let Some(new_owner) = change.new_owner {
            group.owner_id = new_owner;
        }
        for mutation in &change.mutations {
            let set = match mutation.field {
                GroupField::Admins => &mut group.admins,
                GroupField::Members => &mut group.members,
            };
            match mutation.op {
                SetOp::Add => {
                    set.insert(mutation.member_id);
                }
                SetOp::Remove => {
                    set.remove(&mutation.member_id);
                }
            }
        }
        group.version += 1;

        Ok(())
    }
}
