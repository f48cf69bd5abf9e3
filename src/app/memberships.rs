use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::app::directory::AccountDirectory;
use crate::infra::store::{
    GroupChange, GroupField, GroupMutation, GroupRecord, GroupStore, StoreError, TxnPolicy,
};

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("cannot target yourself")]
    SelfTarget,
    #[error("not authorized for this group action")]
    NotAuthorized,
    #[error("group not found")]
    GroupMissing,
    #[error("target account not found")]
    TargetMissing,
    #[error("account already belongs to this group")]
    AlreadyMember,
    #[error("account is not a member of this group")]
    NotMember,
    #[error("account is not an admin of this group")]
    NotAdmin,
    #[error("the owner cannot be removed")]
    CannotRemoveOwner,
    #[error("admins cannot remove other admins")]
    CannotRemoveAdmin,
    #[error("operation contended, retries exhausted")]
    Contention,
    #[error("group store unavailable")]
    Unavailable(#[source] StoreError),
}

impl From<StoreError> for MembershipError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => MembershipError::Contention,
            other => MembershipError::Unavailable(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Admin,
    Member,
}

fn role_of(group: &GroupRecord, id: Uuid) -> Option<GroupRole> {
    if group.owner_id == id {
        Some(GroupRole::Owner)
    } else if group.admins.contains(&id) {
        Some(GroupRole::Admin)
    } else if group.members.contains(&id) {
        Some(GroupRole::Member)
    } else {
        None
    }
}

/// Group roles under the same write discipline as relationships: one owner
/// slot plus disjoint admin and member sets, mutated only through guarded
/// read-validate-write cycles.
#[derive(Clone)]
pub struct MembershipService {
    groups: Arc<dyn GroupStore>,
    directory: Arc<dyn AccountDirectory>,
    txn: TxnPolicy,
}

impl MembershipService {
    pub fn new(
        groups: Arc<dyn GroupStore>,
        directory: Arc<dyn AccountDirectory>,
        txn: TxnPolicy,
    ) -> Self {
        Self {
            groups,
            directory,
            txn,
        }
    }

    pub async fn create_group(
        &self,
        owner_id: Uuid,
        name: String,
    ) -> Result<GroupRecord, MembershipError> {
        let group = GroupRecord::new(Uuid::new_v4(), name, owner_id);
        self.groups.insert_group(&group).await?;
        Ok(group)
    }

    pub async fn roster(&self, group_id: Uuid) -> Result<GroupRecord, MembershipError> {
        self.groups
            .load_group(group_id)
            .await?
            .ok_or(MembershipError::GroupMissing)
    }

    pub async fn add_member(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), MembershipError> {
        self.run(|| self.try_add_member(actor_id, group_id, account_id))
            .await
    }

    pub async fn promote(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), MembershipError> {
        self.run(|| self.try_promote(actor_id, group_id, account_id))
            .await
    }

    pub async fn demote(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), MembershipError> {
        self.run(|| self.try_demote(actor_id, group_id, account_id))
            .await
    }

    pub async fn remove_member(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), MembershipError> {
        self.run(|| self.try_remove_member(actor_id, group_id, account_id))
            .await
    }

    pub async fn transfer_ownership(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        new_owner_id: Uuid,
    ) -> Result<(), MembershipError> {
        if actor_id == new_owner_id {
            return Err(MembershipError::SelfTarget);
        }
        self.run(|| self.try_transfer(actor_id, group_id, new_owner_id))
            .await
    }

    async fn run<T, F, Fut>(&self, mut cycle: F) -> Result<T, MembershipError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MembershipError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match cycle().await {
                Err(MembershipError::Contention) if attempt < self.txn.max_attempts => {
                    debug!(attempt, "group write conflicted, retrying");
                    tokio::time::sleep(self.txn.retry_delay(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_add_member(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), MembershipError> {
        let group = self
            .groups
            .load_group(group_id)
            .await?
            .ok_or(MembershipError::GroupMissing)?;
        if !matches!(
            role_of(&group, actor_id),
            Some(GroupRole::Owner | GroupRole::Admin)
        ) {
            return Err(MembershipError::NotAuthorized);
        }
        if role_of(&group, account_id).is_some() {
            return Err(MembershipError::AlreadyMember);
        }
        self.directory
            .lookup(account_id)
            .await?
            .ok_or(MembershipError::TargetMissing)?;

        self.groups
            .apply_group(
                group.guard(),
                &GroupChange {
                    new_owner: None,
                    mutations: vec![GroupMutation::add(GroupField::Members, account_id)],
                },
            )
            .await?;
        Ok(())
    }

    async fn try_promote(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), MembershipError> {
        let group = self
            .groups
            .load_group(group_id)
            .await?
            .ok_or(MembershipError::GroupMissing)?;
        if !matches!(
            role_of(&group, actor_id),
            Some(GroupRole::Owner | GroupRole::Admin)
        ) {
            return Err(MembershipError::NotAuthorized);
        }
        if !group.members.contains(&account_id) {
            return Err(MembershipError::NotMember);
        }

        self.groups
            .apply_group(
                group.guard(),
                &GroupChange {
                    new_owner: None,
                    mutations: vec![
                        GroupMutation::remove(GroupField::Members, account_id),
                        GroupMutation::add(GroupField::Admins, account_id),
                    ],
                },
            )
            .await?;
        Ok(())
    }

    async fn try_demote(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), MembershipError> {
        let group = self
            .groups
            .load_group(group_id)
            .await?
            .ok_or(MembershipError::GroupMissing)?;
        if group.owner_id != actor_id {
            return Err(MembershipError::NotAuthorized);
        }
        if !group.admins.contains(&account_id) {
            return Err(MembershipError::NotAdmin);
        }

        self.groups
            .apply_group(
                group.guard(),
                &GroupChange {
                    new_owner: None,
                    mutations: vec![
                        GroupMutation::remove(GroupField::Admins, account_id),
                        GroupMutation::add(GroupField::Members, account_id),
                    ],
                },
            )
            .await?;
        Ok(())
    }

    async fn try_remove_member(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), MembershipError> {
        let group = self
            .groups
            .load_group(group_id)
            .await?
            .ok_or(MembershipError::GroupMissing)?;
        let actor_role = match role_of(&group, actor_id) {
            Some(GroupRole::Owner) => GroupRole::Owner,
            Some(GroupRole::Admin) => GroupRole::Admin,
            _ => return Err(MembershipError::NotAuthorized),
        };

        let field = match role_of(&group, account_id) {
            None => return Err(MembershipError::NotMember),
            Some(GroupRole::Owner) => return Err(MembershipError::CannotRemoveOwner),
            Some(GroupRole::Admin) => {
                if actor_role != GroupRole::Owner {
                    return Err(MembershipError::CannotRemoveAdmin);
                }
                GroupField::Admins
            }
            Some(GroupRole::Member) => GroupField::Members,
        };

        self.groups
            .apply_group(
                group.guard(),
                &GroupChange {
                    new_owner: None,
                    mutations: vec![GroupMutation::remove(field, account_id)],
                },
            )
            .await?;
        Ok(())
    }

    async fn try_transfer(
        &self,
        actor_id: Uuid,
        group_id: Uuid,
        new_owner_id: Uuid,
    ) -> Result<(), MembershipError> {
        let group = self
            .groups
            .load_group(group_id)
            .await?
            .ok_or(MembershipError::GroupMissing)?;
        if group.owner_id != actor_id {
            return Err(MembershipError::NotAuthorized);
        }

        // The new owner leaves whichever set held them; the old owner lands
        // in admins. One guarded write keeps the owner slot single.
        let mutations = match role_of(&group, new_owner_id) {
            Some(GroupRole::Admin) => vec![
                GroupMutation::remove(GroupField::Admins, new_owner_id),
                GroupMutation::add(GroupField::Admins, actor_id),
            ],
            Some(GroupRole::Member) => vec![
                GroupMutation::remove(GroupField::Members, new_owner_id),
                GroupMutation::add(GroupField::Admins, actor_id),
            ],
            _ => return Err(MembershipError::NotMember),
        };

        self.groups
            .apply_group(
                group.guard(),
                &GroupChange {
                    new_owner: Some(new_owner_id),
                    mutations,
                },
            )
            .await?;
        Ok(())
    }
}
