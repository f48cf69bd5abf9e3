use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::app::directory::AccountDirectory;
use crate::app::notifications::{NotificationDispatcher, RelationshipEvent};
use crate::domain::account::AccountPrivacy;
use crate::infra::store::{
    RelationEdge, RelationField, RelationMutation, RelationshipStore, StoreError, TxnPolicy,
};

#[derive(Debug, thiserror::Error)]
pub enum RelationshipError {
    #[error("cannot target yourself")]
    SelfTarget,
    #[error("already following this account")]
    AlreadyFollowing,
    #[error("follow request already pending")]
    AlreadyPending,
    #[error("relationship is blocked")]
    Blocked,
    #[error("account has reached the follower limit")]
    FollowerLimit,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("target account not found")]
    TargetMissing,
    #[error("no pending follow request")]
    NoPendingRequest,
    #[error("operation contended, retries exhausted")]
    Contention,
    #[error("relationship store unavailable")]
    Unavailable(#[source] StoreError),
}

impl From<StoreError> for RelationshipError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => RelationshipError::Contention,
            other => RelationshipError::Unavailable(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowOutcome {
    Following,
    Pending,
}

/// Both directions of a pair at once, from the perspective of `a`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelationshipSnapshot {
    pub a_follows_b: bool,
    pub b_follows_a: bool,
    pub pending: bool,
    pub blocked_by_a: bool,
    pub blocked_by_b: bool,
}

/// The relationship state machine. Every write is a read-validate-write
/// cycle: load both records with their versions, check legality against the
/// snapshot, then apply the mutations guarded by the versions read. A
/// conflicting concurrent write fails the guard and the whole cycle re-runs,
/// so a retried operation can legally resolve to a validation error the
/// first attempt never saw.
#[derive(Clone)]
pub struct RelationshipService {
    store: Arc<dyn RelationshipStore>,
    directory: Arc<dyn AccountDirectory>,
    events: Arc<dyn NotificationDispatcher>,
    follower_limit: usize,
    txn: TxnPolicy,
}

impl RelationshipService {
    pub fn new(
        store: Arc<dyn RelationshipStore>,
        directory: Arc<dyn AccountDirectory>,
        events: Arc<dyn NotificationDispatcher>,
        follower_limit: usize,
        txn: TxnPolicy,
    ) -> Self {
        Self {
            store,
            directory,
            events,
            follower_limit,
            txn,
        }
    }

    /// Follows a public target outright, or files a request against a
    /// private one.
    pub async fn request_or_follow(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<FollowOutcome, RelationshipError> {
        if actor_id == target_id {
            return Err(RelationshipError::SelfTarget);
        }
        self.run(|| self.try_follow(actor_id, target_id)).await
    }

    pub async fn accept_request(
        &self,
        owner_id: Uuid,
        requester_id: Uuid,
    ) -> Result<(), RelationshipError> {
        self.run(|| self.try_accept(owner_id, requester_id)).await
    }

    pub async fn reject_request(
        &self,
        owner_id: Uuid,
        requester_id: Uuid,
    ) -> Result<(), RelationshipError> {
        self.run(|| self.try_reject(owner_id, requester_id)).await
    }

    pub async fn cancel_request(
        &self,
        requester_id: Uuid,
        owner_id: Uuid,
    ) -> Result<(), RelationshipError> {
        self.run(|| self.try_cancel(requester_id, owner_id)).await
    }

    pub async fn unfollow(&self, actor_id: Uuid, target_id: Uuid) -> Result<(), RelationshipError> {
        if actor_id == target_id {
            return Err(RelationshipError::SelfTarget);
        }
        self.run(|| self.try_unfollow(actor_id, target_id)).await
    }

    pub async fn block(&self, actor_id: Uuid, target_id: Uuid) -> Result<(), RelationshipError> {
        if actor_id == target_id {
            return Err(RelationshipError::SelfTarget);
        }
        self.run(|| self.try_block(actor_id, target_id)).await
    }

    pub async fn unblock(&self, actor_id: Uuid, target_id: Uuid) -> Result<(), RelationshipError> {
        if actor_id == target_id {
            return Err(RelationshipError::SelfTarget);
        }
        self.run(|| self.try_unblock(actor_id, target_id)).await
    }

    pub async fn query_relationship(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<RelationshipSnapshot, RelationshipError> {
        if a == b {
            return Ok(RelationshipSnapshot::default());
        }
        self.run(|| self.try_query(a, b)).await
    }

    pub async fn followers(
        &self,
        id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<RelationEdge>, RelationshipError> {
        Ok(self
            .store
            .list(id, RelationField::Followers, cursor, limit)
            .await?)
    }

    pub async fn following(
        &self,
        id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<RelationEdge>, RelationshipError> {
        Ok(self
            .store
            .list(id, RelationField::Following, cursor, limit)
            .await?)
    }

    pub async fn pending_requests(
        &self,
        id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<RelationEdge>, RelationshipError> {
        Ok(self
            .store
            .list(id, RelationField::PendingFollowers, cursor, limit)
            .await?)
    }

    pub async fn blocked(
        &self,
        id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<RelationEdge>, RelationshipError> {
        Ok(self
            .store
            .list(id, RelationField::Blocked, cursor, limit)
            .await?)
    }

    /// Re-runs a read-validate-write cycle while the store reports version
    /// conflicts, up to the configured attempt cap.
    async fn run<T, F, Fut>(&self, mut cycle: F) -> Result<T, RelationshipError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RelationshipError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match cycle().await {
                Err(RelationshipError::Contention) if attempt < self.txn.max_attempts => {
                    debug!(attempt, "relationship write conflicted, retrying");
                    tokio::time::sleep(self.txn.retry_delay(attempt)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_follow(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<FollowOutcome, RelationshipError> {
        let entry = self
            .directory
            .lookup(target_id)
            .await?
            .ok_or(RelationshipError::TargetMissing)?;

        let (actor, target) = self.store.load_pair(actor_id, target_id).await?;
        let actor = actor.ok_or(RelationshipError::NotAuthenticated)?;
        let target = target.ok_or(RelationshipError::TargetMissing)?;

        if actor.blocked.contains(&target_id) || target.blocked.contains(&actor_id) {
            return Err(RelationshipError::Blocked);
        }
        if actor.following.contains(&target_id) {
            return Err(RelationshipError::AlreadyFollowing);
        }

        match entry.privacy {
            AccountPrivacy::Private => {
                if target.pending_followers.contains(&actor_id) {
                    return Err(RelationshipError::AlreadyPending);
                }
                self.store
                    .apply(
                        &[actor.guard(), target.guard()],
                        &[RelationMutation::add(
                            target_id,
                            RelationField::PendingFollowers,
                            actor_id,
                        )],
                    )
                    .await?;
                self.events
                    .dispatch(RelationshipEvent::follow_requested(actor_id, target_id));
                Ok(FollowOutcome::Pending)
            }
            AccountPrivacy::Public => {
                if target.followers.len() >= self.follower_limit {
                    return Err(RelationshipError::FollowerLimit);
                }
                self.store
                    .apply(
                        &[actor.guard(), target.guard()],
                        &[
                            RelationMutation::add(actor_id, RelationField::Following, target_id),
                            RelationMutation::add(target_id, RelationField::Followers, actor_id),
                        ],
                    )
                    .await?;
                self.events
                    .dispatch(RelationshipEvent::follow_accepted(actor_id, target_id));
                Ok(FollowOutcome::Following)
            }
        }
    }

    async fn try_accept(
        &self,
        owner_id: Uuid,
        requester_id: Uuid,
    ) -> Result<(), RelationshipError> {
        let (owner, requester) = self.store.load_pair(owner_id, requester_id).await?;
        let owner = owner.ok_or(RelationshipError::NotAuthenticated)?;
        if !owner.pending_followers.contains(&requester_id) {
            return Err(RelationshipError::NoPendingRequest);
        }
        let requester = requester.ok_or(RelationshipError::TargetMissing)?;
        if owner.followers.len() >= self.follower_limit {
            return Err(RelationshipError::FollowerLimit);
        }

        self.store
            .apply(
                &[owner.guard(), requester.guard()],
                &[
                    RelationMutation::remove(
                        owner_id,
                        RelationField::PendingFollowers,
                        requester_id,
                    ),
                    RelationMutation::add(owner_id, RelationField::Followers, requester_id),
                    RelationMutation::add(requester_id, RelationField::Following, owner_id),
                ],
            )
            .await?;
        self.events
            .dispatch(RelationshipEvent::follow_accepted(requester_id, owner_id));
        Ok(())
    }

    async fn try_reject(
        &self,
        owner_id: Uuid,
        requester_id: Uuid,
    ) -> Result<(), RelationshipError> {
        let owner = self
            .store
            .load(owner_id)
            .await?
            .ok_or(RelationshipError::NotAuthenticated)?;
        if !owner.pending_followers.contains(&requester_id) {
            return Err(RelationshipError::NoPendingRequest);
        }

        self.store
            .apply(
                &[owner.guard()],
                &[RelationMutation::remove(
                    owner_id,
                    RelationField::PendingFollowers,
                    requester_id,
                )],
            )
            .await?;
        Ok(())
    }

    async fn try_cancel(
        &self,
        requester_id: Uuid,
        owner_id: Uuid,
    ) -> Result<(), RelationshipError> {
        let (requester, owner) = self.store.load_pair(requester_id, owner_id).await?;
        requester.ok_or(RelationshipError::NotAuthenticated)?;
        let owner = owner.ok_or(RelationshipError::TargetMissing)?;
        if !owner.pending_followers.contains(&requester_id) {
            return Err(RelationshipError::NoPendingRequest);
        }

        self.store
            .apply(
                &[owner.guard()],
                &[RelationMutation::remove(
                    owner_id,
                    RelationField::PendingFollowers,
                    requester_id,
                )],
            )
            .await?;
        Ok(())
    }

    async fn try_unfollow(&self, actor_id: Uuid, target_id: Uuid) -> Result<(), RelationshipError> {
        let (actor, target) = self.store.load_pair(actor_id, target_id).await?;
        let actor = actor.ok_or(RelationshipError::NotAuthenticated)?;
        if !actor.following.contains(&target_id) {
            return Ok(());
        }

        let Some(target) = target else {
            // The target vanished but our side still names it. Repair the
            // one-sided edge instead of failing.
            self.store
                .apply(
                    &[actor.guard()],
                    &[RelationMutation::remove(
                        actor_id,
                        RelationField::Following,
                        target_id,
                    )],
                )
                .await?;
            return Ok(());
        };

        self.store
            .apply(
                &[actor.guard(), target.guard()],
                &[
                    RelationMutation::remove(actor_id, RelationField::Following, target_id),
                    RelationMutation::remove(target_id, RelationField::Followers, actor_id),
                ],
            )
            .await?;
        Ok(())
    }

    async fn try_block(&self, actor_id: Uuid, target_id: Uuid) -> Result<(), RelationshipError> {
        let (actor, target) = self.store.load_pair(actor_id, target_id).await?;
        let actor = actor.ok_or(RelationshipError::NotAuthenticated)?;
        let target = target.ok_or(RelationshipError::TargetMissing)?;

        if actor.blocked.contains(&target_id) {
            return Ok(());
        }

        let mut guards = vec![actor.guard()];
        let mut mutations = vec![RelationMutation::add(
            actor_id,
            RelationField::Blocked,
            target_id,
        )];
        // A block resolves any request the blocked party has pending with us.
        if actor.pending_followers.contains(&target_id) {
            mutations.push(RelationMutation::remove(
                actor_id,
                RelationField::PendingFollowers,
                target_id,
            ));
        }
        // Only the blocker's own outgoing follow is cleared; the reverse
        // edge, if any, is left standing.
        if actor.following.contains(&target_id) {
            mutations.push(RelationMutation::remove(
                actor_id,
                RelationField::Following,
                target_id,
            ));
            mutations.push(RelationMutation::remove(
                target_id,
                RelationField::Followers,
                actor_id,
            ));
            guards.push(target.guard());
        }

        self.store.apply(&guards, &mutations).await?;
        Ok(())
    }

    async fn try_unblock(&self, actor_id: Uuid, target_id: Uuid) -> Result<(), RelationshipError> {
        let actor = self
            .store
            .load(actor_id)
            .await?
            .ok_or(RelationshipError::NotAuthenticated)?;
        if !actor.blocked.contains(&target_id) {
            return Ok(());
        }

        self.store
            .apply(
                &[actor.guard()],
                &[RelationMutation::remove(
                    actor_id,
                    RelationField::Blocked,
                    target_id,
                )],
            )
            .await?;
        Ok(())
    }

    async fn try_query(&self, a: Uuid, b: Uuid) -> Result<RelationshipSnapshot, RelationshipError> {
        let (first, second) = self.store.load_pair(a, b).await?;
        let first = first.ok_or(RelationshipError::NotAuthenticated)?;
        let second = second.ok_or(RelationshipError::TargetMissing)?;

        Ok(RelationshipSnapshot {
            a_follows_b: first.following.contains(&b),
            b_follows_a: second.following.contains(&a),
            pending: second.pending_followers.contains(&a),
            blocked_by_a: first.blocked.contains(&b),
            blocked_by_b: second.blocked.contains(&a),
        })
    }
}
