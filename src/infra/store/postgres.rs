use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::directory::{AccountDirectory, DirectoryEntry};
use crate::domain::account::{Account, AccountPrivacy};
use crate::infra::db::Db;

use super::{
    AccountRecord, AccountStore, AccountUpdate, Credentials, GroupChange, GroupRecord, GroupStore,
    InsertAccountError, NewAccount, RelationEdge, RelationField, RelationMutation,
    RelationshipStore, SetOp, StoreError, VersionGuard,
};

/// Postgres store driver. Every account row carries a `relations_version`
/// counter; `apply` locks the guarded rows, compares versions, and bumps them
/// in the same transaction as the set mutations.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        // Serialization failures and deadlocks are retryable conflicts.
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return StoreError::Conflict;
        }
    }
    StoreError::Unavailable(err)
}

fn map_account(row: &PgRow) -> Account {
    let privacy: String = row.get("privacy");
    Account {
        id: row.get("id"),
        handle: row.get("handle"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        privacy: AccountPrivacy::parse(&privacy).unwrap_or(AccountPrivacy::Public),
        created_at: row.get("created_at"),
    }
}

async fn fetch_record(
    conn: &mut sqlx::PgConnection,
    id: Uuid,
) -> Result<Option<AccountRecord>, StoreError> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT relations_version FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx)?;
    let Some(version) = version else {
        return Ok(None);
    };

    let rows = sqlx::query("SELECT field, member_id FROM account_relations WHERE account_id = $1")
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx)?;

    let mut record = AccountRecord::empty(id);
    record.version = version;
    for row in rows {
        let field: String = row.get("field");
        let member_id: Uuid = row.get("member_id");
        match field.as_str() {
            "following" => {
                record.following.insert(member_id);
            }
            "followers" => {
                record.followers.insert(member_id);
            }
            "blocked" => {
                record.blocked.insert(member_id);
            }
            "pending_followers" => {
                record.pending_followers.insert(member_id);
            }
            _ => {}
        }
    }

    Ok(Some(record))
}

#[async_trait]
impl RelationshipStore for PgStore {
    async fn load(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        let mut conn = self.db.pool().acquire().await.map_err(map_sqlx)?;
        fetch_record(&mut conn, id).await
    }

    async fn load_pair(
        &self,
        a: Uuid,
        b: Uuid,
    ) -> Result<(Option<AccountRecord>, Option<AccountRecord>), StoreError> {
        let mut tx = self.db.pool().begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let first = fetch_record(&mut tx, a).await?;
        let second = fetch_record(&mut tx, b).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok((first, second))
    }

    async fn apply(
        &self,
        guards: &[VersionGuard],
        mutations: &[RelationMutation],
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await.map_err(map_sqlx)?;

        for guard in guards {
            let version: Option<i64> =
                sqlx::query_scalar("SELECT relations_version FROM accounts WHERE id = $1 FOR UPDATE")
                    .bind(guard.record_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
            match version {
                Some(version) if version == guard.version => {}
                _ => {
                    tx.rollback().await.map_err(map_sqlx)?;
                    return Err(StoreError::Conflict);
                }
            }
        }

        for mutation in mutations {
            match mutation.op {
                SetOp::Add => {
                    sqlx::query(
                        "INSERT INTO account_relations (account_id, field, member_id) \
                         VALUES ($1, $2, $3) \
                         ON CONFLICT DO NOTHING",
                    )
                    .bind(mutation.account_id)
                    .bind(mutation.field.as_str())
                    .bind(mutation.member_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                }
                SetOp::Remove => {
                    sqlx::query(
                        "DELETE FROM account_relations \
                         WHERE account_id = $1 AND field = $2 AND member_id = $3",
                    )
                    .bind(mutation.account_id)
                    .bind(mutation.field.as_str())
                    .bind(mutation.member_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                }
            }
        }

        for guard in guards {
            sqlx::query(
                "UPDATE accounts SET relations_version = relations_version + 1 WHERE id = $1",
            )
            .bind(guard.record_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn list(
        &self,
        id: Uuid,
        field: RelationField,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<RelationEdge>, StoreError> {
        let rows = match cursor {
            Some((since, member_id)) => {
                sqlx::query(
                    "SELECT member_id, created_at FROM account_relations \
                     WHERE account_id = $1 AND field = $2 \
                       AND (created_at < $3 OR (created_at = $3 AND member_id < $4)) \
                     ORDER BY created_at DESC, member_id DESC \
                     LIMIT $5",
                )
                .bind(id)
                .bind(field.as_str())
                .bind(since)
                .bind(member_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await
                .map_err(map_sqlx)?
            }
            None => {
                sqlx::query(
                    "SELECT member_id, created_at FROM account_relations \
                     WHERE account_id = $1 AND field = $2 \
                     ORDER BY created_at DESC, member_id DESC \
                     LIMIT $3",
                )
                .bind(id)
                .bind(field.as_str())
                .bind(limit)
                .fetch_all(self.db.pool())
                .await
                .map_err(map_sqlx)?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| RelationEdge {
                member_id: row.get("member_id"),
                since: row.get("created_at"),
            })
            .collect())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn insert_account(&self, account: NewAccount) -> Result<Account, InsertAccountError> {
        let row = sqlx::query(
            "INSERT INTO accounts (handle, email, display_name, privacy, password_hash) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, handle, email, display_name, privacy, created_at",
        )
        .bind(&account.handle)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(account.privacy.as_str())
        .bind(&account.password_hash)
        .fetch_one(self.db.pool())
        .await
        .map_err(|err| {
            if let Some(db_err) = err.as_database_error() {
                if db_err.code().as_deref() == Some("23505") {
                    let constraint = db_err.constraint().unwrap_or_default();
                    if constraint.contains("accounts_handle_key") {
                        return InsertAccountError::HandleTaken;
                    }
                    if constraint.contains("accounts_email_key") {
                        return InsertAccountError::EmailTaken;
                    }
                }
            }
            InsertAccountError::Store(map_sqlx(err))
        })?;

        Ok(map_account(&row))
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            "SELECT id, handle, email, display_name, privacy, created_at \
             FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(row.as_ref().map(map_account))
    }

    async fn accounts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, handle, email, display_name, privacy, created_at \
             FROM accounts WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(self.db.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(rows.iter().map(map_account).collect())
    }

    async fn credentials(&self, identifier: &str) -> Result<Option<Credentials>, StoreError> {
        let row = sqlx::query(
            "SELECT id, password_hash FROM accounts \
             WHERE lower(handle) = lower($1) OR lower(email) = lower($1)",
        )
        .bind(identifier)
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(row.map(|row| Credentials {
            account_id: row.get("id"),
            password_hash: row.get("password_hash"),
        }))
    }

    async fn update_account(
        &self,
        id: Uuid,
        update: AccountUpdate,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            "UPDATE accounts \
             SET display_name = COALESCE($2, display_name), \
                 privacy = COALESCE($3, privacy) \
             WHERE id = $1 \
             RETURNING id, handle, email, display_name, privacy, created_at",
        )
        .bind(id)
        .bind(update.display_name)
        .bind(update.privacy.map(|p| p.as_str()))
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(row.as_ref().map(map_account))
    }

    async fn delete_account(&self, id: Uuid) -> Result<bool, StoreError> {
        // account_relations rows referencing the account on either column go
        // with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(map_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(self.db.pool())
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for PgStore {
    async fn lookup(&self, id: Uuid) -> Result<Option<DirectoryEntry>, StoreError> {
        let row = sqlx::query("SELECT display_name, privacy FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_sqlx)?;

        Ok(row.map(|row| {
            let privacy: String = row.get("privacy");
            DirectoryEntry {
                privacy: AccountPrivacy::parse(&privacy).unwrap_or(AccountPrivacy::Public),
                display_name: row.get("display_name"),
            }
        }))
    }
}

#[async_trait]
impl GroupStore for PgStore {
    async fn insert_group(&self, group: &GroupRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO groups (id, name, owner_id, version, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(group.owner_id)
        .bind(group.version)
        .bind(group.created_at)
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn load_group(&self, id: Uuid) -> Result<Option<GroupRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, owner_id, version, created_at FROM groups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_sqlx)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut group = GroupRecord {
            id: row.get("id"),
            name: row.get("name"),
            owner_id: row.get("owner_id"),
            version: row.get("version"),
            admins: Default::default(),
            members: Default::default(),
            created_at: row.get("created_at"),
        };

        let rows = sqlx::query("SELECT account_id, role FROM group_memberships WHERE group_id = $1")
            .bind(id)
            .fetch_all(self.db.pool())
            .await
            .map_err(map_sqlx)?;
        for row in rows {
            let role: String = row.get("role");
            let account_id: Uuid = row.get("account_id");
            match role.as_str() {
                "admin" => {
                    group.admins.insert(account_id);
                }
                "member" => {
                    group.members.insert(account_id);
                }
                _ => {}
            }
        }

        Ok(Some(group))
    }

    async fn apply_group(
        &self,
        guard: VersionGuard,
        change: &GroupChange,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await.map_err(map_sqlx)?;

        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM groups WHERE id = $1 FOR UPDATE")
                .bind(guard.record_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        match version {
            Some(version) if version == guard.version => {}
            _ => {
                tx.rollback().await.map_err(map_sqlx)?;
                return Err(StoreError::Conflict);
            }
        }

        if let Some(new_owner) = change.new_owner {
            sqlx::query("UPDATE groups SET owner_id = $2 WHERE id = $1")
                .bind(guard.record_id)
                .bind(new_owner)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }

        for mutation in &change.mutations {
            match mutation.op {
                SetOp::Add => {
                    sqlx::query(
                        "INSERT INTO group_memberships (group_id, account_id, role) \
                         VALUES ($1, $2, $3) \
                         ON CONFLICT (group_id, account_id) DO UPDATE SET role = EXCLUDED.role",
                    )
                    .bind(guard.record_id)
                    .bind(mutation.member_id)
                    .bind(mutation.field.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                }
                SetOp::Remove => {
                    sqlx::query(
                        "DELETE FROM group_memberships \
                         WHERE group_id = $1 AND account_id = $2 AND role = $3",
                    )
                    .bind(guard.record_id)
                    .bind(mutation.member_id)
                    .bind(mutation.field.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                }
            }
        }

        sqlx::query("UPDATE groups SET version = version + 1 WHERE id = $1")
            .bind(guard.record_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }
}
