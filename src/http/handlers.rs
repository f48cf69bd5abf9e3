use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::accounts::AccountService;
use crate::app::auth::AuthService;
use crate::app::memberships::{MembershipError, MembershipService};
use crate::app::relationships::{
    FollowOutcome, RelationshipError, RelationshipService, RelationshipSnapshot,
};
use crate::domain::account::{Account, AccountPrivacy, PublicAccount};
use crate::http::{AppError, AuthUser};
use crate::infra::store::{
    AccountUpdate, GroupRecord, InsertAccountError, RelationEdge,
};
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

fn parse_cursor(cursor: Option<String>) -> Result<Option<(OffsetDateTime, Uuid)>, AppError> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };

    let mut parts = cursor.splitn(2, '/');
    let timestamp = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;
    let id = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;

    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339)
        .map_err(|_| AppError::bad_request("invalid cursor"))?;
    let id = Uuid::parse_str(id).map_err(|_| AppError::bad_request("invalid cursor"))?;

    Ok(Some((timestamp, id)))
}

fn encode_cursor(cursor: Option<(OffsetDateTime, Uuid)>) -> Option<String> {
    let (timestamp, id) = cursor?;
    let timestamp = timestamp.format(&Rfc3339).ok()?;
    Some(format!("{}/{}", timestamp, id))
}

fn relationship_service(state: &AppState) -> RelationshipService {
    RelationshipService::new(
        state.relationships.clone(),
        state.directory.clone(),
        state.events.clone(),
        state.follower_limit,
        state.txn,
    )
}

fn membership_service(state: &AppState) -> MembershipService {
    MembershipService::new(state.groups.clone(), state.directory.clone(), state.txn)
}

fn relationship_error(err: RelationshipError) -> AppError {
    match err {
        RelationshipError::SelfTarget => AppError::bad_request(err.to_string()),
        RelationshipError::AlreadyFollowing
        | RelationshipError::AlreadyPending
        | RelationshipError::Contention => AppError::conflict(err.to_string()),
        RelationshipError::Blocked | RelationshipError::FollowerLimit => {
            AppError::forbidden(err.to_string())
        }
        RelationshipError::NotAuthenticated => AppError::unauthorized(err.to_string()),
        RelationshipError::TargetMissing | RelationshipError::NoPendingRequest => {
            AppError::not_found(err.to_string())
        }
        RelationshipError::Unavailable(_) => {
            tracing::error!(error = ?err, "relationship store unavailable");
            AppError::unavailable(err.to_string())
        }
    }
}

fn membership_error(err: MembershipError) -> AppError {
    match err {
        MembershipError::SelfTarget => AppError::bad_request(err.to_string()),
        MembershipError::NotAuthorized
        | MembershipError::CannotRemoveOwner
        | MembershipError::CannotRemoveAdmin => AppError::forbidden(err.to_string()),
        MembershipError::GroupMissing
        | MembershipError::TargetMissing
        | MembershipError::NotMember
        | MembershipError::NotAdmin => AppError::not_found(err.to_string()),
        MembershipError::AlreadyMember | MembershipError::Contention => {
            AppError::conflict(err.to_string())
        }
        MembershipError::Unavailable(_) => {
            tracing::error!(error = ?err, "group store unavailable");
            AppError::unavailable(err.to_string())
        }
    }
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.accounts.ping().await.is_ok();
    let status = if store { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

// ---------------------------------------------------------------------------
// Accounts & auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SignupRequest {
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub privacy: Option<AccountPrivacy>,
}

#[derive(Serialize)]
pub struct SignupResponse {
    pub account: Account,
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<SignupResponse>, AppError> {
    const MAX_PASSWORD_LEN: usize = 128;

    let handle = payload.handle.trim();
    if handle.len() < 3 {
        return Err(AppError::bad_request("handle must be at least 3 characters"));
    }
    if handle.len() > 30 {
        return Err(AppError::bad_request("handle must be at most 30 characters"));
    }
    if !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::bad_request(
            "handle can only contain letters, numbers, and underscores",
        ));
    }
    if payload.email.trim().is_empty() || !payload.email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    let display_name = payload.display_name.trim();
    if display_name.is_empty() {
        return Err(AppError::bad_request("display_name cannot be empty"));
    }
    if display_name.len() > 50 {
        return Err(AppError::bad_request(
            "display_name must be at most 50 characters",
        ));
    }
    if payload.password.len() < 8 {
        return Err(AppError::bad_request("password must be at least 8 characters"));
    }
    if payload.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }

    let service = AuthService::new(
        state.accounts.clone(),
        state.paseto_key,
        state.access_ttl_minutes,
    );
    let (account, token) = service
        .signup(
            handle.to_string(),
            payload.email.trim().to_string(),
            display_name.to_string(),
            payload.password,
            payload.privacy.unwrap_or(AccountPrivacy::Public),
        )
        .await
        .map_err(|err| {
            if let Some(insert_err) = err.downcast_ref::<InsertAccountError>() {
                match insert_err {
                    InsertAccountError::HandleTaken => {
                        return AppError::conflict("handle already taken")
                    }
                    InsertAccountError::EmailTaken => {
                        return AppError::conflict("email already registered")
                    }
                    InsertAccountError::Store(_) => {}
                }
            }
            tracing::error!(error = ?err, "failed to create account");
            AppError::internal("failed to create account")
        })?;

    Ok(Json(SignupResponse {
        account,
        access_token: token.access_token,
        expires_at: token.expires_at,
    }))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthTokenResponse {
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    const MAX_PASSWORD_LEN: usize = 128;

    if payload.identifier.trim().is_empty() || payload.password.trim().is_empty() {
        return Err(AppError::bad_request("identifier and password are required"));
    }
    if payload.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }

    let service = AuthService::new(
        state.accounts.clone(),
        state.paseto_key,
        state.access_ttl_minutes,
    );
    let token = service
        .login(&payload.identifier, &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?;

    match token {
        Some(token) => Ok(Json(AuthTokenResponse {
            access_token: token.access_token,
            expires_at: token.expires_at,
        })),
        None => Err(AppError::unauthorized("invalid credentials")),
    }
}

pub async fn get_current_account(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Account>, AppError> {
    let service = AuthService::new(
        state.accounts.clone(),
        state.paseto_key,
        state.access_ttl_minutes,
    );
    let account = service.current_account(auth.account_id).await.map_err(|err| {
        tracing::error!(error = ?err, account_id = %auth.account_id, "failed to fetch current account");
        AppError::internal("failed to fetch current account")
    })?;

    match account {
        Some(account) => Ok(Json(account)),
        None => Err(AppError::not_found("account not found")),
    }
}

pub async fn get_account(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<PublicAccount>, AppError> {
    let service = AccountService::new(state.accounts.clone());
    let account = service.get(id).await.map_err(|err| {
        tracing::error!(error = ?err, account_id = %id, "failed to fetch account");
        AppError::internal("failed to fetch account")
    })?;

    match account {
        Some(account) => Ok(Json(account.into())),
        None => Err(AppError::not_found("account not found")),
    }
}

#[derive(Deserialize)]
pub struct UpdateAccountRequest {
    pub display_name: Option<String>,
    pub privacy: Option<AccountPrivacy>,
}

pub async fn update_account(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<Json<Account>, AppError> {
    if auth.account_id != id {
        return Err(AppError::forbidden("cannot update other accounts"));
    }

    if let Some(display_name) = &payload.display_name {
        if display_name.trim().is_empty() {
            return Err(AppError::bad_request("display_name cannot be empty"));
        }
        if display_name.trim().len() > 50 {
            return Err(AppError::bad_request(
                "display_name must be at most 50 characters",
            ));
        }
    }

    let service = AccountService::new(state.accounts.clone());
    let account = service
        .update(
            id,
            AccountUpdate {
                display_name: payload.display_name,
                privacy: payload.privacy,
            },
        )
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, account_id = %id, "failed to update account");
            AppError::internal("failed to update account")
        })?;

    match account {
        Some(account) => Ok(Json(account)),
        None => Err(AppError::not_found("account not found")),
    }
}

pub async fn delete_account(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = AccountService::new(state.accounts.clone());
    let deleted = service.delete(auth.account_id).await.map_err(|err| {
        tracing::error!(error = ?err, account_id = %auth.account_id, "failed to delete account");
        AppError::internal("failed to delete account")
    })?;

    if deleted {
        tracing::info!(account_id = %auth.account_id, "account deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("account not found"))
    }
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct FollowStatusResponse {
    pub status: FollowOutcome,
}

pub async fn follow_account(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<FollowStatusResponse>, AppError> {
    let service = relationship_service(&state);
    let outcome = service
        .request_or_follow(auth.account_id, id)
        .await
        .map_err(relationship_error)?;

    Ok(Json(FollowStatusResponse { status: outcome }))
}

pub async fn unfollow_account(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = relationship_service(&state);
    service
        .unfollow(auth.account_id, id)
        .await
        .map_err(relationship_error)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn block_account(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = relationship_service(&state);
    service
        .block(auth.account_id, id)
        .await
        .map_err(relationship_error)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn unblock_account(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = relationship_service(&state);
    service
        .unblock(auth.account_id, id)
        .await
        .map_err(relationship_error)?;

    Ok(StatusCode::NO_CONTENT)
}

/// `:id` is the requester whose pending request the caller is accepting.
pub async fn accept_request(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = relationship_service(&state);
    service
        .accept_request(auth.account_id, id)
        .await
        .map_err(relationship_error)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn reject_request(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = relationship_service(&state);
    service
        .reject_request(auth.account_id, id)
        .await
        .map_err(relationship_error)?;

    Ok(StatusCode::NO_CONTENT)
}

/// `:id` is the private account the caller had petitioned.
pub async fn cancel_request(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = relationship_service(&state);
    service
        .cancel_request(auth.account_id, id)
        .await
        .map_err(relationship_error)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn relationship_status(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<RelationshipSnapshot>, AppError> {
    let service = relationship_service(&state);
    let snapshot = service
        .query_relationship(auth.account_id, id)
        .await
        .map_err(relationship_error)?;

    Ok(Json(snapshot))
}

#[derive(Serialize)]
pub struct RelationItem {
    pub account: PublicAccount,
    #[serde(with = "time::serde::rfc3339")]
    pub since: OffsetDateTime,
}

async fn edges_to_items(
    state: &AppState,
    edges: Vec<RelationEdge>,
) -> Result<Vec<RelationItem>, AppError> {
    let ids: Vec<Uuid> = edges.iter().map(|edge| edge.member_id).collect();
    let accounts = AccountService::new(state.accounts.clone())
        .get_many(&ids)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to load accounts for listing");
            AppError::internal("failed to load accounts")
        })?;
    let by_id: HashMap<Uuid, Account> = accounts
        .into_iter()
        .map(|account| (account.id, account))
        .collect();

    // Edges whose account vanished mid-listing are dropped rather than 500d.
    Ok(edges
        .into_iter()
        .filter_map(|edge| {
            by_id.get(&edge.member_id).map(|account| RelationItem {
                account: account.into(),
                since: edge.since,
            })
        })
        .collect())
}

pub async fn list_followers(
    Path(id): Path<Uuid>,
    _auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<RelationItem>>, AppError> {
    let limit = query.limit.unwrap_or(30);
    if !(1..=200).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let cursor = parse_cursor(query.cursor)?;

    let service = relationship_service(&state);
    let mut edges = service
        .followers(id, cursor, limit + 1)
        .await
        .map_err(relationship_error)?;

    let next_cursor = if edges.len() > limit as usize {
        let last = edges.pop().expect("checked len");
        Some((last.since, last.member_id))
    } else {
        None
    };

    let items = edges_to_items(&state, edges).await?;
    Ok(Json(ListResponse {
        items,
        next_cursor: encode_cursor(next_cursor),
    }))
}

pub async fn list_following(
    Path(id): Path<Uuid>,
    _auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<RelationItem>>, AppError> {
    let limit = query.limit.unwrap_or(30);
    if !(1..=200).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let cursor = parse_cursor(query.cursor)?;

    let service = relationship_service(&state);
    let mut edges = service
        .following(id, cursor, limit + 1)
        .await
        .map_err(relationship_error)?;

    let next_cursor = if edges.len() > limit as usize {
        let last = edges.pop().expect("checked len");
        Some((last.since, last.member_id))
    } else {
        None
    };

    let items = edges_to_items(&state, edges).await?;
    Ok(Json(ListResponse {
        items,
        next_cursor: encode_cursor(next_cursor),
    }))
}

/// The caller's own pending follow requests, newest first.
pub async fn list_requests(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<RelationItem>>, AppError> {
    let limit = query.limit.unwrap_or(30);
    if !(1..=200).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let cursor = parse_cursor(query.cursor)?;

    let service = relationship_service(&state);
    let mut edges = service
        .pending_requests(auth.account_id, cursor, limit + 1)
        .await
        .map_err(relationship_error)?;

    let next_cursor = if edges.len() > limit as usize {
        let last = edges.pop().expect("checked len");
        Some((last.since, last.member_id))
    } else {
        None
    };

    let items = edges_to_items(&state, edges).await?;
    Ok(Json(ListResponse {
        items,
        next_cursor: encode_cursor(next_cursor),
    }))
}

pub async fn list_blocked(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<RelationItem>>, AppError> {
    let limit = query.limit.unwrap_or(30);
    if !(1..=200).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 200"));
    }
    let cursor = parse_cursor(query.cursor)?;

    let service = relationship_service(&state);
    let mut edges = service
        .blocked(auth.account_id, cursor, limit + 1)
        .await
        .map_err(relationship_error)?;

    let next_cursor = if edges.len() > limit as usize {
        let last = edges.pop().expect("checked len");
        Some((last.since, last.member_id))
    } else {
        None
    };

    let items = edges_to_items(&state, edges).await?;
    Ok(Json(ListResponse {
        items,
        next_cursor: encode_cursor(next_cursor),
    }))
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct GroupResponse {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub admins: Vec<Uuid>,
    pub members: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<GroupRecord> for GroupResponse {
    fn from(group: GroupRecord) -> Self {
        let mut admins: Vec<Uuid> = group.admins.into_iter().collect();
        admins.sort();
        let mut members: Vec<Uuid> = group.members.into_iter().collect();
        members.sort();
        Self {
            id: group.id,
            name: group.name,
            owner_id: group.owner_id,
            admins,
            members,
            created_at: group.created_at,
        }
    }
}

pub async fn create_group(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateGroupRequest>,
) -> Result<Json<GroupResponse>, AppError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name cannot be empty"));
    }
    if name.len() > 120 {
        return Err(AppError::bad_request("name must be at most 120 characters"));
    }

    let service = membership_service(&state);
    let group = service
        .create_group(auth.account_id, name.to_string())
        .await
        .map_err(membership_error)?;

    Ok(Json(group.into()))
}

pub async fn get_group(
    Path(id): Path<Uuid>,
    _auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<GroupResponse>, AppError> {
    let service = membership_service(&state);
    let group = service.roster(id).await.map_err(membership_error)?;

    Ok(Json(group.into()))
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub account_id: Uuid,
}

pub async fn add_group_member(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<AddMemberRequest>,
) -> Result<StatusCode, AppError> {
    let service = membership_service(&state);
    service
        .add_member(auth.account_id, id, payload.account_id)
        .await
        .map_err(membership_error)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn promote_group_member(
    Path((id, account_id)): Path<(Uuid, Uuid)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = membership_service(&state);
    service
        .promote(auth.account_id, id, account_id)
        .await
        .map_err(membership_error)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn demote_group_member(
    Path((id, account_id)): Path<(Uuid, Uuid)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = membership_service(&state);
    service
        .demote(auth.account_id, id, account_id)
        .await
        .map_err(membership_error)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_group_member(
    Path((id, account_id)): Path<(Uuid, Uuid)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let service = membership_service(&state);
    service
        .remove_member(auth.account_id, id, account_id)
        .await
        .map_err(membership_error)?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct TransferOwnershipRequest {
    pub new_owner_id: Uuid,
}

pub async fn transfer_group_ownership(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<TransferOwnershipRequest>,
) -> Result<StatusCode, AppError> {
    let service = membership_service(&state);
    service
        .transfer_ownership(auth.account_id, id, payload.new_owner_id)
        .await
        .map_err(membership_error)?;

    Ok(StatusCode::NO_CONTENT)
}
