use axum::{routing::delete, routing::get, routing::patch, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/me", get(handlers::get_current_account))
}

pub fn accounts() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(handlers::signup))
        .route("/accounts/:id", get(handlers::get_account))
        .route("/accounts/:id", patch(handlers::update_account))
        // Account management (the authenticated account itself)
        .route("/account", delete(handlers::delete_account))
}

pub fn relationships() -> Router<AppState> {
    Router::new()
        .route("/accounts/:id/follow", post(handlers::follow_account))
        .route("/accounts/:id/unfollow", post(handlers::unfollow_account))
        .route("/accounts/:id/block", post(handlers::block_account))
        .route("/accounts/:id/unblock", post(handlers::unblock_account))
        .route(
            "/accounts/:id/requests/accept",
            post(handlers::accept_request),
        )
        .route(
            "/accounts/:id/requests/reject",
            post(handlers::reject_request),
        )
        .route(
            "/accounts/:id/requests/cancel",
            post(handlers::cancel_request),
        )
        .route(
            "/accounts/:id/relationship",
            get(handlers::relationship_status),
        )
        .route("/accounts/:id/followers", get(handlers::list_followers))
        .route("/accounts/:id/following", get(handlers::list_following))
        .route("/account/requests", get(handlers::list_requests))
        .route("/account/blocked", get(handlers::list_blocked))
}

pub fn groups() -> Router<AppState> {
    Router::new()
        .route("/groups", post(handlers::create_group))
        .route("/groups/:id", get(handlers::get_group))
        .route("/groups/:id/members", post(handlers::add_group_member))
        .route(
            "/groups/:id/members/:account_id/promote",
            post(handlers::promote_group_member),
        )
        .route(
            "/groups/:id/members/:account_id/demote",
            post(handlers::demote_group_member),
        )
        .route(
            "/groups/:id/members/:account_id",
            delete(handlers::remove_group_member),
        )
        .route(
            "/groups/:id/transfer",
            post(handlers::transfer_group_ownership),
        )
}
