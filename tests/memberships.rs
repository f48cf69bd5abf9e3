//! Group Membership Tests
//!
//! Covers group creation, the owner/admin/member role ladder, and atomic
//! ownership transfer.

mod common;

use axum::http::StatusCode;
use common::{app, TestAccount, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

async fn create_group(app: &TestApp, owner: &TestAccount, name: &str) -> Uuid {
    let resp = app
        .post_json("/v1/groups", json!({ "name": name }), Some(&owner.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK, "create group failed: {}", resp.error_message());
    Uuid::parse_str(resp.json()["id"].as_str().unwrap()).unwrap()
}

async fn roster(app: &TestApp, viewer: &TestAccount, group_id: Uuid) -> Value {
    let resp = app
        .get(&format!("/v1/groups/{}", group_id), Some(&viewer.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    resp.json()
}

fn id_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

// ===========================================================================
// Group Creation
// ===========================================================================

#[tokio::test]
async fn create_group_with_owner() {
    let app = app().await;
    let owner = app.create_account("mem_create").await;

    let resp = app
        .post_json(
            "/v1/groups",
            json!({ "name": "Reading Club" }),
            Some(&owner.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert!(body["id"].is_string());
    assert_eq!(body["name"].as_str().unwrap(), "Reading Club");
    assert_eq!(body["owner_id"].as_str().unwrap(), owner.id.to_string());
    // The owner holds the owner slot, not a seat in the role sets.
    assert!(body["admins"].as_array().unwrap().is_empty());
    assert!(body["members"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn create_group_empty_name() {
    let app = app().await;
    let owner = app.create_account("mem_emptyname").await;

    let resp = app
        .post_json("/v1/groups", json!({ "name": "   " }), Some(&owner.access_token))
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "name cannot be empty");
}

#[tokio::test]
async fn create_group_name_too_long() {
    let app = app().await;
    let owner = app.create_account("mem_longname").await;

    let resp = app
        .post_json(
            "/v1/groups",
            json!({ "name": "a".repeat(121) }),
            Some(&owner.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "name must be at most 120 characters");
}

#[tokio::test]
async fn create_group_requires_auth() {
    let app = app().await;

    let resp = app
        .post_json("/v1/groups", json!({ "name": "No Auth" }), None)
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_nonexistent_group() {
    let app = app().await;
    let viewer = app.create_account("mem_ghostgrp").await;

    let resp = app
        .get(&format!("/v1/groups/{}", Uuid::new_v4()), Some(&viewer.access_token))
        .await;

    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "group not found");
}

// ===========================================================================
// Adding Members
// ===========================================================================

#[tokio::test]
async fn owner_adds_member() {
    let app = app().await;
    let owner = app.create_account("mem_addm_o").await;
    let member = app.create_account("mem_addm_m").await;
    let group_id = create_group(app, &owner, "Add Member").await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members", group_id),
            json!({ "account_id": member.id }),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let body = roster(app, &owner, group_id).await;
    assert!(id_list(&body["members"]).contains(&member.id.to_string()));
}

#[tokio::test]
async fn admin_adds_member() {
    let app = app().await;
    let owner = app.create_account("mem_adminadd_o").await;
    let admin = app.create_account("mem_adminadd_a").await;
    let member = app.create_account("mem_adminadd_m").await;
    let group_id = create_group(app, &owner, "Admin Adds").await;

    // Seat the admin: join as member, then promote.
    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": admin.id }),
        Some(&owner.access_token),
    )
    .await;
    app.post_json(
        &format!("/v1/groups/{}/members/{}/promote", group_id, admin.id),
        json!({}),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members", group_id),
            json!({ "account_id": member.id }),
            Some(&admin.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn member_cannot_add() {
    let app = app().await;
    let owner = app.create_account("mem_membadd_o").await;
    let member = app.create_account("mem_membadd_m").await;
    let outsider = app.create_account("mem_membadd_x").await;
    let group_id = create_group(app, &owner, "Member Adds").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": member.id }),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members", group_id),
            json!({ "account_id": outsider.id }),
            Some(&member.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "not authorized for this group action");
}

#[tokio::test]
async fn add_member_twice() {
    let app = app().await;
    let owner = app.create_account("mem_dupadd_o").await;
    let member = app.create_account("mem_dupadd_m").await;
    let group_id = create_group(app, &owner, "Duplicate Add").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": member.id }),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members", group_id),
            json!({ "account_id": member.id }),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.error_message(), "account already belongs to this group");
}

#[tokio::test]
async fn add_unknown_account() {
    let app = app().await;
    let owner = app.create_account("mem_ghostadd_o").await;
    let group_id = create_group(app, &owner, "Ghost Add").await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members", group_id),
            json!({ "account_id": Uuid::new_v4() }),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "target account not found");
}

#[tokio::test]
async fn add_owner_as_member() {
    let app = app().await;
    let owner = app.create_account("mem_ownadd_o").await;
    let group_id = create_group(app, &owner, "Own Add").await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members", group_id),
            json!({ "account_id": owner.id }),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.error_message(), "account already belongs to this group");
}

// ===========================================================================
// Promotion & Demotion
// ===========================================================================

#[tokio::test]
async fn promote_member_to_admin() {
    let app = app().await;
    let owner = app.create_account("mem_promo_o").await;
    let member = app.create_account("mem_promo_m").await;
    let group_id = create_group(app, &owner, "Promote").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": member.id }),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members/{}/promote", group_id, member.id),
            json!({}),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    // The seat moved set, it did not duplicate.
    let body = roster(app, &owner, group_id).await;
    assert!(id_list(&body["admins"]).contains(&member.id.to_string()));
    assert!(!id_list(&body["members"]).contains(&member.id.to_string()));
}

#[tokio::test]
async fn promote_non_member() {
    let app = app().await;
    let owner = app.create_account("mem_promghost_o").await;
    let outsider = app.create_account("mem_promghost_x").await;
    let group_id = create_group(app, &owner, "Promote Ghost").await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members/{}/promote", group_id, outsider.id),
            json!({}),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "account is not a member of this group");
}

#[tokio::test]
async fn owner_demotes_admin() {
    let app = app().await;
    let owner = app.create_account("mem_demote_o").await;
    let admin = app.create_account("mem_demote_a").await;
    let group_id = create_group(app, &owner, "Demote").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": admin.id }),
        Some(&owner.access_token),
    )
    .await;
    app.post_json(
        &format!("/v1/groups/{}/members/{}/promote", group_id, admin.id),
        json!({}),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members/{}/demote", group_id, admin.id),
            json!({}),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let body = roster(app, &owner, group_id).await;
    assert!(!id_list(&body["admins"]).contains(&admin.id.to_string()));
    assert!(id_list(&body["members"]).contains(&admin.id.to_string()));
}

#[tokio::test]
async fn admin_cannot_demote() {
    let app = app().await;
    let owner = app.create_account("mem_admindem_o").await;
    let admin_a = app.create_account("mem_admindem_a").await;
    let admin_b = app.create_account("mem_admindem_b").await;
    let group_id = create_group(app, &owner, "Admin Demotes").await;

    for admin in [&admin_a, &admin_b] {
        app.post_json(
            &format!("/v1/groups/{}/members", group_id),
            json!({ "account_id": admin.id }),
            Some(&owner.access_token),
        )
        .await;
        app.post_json(
            &format!("/v1/groups/{}/members/{}/promote", group_id, admin.id),
            json!({}),
            Some(&owner.access_token),
        )
        .await;
    }

    // Demotion is an owner-only lever.
    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members/{}/demote", group_id, admin_b.id),
            json!({}),
            Some(&admin_a.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "not authorized for this group action");
}

#[tokio::test]
async fn demote_plain_member() {
    let app = app().await;
    let owner = app.create_account("mem_demnon_o").await;
    let member = app.create_account("mem_demnon_m").await;
    let group_id = create_group(app, &owner, "Demote Member").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": member.id }),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/members/{}/demote", group_id, member.id),
            json!({}),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "account is not an admin of this group");
}

// ===========================================================================
// Removing Members
// ===========================================================================

#[tokio::test]
async fn owner_removes_member() {
    let app = app().await;
    let owner = app.create_account("mem_rm_o").await;
    let member = app.create_account("mem_rm_m").await;
    let group_id = create_group(app, &owner, "Remove").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": member.id }),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .delete(
            &format!("/v1/groups/{}/members/{}", group_id, member.id),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let body = roster(app, &owner, group_id).await;
    assert!(!id_list(&body["members"]).contains(&member.id.to_string()));
}

#[tokio::test]
async fn admin_removes_member() {
    let app = app().await;
    let owner = app.create_account("mem_adminrm_o").await;
    let admin = app.create_account("mem_adminrm_a").await;
    let member = app.create_account("mem_adminrm_m").await;
    let group_id = create_group(app, &owner, "Admin Removes").await;

    for account in [&admin, &member] {
        app.post_json(
            &format!("/v1/groups/{}/members", group_id),
            json!({ "account_id": account.id }),
            Some(&owner.access_token),
        )
        .await;
    }
    app.post_json(
        &format!("/v1/groups/{}/members/{}/promote", group_id, admin.id),
        json!({}),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .delete(
            &format!("/v1/groups/{}/members/{}", group_id, member.id),
            Some(&admin.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn admin_cannot_remove_admin() {
    let app = app().await;
    let owner = app.create_account("mem_admadm_o").await;
    let admin_a = app.create_account("mem_admadm_a").await;
    let admin_b = app.create_account("mem_admadm_b").await;
    let group_id = create_group(app, &owner, "Admin vs Admin").await;

    for admin in [&admin_a, &admin_b] {
        app.post_json(
            &format!("/v1/groups/{}/members", group_id),
            json!({ "account_id": admin.id }),
            Some(&owner.access_token),
        )
        .await;
        app.post_json(
            &format!("/v1/groups/{}/members/{}/promote", group_id, admin.id),
            json!({}),
            Some(&owner.access_token),
        )
        .await;
    }

    let resp = app
        .delete(
            &format!("/v1/groups/{}/members/{}", group_id, admin_b.id),
            Some(&admin_a.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "admins cannot remove other admins");
}

#[tokio::test]
async fn owner_removes_admin() {
    let app = app().await;
    let owner = app.create_account("mem_ownadm_o").await;
    let admin = app.create_account("mem_ownadm_a").await;
    let group_id = create_group(app, &owner, "Owner vs Admin").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": admin.id }),
        Some(&owner.access_token),
    )
    .await;
    app.post_json(
        &format!("/v1/groups/{}/members/{}/promote", group_id, admin.id),
        json!({}),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .delete(
            &format!("/v1/groups/{}/members/{}", group_id, admin.id),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let body = roster(app, &owner, group_id).await;
    assert!(!id_list(&body["admins"]).contains(&admin.id.to_string()));
}

#[tokio::test]
async fn owner_cannot_be_removed() {
    let app = app().await;
    let owner = app.create_account("mem_rmown_o").await;
    let admin = app.create_account("mem_rmown_a").await;
    let group_id = create_group(app, &owner, "Remove Owner").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": admin.id }),
        Some(&owner.access_token),
    )
    .await;
    app.post_json(
        &format!("/v1/groups/{}/members/{}/promote", group_id, admin.id),
        json!({}),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .delete(
            &format!("/v1/groups/{}/members/{}", group_id, owner.id),
            Some(&admin.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "the owner cannot be removed");
}

// ===========================================================================
// Ownership Transfer
// ===========================================================================

#[tokio::test]
async fn transfer_to_admin() {
    let app = app().await;
    let owner = app.create_account("mem_xferadm_o").await;
    let admin = app.create_account("mem_xferadm_a").await;
    let group_id = create_group(app, &owner, "Transfer Admin").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": admin.id }),
        Some(&owner.access_token),
    )
    .await;
    app.post_json(
        &format!("/v1/groups/{}/members/{}/promote", group_id, admin.id),
        json!({}),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/transfer", group_id),
            json!({ "new_owner_id": admin.id }),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    // One atomic swap: new owner vacates their seat, old owner lands in admins.
    let body = roster(app, &admin, group_id).await;
    assert_eq!(body["owner_id"].as_str().unwrap(), admin.id.to_string());
    assert!(!id_list(&body["admins"]).contains(&admin.id.to_string()));
    assert!(id_list(&body["admins"]).contains(&owner.id.to_string()));
}

#[tokio::test]
async fn transfer_to_member() {
    let app = app().await;
    let owner = app.create_account("mem_xfermem_o").await;
    let member = app.create_account("mem_xfermem_m").await;
    let group_id = create_group(app, &owner, "Transfer Member").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": member.id }),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/transfer", group_id),
            json!({ "new_owner_id": member.id }),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let body = roster(app, &member, group_id).await;
    assert_eq!(body["owner_id"].as_str().unwrap(), member.id.to_string());
    assert!(!id_list(&body["members"]).contains(&member.id.to_string()));
    assert!(id_list(&body["admins"]).contains(&owner.id.to_string()));
}

#[tokio::test]
async fn transfer_by_non_owner() {
    let app = app().await;
    let owner = app.create_account("mem_xferby_o").await;
    let admin = app.create_account("mem_xferby_a").await;
    let group_id = create_group(app, &owner, "Transfer By Admin").await;

    app.post_json(
        &format!("/v1/groups/{}/members", group_id),
        json!({ "account_id": admin.id }),
        Some(&owner.access_token),
    )
    .await;
    app.post_json(
        &format!("/v1/groups/{}/members/{}/promote", group_id, admin.id),
        json!({}),
        Some(&owner.access_token),
    )
    .await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/transfer", group_id),
            json!({ "new_owner_id": admin.id }),
            Some(&admin.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "not authorized for this group action");
}

#[tokio::test]
async fn transfer_to_non_member() {
    let app = app().await;
    let owner = app.create_account("mem_xfernon_o").await;
    let outsider = app.create_account("mem_xfernon_x").await;
    let group_id = create_group(app, &owner, "Transfer Outsider").await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/transfer", group_id),
            json!({ "new_owner_id": outsider.id }),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "account is not a member of this group");
}

#[tokio::test]
async fn transfer_to_self() {
    let app = app().await;
    let owner = app.create_account("mem_xferself_o").await;
    let group_id = create_group(app, &owner, "Transfer Self").await;

    let resp = app
        .post_json(
            &format!("/v1/groups/{}/transfer", group_id),
            json!({ "new_owner_id": owner.id }),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "cannot target yourself");
}
