//! Ticket workflow over HTTP.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use serde_json::json;

use parts_crm_core::Role;
use parts_crm_integration_tests::{TestApp, TestUser, id_of, order_body};

struct Desk {
    app: TestApp,
    admin: TestUser,
    followup: TestUser,
    colleague: TestUser,
}

async fn desk() -> Desk {
    let app = TestApp::new();
    let org = app.org("Northside Auto").await;
    let admin = app.user(org, "Ada", Role::Admin).await;
    let followup = app.user(org, "Fay", Role::Followup).await;
    let colleague = app.user(org, "Cal", Role::Followup).await;
    Desk {
        app,
        admin,
        followup,
        colleague,
    }
}

async fn open_ticket(desk: &Desk, title: &str) -> i64 {
    let (status, ticket) = desk
        .app
        .post(
            &desk.followup,
            "/api/tickets",
            json!({ "title": title, "description": "Customer called", "priority": "high" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{ticket}");
    id_of(&ticket)
}

#[tokio::test]
async fn test_ticket_opens_unassigned() {
    let desk = desk().await;
    let (status, ticket) = desk
        .app
        .post(
            &desk.followup,
            "/api/tickets",
            json!({ "title": "  Wrong part shipped  " }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ticket["status"], "open");
    assert_eq!(ticket["title"], "Wrong part shipped");
    assert_eq!(ticket["priority"], "medium");
    assert_eq!(ticket["user_id"], json!(desk.followup.id));
    assert!(ticket["assigned_to"].is_null());
    assert!(ticket["resolved_at"].is_null());
}

#[tokio::test]
async fn test_blank_title_is_rejected() {
    let desk = desk().await;
    let (status, body) = desk
        .app
        .post(&desk.followup, "/api/tickets", json!({ "title": "   " }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Validation failed: ticket title is required");
}

#[tokio::test]
async fn test_claim_then_resolve_then_close() {
    let desk = desk().await;
    let id = open_ticket(&desk, "Refund request").await;

    let (status, claimed) = desk
        .app
        .post(
            &desk.followup,
            &format!("/api/tickets/{id}/assign-to-me"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{claimed}");
    assert_eq!(claimed["status"], "in_progress");
    assert_eq!(claimed["assigned_to"], json!(desk.followup.id));

    let (status, body) = desk
        .app
        .post(
            &desk.colleague,
            &format!("/api/tickets/{id}/assign-to-me"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["error"],
        format!("Conflict: ticket already assigned to user {}", desk.followup.id)
    );

    let (_, mine) = desk.app.get(&desk.followup, "/api/tickets/mine").await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let (_, theirs) = desk.app.get(&desk.colleague, "/api/tickets/mine").await;
    assert!(theirs.as_array().unwrap().is_empty());

    let (status, resolved) = desk
        .app
        .post(
            &desk.followup,
            &format!("/api/tickets/{id}/resolve"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{resolved}");
    assert_eq!(resolved["status"], "resolved");
    let stamp = resolved["resolved_at"].clone();
    assert!(stamp.is_string());

    let (status, closed) = desk
        .app
        .patch(
            &desk.followup,
            &format!("/api/tickets/{id}"),
            json!({ "status": "closed" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{closed}");
    assert_eq!(closed["status"], "closed");
    assert_eq!(closed["resolved_at"], stamp);
}

#[tokio::test]
async fn test_open_ticket_cannot_jump_to_resolved() {
    let desk = desk().await;
    let id = open_ticket(&desk, "Damaged box").await;

    let (status, _) = desk
        .app
        .patch(
            &desk.followup,
            &format!("/api/tickets/{id}"),
            json!({ "status": "resolved" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, ticket) = desk
        .app
        .get(&desk.followup, &format!("/api/tickets/{id}"))
        .await;
    assert_eq!(ticket["status"], "open");
    assert!(ticket["resolved_at"].is_null());
}

#[tokio::test]
async fn test_only_admins_hand_tickets_to_others() {
    let desk = desk().await;
    let id = open_ticket(&desk, "Late delivery").await;
    let path = format!("/api/tickets/{id}");

    let (status, _) = desk
        .app
        .patch(
            &desk.followup,
            &path,
            json!({ "assigned_to": desk.colleague.id }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, ticket) = desk
        .app
        .patch(
            &desk.admin,
            &path,
            json!({ "assigned_to": desk.colleague.id, "priority": "urgent" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{ticket}");
    assert_eq!(ticket["assigned_to"], json!(desk.colleague.id));
    assert_eq!(ticket["priority"], "urgent");
    assert_eq!(ticket["status"], "open");

    // The assignee starts the ticket through the claim endpoint.
    let (status, started) = desk
        .app
        .post(
            &desk.colleague,
            &format!("/api/tickets/{id}/assign-to-me"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{started}");
    assert_eq!(started["status"], "in_progress");
}

#[tokio::test]
async fn test_ticket_links_only_own_orders() {
    let desk = desk().await;

    let other_org = desk.app.org("Southside Motors").await;
    let outsider = desk.app.user(other_org, "Oz", Role::Sales).await;
    let product = desk.app.product(other_org, "Alternator").await;
    let (status, order) = desk
        .app
        .post(
            &outsider,
            "/api/orders",
            order_body("lee@example.org", &[product]),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");

    let (status, _) = desk
        .app
        .post(
            &desk.followup,
            "/api/tickets",
            json!({ "title": "Chargeback", "order_id": id_of(&order) }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, tickets) = desk.app.get(&desk.admin, "/api/tickets").await;
    assert!(tickets.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_held_ticket_cannot_be_reassigned_by_a_colleague() {
    let desk = desk().await;
    let id = open_ticket(&desk, "Missing invoice").await;
    let path = format!("/api/tickets/{id}");

    let (status, _) = desk
        .app
        .post(&desk.followup, &format!("{path}/assign-to-me"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = desk
        .app
        .patch(&desk.colleague, &path, json!({ "assigned_to": desk.colleague.id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["error"],
        format!("Conflict: ticket already assigned to user {}", desk.followup.id)
    );

    let (_, ticket) = desk.app.get(&desk.admin, &path).await;
    assert_eq!(ticket["assigned_to"], json!(desk.followup.id));
    assert_eq!(ticket["status"], "in_progress");
}
