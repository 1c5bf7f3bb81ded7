//! Authentication, role checks and tenant isolation.

#![allow(clippy::unwrap_used)]

use axum::http::{Method, StatusCode};
use serde_json::json;

use parts_crm_core::Role;
use parts_crm_integration_tests::{TestApp, id_of, order_body};

#[tokio::test]
async fn test_health_endpoints_need_no_token() {
    let app = TestApp::new();

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, _) = app.request(Method::GET, "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let app = TestApp::new();

    let (status, body) = app.request(Method::GET, "/api/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized: missing bearer token");

    let (status, _) = app
        .request(Method::GET, "/api/orders", Some("not.a.jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_subject_is_unauthorized() {
    let app = TestApp::new();
    let token = app.token("idp|nobody", None);

    let (status, _) = app
        .request(Method::GET, "/api/orders", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_customers_cannot_use_the_crm() {
    let app = TestApp::new();
    let org = app.org("Northside Auto").await;
    let customer = app.user(org, "Cy", Role::Customer).await;

    let (status, _) = app.get(&customer, "/api/orders").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(&customer, "/api/tickets", json!({ "title": "Where is my order" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_catalog_writes_need_admin() {
    let app = TestApp::new();
    let org = app.org("Northside Auto").await;
    let sales = app.user(org, "Sol", Role::Sales).await;

    let product = json!({ "name": "Spark Plug", "make": "Toyota", "year": 2011 });
    let (status, _) = app.post(&sales, "/api/products", product.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A role claim in the token wins over the stored role.
    let promoted = app.token("idp|sol", Some("ADMIN"));
    let (status, created) = app
        .request(Method::POST, "/api/products", Some(&promoted), Some(product))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["name"], "Spark Plug");

    let (status, products) = app.get(&sales, "/api/products").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(products.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unrecognized_role_claim_is_unauthorized() {
    let app = TestApp::new();
    let org = app.org("Northside Auto").await;
    app.user(org, "Sol", Role::Sales).await;

    let token = app.token("idp|sol", Some("SUPERUSER"));
    let (status, _) = app
        .request(Method::GET, "/api/orders", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_foreign_records_look_missing() {
    let app = TestApp::new();
    let north = app.org("Northside Auto").await;
    let south = app.org("Southside Motors").await;
    let seller = app.user(north, "Sol", Role::Sales).await;
    let north_admin = app.user(north, "Ada", Role::Admin).await;
    let outsider = app.user(south, "Oz", Role::Admin).await;
    let product = app.product(north, "Brake Pad").await;

    let (status, order) = app
        .post(
            &seller,
            "/api/orders",
            order_body("dana@example.org", &[product]),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    let order_path = format!("/api/orders/{}", id_of(&order));

    let (status, body) = app.get(&outsider, &order_path).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().starts_with("Not found:"));

    let (status, _) = app
        .post(
            &outsider,
            &format!("{order_path}/payment-status"),
            json!({ "status": "paid" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .delete(&outsider, &format!("/api/users/{}", seller.id))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, orders) = app.get(&outsider, "/api/orders").await;
    assert!(orders.as_array().unwrap().is_empty());
    let (_, users) = app.get(&outsider, "/api/users").await;
    assert_eq!(users.as_array().unwrap().len(), 1);

    let (status, order) = app.get(&north_admin, &order_path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["payment_status"], "unpaid");
}

#[tokio::test]
async fn test_deactivated_user_is_locked_out() {
    let app = TestApp::new();
    let org = app.org("Northside Auto").await;
    let admin = app.user(org, "Ada", Role::Admin).await;
    let sales = app.user(org, "Sol", Role::Sales).await;

    // Warm the identity cache.
    let (status, _) = app.get(&sales, "/api/orders").await;
    assert_eq!(status, StatusCode::OK);

    let (status, user) = app
        .delete(&admin, &format!("/api/users/{}", sales.id))
        .await;
    assert_eq!(status, StatusCode::OK, "{user}");

    let (status, _) = app.get(&sales, "/api/orders").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .delete(&admin, &format!("/api/users/{}", admin.id))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Validation failed: you cannot deactivate yourself");
}

#[tokio::test]
async fn test_organization_profile_is_admin_editable() {
    let app = TestApp::new();
    let org = app.org("Northside Auto").await;
    let admin = app.user(org, "Ada", Role::Admin).await;
    let sales = app.user(org, "Sol", Role::Sales).await;

    let (status, _) = app
        .patch(&sales, "/api/organization", json!({ "name": "Renamed" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, updated) = app
        .patch(&admin, "/api/organization", json!({ "name": "Northside Auto Parts" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");

    let (_, current) = app.get(&sales, "/api/organization").await;
    assert_eq!(current["name"], "Northside Auto Parts");
}

#[tokio::test]
async fn test_inactive_organization_is_locked_out() {
    let app = TestApp::new();
    let north = app.org("Northside Auto").await;
    let south = app.org("Southside Motors").await;
    let admin = app.user(north, "Ada", Role::Admin).await;
    let sales = app.user(north, "Sol", Role::Sales).await;
    let neighbour = app.user(south, "Oz", Role::Sales).await;

    let (status, updated) = app
        .patch(&admin, "/api/organization", json!({ "active": false }))
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["active"], false);

    let (status, body) = app.get(&sales, "/api/orders").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized: organization is inactive");
    let (status, _) = app.get(&admin, "/api/organization").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get(&neighbour, "/api/orders").await;
    assert_eq!(status, StatusCode::OK);
}
