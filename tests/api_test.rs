mod common;

use axum::http::{Method, StatusCode};
use common::{send, TestContext};
use serde_json::{json, Value};

async fn create(router: &axum::Router, uri: &str, body: Value) -> Value {
    let (status, json) = send(router, Method::POST, uri, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "POST {} returned {}", uri, json);
    json
}

/// Builds the wooden table catalog through the API and returns (legs id, mo payload).
async fn seed_over_http(router: &axum::Router, actor: &str) -> (String, Value) {
    let legs = create(
        router,
        "/api/v1/products",
        json!({ "name": "Wooden Legs", "initial_stock": 100.0, "min_stock": 20.0, "cost_price": 5.0, "is_raw_material": true }),
    )
    .await;
    let top = create(
        router,
        "/api/v1/products",
        json!({ "name": "Wooden Top", "initial_stock": 50.0, "min_stock": 10.0, "cost_price": 25.0, "is_raw_material": true }),
    )
    .await;
    let table = create(
        router,
        "/api/v1/products",
        json!({ "name": "Wooden Table", "cost_price": 100.0, "min_stock": 5.0 }),
    )
    .await;
    let center = create(
        router,
        "/api/v1/work-centers",
        json!({ "name": "Main Assembly Line", "cost_per_hour": 50.0 }),
    )
    .await;
    let bom = create(
        router,
        "/api/v1/boms",
        json!({
            "product_id": table["id"],
            "name": "Wooden Table",
            "lines": [
                { "product_id": legs["id"], "quantity": 4.0, "operation_time": 10.0 },
                { "product_id": top["id"], "quantity": 1.0, "operation_time": 30.0 }
            ]
        }),
    )
    .await;

    let order = json!({
        "product_id": table["id"],
        "bom_id": bom["bom"]["id"],
        "quantity_to_produce": 5.0,
        "work_center_id": center["id"],
        "actor_id": actor
    });
    (legs["id"].as_str().unwrap_or_default().to_string(), order)
}

#[tokio::test]
async fn health_endpoints_respond() {
    let ctx = TestContext::new().await;
    let router = ctx.router();

    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"]["status"], "up");

    let (status, body) = send(&router, Method::GET, "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
}

#[tokio::test]
async fn manufacturing_order_lifecycle_over_http() {
    let ctx = TestContext::new().await;
    let router = ctx.router();
    let actor = ctx.actor.to_string();
    let (legs_id, order) = seed_over_http(&router, &actor).await;

    let planned = create(&router, "/api/v1/manufacturing-orders", order).await;
    assert_eq!(planned["order"]["state"], "planned");
    assert_eq!(planned["work_orders"].as_array().map(Vec::len), Some(2));
    let mo_id = planned["order"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/v1/manufacturing-orders/{}/confirm", mo_id),
        Some(json!({ "actor_id": actor })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["order"]["state"], "in_progress");
    assert_eq!(body["movements"].as_array().map(Vec::len), Some(2));

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/v1/manufacturing-orders/{}/confirm", mo_id),
        Some(json!({ "actor_id": actor })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");

    let (status, legs) = send(&router, Method::GET, &format!("/api/v1/products/{}", legs_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(legs["current_stock"], 80.0);

    let (status, work_orders) = send(
        &router,
        Method::GET,
        &format!("/api/v1/manufacturing-orders/{}/work-orders", mo_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let wo_id = work_orders[0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&router, Method::POST, &format!("/api/v1/work-orders/{}/start", wo_id), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["state"], "in_progress");

    // Completing without a body is allowed
    let (status, body) = send(&router, Method::POST, &format!("/api/v1/work-orders/{}/complete", wo_id), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["state"], "completed");

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/v1/manufacturing-orders/{}/complete", mo_id),
        Some(json!({ "actor_id": actor })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["order"]["state"], "done");
    assert_eq!(body["order"]["quantity_produced"], 5.0);

    let (status, report) = send(&router, Method::GET, "/api/v1/reports/production", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report[0]["reference"], planned["order"]["reference"]);
    assert_eq!(report[0]["efficiency"], 100.0);

    let (status, reconciliation) = send(
        &router,
        Method::GET,
        &format!("/api/v1/products/{}/reconciliation", legs_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reconciliation["balanced"], true);
}

#[tokio::test]
async fn insufficient_stock_is_unprocessable_with_details() {
    let ctx = TestContext::new().await;
    let router = ctx.router();
    let actor = ctx.actor.to_string();
    let (_, mut order) = seed_over_http(&router, &actor).await;
    order["quantity_to_produce"] = json!(30.0);

    let planned = create(&router, "/api/v1/manufacturing-orders", order).await;
    let mo_id = planned["order"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/v1/manufacturing-orders/{}/confirm", mo_id),
        Some(json!({ "actor_id": actor })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"]["required"], 120.0);
    assert_eq!(body["details"]["available"], 100.0);
    assert_eq!(body["details"]["shortfall"], 20.0);

    let (_, reloaded) = send(
        &router,
        Method::GET,
        &format!("/api/v1/manufacturing-orders/{}", mo_id),
        None,
    )
    .await;
    assert_eq!(reloaded["state"], "planned");
}

#[tokio::test]
async fn request_errors_map_to_status_codes() {
    let ctx = TestContext::new().await;
    let router = ctx.router();
    let actor = ctx.actor.to_string();

    let (status, _) = send(
        &router,
        Method::GET,
        &format!("/api/v1/manufacturing-orders/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, mut order) = seed_over_http(&router, &actor).await;
    order["quantity_to_produce"] = json!(0.0);
    let (status, body) = send(&router, Method::POST, "/api/v1/manufacturing-orders", Some(order)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad Request");

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v1/stock-movements",
        Some(json!({
            "product_id": uuid::Uuid::new_v4(),
            "quantity": -2.0,
            "movement_type": "in",
            "actor_id": actor
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        Method::GET,
        "/api/v1/reports/production?from=2026-02-01T00:00:00Z&to=2026-01-01T00:00:00Z",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stock_movements_post_and_list() {
    let ctx = TestContext::new().await;
    let router = ctx.router();
    let screws = ctx.product("Screws", 1000.0, 100.0).await;

    let movement = create(
        &router,
        "/api/v1/stock-movements",
        json!({
            "product_id": screws.id,
            "quantity": 950.0,
            "movement_type": "out",
            "reference": "PICK-7",
            "actor_id": ctx.actor
        }),
    )
    .await;
    assert_eq!(movement["movement_type"], "out");

    let (status, listed) = send(
        &router,
        Method::GET,
        &format!("/api/v1/stock-movements?product_id={}", screws.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, low) = send(&router, Method::GET, "/api/v1/products/low-stock", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(low[0]["id"], json!(screws.id));
}

#[tokio::test]
async fn bom_and_movement_quantities_are_validated() {
    let ctx = TestContext::new().await;
    let router = ctx.router();
    let legs = ctx.product("Wooden Legs", 100.0, 20.0).await;
    let table = ctx.product("Wooden Table", 0.0, 5.0).await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/boms",
        Some(json!({
            "product_id": table.id,
            "name": "Wooden Table",
            "lines": [{ "product_id": legs.id, "quantity": 0.0 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v1/boms",
        Some(json!({
            "product_id": table.id,
            "name": "Wooden Table",
            "lines": [{ "product_id": legs.id, "quantity": 4.0, "operation_time": -5.0 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v1/boms",
        Some(json!({
            "product_id": table.id,
            "name": "Wooden Table",
            "quantity": -1.0,
            "lines": [{ "product_id": legs.id, "quantity": 4.0 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let bom = create(
        &router,
        "/api/v1/boms",
        json!({
            "product_id": table.id,
            "name": "Wooden Table",
            "lines": [{ "product_id": legs.id, "quantity": 4.0, "operation_time": 10.0 }]
        }),
    )
    .await;

    let (status, _) = send(
        &router,
        Method::GET,
        &format!("/api/v1/boms/{}/explode?quantity=0", bom["bom"]["id"].as_str().unwrap()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, exploded) = send(
        &router,
        Method::GET,
        &format!("/api/v1/boms/{}/explode?quantity=2.5", bom["bom"]["id"].as_str().unwrap()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", exploded);
}

#[tokio::test]
async fn product_master_data_can_be_edited() {
    let ctx = TestContext::new().await;
    let router = ctx.router();
    let screws = ctx.product("Screws", 1000.0, 100.0).await;
    let uri = format!("/api/v1/products/{}", screws.id);

    let (status, body) = send(
        &router,
        Method::PUT,
        &uri,
        Some(json!({ "min_stock": 1500.0, "cost_price": 0.05, "unit_of_measure": "Box" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["min_stock"], 1500.0);
    assert_eq!(body["cost_price"], 0.05);
    assert_eq!(body["unit_of_measure"], "Box");
    assert_eq!(body["current_stock"], 1000.0);
    assert_eq!(body["name"], "Screws");

    let (status, low) = send(&router, Method::GET, "/api/v1/products/low-stock", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(low[0]["id"], json!(screws.id));

    let (status, _) = send(&router, Method::PUT, &uri, Some(json!({ "cost_price": -3.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        Method::PUT,
        &format!("/api/v1/products/{}", uuid::Uuid::new_v4()),
        Some(json!({ "name": "Ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, reconciliation) = send(&router, Method::GET, &format!("{}/reconciliation", uri), None).await;
    assert_eq!(reconciliation["balanced"], true);
}
