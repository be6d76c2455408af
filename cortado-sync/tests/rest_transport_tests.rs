use cortado_store::Query;
use cortado_sync::{RemoteTransport, RestConfig, RestTransport, SyncError};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn transport(server: &MockServer) -> RestTransport {
    RestTransport::new(RestConfig::new(server.uri(), "test-api-key")).unwrap()
}

// ── Inserts ───────────────────────────────────────────────────────

#[tokio::test]
async fn insert_posts_the_row() {
    let server = MockServer::start().await;
    let row = json!({ "id": "abc", "phone": "555-0100" });
    Mock::given(method("POST"))
        .and(path("/rest/v1/customers"))
        .and(header("apikey", "test-api-key"))
        .and(header("authorization", "Bearer test-api-key"))
        .and(body_json(&row))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server).await.insert("customers", &row).await.unwrap();
}

#[tokio::test]
async fn duplicate_key_conflict_maps_to_its_own_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/customers"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({ "code": "23505", "message": "duplicate key value" })),
        )
        .mount(&server)
        .await;

    let err = transport(&server)
        .await
        .insert("customers", &json!({ "id": "abc" }))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DuplicateKey));
}

// ── Updates and timestamps ────────────────────────────────────────

#[tokio::test]
async fn update_patches_by_id_filter() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/orders"))
        .and(query_param("id", format!("eq.{id}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server)
        .await
        .update("orders", &id, &json!({ "order_status": "ready" }))
        .await
        .unwrap();
}

#[tokio::test]
async fn update_matching_filters_on_the_given_field() {
    let server = MockServer::start().await;
    let order_id = Uuid::new_v4();
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/order_items"))
        .and(query_param("order_id", format!("eq.{order_id}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server)
        .await
        .update_matching(
            "order_items",
            "order_id",
            &json!(order_id.to_string()),
            &json!({ "item_status": "ready" }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn fetch_updated_at_reads_the_single_field() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .and(query_param("id", format!("eq.{id}")))
        .and(query_param("select", "updated_at"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "updated_at": "2026-08-01T10:00:00Z" }])),
        )
        .mount(&server)
        .await;

    let ts = transport(&server).await.fetch_updated_at("orders", &id).await.unwrap();
    assert_eq!(ts.unwrap().to_rfc3339(), "2026-08-01T10:00:00+00:00");
}

#[tokio::test]
async fn fetch_updated_at_missing_row_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let ts = transport(&server)
        .await
        .fetch_updated_at("orders", &Uuid::new_v4())
        .await
        .unwrap();
    assert!(ts.is_none());
}

// ── Deletes ───────────────────────────────────────────────────────

#[tokio::test]
async fn delete_with_removed_rows_succeeds() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/orders"))
        .and(query_param("id", format!("eq.{id}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": id.to_string() }])),
        )
        .mount(&server)
        .await;

    transport(&server).await.delete("orders", &id).await.unwrap();
}

#[tokio::test]
async fn delete_with_no_removed_rows_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = transport(&server).await.delete("orders", &Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound));
}

// ── Selects ───────────────────────────────────────────────────────

#[tokio::test]
async fn select_translates_query_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .and(query_param("order_status", "eq.ready"))
        .and(query_param("created_at", "gte.2026-08-01T00:00:00Z"))
        .and(query_param("order", "created_at.desc"))
        .and(query_param("limit", "10"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": "x", "order_status": "ready" }])),
        )
        .mount(&server)
        .await;

    let query = Query::all()
        .eq("order_status", "ready")
        .gte("created_at", "2026-08-01T00:00:00Z")
        .order_desc("created_at")
        .limit(10);
    let rows = transport(&server).await.select("orders", &query).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn select_renders_membership_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .and(query_param("order_status", "in.(ready,completed)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let query =
        Query::all().within("order_status", vec![json!("ready"), json!("completed")]);
    transport(&server).await.select("orders", &query).await.unwrap();
}

// ── Procedures ────────────────────────────────────────────────────

#[tokio::test]
async fn call_posts_to_the_rpc_endpoint() {
    let server = MockServer::start().await;
    let params = json!({ "p_total_amount": 12.5 });
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/submit_order"))
        .and(body_json(&params))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "order_id": Uuid::new_v4().to_string(), "order_number": 42 })),
        )
        .mount(&server)
        .await;

    let response = transport(&server).await.call("submit_order", &params).await.unwrap();
    assert_eq!(response["order_number"], 42);
}

#[tokio::test]
async fn call_with_empty_response_is_null() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/confirm_order_payment"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let response = transport(&server)
        .await
        .call("confirm_order_payment", &json!({ "p_order_id": "x" }))
        .await
        .unwrap();
    assert!(response.is_null());
}

// ── Error mapping ─────────────────────────────────────────────────

#[tokio::test]
async fn missing_row_code_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(
            ResponseTemplate::new(406)
                .set_body_json(json!({ "code": "PGRST116", "message": "0 rows" })),
        )
        .mount(&server)
        .await;

    let err = transport(&server).await.select("orders", &Query::all()).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound));
}

#[tokio::test]
async fn other_remote_errors_carry_the_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/orders"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = transport(&server).await.select("orders", &Query::all()).await.unwrap_err();
    match err {
        SyncError::Remote { status, message } => {
            assert_eq!(status, 500);
            assert!(message.contains("boom"));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    // Nothing is listening on this port.
    let transport =
        RestTransport::new(RestConfig::new("http://127.0.0.1:9", "key")).unwrap();
    let err = transport.select("orders", &Query::all()).await.unwrap_err();
    assert!(err.is_network());
}
