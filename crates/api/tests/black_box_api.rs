use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::json;

use storefront_api::app::services::AppServices;
use storefront_catalog::Product;
use storefront_core::ProductId;
use storefront_infra::Settings;
use storefront_payments::{SIGNATURE_HEADER, SandboxProcessor, WebhookData, WebhookEvent};

struct TestServer {
    base_url: String,
    sandbox: Arc<SandboxProcessor>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(products: Vec<Product>) -> Self {
        // Same router as prod, in-memory stores, bound to an ephemeral port.
        let services = AppServices::in_memory(Settings::default(), products);
        let sandbox = services.sandbox.clone();
        let app = storefront_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            sandbox,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn product(name: &str, price: u64, quantity: u32, active: bool) -> Product {
    Product {
        id: ProductId::new(),
        name: name.to_string(),
        description: String::new(),
        price,
        quantity,
        active,
    }
}

fn order_body(product: &Product, quantity: u32, price: u64, payment_method: &str) -> serde_json::Value {
    let address = json!({
        "line1": "1 Dockyard Rd",
        "city": "Saint John",
        "state": "NB",
        "postal_code": "E2L 4L1",
        "country": "CA",
    });
    json!({
        "customer": {
            "email": "ops@example.com",
            "first_name": "Grace",
            "last_name": "Hopper",
        },
        "billing_address": address,
        "shipping_address": address,
        "payment_method": payment_method,
        "shipping_method": "freight",
        "items": [{
            "product_id": product.id.to_string(),
            "quantity": quantity,
            "price": price,
        }],
    })
}

async fn place_order(
    client: &reqwest::Client,
    srv: &TestServer,
    product: &Product,
    quantity: u32,
) -> serde_json::Value {
    let res = client
        .post(srv.url("/orders"))
        .json(&order_body(product, quantity, product.price, "card"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

fn signed_event(srv: &TestServer, event_type: &str, reference_id: &str) -> (Vec<u8>, String) {
    let event = WebhookEvent {
        id: format!("evt_{reference_id}"),
        event_type: event_type.to_string(),
        created: Utc::now().timestamp(),
        data: WebhookData {
            reference_id: reference_id.to_string(),
            metadata: BTreeMap::new(),
            payment_status: None,
            failure_message: None,
            cancellation_reason: None,
        },
    };
    srv.sandbox
        .signed_webhook(&event, Utc::now().timestamp())
        .unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn(Vec::new()).await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn calculate_total_uses_catalog_prices_and_tax() {
    let seal = product("Mechanical seal", 10_000, 5, true);
    let srv = TestServer::spawn(vec![seal.clone()]).await;

    let client = reqwest::Client::new();
    let res = client
        .post(srv.url("/orders/calculate-total"))
        .json(&json!({"items": [{"product_id": seal.id.to_string(), "quantity": 2}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["valid"], true);
    assert_eq!(body["subtotal"], 20_000);
    assert_eq!(body["tax_amount"], 2_600);
    assert_eq!(body["total_amount"], 22_600);
}

#[tokio::test]
async fn calculate_total_blocks_on_insufficient_stock() {
    let seal = product("Mechanical seal", 10_000, 1, true);
    let gasket = product("Gasket", 500, 10, true);
    let srv = TestServer::spawn(vec![seal.clone(), gasket.clone()]).await;

    let client = reqwest::Client::new();
    let res = client
        .post(srv.url("/orders/calculate-total"))
        .json(&json!({"items": [
            {"product_id": seal.id.to_string(), "quantity": 4},
            {"product_id": gasket.id.to_string(), "quantity": 2},
        ]}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["valid"], false);
    assert_eq!(body["issues"]["quantity_issues"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["issues"]["quantity_issues"][0]["product_id"],
        seal.id.to_string()
    );
    assert_eq!(
        body["issues"]["quantity_issues"][0]["reason"],
        "insufficient_quantity"
    );
    assert!(body["issues"]["unavailable_items"].as_array().unwrap().is_empty());
    assert!(body["issues"]["price_issues"].as_array().unwrap().is_empty());
    assert_eq!(body["valid_items"].as_array().unwrap().len(), 1);
    assert_eq!(body["subtotal"], 1_000);
    assert_eq!(body["tax_amount"], 130);
    assert_eq!(body["total_amount"], 1_130);
}

#[tokio::test]
async fn validate_cart_clamps_and_removes() {
    let seal = product("Mechanical seal", 10_000, 5, true);
    let retired = product("Old gasket", 500, 10, false);
    let srv = TestServer::spawn(vec![seal.clone(), retired.clone()]).await;

    let client = reqwest::Client::new();
    let res = client
        .post(srv.url("/orders/validate-cart"))
        .json(&json!({"items": [
            {"product_id": seal.id.to_string(), "quantity": 10},
            {"product_id": retired.id.to_string(), "quantity": 1},
        ]}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["cart_changed"], true);
    assert_eq!(body["valid_cart_items"][0]["quantity"], 5);
    assert_eq!(body["updated_items"][0]["original_quantity"], 10);
    assert_eq!(body["updated_items"][0]["adjusted_quantity"], 5);
    assert_eq!(body["removed_items"][0]["reason"], "inactive");
}

#[tokio::test]
async fn card_order_returns_client_secret_but_never_the_token() {
    let seal = product("Mechanical seal", 10_000, 5, true);
    let srv = TestServer::spawn(vec![seal.clone()]).await;
    let client = reqwest::Client::new();

    let created = place_order(&client, &srv, &seal, 2).await;
    assert!(created["client_secret"].as_str().is_some());
    assert_eq!(created["order"]["total_amount"], 22_600);
    assert_eq!(created["order"]["payment_status"], "pending");
    assert!(created["order"].get("confirmation_token").is_none());

    let id = created["order"]["id"].as_str().unwrap();
    let res = client.get(srv.url(&format!("/orders/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let fetched: serde_json::Value = res.json().await.unwrap();
    assert_eq!(fetched["order_number"], created["order"]["order_number"]);
    assert!(fetched.get("client_secret").is_none());
}

#[tokio::test]
async fn stale_price_is_rejected_with_itemized_issues() {
    let seal = product("Mechanical seal", 10_000, 5, true);
    let srv = TestServer::spawn(vec![seal.clone()]).await;

    let client = reqwest::Client::new();
    let res = client
        .post(srv.url("/orders"))
        .json(&order_body(&seal, 1, 9_000, "card"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "availability_error");
    assert_eq!(body["issues"][0]["product_id"], seal.id.to_string());
    assert_eq!(srv.sandbox.intent_count(), 0);
}

#[tokio::test]
async fn confirm_payment_completes_the_order() {
    let seal = product("Mechanical seal", 10_000, 5, true);
    let srv = TestServer::spawn(vec![seal.clone()]).await;
    let client = reqwest::Client::new();

    let created = place_order(&client, &srv, &seal, 1).await;
    let id = created["order"]["id"].as_str().unwrap();
    let intent_id = created["order"]["payment_reference"]["id"].as_str().unwrap();
    srv.sandbox.succeed_intent(intent_id).unwrap();

    let res = client
        .post(srv.url(&format!("/orders/{id}/confirm-payment")))
        .json(&json!({"reference_id": intent_id}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["verified"], true);
    assert_eq!(body["disposition"], "applied");
    assert_eq!(body["order"]["payment_status"], "completed");
    assert_eq!(body["order"]["status"], "processing");
}

#[tokio::test]
async fn confirm_payment_rejects_a_foreign_reference() {
    let seal = product("Mechanical seal", 10_000, 5, true);
    let srv = TestServer::spawn(vec![seal.clone()]).await;
    let client = reqwest::Client::new();

    let created = place_order(&client, &srv, &seal, 1).await;
    let id = created["order"]["id"].as_str().unwrap();

    let res = client
        .post(srv.url(&format!("/orders/{id}/confirm-payment")))
        .json(&json!({"reference_id": "pi_someone_else"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hosted_session_flow() {
    let seal = product("Mechanical seal", 10_000, 5, true);
    let srv = TestServer::spawn(vec![seal.clone()]).await;
    let client = reqwest::Client::new();

    let created = place_order(&client, &srv, &seal, 1).await;
    let id = created["order"]["id"].as_str().unwrap();

    let res = client
        .post(srv.url(&format!("/orders/{id}/create-checkout-session")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let session: serde_json::Value = res.json().await.unwrap();
    let session_id = session["checkout_session_id"].as_str().unwrap().to_string();
    assert!(session["url"].as_str().unwrap().contains(&session_id));

    let verify = |session_id: String| {
        let client = client.clone();
        let url = srv.url(&format!("/orders/{id}/verify-checkout-session"));
        async move {
            let res = client
                .post(url)
                .json(&json!({"session_id": session_id}))
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            res.json::<serde_json::Value>().await.unwrap()
        }
    };

    let pending = verify(session_id.clone()).await;
    assert_eq!(pending["verified"], false);
    assert_eq!(pending["resolved_state"], "pending");

    srv.sandbox.pay_session(&session_id).unwrap();
    let paid = verify(session_id).await;
    assert_eq!(paid["verified"], true);
    assert_eq!(paid["order"]["payment_status"], "completed");
}

#[tokio::test]
async fn webhook_is_acknowledged_even_for_unknown_orders() {
    let srv = TestServer::spawn(Vec::new()).await;
    let client = reqwest::Client::new();

    let (body, signature) = signed_event(&srv, "payment_intent.succeeded", "pi_nobody");
    let res = client
        .post(srv.url("/payments/webhook"))
        .header(SIGNATURE_HEADER, signature)
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let ack: serde_json::Value = res.json().await.unwrap();
    assert_eq!(ack["received"], true);
    assert_eq!(ack["outcome"], "dropped");
}

#[tokio::test]
async fn webhook_applies_success_once() {
    let seal = product("Mechanical seal", 10_000, 5, true);
    let srv = TestServer::spawn(vec![seal.clone()]).await;
    let client = reqwest::Client::new();

    let created = place_order(&client, &srv, &seal, 2).await;
    let id = created["order"]["id"].as_str().unwrap();
    let intent_id = created["order"]["payment_reference"]["id"].as_str().unwrap();
    let (body, signature) = signed_event(&srv, "payment_intent.succeeded", intent_id);

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let res = client
            .post(srv.url("/payments/webhook"))
            .header(SIGNATURE_HEADER, signature.clone())
            .body(body.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let ack: serde_json::Value = res.json().await.unwrap();
        outcomes.push(ack["outcome"].as_str().unwrap().to_string());
    }
    assert_eq!(outcomes, ["applied", "unchanged"]);

    let order: serde_json::Value = client
        .get(srv.url(&format!("/orders/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(order["payment_status"], "completed");
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let srv = TestServer::spawn(Vec::new()).await;
    let client = reqwest::Client::new();

    let (body, _) = signed_event(&srv, "payment_intent.succeeded", "pi_1");
    let res = client
        .post(srv.url("/payments/webhook"))
        .header(SIGNATURE_HEADER, "t=1,v1=deadbeef")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/payments/webhook"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_lookup_errors() {
    let srv = TestServer::spawn(Vec::new()).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/orders/not-a-uuid")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let unknown = storefront_core::OrderId::new();
    let res = client
        .get(srv.url(&format!("/orders/{unknown}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn client_reported_cancellation_notifies_without_mutation() {
    let seal = product("Mechanical seal", 10_000, 5, true);
    let srv = TestServer::spawn(vec![seal.clone()]).await;
    let client = reqwest::Client::new();

    let created = place_order(&client, &srv, &seal, 1).await;
    let id = created["order"]["id"].as_str().unwrap();

    let res = client
        .post(srv.url(&format!("/orders/{id}/notify-payment-cancelled")))
        .json(&json!({"reason": "changed my mind"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["notified"], true);

    let order: serde_json::Value = client
        .get(srv.url(&format!("/orders/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(order["payment_status"], "pending");
}
