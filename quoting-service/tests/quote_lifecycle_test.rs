mod common;

use common::TestApp;
use serde_json::json;

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn health_check_works() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "quoting-service");
}

// =============================================================================
// Draft creation and totals
// =============================================================================

#[tokio::test]
async fn create_quote_computes_totals() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote = app
        .create_quote(json!([
            {"description": "Design", "quantity": "2", "unit_price": "100", "tax_rate": "20"},
            {"description": "Review", "quantity": "1", "unit_price": "50", "tax_rate": "20"}
        ]))
        .await;

    assert_eq!(quote["status"], "draft");
    assert!(quote["number"].is_null(), "draft quotes carry no number");
    assert_eq!(quote["subtotal"], "250.00");
    assert_eq!(quote["tax_amount"], "50.00");
    assert_eq!(quote["grand_total"], "300.00");
    assert_eq!(quote["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn create_quote_rejects_invalid_items() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let response = app
        .client
        .post(format!("{}/quotes", app.address))
        .json(&json!({
            "customer_name": "Acme Corp",
            "customer_email": "billing@acme.test",
            "items": [
                {"description": "Bad", "quantity": "-1", "unit_price": "10", "tax_rate": "20"}
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn create_quote_rejects_a_malformed_email() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let response = app
        .client
        .post(format!("{}/quotes", app.address))
        .json(&json!({
            "customer_name": "Acme Corp",
            "customer_email": "not-an-email",
            "items": []
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn add_item_recomputes_totals() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote = app
        .create_quote(json!([
            {"description": "Design", "quantity": "1", "unit_price": "100", "tax_rate": "20"}
        ]))
        .await;
    let quote_id = quote["quote_id"].as_str().unwrap();

    let response = app
        .client
        .post(format!("{}/quotes/{}/items", app.address, quote_id))
        .json(&json!({
            "description": "Extra work",
            "quantity": "1",
            "unit_price": "50",
            "tax_rate": "20"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let updated: serde_json::Value = response.json().await.unwrap();
    assert_eq!(updated["subtotal"], "150.00");
    assert_eq!(updated["tax_amount"], "30.00");
    assert_eq!(updated["grand_total"], "180.00");
}

#[tokio::test]
async fn items_are_frozen_once_sent() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote = app
        .create_quote(json!([
            {"description": "Design", "quantity": "1", "unit_price": "100", "tax_rate": "20"}
        ]))
        .await;
    let quote_id = quote["quote_id"].as_str().unwrap();
    app.send_quote(quote_id).await;

    let response = app
        .client
        .post(format!("{}/quotes/{}/items", app.address, quote_id))
        .json(&json!({
            "description": "Late addition",
            "quantity": "1",
            "unit_price": "10",
            "tax_rate": "0"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

// =============================================================================
// Sending and numbering
// =============================================================================

#[tokio::test]
async fn send_assigns_sequential_numbers() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let first = app
        .create_quote(json!([
            {"description": "A", "quantity": "1", "unit_price": "10", "tax_rate": "0"}
        ]))
        .await;
    let second = app
        .create_quote(json!([
            {"description": "B", "quantity": "1", "unit_price": "20", "tax_rate": "0"}
        ]))
        .await;

    let sent_first = app.send_quote(first["quote_id"].as_str().unwrap()).await;
    let sent_second = app.send_quote(second["quote_id"].as_str().unwrap()).await;

    let number_first = sent_first["number"].as_str().unwrap();
    let number_second = sent_second["number"].as_str().unwrap();

    assert!(number_first.starts_with("DEV-"), "got {number_first}");
    assert!(number_first.ends_with("-001"), "got {number_first}");
    assert!(number_second.ends_with("-002"), "got {number_second}");

    assert_eq!(sent_first["status"], "sent");
    assert!(!sent_first["issue_date"].is_null());
    assert!(!sent_first["valid_until"].is_null());
}

#[tokio::test]
async fn concurrent_sends_get_distinct_numbers() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let mut ids = Vec::new();
    for i in 0..4 {
        let quote = app
            .create_quote(json!([
                {"description": format!("Job {i}"), "quantity": "1", "unit_price": "10", "tax_rate": "0"}
            ]))
            .await;
        ids.push(quote["quote_id"].as_str().unwrap().to_string());
    }

    let send = |quote_id: String| {
        let client = app.client.clone();
        let address = app.address.clone();
        async move {
            let response = client
                .post(format!("{address}/quotes/{quote_id}/send"))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), 200);
            let body: serde_json::Value = response.json().await.unwrap();
            body["number"].as_str().unwrap().to_string()
        }
    };

    let (a, b, c, d) = tokio::join!(
        send(ids[0].clone()),
        send(ids[1].clone()),
        send(ids[2].clone()),
        send(ids[3].clone())
    );

    let mut numbers = vec![a, b, c, d];
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 4, "numbers must be distinct: {numbers:?}");
    for suffix in ["-001", "-002", "-003", "-004"] {
        assert!(
            numbers.iter().any(|n| n.ends_with(suffix)),
            "missing {suffix} in {numbers:?}"
        );
    }
}

#[tokio::test]
async fn sending_an_empty_quote_is_rejected() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote = app.create_quote(json!([])).await;
    let quote_id = quote["quote_id"].as_str().unwrap();

    let response = app
        .client
        .post(format!("{}/quotes/{}/send", app.address, quote_id))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn sending_twice_is_an_illegal_transition() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote = app
        .create_quote(json!([
            {"description": "A", "quantity": "1", "unit_price": "10", "tax_rate": "0"}
        ]))
        .await;
    let quote_id = quote["quote_id"].as_str().unwrap();
    let sent = app.send_quote(quote_id).await;
    let number = sent["number"].as_str().unwrap().to_string();

    let response = app
        .client
        .post(format!("{}/quotes/{}/send", app.address, quote_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // The number did not change.
    let fetched: serde_json::Value = app
        .client
        .get(format!("{}/quotes/{}", app.address, quote_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["number"].as_str().unwrap(), number);
}

#[tokio::test]
async fn send_dispatches_a_notification_with_the_public_link() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote = app
        .create_quote(json!([
            {"description": "A", "quantity": "1", "unit_price": "10", "tax_rate": "0"}
        ]))
        .await;
    app.send_quote(quote["quote_id"].as_str().unwrap()).await;

    let messages = app.dispatcher.messages();
    assert!(messages.iter().any(|m| matches!(
        m,
        common::SentMessage::QuoteNotification { to, .. } if to == "billing@acme.test"
    )));
}

// =============================================================================
// Public access
// =============================================================================

#[tokio::test]
async fn public_token_fetches_the_quote_without_auth() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote = app
        .create_quote(json!([
            {"description": "A", "quantity": "1", "unit_price": "10", "tax_rate": "0"}
        ]))
        .await;
    let token = quote["public_access_token"].as_str().unwrap();

    let response = app
        .client
        .get(format!("{}/public/quotes/{}", app.address, token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let fetched: serde_json::Value = response.json().await.unwrap();
    assert_eq!(fetched["quote_id"], quote["quote_id"]);

    let response = app
        .client
        .get(format!("{}/public/quotes/{}", app.address, "deadbeef"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

// =============================================================================
// Metrics
// =============================================================================

#[tokio::test]
async fn metrics_expose_engine_and_http_series() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    app.create_quote(json!([
        {"description": "A", "quantity": "1", "unit_price": "10", "tax_rate": "0"}
    ]))
    .await;

    let body = app
        .client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("quoting_quotes_total"), "missing engine series");
    assert!(body.contains("http_requests_total"), "missing HTTP series");
}

// =============================================================================
// Ad-hoc totals
// =============================================================================

#[tokio::test]
async fn totals_endpoint_computes_without_persisting() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let response = app
        .client
        .post(format!("{}/totals/compute", app.address))
        .json(&json!({
            "items": [
                {"description": "A", "quantity": "1.33", "unit_price": "7.99", "tax_rate": "20"}
            ],
            "discount": "0"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let totals: serde_json::Value = response.json().await.unwrap();
    assert_eq!(totals["subtotal"], "10.63");
    assert_eq!(totals["tax_amount"], "2.13");
    assert_eq!(totals["grand_total"], "12.76");
}

#[tokio::test]
async fn totals_endpoint_clamps_over_discount_to_zero() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let response = app
        .client
        .post(format!("{}/totals/compute", app.address))
        .json(&json!({
            "items": [
                {"description": "A", "quantity": "1", "unit_price": "100", "tax_rate": "20"}
            ],
            "discount": "150"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let totals: serde_json::Value = response.json().await.unwrap();
    assert_eq!(totals["subtotal"], "0");
    assert_eq!(totals["tax_amount"], "0");
    assert_eq!(totals["grand_total"], "0");
}
