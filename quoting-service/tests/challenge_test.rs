mod common;

use chrono::Duration;
use common::TestApp;
use serde_json::json;

async fn sent_quote(app: &TestApp) -> String {
    let quote = app
        .create_quote(json!([
            {"description": "Design", "quantity": "1", "unit_price": "100", "tax_rate": "20"}
        ]))
        .await;
    let quote_id = quote["quote_id"].as_str().unwrap().to_string();
    app.send_quote(&quote_id).await;
    quote_id
}

async fn issue_challenge(app: &TestApp, quote_id: &str) -> serde_json::Value {
    let response = app
        .client
        .post(format!("{}/quotes/{}/challenge", app.address, quote_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    response.json().await.unwrap()
}

async fn verify(app: &TestApp, token: &str, code: &str) -> reqwest::Response {
    app.client
        .post(format!("{}/challenges/verify", app.address))
        .json(&json!({"token": token, "code": code}))
        .send()
        .await
        .unwrap()
}

// =============================================================================
// Issuing
// =============================================================================

#[tokio::test]
async fn challenge_requires_a_sent_quote() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote = app
        .create_quote(json!([
            {"description": "A", "quantity": "1", "unit_price": "10", "tax_rate": "0"}
        ]))
        .await;

    let response = app
        .client
        .post(format!(
            "{}/quotes/{}/challenge",
            app.address,
            quote["quote_id"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn the_code_travels_only_through_the_dispatcher() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote_id = sent_quote(&app).await;
    let challenge = issue_challenge(&app, &quote_id).await;

    assert!(challenge["token"].is_string());
    assert!(challenge.get("code").is_none(), "the response must not carry the code");

    let code = app.dispatcher.last_code().expect("No code dispatched");
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn reissuing_supersedes_the_previous_challenge() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote_id = sent_quote(&app).await;
    let first = issue_challenge(&app, &quote_id).await;
    let first_code = app.dispatcher.last_code().unwrap();

    let _second = issue_challenge(&app, &quote_id).await;

    // The first token is dead even with its correct code.
    let response = verify(&app, first["token"].as_str().unwrap(), &first_code).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn delivery_failure_does_not_undo_the_issued_challenge() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote_id = sent_quote(&app).await;
    app.dispatcher.set_fail_sends(true);

    // The challenge commits before delivery; a down relay must not turn a
    // usable challenge into an error.
    let challenge = issue_challenge(&app, &quote_id).await;
    assert!(challenge["token"].is_string());

    app.dispatcher.set_fail_sends(false);

    let code = app.dispatcher.last_code().expect("No code dispatched");
    let response = verify(&app, challenge["token"].as_str().unwrap(), &code).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["verified"], true);
}

// =============================================================================
// Verification
// =============================================================================

#[tokio::test]
async fn correct_code_accepts_the_quote() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote_id = sent_quote(&app).await;
    let challenge = issue_challenge(&app, &quote_id).await;
    let code = app.dispatcher.last_code().unwrap();

    let response = verify(&app, challenge["token"].as_str().unwrap(), &code).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["verified"], true);
    assert_eq!(body["quote"]["status"], "accepted");

    let fetched: serde_json::Value = app
        .client
        .get(format!("{}/quotes/{}", app.address, quote_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["status"], "accepted");
    assert!(!fetched["accepted_utc"].is_null());
}

#[tokio::test]
async fn wrong_code_is_a_result_not_an_error() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote_id = sent_quote(&app).await;
    let challenge = issue_challenge(&app, &quote_id).await;
    let real_code = app.dispatcher.last_code().unwrap();
    let wrong_code = if real_code == "000000" { "000001" } else { "000000" };
    let token = challenge["token"].as_str().unwrap();

    let response = verify(&app, token, wrong_code).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["verified"], false);
    assert_eq!(body["attempts_remaining"], 4);

    // The quote did not move.
    let fetched: serde_json::Value = app
        .client
        .get(format!("{}/quotes/{}", app.address, quote_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["status"], "sent");

    // The right code still works afterwards.
    let response = verify(&app, token, &real_code).await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["verified"], true);
}

#[tokio::test]
async fn attempts_exhaust_after_five_failures() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote_id = sent_quote(&app).await;
    let challenge = issue_challenge(&app, &quote_id).await;
    let real_code = app.dispatcher.last_code().unwrap();
    let wrong_code = if real_code == "000000" { "000001" } else { "000000" };
    let token = challenge["token"].as_str().unwrap();

    for expected_remaining in (0..5).rev() {
        let response = verify(&app, token, wrong_code).await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["verified"], false);
        assert_eq!(body["attempts_remaining"], expected_remaining);
    }

    // Even the correct code is rejected once the budget is spent.
    let response = verify(&app, token, &real_code).await;
    assert_eq!(response.status(), 429);
}

#[tokio::test]
async fn expiry_beats_the_correct_code() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let quote_id = sent_quote(&app).await;
    let challenge = issue_challenge(&app, &quote_id).await;
    let code = app.dispatcher.last_code().unwrap();

    app.clock.advance(Duration::minutes(16));

    let response = verify(&app, challenge["token"].as_str().unwrap(), &code).await;
    assert_eq!(response.status(), 410);

    let fetched: serde_json::Value = app
        .client
        .get(format!("{}/quotes/{}", app.address, quote_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["status"], "sent");
}

#[tokio::test]
async fn concurrent_reissue_and_verify_never_error() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    // Reissue locks the quote then its challenges; verify takes its locks in
    // the same order, so racing the two must resolve without a deadlock
    // surfacing as a server error.
    for _ in 0..5 {
        let quote_id = sent_quote(&app).await;
        let challenge = issue_challenge(&app, &quote_id).await;
        let code = app.dispatcher.last_code().unwrap();
        let token = challenge["token"].as_str().unwrap().to_string();

        let reissue = async {
            app.client
                .post(format!("{}/quotes/{}/challenge", app.address, quote_id))
                .send()
                .await
                .unwrap()
        };
        let verification = verify(&app, &token, &code);

        let (reissued, verified) = tokio::join!(reissue, verification);
        assert!(
            !reissued.status().is_server_error(),
            "reissue returned {}",
            reissued.status()
        );
        assert!(
            !verified.status().is_server_error(),
            "verify returned {}",
            verified.status()
        );
    }
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let response = verify(&app, &"ab".repeat(16), "123456").await;
    assert_eq!(response.status(), 404);
}
