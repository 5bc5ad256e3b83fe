/// Integration tests for login, sessions and account management
mod common;

use axum::http::StatusCode;
use common::{bearer, bet_body, money, msisdn_of, TestContext, PLAYER};
use serde_json::{json, Value};

#[tokio::test]
async fn test_code_is_single_use() {
    let ctx = TestContext::new(2).await;
    ctx.server
        .post("/api/auth/otp")
        .json(&json!({ "msisdn": PLAYER }))
        .await
        .assert_status_ok();
    let code = ctx.issued_code(PLAYER).await;

    let first = ctx
        .server
        .post("/api/auth/verify")
        .json(&json!({ "msisdn": PLAYER, "otp": code }))
        .await;
    first.assert_status_ok();
    let body: Value = first.json();
    assert_eq!(body["StatusMessage"], "Verified");
    assert!(body["ExpireIn"].as_i64().unwrap() > 0);

    let second = ctx
        .server
        .post("/api/auth/verify")
        .json(&json!({ "msisdn": PLAYER, "otp": code }))
        .await;
    assert_eq!(second.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(second.json::<Value>()["StatusMessage"], "No OTP has been requested");
}

#[tokio::test]
async fn test_wrong_code_keeps_the_issued_one() {
    let ctx = TestContext::new(2).await;
    ctx.server
        .post("/api/auth/otp")
        .json(&json!({ "msisdn": PLAYER }))
        .await
        .assert_status_ok();
    let code = ctx.issued_code(PLAYER).await;
    let wrong = if code == "0000" { "1111" } else { "0000" };

    let response = ctx
        .server
        .post("/api/auth/verify")
        .json(&json!({ "msisdn": PLAYER, "otp": wrong }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["StatusMessage"], "Invalid OTP");

    ctx.server
        .post("/api/auth/verify")
        .json(&json!({ "msisdn": PLAYER, "otp": code }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_code_is_texted_to_the_number() {
    let ctx = TestContext::new(2).await;
    ctx.login(PLAYER).await;

    let sms = ctx.gateway.sms.lock().unwrap().clone();
    assert_eq!(sms.len(), 1);
    assert_eq!(sms[0].0, msisdn_of(PLAYER));
}

#[tokio::test]
async fn test_malformed_number_is_rejected() {
    let ctx = TestContext::new(2).await;

    let response = ctx
        .server
        .post("/api/auth/otp")
        .json(&json!({ "msisdn": "2547000abc1" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["Status"], 400);
}

#[tokio::test]
async fn test_self_exclusion_blocks_bets() {
    let ctx = TestContext::new(4).await;
    let token = ctx.login(PLAYER).await;
    ctx.fund(&token, 100).await;

    let response = ctx
        .server
        .post("/api/account/self-exclusion")
        .add_header(bearer(&token).0, bearer(&token).1)
        .json(&json!({ "days": 30 }))
        .await;
    response.assert_status_ok();
    let message = response.json::<Value>()["StatusMessage"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(message.starts_with("Self-exclusion active until "));

    let response = ctx
        .server
        .post("/api/bets")
        .add_header(bearer(&token).0, bearer(&token).1)
        .json(&bet_body(50, 4))
        .await;

    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["StatusCode"], 1);
    assert!(body["StatusMessage"]
        .as_str()
        .unwrap()
        .starts_with("Account is self-excluded until"));
    assert_eq!(ctx.balance(PLAYER).await, money(100));
    assert_eq!(ctx.bet_count(PLAYER).await, 0);
}

#[tokio::test]
async fn test_self_exclusion_cannot_be_shortened() {
    let ctx = TestContext::new(4).await;
    let token = ctx.login(PLAYER).await;
    ctx.fund(&token, 100).await;
    let exclude = |days: u32| {
        ctx.server
            .post("/api/account/self-exclusion")
            .add_header(bearer(&token).0, bearer(&token).1)
            .json(&json!({ "days": days }))
    };

    exclude(30).await.assert_status_ok();
    let response = exclude(1).await;
    response.assert_status_ok();

    let month_out = (chrono::Utc::now() + chrono::Duration::days(30)).format("%Y-%m-%d");
    assert_eq!(
        response.json::<Value>()["StatusMessage"],
        format!("Self-exclusion active until {}", month_out)
    );
    let account = ctx
        .state
        .stores
        .accounts
        .find_account(&msisdn_of(PLAYER))
        .await
        .unwrap()
        .unwrap();
    let until = account.self_exclusion_until.unwrap();
    assert!(until > chrono::Utc::now() + chrono::Duration::days(29));
}

#[tokio::test]
async fn test_account_summary_lists_recent_bets() {
    let ctx = TestContext::new(2).await;
    let token = ctx.login(PLAYER).await;
    ctx.fund(&token, 100).await;
    ctx.server
        .post("/api/bets")
        .add_header(bearer(&token).0, bearer(&token).1)
        .json(&bet_body(50, 4))
        .await
        .assert_status_ok();

    let response = ctx
        .server
        .get("/api/account")
        .add_header(bearer(&token).0, bearer(&token).1)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["account"]["balance"], 50);
    assert_eq!(body["recent_bets"].as_array().unwrap().len(), 1);
    assert!(body["degraded"].as_array().unwrap().is_empty());
}

/// Fund the player and lose it all on one bet, leaving an empty account
async fn emptied_account(ctx: &TestContext, token: &str) {
    ctx.fund(token, 50).await;
    ctx.server
        .post("/api/bets")
        .add_header(bearer(token).0, bearer(token).1)
        .json(&bet_body(50, 4))
        .await
        .assert_status_ok();
    assert!(ctx.balance(PLAYER).await.is_zero());
}

#[tokio::test]
async fn test_account_deletion_needs_confirmation() {
    let ctx = TestContext::new(2).await;
    let token = ctx.login(PLAYER).await;
    emptied_account(&ctx, &token).await;

    ctx.server
        .post("/api/account/delete")
        .add_header(bearer(&token).0, bearer(&token).1)
        .await
        .assert_status_ok();
    let code = ctx.issued_code(PLAYER).await;

    let response = ctx
        .server
        .post("/api/account/delete/confirm")
        .add_header(bearer(&token).0, bearer(&token).1)
        .json(&json!({ "otp": code }))
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["StatusMessage"], "Account deleted");
    assert!(ctx
        .state
        .stores
        .accounts
        .find_account(&msisdn_of(PLAYER))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_deletion_of_unknown_account() {
    let ctx = TestContext::new(2).await;
    let token = ctx.login(PLAYER).await;

    let response = ctx
        .server
        .post("/api/account/delete")
        .add_header(bearer(&token).0, bearer(&token).1)
        .await;

    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    assert_eq!(response.json::<Value>()["StatusMessage"], "Account not found");
}

#[tokio::test]
async fn test_deletion_refused_while_money_is_held() {
    let ctx = TestContext::new(2).await;
    let token = ctx.login(PLAYER).await;
    ctx.fund(&token, 10).await;

    let response = ctx
        .server
        .post("/api/account/delete")
        .add_header(bearer(&token).0, bearer(&token).1)
        .await;

    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    assert_eq!(
        response.json::<Value>()["StatusMessage"],
        "Account still holds a balance"
    );

    // A pending withdrawal holds the money outside the balance
    ctx.server
        .post("/api/withdrawals")
        .add_header(bearer(&token).0, bearer(&token).1)
        .json(&json!({ "amount": 10, "channel": "app" }))
        .await
        .assert_status_ok();
    assert!(ctx.balance(PLAYER).await.is_zero());
    ctx.server
        .post("/api/account/delete")
        .add_header(bearer(&token).0, bearer(&token).1)
        .await
        .assert_status_ok();
    let code = ctx.issued_code(PLAYER).await;

    let response = ctx
        .server
        .post("/api/account/delete/confirm")
        .add_header(bearer(&token).0, bearer(&token).1)
        .json(&json!({ "otp": code }))
        .await;

    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    assert_eq!(
        response.json::<Value>()["StatusMessage"],
        "A withdrawal is still pending"
    );
    assert!(ctx
        .state
        .stores
        .accounts
        .find_account(&msisdn_of(PLAYER))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_deleted_account_session_is_revoked() {
    let ctx = TestContext::new(2).await;
    let token = ctx.login(PLAYER).await;
    emptied_account(&ctx, &token).await;

    ctx.server
        .post("/api/account/delete")
        .add_header(bearer(&token).0, bearer(&token).1)
        .await
        .assert_status_ok();
    let code = ctx.issued_code(PLAYER).await;
    ctx.server
        .post("/api/account/delete/confirm")
        .add_header(bearer(&token).0, bearer(&token).1)
        .json(&json!({ "otp": code }))
        .await
        .assert_status_ok();

    let response = ctx
        .server
        .get("/api/account")
        .add_header(bearer(&token).0, bearer(&token).1)
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}
