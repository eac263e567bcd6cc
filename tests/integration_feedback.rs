mod common;

use std::time::Duration;

use common::{test_relay, MockService, TestApp};
use shove::core::feedback::{FeedbackReason, FeedbackStore};
use shove::core::service::SquashConfig;

#[tokio::test]
async fn invalid_token_reported_during_push_is_retrievable() {
    let relay = test_relay();
    let service = MockService::new("apns").with_invalid_token("T");
    relay
        .registry
        .add_service(service, 1, SquashConfig::default())
        .await
        .unwrap();

    let before = time::OffsetDateTime::now_utc().unix_timestamp();
    relay.registry.push("apns", br#"{"id":1}"#).await.unwrap();

    let mut seen = 0;
    for _ in 0..250 {
        seen = relay.store.len().await.unwrap();
        if seen == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(seen, 1, "feedback record never appeared");

    let entries = relay.store.peek(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.service, "apns");
    assert_eq!(entry.token, "T");
    assert_eq!(entry.reason, FeedbackReason::Invalid);
    assert!(entry.replacement.is_none());
    let after = time::OffsetDateTime::now_utc().unix_timestamp();
    assert!(entry.timestamp >= before - 2 && entry.timestamp <= after + 2);
}

#[tokio::test]
async fn feedback_drains_over_the_api() {
    let app = TestApp::spawn().await;
    let service = MockService::new("fcm").with_invalid_token("X");
    app.registry
        .add_service(service, 1, SquashConfig::default())
        .await
        .unwrap();

    let response = app.push("fcm", br#"{"id":1}"#).await;
    assert_eq!(response.status(), 202);

    // Wait for the async delivery to surface the feedback record.
    let mut total = 0;
    for _ in 0..100 {
        let peek: serde_json::Value = app
            .client
            .get(app.url("/api/feedback/peek"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        total = peek["total"].as_u64().unwrap();
        if total == 1 {
            let entry = &peek["feedback"][0];
            assert_eq!(entry["service"], "fcm");
            assert_eq!(entry["token"], "X");
            assert_eq!(entry["reason"], "invalid");
            assert!(entry["timestamp"].is_i64());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(total, 1, "feedback record never appeared");

    // Pop drains the same record.
    let drained: serde_json::Value = app
        .client
        .post(app.url("/api/feedback"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(drained["feedback"][0]["token"], "X");

    let peek: serde_json::Value = app
        .client
        .get(app.url("/api/feedback/peek"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(peek["total"], 0);
}

#[tokio::test]
async fn feedback_pop_returns_oldest_first_and_respects_limit() {
    let app = TestApp::spawn().await;

    for token in ["first", "second", "third"] {
        app.store
            .push(shove::core::feedback::TokenFeedback {
                service: "webhook".to_string(),
                token: token.to_string(),
                replacement: None,
                reason: FeedbackReason::Invalid,
                timestamp: 0,
            })
            .await
            .unwrap();
    }

    let drained: serde_json::Value = app
        .client
        .post(app.url("/api/feedback?limit=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let feedback = drained["feedback"].as_array().unwrap();
    assert_eq!(feedback.len(), 2);
    assert_eq!(feedback[0]["token"], "first");
    assert_eq!(feedback[1]["token"], "second");

    let peek: serde_json::Value = app
        .client
        .get(app.url("/api/feedback/peek"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(peek["total"], 1);
    assert_eq!(peek["feedback"][0]["token"], "third");
}

#[tokio::test]
async fn peek_is_non_destructive() {
    let app = TestApp::spawn().await;
    app.store
        .push(shove::core::feedback::TokenFeedback {
            service: "webhook".to_string(),
            token: "t".to_string(),
            replacement: None,
            reason: FeedbackReason::Replaced,
            timestamp: 0,
        })
        .await
        .unwrap();

    for _ in 0..3 {
        let peek: serde_json::Value = app
            .client
            .get(app.url("/api/feedback/peek"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(peek["total"], 1);
    }
    assert_eq!(app.store.len().await.unwrap(), 1);
}

#[tokio::test]
async fn feedback_rejects_wrong_methods() {
    let app = TestApp::spawn().await;

    // Pop is POST-only, peek is GET-only.
    let response = app
        .client
        .get(app.url("/api/feedback"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);

    let response = app
        .client
        .post(app.url("/api/feedback/peek"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
}
