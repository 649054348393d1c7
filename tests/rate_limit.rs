//! Rate-limit behavior through the full dispatcher pipeline.
mod common;

use std::sync::Arc;

use http::{StatusCode, header};

use common::{OkClient, authed_get, entry, handler_with, routes};

#[tokio::test]
async fn test_third_request_is_limited_with_retry_after() {
    let mut svc = entry("limited", "http://upstream:9000");
    svc.prefix = Some("/limited".to_string());
    svc.rate_limit.requests_per_minute = 2;
    let handler = handler_with(Arc::new(OkClient), routes(vec![svc])).await;

    let addr = "10.0.0.1:50000".parse().unwrap();
    for _ in 0..2 {
        let resp = handler.handle_request(authed_get("/limited/x"), Some(addr)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = handler.handle_request(authed_get("/limited/x"), Some(addr)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after = resp
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .expect("Retry-After header must be set");
    assert!(retry_after >= 1);
}

#[tokio::test]
async fn test_limits_are_isolated_per_service() {
    let mut s1 = entry("svc1", "http://upstream:9001");
    s1.prefix = Some("/s1".to_string());
    s1.rate_limit.requests_per_minute = 2;
    let mut s2 = entry("svc2", "http://upstream:9002");
    s2.prefix = Some("/s2".to_string());
    s2.rate_limit.requests_per_minute = 3;
    let handler = handler_with(Arc::new(OkClient), routes(vec![s1, s2])).await;

    let addr = "10.0.0.2:50000".parse().unwrap();

    for _ in 0..2 {
        let resp = handler.handle_request(authed_get("/s1/x"), Some(addr)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = handler.handle_request(authed_get("/s1/x"), Some(addr)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));

    // Exhausting svc1 must not consume svc2's budget.
    for _ in 0..3 {
        let resp = handler.handle_request(authed_get("/s2/x"), Some(addr)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = handler.handle_request(authed_get("/s2/x"), Some(addr)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_clients_are_keyed_by_api_key() {
    let mut svc = entry("limited", "http://upstream:9000");
    svc.prefix = Some("/limited".to_string());
    svc.rate_limit.requests_per_minute = 1;
    let handler = handler_with(Arc::new(OkClient), routes(vec![svc])).await;

    let addr = "10.0.0.3:50000".parse().unwrap();
    let with_key = |key: &str| {
        let mut req = authed_get("/limited/x");
        req.headers_mut().insert("X-Api-Key", key.parse().unwrap());
        req
    };

    assert_eq!(
        handler.handle_request(with_key("alpha"), Some(addr)).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        handler.handle_request(with_key("alpha"), Some(addr)).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    // A different key is a different bucket even from the same address.
    assert_eq!(
        handler.handle_request(with_key("beta"), Some(addr)).await.status(),
        StatusCode::OK
    );
}
