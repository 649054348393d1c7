//! The gateway's middleware chain.
//!
//! Middlewares are handler-wrapping functions. [`apply_middleware`] folds the
//! list in reverse, so the written order is the order middlewares run on the
//! way in — and the reverse order on the way out (the access log, listed last,
//! observes the final status). Each middleware is built per request with its
//! service context already bound, which keeps the chain free of shared
//! mutable state.
use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc, time::Instant};

use axum::body::Body;
use futures_util::{FutureExt, future::BoxFuture};
use http::{HeaderValue, Request, Response, StatusCode, header};

use crate::core::{
    auth::JwtAuthenticator,
    rate_limiter::{Decision, ServiceLimiter, extract_client_id, retry_after_secs},
    responses::json_error,
};

pub type BoxHandler = Box<dyn FnOnce(Request<Body>) -> BoxFuture<'static, Response<Body>> + Send>;
pub type Middleware = Box<dyn FnOnce(BoxHandler) -> BoxHandler + Send>;

/// Wrap `handler` so the middlewares execute in the order they are listed.
pub fn apply_middleware(handler: BoxHandler, middlewares: Vec<Middleware>) -> BoxHandler {
    let mut handler = handler;
    for middleware in middlewares.into_iter().rev() {
        handler = middleware(handler);
    }
    handler
}

/// Convert an unhandled panic anywhere downstream into a 500 envelope. The
/// panic payload and a stack snapshot go to the error log, never to the
/// client.
pub fn recover() -> Middleware {
    Box::new(|next| {
        Box::new(move |req| {
            Box::pin(async move {
                match AssertUnwindSafe(next(req)).catch_unwind().await {
                    Ok(response) => response,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        let backtrace = std::backtrace::Backtrace::force_capture();
                        tracing::error!(panic = %message, stack = %backtrace, "panic recovered");
                        json_error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "internal server error",
                            None,
                        )
                    }
                }
            })
        })
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Stamp hardening headers on every response before it leaves the gateway.
pub fn security_headers() -> Middleware {
    Box::new(|next| {
        Box::new(move |req| {
            Box::pin(async move {
                let mut response = next(req).await;
                let headers = response.headers_mut();
                headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
                headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
                headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
                headers.insert(
                    "Cache-Control",
                    HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
                );
                headers.insert(
                    "Cross-Origin-Opener-Policy",
                    HeaderValue::from_static("same-origin"),
                );
                headers.insert(
                    "Cross-Origin-Resource-Policy",
                    HeaderValue::from_static("same-origin"),
                );
                headers.insert(
                    "Content-Security-Policy",
                    HeaderValue::from_static("default-src 'self'"),
                );
                headers.insert(
                    "Referrer-Policy",
                    HeaderValue::from_static("no-referrer-when-downgrade"),
                );
                response
            })
        })
    })
}

/// Require a valid bearer token on everything except `/auth` paths (the login
/// endpoint must stay reachable). A verified `user_id` claim travels upstream
/// as `X-User-ID`. The raw token is never logged.
pub fn auth(authenticator: Arc<JwtAuthenticator>) -> Middleware {
    Box::new(move |next| {
        Box::new(move |mut req| {
            Box::pin(async move {
                if req.uri().path().starts_with("/auth") {
                    return next(req).await;
                }

                let token = req
                    .headers()
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
                    .filter(|v| !v.is_empty());

                let Some(token) = token else {
                    return json_error(StatusCode::UNAUTHORIZED, "missing token", None);
                };

                match authenticator.validate(token) {
                    Ok(claims) => {
                        match HeaderValue::from_str(&claims.user_id) {
                            Ok(value) => {
                                req.headers_mut().insert("X-User-ID", value);
                            }
                            Err(_) => {
                                tracing::warn!("user_id claim is not a valid header value");
                            }
                        }
                        next(req).await
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "token validation failed");
                        json_error(StatusCode::UNAUTHORIZED, "invalid or expired token", None)
                    }
                }
            })
        })
    })
}

/// Enforce the per-client token bucket for one service. Denials carry a
/// `Retry-After` header with the rounded-up wait.
pub fn rate_limit(limiter: Arc<ServiceLimiter>, client_addr: Option<SocketAddr>) -> Middleware {
    Box::new(move |next| {
        Box::new(move |req| {
            Box::pin(async move {
                let client_id = extract_client_id(&req, client_addr);
                match limiter.check(&client_id) {
                    Decision::Allowed => next(req).await,
                    Decision::Limited { retry_after } => {
                        let secs = retry_after_secs(retry_after);
                        let mut response = json_error(
                            StatusCode::TOO_MANY_REQUESTS,
                            "rate limit exceeded",
                            Some(format!("retry after {secs} seconds")),
                        );
                        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                            response.headers_mut().insert(header::RETRY_AFTER, value);
                        }
                        response
                    }
                }
            })
        })
    })
}

/// Emit one structured access record per request after the handler finishes.
/// Severity follows the final status class; field order is stable so the text
/// output stays grep-friendly.
pub fn access_log(service_name: String) -> Middleware {
    Box::new(move |next| {
        Box::new(move |req| {
            Box::pin(async move {
                let start = Instant::now();
                let method = req.method().clone();
                let path = req.uri().path().to_string();
                let request_id = req
                    .headers()
                    .get("X-Request-ID")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let user_agent = req
                    .headers()
                    .get(header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();

                let response = next(req).await;

                let status = response.status().as_u16();
                let latency = start.elapsed();
                match status {
                    100..=399 => tracing::info!(
                        method = %method,
                        path = %path,
                        status_code = status,
                        latency = ?latency,
                        service_target = %service_name,
                        request_id = %request_id,
                        user_agent = %user_agent,
                        "request forwarded successfully"
                    ),
                    400..=499 => tracing::warn!(
                        method = %method,
                        path = %path,
                        status_code = status,
                        latency = ?latency,
                        service_target = %service_name,
                        request_id = %request_id,
                        user_agent = %user_agent,
                        "client error occurred"
                    ),
                    _ => tracing::error!(
                        method = %method,
                        path = %path,
                        status_code = status,
                        latency = ?latency,
                        service_target = %service_name,
                        request_id = %request_id,
                        user_agent = %user_agent,
                        "unexpected server error"
                    ),
                }

                response
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use jsonwebtoken::{EncodingKey, Header, encode, get_current_timestamp};

    use super::*;
    use crate::core::{auth::Claims, rate_limiter::RateLimiterRegistry};

    fn ok_handler() -> BoxHandler {
        Box::new(|_req| Box::pin(async { Response::new(Body::from("downstream")) }))
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn bearer(secret: &str, user_id: &str) -> String {
        let claims = Claims {
            user_id: user_id.to_string(),
            exp: get_current_timestamp() + 3600,
            iat: None,
            iss: None,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn test_written_order_is_execution_order() {
        fn tag(label: &'static str) -> Middleware {
            Box::new(move |next| {
                Box::new(move |req| {
                    Box::pin(async move {
                        let mut response = next(req).await;
                        // Outermost middleware appends last, so the header
                        // reads inner→outer.
                        let trail = response
                            .headers()
                            .get("X-Trail")
                            .and_then(|v| v.to_str().ok())
                            .map(|v| format!("{v},{label}"))
                            .unwrap_or_else(|| label.to_string());
                        response
                            .headers_mut()
                            .insert("X-Trail", HeaderValue::from_str(&trail).unwrap());
                        response
                    })
                })
            })
        }

        let chain = apply_middleware(ok_handler(), vec![tag("outer"), tag("inner")]);
        let response = chain(get("/x")).await;
        assert_eq!(response.headers().get("X-Trail").unwrap(), "inner,outer");
    }

    #[tokio::test]
    async fn test_recover_converts_panic_to_500_envelope() {
        let panicking: BoxHandler = Box::new(|_req| {
            Box::pin(async {
                panic!("boom");
            })
        });
        let chain = apply_middleware(panicking, vec![recover()]);
        let response = chain(get("/x")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["message"], "internal server error");
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let chain = apply_middleware(ok_handler(), vec![security_headers()]);
        let response = chain(get("/x")).await;
        let headers = response.headers();

        assert_eq!(headers.get("X-Frame-Options").unwrap(), "DENY");
        assert_eq!(headers.get("X-Content-Type-Options").unwrap(), "nosniff");
        assert_eq!(headers.get("X-XSS-Protection").unwrap(), "1; mode=block");
        assert_eq!(
            headers.get("Cache-Control").unwrap(),
            "no-store, no-cache, must-revalidate, private"
        );
        assert_eq!(headers.get("Cross-Origin-Opener-Policy").unwrap(), "same-origin");
        assert_eq!(headers.get("Cross-Origin-Resource-Policy").unwrap(), "same-origin");
        assert_eq!(
            headers.get("Content-Security-Policy").unwrap(),
            "default-src 'self'"
        );
        assert_eq!(
            headers.get("Referrer-Policy").unwrap(),
            "no-referrer-when-downgrade"
        );
    }

    #[tokio::test]
    async fn test_auth_missing_token() {
        let authenticator = Arc::new(JwtAuthenticator::new("secret"));
        let chain = apply_middleware(ok_handler(), vec![auth(authenticator)]);
        let response = chain(get("/user/profile")).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["message"], "missing token");
    }

    #[tokio::test]
    async fn test_auth_invalid_token() {
        let authenticator = Arc::new(JwtAuthenticator::new("secret"));
        let chain = apply_middleware(ok_handler(), vec![auth(authenticator)]);
        let req = Request::builder()
            .uri("/user/profile")
            .header(header::AUTHORIZATION, "Bearer garbage")
            .body(Body::empty())
            .unwrap();
        let response = chain(req).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["message"], "invalid or expired token");
    }

    #[tokio::test]
    async fn test_auth_attaches_user_id() {
        let authenticator = Arc::new(JwtAuthenticator::new("secret"));
        let capture: BoxHandler = Box::new(|req| {
            Box::pin(async move {
                let user = req
                    .headers()
                    .get("X-User-ID")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none")
                    .to_string();
                Response::new(Body::from(user))
            })
        });
        let chain = apply_middleware(capture, vec![auth(authenticator)]);
        let req = Request::builder()
            .uri("/user/profile")
            .header(header::AUTHORIZATION, bearer("secret", "user-7"))
            .body(Body::empty())
            .unwrap();
        let response = chain(req).await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"user-7");
    }

    #[tokio::test]
    async fn test_auth_bypasses_auth_paths() {
        let authenticator = Arc::new(JwtAuthenticator::new("secret"));
        let chain = apply_middleware(ok_handler(), vec![auth(authenticator)]);
        let response = chain(get("/auth/login")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rate_limit_denial_sets_retry_after() {
        let registry = RateLimiterRegistry::new();
        let limiter = registry.for_service("svc", 1);

        let chain = apply_middleware(ok_handler(), vec![rate_limit(limiter.clone(), None)]);
        assert_eq!(chain(get("/svc/x")).await.status(), StatusCode::OK);

        let chain = apply_middleware(ok_handler(), vec![rate_limit(limiter, None)]);
        let response = chain(get("/svc/x")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .expect("Retry-After must be set");
        assert!(retry_after >= 1);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["message"], "rate limit exceeded");
    }

    #[tokio::test]
    async fn test_access_log_passes_response_through() {
        let chain = apply_middleware(ok_handler(), vec![access_log("svc".to_string())]);
        let response = chain(get("/svc/x")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
