//! Middleware for authentication and security headers

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};

use crate::handlers::auth::validate_staff_session;
use crate::handlers::AppState;
use crate::models::StaffUser;
use crate::sync::{self, SyncMode, SYNC_KEY_HEADER};

/// Largest sync request body the key check will buffer
const MAX_SYNC_BODY: usize = 256 * 1024;

fn deny(status: StatusCode, message: &str) -> Response {
    (
        status,
        axum::Json(json!({"success": false, "error": message})),
    )
        .into_response()
}

/// Staff user extracted by middleware, available via Extension<StaffUser>
pub async fn require_staff(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match validate_staff_session(&state.pool, request.headers()).await {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => deny(StatusCode::UNAUTHORIZED, "Session expired or invalid"),
    }
}

/// Like `require_staff`, but only for administrators
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let user: StaffUser = match validate_staff_session(&state.pool, request.headers()).await {
        Some(user) => user,
        None => return deny(StatusCode::UNAUTHORIZED, "Session expired or invalid"),
    };
    if !user.is_admin {
        tracing::warn!(user = %user.username, "Admin route denied");
        return deny(StatusCode::FORBIDDEN, "Administrator access required");
    }
    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Shared-secret check for master sync routes
///
/// The key must be sent in the `X-Sync-Key` header and again as the `key`
/// query parameter (GET) or JSON body field (POST).
pub async fn require_sync_key(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let header_key = request
        .headers()
        .get(SYNC_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (parts, body) = request.into_parts();
    let (param_key, body) = if parts.method == Method::GET {
        let key = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(params)| params.get("key").cloned());
        (key, body)
    } else {
        let bytes = match axum::body::to_bytes(body, MAX_SYNC_BODY).await {
            Ok(bytes) => bytes,
            Err(_) => return deny(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"),
        };
        let key = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|v| v.get("key").and_then(Value::as_str).map(str::to_string));
        (key, Body::from(bytes))
    };

    if !sync::authorize(&state.sync_key, header_key.as_deref(), param_key.as_deref()) {
        tracing::warn!(path = %parts.uri.path(), "Sync request with missing or wrong key");
        return deny(StatusCode::UNAUTHORIZED, "Invalid sync key");
    }

    next.run(Request::from_parts(parts, body)).await
}

/// Whether a request may change appointments, blocks or availability here
///
/// A child site books through its master and stores none of that state, so
/// only reads are served locally.
pub fn allows_local_writes(mode: SyncMode, method: &Method) -> bool {
    mode != SyncMode::Child || matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Refuse booking-state writes on a child site
pub async fn require_local_bookings(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !allows_local_writes(state.sync_mode, request.method()) {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "Booking write refused on child site"
        );
        return deny(StatusCode::FORBIDDEN, "Managed on the master site");
    }
    next.run(request).await
}

/// Security headers middleware
pub async fn security_headers(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    if state.is_production {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::EventBus;
    use axum::{middleware, routing::get, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(mode: SyncMode) -> AppState {
        AppState {
            pool: sqlx::postgres::PgPoolOptions::new()
                .connect_lazy("postgres://localhost/unused")
                .unwrap(),
            is_production: false,
            trusted_proxies: Vec::new(),
            session_expiry_hours: 8,
            debug_errors: false,
            lock_wait: Duration::from_secs(5),
            sync_mode: mode,
            sync_key: String::new(),
            sync_client: None,
            events: EventBus::default(),
        }
    }

    fn app(mode: SyncMode) -> Router {
        let state = state(mode);
        Router::new()
            .route("/blocks", get(|| async { "listed" }).post(|| async { "blocked" }))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                require_local_bookings,
            ))
            .with_state(state)
    }

    async fn status(mode: SyncMode, method: Method) -> StatusCode {
        let request = Request::builder()
            .method(method)
            .uri("/blocks")
            .body(Body::empty())
            .unwrap();
        app(mode).oneshot(request).await.unwrap().status()
    }

    #[test]
    fn test_only_child_sites_refuse_writes() {
        assert!(allows_local_writes(SyncMode::Standalone, &Method::POST));
        assert!(allows_local_writes(SyncMode::Master, &Method::DELETE));
        assert!(allows_local_writes(SyncMode::Child, &Method::GET));
        assert!(!allows_local_writes(SyncMode::Child, &Method::POST));
        assert!(!allows_local_writes(SyncMode::Child, &Method::PUT));
        assert!(!allows_local_writes(SyncMode::Child, &Method::DELETE));
    }

    #[tokio::test]
    async fn test_child_site_write_routes_are_refused() {
        assert_eq!(status(SyncMode::Child, Method::POST).await, StatusCode::FORBIDDEN);
        assert_eq!(status(SyncMode::Child, Method::GET).await, StatusCode::OK);
        assert_eq!(status(SyncMode::Standalone, Method::POST).await, StatusCode::OK);
    }
}
