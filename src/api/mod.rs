//! API layer - HTTP handlers and routing
//!
//! Everything lives under `/api/v1`:
//! - public archive, taxonomy lists, auth and feedback
//! - signed-in uploads and own submissions
//! - the moderation queue (moderators and admins)
//! - admin management
//!
//! Stored images are served statically under the storage public prefix.

pub mod admin;
pub mod auth;
pub mod common;
pub mod feedback;
pub mod health;
pub mod middleware;
pub mod moderation;
pub mod questions;
pub mod responses;
pub mod taxonomy;
pub mod upload;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub use middleware::{ApiError, AppState, AuthenticatedUser};

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router().merge(taxonomy::admin_router()))
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Moderation routes (moderator or admin)
    let moderation_routes = Router::new()
        .nest("/moderation", moderation::router())
        .route_layer(axum_middleware::from_fn(middleware::require_moderator))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (any signed-in user)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest(
            "/questions",
            questions::protected_router()
                .merge(upload::router(state.storage_config.max_file_size)),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .route("/health", get(health::health))
        .route("/feedback", post(feedback::submit_feedback))
        .nest("/auth", auth::public_router())
        .nest("/questions", questions::public_router())
        .merge(taxonomy::public_router())
        .merge(admin_routes)
        .merge(moderation_routes)
        .merge(protected_routes)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE]);

    if origin.trim() == "*" {
        return cors.allow_origin(Any);
    }
    match origin.parse::<HeaderValue>() {
        // cookies need an explicit origin
        Ok(origin) => cors.allow_origin(origin).allow_credentials(true),
        Err(_) => {
            tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
            cors
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    let storage = state.storage_config.clone();
    let mut router = Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .fallback(|| async { ApiError::not_found("Not found") });

    let prefix = storage.public_prefix.trim_end_matches('/');
    if prefix.starts_with('/') && prefix.len() > 1 {
        router = router.nest_service(prefix, ServeDir::new(&storage.path));
    } else {
        tracing::warn!(
            "storage.public_prefix {:?} is not a sub-path, stored files are not served",
            storage.public_prefix
        );
    }

    router
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::cache::create_test_cache;
    use crate::config::Config;
    use crate::db::{create_test_pool, migrations};
    use crate::services::email::testing::RecordingMailer;
    use crate::services::LocalObjectStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderMap, Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub const BOUNDARY: &str = "examvault-test-boundary";

    pub struct TestApp {
        pub router: Router,
        pub mailer: Arc<RecordingMailer>,
        pub dir: tempfile::TempDir,
    }

    pub async fn test_app(mail_configured: bool) -> TestApp {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.storage.path = dir.path().to_path_buf();
        config.archive.max_bulk_items = 10;

        let mailer = RecordingMailer::new(mail_configured);
        let state = AppState::new(
            pool,
            create_test_cache(),
            LocalObjectStore::from_config(&config.storage).boxed(),
            mailer.clone(),
            &config,
        );
        TestApp {
            router: build_router(state, "*"),
            mailer,
            dir,
        }
    }

    pub struct TestResponse {
        pub status: StatusCode,
        pub headers: HeaderMap,
        pub body: Vec<u8>,
    }

    impl TestResponse {
        pub fn json(&self) -> Value {
            serde_json::from_slice(&self.body).unwrap_or(Value::Null)
        }
    }

    impl TestApp {
        pub async fn send(&self, request: Request<Body>) -> TestResponse {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
            TestResponse {
                status,
                headers,
                body,
            }
        }

        pub async fn call(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> TestResponse {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("authorization", format!("Bearer {}", token));
            }
            let request = match body {
                Some(json) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string())),
                None => builder.body(Body::empty()),
            };
            self.send(request.unwrap()).await
        }

        /// Register and return the session token
        pub async fn register(&self, email: &str) -> String {
            let res = self
                .call(
                    "POST",
                    "/api/v1/auth/register",
                    None,
                    Some(serde_json::json!({"email": email, "password": "secret-pass"})),
                )
                .await;
            assert_eq!(res.status, StatusCode::CREATED, "{:?}", res.json());
            res.json()["token"].as_str().unwrap().to_string()
        }

        pub async fn upload(
            &self,
            token: &str,
            fields: &[(&str, String)],
            file: Option<(&str, &[u8])>,
        ) -> TestResponse {
            let request = Request::builder()
                .method("POST")
                .uri("/api/v1/questions/upload")
                .header("authorization", format!("Bearer {}", token))
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(multipart_body(fields, file)))
                .unwrap();
            self.send(request).await
        }
    }

    pub fn multipart_body(fields: &[(&str, String)], file: Option<(&str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((content_type, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"paper\"\r\nContent-Type: {}\r\n\r\n",
                    BOUNDARY, content_type
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }
}
