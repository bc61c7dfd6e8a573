//! Authentication middleware for the server
//!
//! Validates Bearer tokens on all API and WebSocket requests.

use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower::Layer;

/// Authentication layer that validates Bearer tokens
#[derive(Clone)]
pub struct AuthLayer {
    token: Arc<String>,
}

impl AuthLayer {
    pub fn new(token: String) -> Self {
        Self {
            token: Arc::new(token),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            token: self.token.clone(),
        }
    }
}

/// The actual middleware service
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    token: Arc<String>,
}

impl<S> tower::Service<Request> for AuthMiddleware<S>
where
    S: tower::Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let token = self.token.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // CORS preflight never carries credentials
            if req.method() == Method::OPTIONS {
                return inner.call(req).await;
            }

            if is_authorized(&req, &token) {
                return inner.call(req).await;
            }

            Ok((
                StatusCode::UNAUTHORIZED,
                "Unauthorized: Invalid or missing Bearer token",
            )
                .into_response())
        })
    }
}

/// Only API and WebSocket endpoints require auth. Browsers cannot set headers
/// on WebSocket upgrades, so `/ws/` also accepts a `token` query parameter.
fn is_authorized(req: &Request, token: &str) -> bool {
    let path = req.uri().path();
    let requires_auth = path.starts_with("/api/") || path.starts_with("/ws/");
    if !requires_auth {
        return true;
    }

    if path.starts_with("/ws/") {
        let query_token = req.uri().query().and_then(|query| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "token")
                .map(|(_, value)| value)
        });
        if query_token == Some(token) {
            return true;
        }
    }

    req.headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|provided| provided == token)
        .unwrap_or(false)
}

/// Generate a random auth token (16 bytes, hex encoded)
pub fn generate_auth_token() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
