//! Security headers applied to every HTTP response.

use crate::config::Environment;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

const CSP_PRODUCTION: &str = "default-src 'self'; \
     script-src 'self'; \
     style-src 'self'; \
     connect-src 'self' wss:; \
     img-src 'self' data:; \
     frame-ancestors 'none'";

// Development keeps 'unsafe-inline' so live-reload tooling works.
const CSP_DEVELOPMENT: &str = "default-src 'self'; \
     script-src 'self' 'unsafe-inline'; \
     style-src 'self' 'unsafe-inline'; \
     connect-src 'self' wss: ws:; \
     img-src 'self' data:; \
     frame-ancestors 'none'";

pub fn csp_for(environment: Environment) -> &'static str {
    match environment {
        Environment::Production => CSP_PRODUCTION,
        Environment::Development => CSP_DEVELOPMENT,
    }
}

pub async fn security_headers(
    State(environment): State<Environment>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(csp_for(environment)),
    );
    response
}
