use axum::http::HeaderMap;

/// Header GitLab uses to carry the webhook secret token
pub const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

/// Checks the `X-Gitlab-Token` header against the configured secret.
///
/// The comparison is an exact, case-sensitive match. It is not constant-time;
/// swap in a constant-time comparison here if timing attacks become a concern.
pub fn verify_gitlab_token(secret: &str, headers: &HeaderMap) -> bool {
    if secret.is_empty() {
        return false;
    }
    headers
        .get(GITLAB_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|token| token == secret)
        .unwrap_or(false)
}

/// Host part of the `Host` header, for log lines
pub fn request_host(headers: &HeaderMap) -> &str {
    headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.split(':').next())
        .unwrap_or("-")
}
