// src/api/auth.rs

use axum::http::{HeaderMap, StatusCode};

use crate::api::types::ApiError;
use crate::api::EngineState;

fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .strip_prefix("Bearer ")
        .unwrap_or("")
}

/// Resolve the caller's owner id from the bearer token table.
pub fn authenticate(state: &EngineState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = bearer_token(headers);

    // Compare against every configured token so timing doesn't reveal which
    // prefix matched.
    let mut owner = None;
    for (expected, owner_id) in &state.config.server.tokens {
        if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            owner = Some(owner_id.clone());
        }
    }

    owner.ok_or_else(|| {
        ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Invalid or missing bearer token",
        )
    })
}

/// Verify the reaper scheduler's shared secret.
pub fn check_reaper_secret(state: &EngineState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(ref expected) = state.config.server.reaper_secret else {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Reaper trigger is not configured",
        ));
    };

    if constant_time_eq(bearer_token(headers).as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Invalid reaper credential",
        ))
    }
}

/// Constant-time byte comparison to prevent timing attacks on token auth.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer tok-123".parse().unwrap());
        assert_eq!(bearer_token(&headers), "tok-123");

        let empty = HeaderMap::new();
        assert_eq!(bearer_token(&empty), "");
    }
}
