//! Opaque-token resolution for the HTTP and WebSocket surfaces.
//!
//! HTTP endpoints accept `Authorization: Bearer` only. WebSocket upgrades
//! come from browsers that cannot always set headers, so the token is
//! also accepted as a query parameter or cookie.

use std::collections::HashMap;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};

use emvox_core::types::{Identity, TaskId};

use crate::errors::AppError;
use crate::infra::app_state::AppState;

/// Extractor for the bearer-protected HTTP endpoints. Rejects with a 401
/// envelope when the token is missing, unknown, or expired.
pub struct RequireAuth(pub Identity);

impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Err(AppError::unauthorized("missing bearer token"));
        };
        match state.sessions.lookup(&token).await {
            Ok(Some(identity)) => Ok(Self(identity)),
            Ok(None) => Err(AppError::unauthorized("invalid or expired token")),
            Err(err) => Err(AppError::from(err)),
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Token lookup chain for WebSocket upgrades: `accessToken` query param,
/// `token` query param, the `Authorization` header, then the
/// `accessToken` / `access_token` cookies. First non-empty hit wins.
pub fn websocket_token(params: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    query_param(params, "accessToken")
        .or_else(|| query_param(params, "token"))
        .or_else(|| bearer_token(headers))
        .or_else(|| cookie_value(headers, "accessToken"))
        .or_else(|| cookie_value(headers, "access_token"))
}

/// Watched task from the upgrade query: `taskId`, with a `task_id`
/// fallback for older clients. `None` covers both missing and
/// non-numeric values.
pub fn websocket_task_id(params: &HashMap<String, String>) -> Option<TaskId> {
    query_param(params, "taskId")
        .or_else(|| query_param(params, "task_id"))
        .and_then(|raw| raw.parse::<i64>().ok())
        .map(TaskId)
}

fn query_param(params: &HashMap<String, String>, name: &str) -> Option<String> {
    params
        .get(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::HeaderValue;

    fn headers_with(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn bearer_header_is_trimmed_and_must_be_non_empty() {
        let headers = headers_with(header::AUTHORIZATION, "Bearer  tok-alice ");
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok-alice"));

        let headers = headers_with(header::AUTHORIZATION, "Bearer ");
        assert_eq!(bearer_token(&headers), None);

        let headers = headers_with(header::AUTHORIZATION, "Basic dXNlcjpwdw==");
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn websocket_token_prefers_the_query_chain() {
        let headers = headers_with(header::AUTHORIZATION, "Bearer tok-header");

        let token = websocket_token(&params(&[("accessToken", "tok-query")]), &headers);
        assert_eq!(token.as_deref(), Some("tok-query"));

        let token = websocket_token(&params(&[("token", "tok-alt")]), &headers);
        assert_eq!(token.as_deref(), Some("tok-alt"));

        let token = websocket_token(&params(&[]), &headers);
        assert_eq!(token.as_deref(), Some("tok-header"));
    }

    #[test]
    fn empty_query_values_fall_through_to_the_next_source() {
        let token = websocket_token(
            &params(&[("accessToken", ""), ("token", "tok-alt")]),
            &HeaderMap::new(),
        );
        assert_eq!(token.as_deref(), Some("tok-alt"));
    }

    #[test]
    fn cookies_are_the_last_resort() {
        let headers = headers_with(header::COOKIE, "theme=dark; accessToken=tok-cookie");
        assert_eq!(
            websocket_token(&params(&[]), &headers).as_deref(),
            Some("tok-cookie")
        );

        let headers = headers_with(header::COOKIE, "access_token=tok-snake");
        assert_eq!(
            websocket_token(&params(&[]), &headers).as_deref(),
            Some("tok-snake")
        );

        assert_eq!(websocket_token(&params(&[]), &HeaderMap::new()), None);
    }

    #[test]
    fn task_id_accepts_both_spellings_and_rejects_garbage() {
        assert_eq!(
            websocket_task_id(&params(&[("taskId", "42")])),
            Some(TaskId(42))
        );
        assert_eq!(
            websocket_task_id(&params(&[("task_id", "7")])),
            Some(TaskId(7))
        );
        assert_eq!(websocket_task_id(&params(&[("taskId", "seven")])), None);
        assert_eq!(websocket_task_id(&params(&[])), None);
    }
}
