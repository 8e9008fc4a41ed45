//! `POST /api/function/call`: forward a JSON payload to the cloud function.

use crate::{
    errors::AppError,
    models::envelope::{Envelope, ResultBody},
    state::AppState,
};
use axum::{Json, body::Bytes, extract::State};
use serde_json::{Value, json};

/// An empty body is treated as `{}`; anything else must be valid JSON.
pub async fn call_function(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Envelope<ResultBody>>, AppError> {
    let payload = parse_payload(&body)?;
    let result = state.functions.call_function(&payload).await?;
    Ok(Json(Envelope::ok(ResultBody { result })))
}

fn parse_payload(body: &[u8]) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body)
        .map_err(|err| AppError::bad_request(format!("Invalid JSON body: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_body_is_an_empty_object() {
        assert_eq!(parse_payload(b"").unwrap(), json!({}));
        assert_eq!(parse_payload(b" \n").unwrap(), json!({}));
    }

    #[test]
    fn any_json_value_is_forwarded() {
        assert_eq!(parse_payload(br#"{"x":1}"#).unwrap(), json!({"x": 1}));
        assert_eq!(parse_payload(b"[1,2]").unwrap(), json!([1, 2]));
    }

    #[test]
    fn malformed_json_is_a_bad_request() {
        let err = parse_payload(b"{x:").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }
}
