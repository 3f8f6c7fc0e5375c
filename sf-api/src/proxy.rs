//! Cross-node request proxying (§4.4 "Redirection policy", §9 Design Notes).
//!
//! Proxying is treated as its own operation, not a side effect bolted onto a
//! handler: given a target base URL and the inbound request, reconstruct
//! method, path, body and `Authorization`, forward it, and stream the
//! response back unchanged. No retries - the API is not idempotent.

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use sf_core::error::{Error, Result};

pub async fn forward(
    client: &reqwest::Client,
    target_url: &str,
    method: Method,
    headers: &HeaderMap,
    body: Vec<u8>,
) -> Result<Response> {
    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| Error::Internal(format!("invalid proxied method: {e}")))?;

    let mut request = client.request(reqwest_method, target_url);
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        request = request.header(axum::http::header::AUTHORIZATION, auth.clone());
    }
    if let Some(content_type) = headers.get(axum::http::header::CONTENT_TYPE) {
        request = request.header(axum::http::header::CONTENT_TYPE, content_type.clone());
    }
    request = request.body(body);

    let upstream = request
        .send()
        .await
        .map_err(|e| Error::Internal(format!("proxying to {target_url}: {e}")))?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .cloned();
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| Error::Internal(format!("reading proxied response from {target_url}: {e}")))?;

    let mut response = (status, Body::from(bytes)).into_response();
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(axum::http::header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}
