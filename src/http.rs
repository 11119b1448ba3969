use reqwest::RequestBuilder;
use serde_json::Value;

use crate::error::{AppError, Result};

/// Send a request and return the body of a successful response.
///
/// Transport failures and non-2xx statuses are categorized into `AppError`.
pub async fn send_text(request: RequestBuilder, operation: &str) -> Result<String> {
    let resp = request
        .send()
        .await
        .map_err(|e| AppError::from_transport(&e, operation))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| AppError::from_transport(&e, operation))?;

    if !status.is_success() {
        return Err(AppError::from_status(status.as_u16(), &body, operation));
    }
    Ok(body)
}

/// Like [`send_text`], decoding the body as JSON
pub async fn send_json(request: RequestBuilder, operation: &str) -> Result<Value> {
    let body = send_text(request, operation).await?;
    serde_json::from_str(&body).map_err(|e| AppError::parse(operation, format!("invalid JSON response: {e}")))
}
