//! `{result, error}` JSON envelope and the `.json`/`.pretty` suffix
//! convention every route answers to. The suffix is stripped from the
//! path before axum's router ever sees it; the chosen format rides in
//! request extensions for the handler (or its error path) to read back.

use axum::{
    extract::Request,
    http::{header, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use conductor_core::ConductorError;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, Default)]
pub enum ResponseFormat {
    #[default]
    Compact,
    Pretty,
}

pub async fn strip_format_suffix(mut req: Request, next: Next) -> Response {
    let uri = req.uri().clone();
    let path = uri.path();

    let (rewritten, format) = if let Some(p) = path.strip_suffix(".pretty") {
        (Some(p.to_string()), ResponseFormat::Pretty)
    } else if let Some(p) = path.strip_suffix(".json") {
        (Some(p.to_string()), ResponseFormat::Compact)
    } else {
        (None, ResponseFormat::Compact)
    };

    if let Some(new_path) = rewritten {
        let path_and_query = match uri.query() {
            Some(q) => format!("{new_path}?{q}"),
            None => new_path,
        };
        let mut parts = uri.into_parts();
        parts.path_and_query = Some(path_and_query.parse().expect("rewritten path is a valid PathAndQuery"));
        *req.uri_mut() = Uri::from_parts(parts).expect("rewritten parts form a valid Uri");
    }

    req.extensions_mut().insert(format);
    next.run(req).await
}

/// The envelope response axum finally serializes. Built via `ok`/`err`
/// helpers so handlers never construct the inner JSON by hand.
pub struct Envelope {
    status: StatusCode,
    format: ResponseFormat,
    body: serde_json::Value,
}

impl Envelope {
    pub fn ok(format: ResponseFormat, result: impl Serialize) -> Self {
        Self {
            status: StatusCode::OK,
            format,
            body: json!({ "result": result, "error": serde_json::Value::Null }),
        }
    }

    pub fn empty(format: ResponseFormat) -> Self {
        Self::ok(format, serde_json::Value::Null)
    }

    pub fn err(format: ResponseFormat, err: &ConductorError) -> Self {
        let status = status_for(err);
        if status.is_server_error() {
            tracing::error!(error = %err, status = status.as_u16(), "request failed");
        }
        Self {
            status,
            format,
            body: json!({ "result": serde_json::Value::Null, "error": err.to_string() }),
        }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let text = match self.format {
            ResponseFormat::Pretty => serde_json::to_string_pretty(&self.body),
            ResponseFormat::Compact => serde_json::to_string(&self.body),
        }
        .unwrap_or_else(|_| r#"{"result":null,"error":"failed to encode response"}"#.to_string());

        (self.status, [(header::CONTENT_TYPE, "application/json")], text).into_response()
    }
}

pub fn status_for(err: &ConductorError) -> StatusCode {
    match err {
        ConductorError::Validation(_) => StatusCode::BAD_REQUEST,
        ConductorError::Unauthorized => StatusCode::UNAUTHORIZED,
        ConductorError::Forbidden => StatusCode::FORBIDDEN,
        ConductorError::NotFound(_) => StatusCode::NOT_FOUND,
        ConductorError::Conflict(_) => StatusCode::BAD_REQUEST,
        ConductorError::External(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ConductorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
