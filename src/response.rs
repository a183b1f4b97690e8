//! Standard response envelope helpers and the status table.

use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

pub const X_TOTAL: &str = "x-total";

/// Canned responses. Bodies are `{"messages": {"success"|"error": <text>}}`; `Deleted` has none.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rc {
    AllOk,
    Created,
    Deleted,
    BadRequest,
    Forbidden,
    NotFound,
    DuplicateEntry,
    NotHere,
    UnsupportedMediaType,
    InternalError,
    NotImplemented,
    Throttled,
}

impl Rc {
    pub fn status(self) -> StatusCode {
        match self {
            Rc::AllOk => StatusCode::OK,
            Rc::Created => StatusCode::CREATED,
            Rc::Deleted => StatusCode::NO_CONTENT,
            Rc::BadRequest => StatusCode::BAD_REQUEST,
            Rc::Forbidden => StatusCode::FORBIDDEN,
            Rc::NotFound => StatusCode::NOT_FOUND,
            Rc::DuplicateEntry => StatusCode::CONFLICT,
            Rc::NotHere => StatusCode::GONE,
            Rc::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Rc::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Rc::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Rc::Throttled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Envelope key and message, or `None` when the response has no body.
    pub fn message(self) -> Option<(&'static str, &'static str)> {
        match self {
            Rc::AllOk => Some(("success", "OK")),
            Rc::Created => Some(("success", "The record was created")),
            Rc::Deleted => None,
            Rc::BadRequest => Some(("error", "Bad Request")),
            Rc::Forbidden => Some(("error", "Forbidden")),
            Rc::NotFound => Some(("error", "Not Found")),
            Rc::DuplicateEntry => Some(("error", "Conflict/Duplicate")),
            Rc::NotHere => Some(("error", "Gone")),
            Rc::UnsupportedMediaType => Some(("error", "Unsupported Media Type")),
            Rc::InternalError => Some(("error", "Internal server error")),
            Rc::NotImplemented => Some(("error", "Not implemented")),
            Rc::Throttled => Some(("error", "The resource was throttled")),
        }
    }
}

impl IntoResponse for Rc {
    fn into_response(self) -> Response {
        match self.message() {
            Some((key, msg)) => {
                let mut body = serde_json::Map::new();
                body.insert(key.to_string(), Value::String(msg.to_string()));
                (self.status(), Json(Messages { messages: Value::Object(body) })).into_response()
            }
            None => self.status().into_response(),
        }
    }
}

#[derive(Serialize)]
pub struct Messages {
    pub messages: Value,
}

/// Message response with extra headers.
pub struct RestResponse {
    pub status: StatusCode,
    pub messages: Value,
    pub headers: HeaderMap,
}

pub fn rest_ok(msg: Value, status: StatusCode) -> RestResponse {
    RestResponse {
        status,
        messages: serde_json::json!({ "success": msg }),
        headers: HeaderMap::new(),
    }
}

pub fn rest_error(msg: Value, status: StatusCode) -> RestResponse {
    RestResponse {
        status,
        messages: serde_json::json!({ "error": msg }),
        headers: HeaderMap::new(),
    }
}

impl IntoResponse for RestResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, Json(Messages { messages: self.messages })).into_response()
    }
}

/// Serialized result plus out-of-band headers (e.g. `X-Total`).
pub struct HeadersResult {
    pub result: Value,
    pub headers: HeaderMap,
    pub status: StatusCode,
}

impl HeadersResult {
    pub fn new(result: Value, status: StatusCode) -> Self {
        HeadersResult {
            result,
            headers: HeaderMap::new(),
            status,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl ToString) -> Self {
        if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
            self.headers.insert(HeaderName::from_static(name), v);
        }
        self
    }
}

impl IntoResponse for HeadersResult {
    fn into_response(self) -> Response {
        (self.status, self.headers, Json(self.result)).into_response()
    }
}
