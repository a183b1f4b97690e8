//! Typed errors and HTTP mapping.

use crate::response::{rest_error, Rc};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field name → error detail. Details are messages, nested maps (single related object) or lists
/// of indexed maps (related collections).
pub type ErrorMap = Map<String, Value>;

pub const RESOURCE_NOT_FOUND_MESSAGE: &str =
    "Select a valid choice. That choice is not one of the available choices.";
pub const NOT_ALLOWED_MESSAGE: &str = "Create or update this resource is not allowed.";

/// SQLSTATE for unique_violation.
const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} id '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table_id} column {column}")]
    InvalidPrimaryKey { table_id: String, column: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("duplicate field '{field}' on table {table_id}")]
    DuplicateField { table_id: String, field: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("submitted data is invalid")]
    DataInvalid(ErrorMap),
    #[error("{0}")]
    ResourceNotFound(String),
    #[error("{0}")]
    NotAllowed(String),
    /// Generic REST exception carrying a single message.
    #[error("{0}")]
    Rest(String),
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("filter: {0}")]
    Filter(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("storage: {0}")]
    Storage(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
}

impl AppError {
    pub fn resource_not_found() -> Self {
        AppError::ResourceNotFound(RESOURCE_NOT_FOUND_MESSAGE.into())
    }

    pub fn not_allowed() -> Self {
        AppError::NotAllowed(NOT_ALLOWED_MESSAGE.into())
    }

    pub fn data_invalid_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = ErrorMap::new();
        errors.insert(field.to_string(), Value::String(message.into()));
        AppError::DataInvalid(errors)
    }

    /// Error payload as reported inside a parent's field errors. `None` for errors that are
    /// never folded into a parent payload.
    pub fn errors(&self) -> Option<ErrorMap> {
        match self {
            AppError::DataInvalid(errors) => Some(errors.clone()),
            AppError::ResourceNotFound(msg) | AppError::NotAllowed(msg) | AppError::Rest(msg) => {
                let mut m = ErrorMap::new();
                m.insert("error".into(), Value::String(msg.clone()));
                Some(m)
            }
            _ => None,
        }
    }

    /// Errors that a nested list or mapping collects per element instead of aborting.
    pub fn is_collectable(&self) -> bool {
        matches!(self, AppError::DataInvalid(_) | AppError::ResourceNotFound(_))
    }

    /// Errors a collection read swallows into an empty page.
    pub fn is_read_failure(&self) -> bool {
        matches!(
            self,
            AppError::Db(_) | AppError::Storage(_) | AppError::Filter(_)
        )
    }

    fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Db(sqlx::Error::Database(db)) => db.code().as_deref() == Some(PG_UNIQUE_VIOLATION),
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_unique_violation() {
            return Rc::DuplicateEntry.into_response();
        }
        match self {
            AppError::DataInvalid(errors) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "errors": errors })),
            )
                .into_response(),
            AppError::ResourceNotFound(_) => Rc::NotFound.into_response(),
            AppError::NotAllowed(msg) => rest_error(Value::String(msg), StatusCode::FORBIDDEN).into_response(),
            AppError::Rest(msg) | AppError::Filter(msg) => {
                rest_error(Value::String(msg), StatusCode::BAD_REQUEST).into_response()
            }
            AppError::BadRequest(msg) => rest_error(Value::String(msg), StatusCode::BAD_REQUEST).into_response(),
            AppError::UnsupportedMediaType => Rc::UnsupportedMediaType.into_response(),
            AppError::Conflict(msg) => rest_error(Value::String(msg), StatusCode::CONFLICT).into_response(),
            AppError::Unauthorized => {
                rest_error(Value::String("Unauthorized".into()), StatusCode::UNAUTHORIZED).into_response()
            }
            AppError::Forbidden => Rc::Forbidden.into_response(),
            AppError::Config(e) => {
                tracing::error!(error = %e, "config error");
                Rc::InternalError.into_response()
            }
            AppError::Db(e) => {
                tracing::error!(error = %e, "database error");
                Rc::InternalError.into_response()
            }
            AppError::Storage(e) => {
                tracing::error!(error = %e, "storage error");
                Rc::InternalError.into_response()
            }
        }
    }
}
