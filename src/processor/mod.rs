//! Nested payload resolution around a resource save: forward relations before it, reverse
//! relations after it.

mod post;
mod pre;

pub use post::DataPostprocessor;
pub use pre::DataPreprocessor;

use crate::error::AppError;
use serde_json::Value;

pub const INDEX_KEY: &str = "_index";

/// Error payload of one failed element of a nested list, tagged with its 1-based position.
fn indexed_error(err: &AppError, position: usize) -> Value {
    let mut errors = err.errors().unwrap_or_default();
    errors.insert(INDEX_KEY.into(), Value::from(position));
    Value::Object(errors)
}
