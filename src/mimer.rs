//! Request body decoding by `Content-Type`.

use crate::error::AppError;
use axum::http::{header::CONTENT_TYPE, HeaderMap};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Loader {
    Json,
    Yaml,
    /// Browser form submissions are left untranslated.
    Form,
}

fn loader_for_type(ctype: &str) -> Option<Loader> {
    match ctype {
        "application/json" => Some(Loader::Json),
        t if t.ends_with("+json") => Some(Loader::Json),
        "application/x-yaml" | "application/yaml" | "text/yaml" | "text/x-yaml" => Some(Loader::Yaml),
        "multipart/form-data" | "application/x-www-form-urlencoded" => Some(Loader::Form),
        _ => None,
    }
}

/// Media type without parameters, lowercased.
pub fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

/// Decode the body into structured data. `Ok(None)` when there is nothing to translate (no
/// content type, an empty body or a form submission).
pub fn translate(headers: &HeaderMap, body: &[u8]) -> Result<Option<Value>, AppError> {
    let Some(ctype) = content_type(headers) else {
        return Ok(None);
    };
    let loader = loader_for_type(&ctype).ok_or(AppError::UnsupportedMediaType)?;
    if loader == Loader::Form || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let data = match loader {
        Loader::Json => serde_json::from_slice(body).map_err(|e| AppError::BadRequest(e.to_string()))?,
        Loader::Yaml => serde_yaml::from_slice(body).map_err(|e| AppError::BadRequest(e.to_string()))?,
        Loader::Form => return Ok(None),
    };
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(ctype: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static(ctype));
        h
    }

    #[test]
    fn json_and_yaml_bodies() {
        let data = translate(&headers("application/json; charset=utf-8"), br#"{"title": "Dune"}"#).unwrap();
        assert_eq!(data, Some(json!({ "title": "Dune" })));
        let data = translate(&headers("application/vnd.api+json"), b"[1, 2]").unwrap();
        assert_eq!(data, Some(json!([1, 2])));
        let data = translate(&headers("application/x-yaml"), b"title: Dune\npages: 412\n").unwrap();
        assert_eq!(data, Some(json!({ "title": "Dune", "pages": 412 })));
    }

    #[test]
    fn nothing_to_translate() {
        assert_eq!(translate(&HeaderMap::new(), b"").unwrap(), None);
        assert_eq!(translate(&headers("application/x-www-form-urlencoded"), b"a=1").unwrap(), None);
        assert_eq!(translate(&headers("application/json"), b"  ").unwrap(), None);
    }

    #[test]
    fn unsupported_and_malformed() {
        assert!(matches!(
            translate(&headers("text/csv"), b"a,b"),
            Err(AppError::UnsupportedMediaType)
        ));
        assert!(matches!(
            translate(&headers("application/json"), b"{nope"),
            Err(AppError::BadRequest(_))
        ));
    }
}
