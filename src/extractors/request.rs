//! Request view the resource layer works with: method, path, headers, query terms and user.

use crate::auth::AuthUser;
use crate::extractors::CurrentUser;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, HeaderMap, Method},
};
use std::convert::Infallible;

#[derive(Clone, Debug)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// Query-string terms in request order.
    pub query: Vec<(String, String)>,
    pub user: Option<AuthUser>,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RestRequest {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: AuthUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Trimmed, non-empty header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether the user is present and active.
    pub fn is_active_user(&self) -> bool {
        self.user.as_ref().map(|u| u.is_active).unwrap_or(false)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RestRequest
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        let query = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        Ok(RestRequest {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            headers: parts.headers.clone(),
            query,
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn reads_query_terms_and_user() {
        let user = AuthUser::new("7").with_roles(["editor"]);
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/books?title__icontains=dune&pages__gte=100")
            .header("X-Order", " title ")
            .extension(user)
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        let rest = RestRequest::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(rest.path, "/api/books");
        assert_eq!(rest.query[0], ("title__icontains".to_string(), "dune".to_string()));
        assert_eq!(rest.header("x-order"), Some("title"));
        assert!(rest.is_active_user());
    }
}
