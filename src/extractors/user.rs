//! Extract the user the authentication layer attached to the request.

use crate::auth::AuthUser;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Optional authenticated user. Authentication itself happens upstream: a middleware or proxy
/// integration inserts an [`AuthUser`] into the request extensions.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub Option<AuthUser>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentUser(parts.extensions.get::<AuthUser>().cloned()))
    }
}
