//! Per-resource permission gate in front of the resource routes.

use super::{Auth, PermissionValidators};
use crate::error::AppError;
use crate::extractors::RestRequest;
use crate::resource::Resource;
use crate::state::AppState;
use axum::{
    extract::{FromRequestParts, Path, Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::collections::HashMap;
use std::sync::Arc;

/// Route parameter naming the resource.
pub const PATH_SEGMENT_PARAM: &str = "path_segment";

/// Validators for the resource's allowed methods, each asking the matching permission without an
/// object.
pub fn resource_validators(resource: Arc<dyn Resource>) -> PermissionValidators {
    let mut validators = PermissionValidators::new();
    for method in resource.allowed_methods().to_vec() {
        let r = resource.clone();
        validators = match method {
            Method::GET => validators.with(method, move |req| r.has_read_permission(req, None)),
            Method::POST => validators.with(method, move |req| r.has_create_permission(req, None)),
            Method::PUT => validators.with(method, move |req| r.has_update_permission(req, None)),
            Method::DELETE => validators.with(method, move |req| r.has_delete_permission(req, None)),
            _ => validators,
        };
    }
    validators
}

pub struct AuthWrapper {
    auth: Auth,
    login_url: Option<String>,
}

impl AuthWrapper {
    pub fn new(validators: PermissionValidators, login_url: Option<String>) -> Self {
        AuthWrapper {
            auth: Auth::new(validators),
            login_url,
        }
    }

    pub fn for_resource(resource: Arc<dyn Resource>, login_url: Option<String>) -> Self {
        AuthWrapper::new(resource_validators(resource), login_url)
    }

    /// `Forbidden` for a known user the validators reject, `Unauthorized` when nobody is logged
    /// in.
    pub fn check(&self, request: &RestRequest) -> Result<(), AppError> {
        if self.auth.is_authenticated(request) {
            return Ok(());
        }
        if request.user.is_some() {
            Err(AppError::Forbidden)
        } else {
            Err(AppError::Unauthorized)
        }
    }

    /// Response for a rejected request: the login redirect when configured, else the error.
    pub fn reject(&self, request: &RestRequest, err: AppError) -> Response {
        match (&err, &self.login_url) {
            (AppError::Unauthorized, Some(login)) => {
                Redirect::to(&format!("{}?next={}", login, request.path)).into_response()
            }
            _ => err.into_response(),
        }
    }
}

/// Middleware for routes carrying a `path_segment` parameter. Unknown segments are 404.
pub async fn auth_gate(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(resource) = params
        .get(PATH_SEGMENT_PARAM)
        .and_then(|segment| state.registry.resource_for_path(segment))
    else {
        return AppError::resource_not_found().into_response();
    };

    let (mut parts, body) = request.into_parts();
    let rest = match RestRequest::from_request_parts(&mut parts, &state).await {
        Ok(rest) => rest,
        Err(never) => match never {},
    };
    let wrapper = AuthWrapper::for_resource(resource, state.settings.login_url.clone());
    if let Err(err) = wrapper.check(&rest) {
        tracing::debug!(method = %rest.method, path = %rest.path, error = %err, "request rejected");
        return wrapper.reject(&rest, err);
    }
    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthUser;
    use axum::http::{header, StatusCode};

    fn gate(login_url: Option<&str>) -> AuthWrapper {
        let validators = PermissionValidators::new()
            .with(Method::GET, |req: &RestRequest| req.user.as_ref().map(|u| u.has_role("reader")).unwrap_or(false));
        AuthWrapper::new(validators, login_url.map(str::to_string))
    }

    #[test]
    fn challenge_before_forbid() {
        let anonymous = RestRequest::new(Method::GET, "/api/books");
        assert!(matches!(gate(None).check(&anonymous), Err(AppError::Unauthorized)));

        let stranger = RestRequest::new(Method::GET, "/api/books").with_user(AuthUser::new("2"));
        assert!(matches!(gate(None).check(&stranger), Err(AppError::Forbidden)));

        let reader = RestRequest::new(Method::GET, "/api/books")
            .with_user(AuthUser::new("3").with_roles(["reader"]));
        assert!(gate(None).check(&reader).is_ok());
    }

    #[test]
    fn login_redirect_carries_next() {
        let anonymous = RestRequest::new(Method::GET, "/api/books");
        let wrapper = gate(Some("/login"));
        let response = wrapper.reject(&anonymous, AppError::Unauthorized);
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()),
            Some("/login?next=/api/books")
        );
        assert_eq!(
            wrapper.reject(&anonymous, AppError::Forbidden).status(),
            StatusCode::FORBIDDEN
        );
    }
}
