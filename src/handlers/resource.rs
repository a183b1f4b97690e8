//! Resource handlers: resolve the resource by path segment, open the request transaction and
//! delegate.

use crate::error::AppError;
use crate::extractors::RestRequest;
use crate::mimer;
use crate::resource::{Resource, RestContext};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Response,
};
use std::sync::Arc;

fn resource(state: &AppState, segment: &str) -> Result<Arc<dyn Resource>, AppError> {
    state
        .registry
        .resource_for_path(segment)
        .ok_or_else(AppError::resource_not_found)
}

pub async fn list(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    request: RestRequest,
) -> Result<Response, AppError> {
    let resource = resource(&state, &segment)?;
    let cx = RestContext::begin(state.store.as_ref(), &request, &state.registry).await?;
    resource.read(cx, None).await
}

pub async fn read(
    State(state): State<AppState>,
    Path((segment, id)): Path<(String, String)>,
    request: RestRequest,
) -> Result<Response, AppError> {
    let resource = resource(&state, &segment)?;
    let cx = RestContext::begin(state.store.as_ref(), &request, &state.registry).await?;
    resource.read(cx, Some(&id)).await
}

pub async fn create(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    request: RestRequest,
    body: Bytes,
) -> Result<Response, AppError> {
    let resource = resource(&state, &segment)?;
    let data = mimer::translate(&request.headers, &body)?;
    let cx = RestContext::begin(state.store.as_ref(), &request, &state.registry).await?;
    resource.create(cx, data).await
}

pub async fn update(
    State(state): State<AppState>,
    Path((segment, id)): Path<(String, String)>,
    request: RestRequest,
    body: Bytes,
) -> Result<Response, AppError> {
    let resource = resource(&state, &segment)?;
    let data = mimer::translate(&request.headers, &body)?;
    let cx = RestContext::begin(state.store.as_ref(), &request, &state.registry).await?;
    resource.update(cx, &id, data).await
}

pub async fn delete(
    State(state): State<AppState>,
    Path((segment, id)): Path<(String, String)>,
    request: RestRequest,
) -> Result<Response, AppError> {
    let resource = resource(&state, &segment)?;
    let cx = RestContext::begin(state.store.as_ref(), &request, &state.registry).await?;
    resource.delete(cx, &id).await
}
