//! Resources: one strategy object per model handling read, create-or-update and delete.

mod core;
mod model;
mod registry;

pub use self::core::{DefaultCore, LinkKind, LinkPattern, ResourceCore};
pub use model::ModelResource;
pub use registry::ResourceRegistry;

use crate::config::ResolvedEntity;
use crate::error::AppError;
use crate::extractors::RestRequest;
use crate::store::{Row, Store, Transaction};
use async_trait::async_trait;
use axum::http::Method;
use axum::response::Response;
use serde_json::Value;
use std::sync::Arc;

/// Everything one request's resource calls share: the request, the registry for related
/// resources and the single transaction all nested writes go through.
pub struct RestContext<'a> {
    pub request: &'a RestRequest,
    pub registry: &'a ResourceRegistry,
    pub tx: Box<dyn Transaction>,
}

impl<'a> RestContext<'a> {
    pub async fn begin(
        store: &dyn Store,
        request: &'a RestRequest,
        registry: &'a ResourceRegistry,
    ) -> Result<RestContext<'a>, AppError> {
        Ok(RestContext {
            request,
            registry,
            tx: store.begin().await?,
        })
    }

    pub async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await
    }

    pub async fn rollback(self) -> Result<(), AppError> {
        self.tx.rollback().await
    }
}

#[async_trait]
pub trait Resource: Send + Sync {
    fn entity(&self) -> &Arc<ResolvedEntity>;

    fn core(&self) -> &dyn ResourceCore;

    fn allowed_methods(&self) -> &[Method];

    fn is_allowed(&self, method: &Method) -> bool {
        self.allowed_methods().contains(method)
    }

    fn has_read_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool;
    fn has_create_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool;
    fn has_update_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool;
    fn has_delete_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool;

    /// Create when `data` carries no primary key, otherwise update the identified instance.
    /// Returns the saved (or, when update is not permitted, the unchanged) instance.
    async fn create_or_update(&self, cx: &mut RestContext<'_>, data: Row) -> Result<Row, AppError>;

    /// Run the delete lifecycle hooks for `obj`.
    async fn delete_instance(&self, cx: &mut RestContext<'_>, obj: &Row) -> Result<(), AppError>;

    /// GET: one object when `id` is given, otherwise a filtered, ordered page.
    async fn read(&self, cx: RestContext<'_>, id: Option<&str>) -> Result<Response, AppError>;

    /// POST with the decoded body.
    async fn create(&self, cx: RestContext<'_>, data: Option<Value>) -> Result<Response, AppError>;

    /// PUT with the decoded body; absent fields keep their stored values.
    async fn update(&self, cx: RestContext<'_>, id: &str, data: Option<Value>) -> Result<Response, AppError>;

    async fn delete(&self, cx: RestContext<'_>, id: &str) -> Result<Response, AppError>;
}
