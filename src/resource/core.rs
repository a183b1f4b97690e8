//! The collaborator a resource consults for permissions, query scope, form options, lifecycle
//! hooks and navigational metadata.

use crate::auth::roles_allow;
use crate::config::ResolvedEntity;
use crate::error::AppError;
use crate::extractors::RestRequest;
use crate::filter::Condition;
use crate::form::ModelForm;
use crate::resource::RestContext;
use crate::store::Row;
use async_trait::async_trait;
use axum::http::Method;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    /// `<prefix>/<segment>/<pk>`
    Detail,
    /// `<prefix>/<segment>`
    Collection,
}

/// Named URL embedded in `_rest_links`.
#[derive(Clone, Debug)]
pub struct LinkPattern {
    pub name: String,
    pub kind: LinkKind,
}

impl LinkPattern {
    pub fn detail(name: impl Into<String>) -> Self {
        LinkPattern {
            name: name.into(),
            kind: LinkKind::Detail,
        }
    }

    pub fn collection(name: impl Into<String>) -> Self {
        LinkPattern {
            name: name.into(),
            kind: LinkKind::Collection,
        }
    }

    /// URL for `obj`, or `None` when the object has no primary key yet.
    pub fn url(&self, prefix: &str, entity: &ResolvedEntity, obj: &Row) -> Option<String> {
        let base = format!("{}/{}", prefix.trim_end_matches('/'), entity.path_segment);
        match self.kind {
            LinkKind::Collection => Some(base),
            LinkKind::Detail => {
                let pk = obj.get(&entity.pk_column).filter(|v| !v.is_null())?;
                let pk = pk.as_str().map(str::to_string).unwrap_or_else(|| pk.to_string());
                Some(format!("{}/{}", base, pk))
            }
        }
    }

    /// Methods the URL answers to, before permission filtering.
    pub fn methods(&self) -> &'static [Method] {
        match self.kind {
            LinkKind::Detail => &[Method::GET, Method::PUT, Method::DELETE],
            LinkKind::Collection => &[Method::GET, Method::POST],
        }
    }
}

#[async_trait]
pub trait ResourceCore: Send + Sync {
    fn entity(&self) -> &Arc<ResolvedEntity>;

    /// Called once per request before the resource handles it.
    fn init_rest_request(&self, _request: &RestRequest) {}

    fn has_rest_read_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool;
    fn has_rest_create_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool;
    fn has_rest_update_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool;
    fn has_rest_delete_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool;

    /// Base scope every fetch and list of this resource is restricted to.
    fn get_queryset(&self, _request: &RestRequest) -> Vec<Condition> {
        Vec::new()
    }

    fn get_rest_form_fields(&self, _request: &RestRequest, _obj: Option<&Row>) -> Option<Vec<String>> {
        self.entity().form_fields.clone()
    }

    fn get_rest_form_exclude(&self, _request: &RestRequest, _obj: Option<&Row>) -> Vec<String> {
        self.entity().form_exclude.clone()
    }

    async fn pre_save_model(
        &self,
        _cx: &mut RestContext<'_>,
        _obj: &mut Row,
        _form: &ModelForm,
        _change: bool,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Persist `obj` and replace it with the stored row.
    async fn save_model(
        &self,
        cx: &mut RestContext<'_>,
        obj: &mut Row,
        _form: &ModelForm,
        change: bool,
    ) -> Result<(), AppError> {
        let entity = self.entity().clone();
        let stored = if change {
            let id = obj.get(&entity.pk_column).cloned().unwrap_or(Value::Null);
            let values: Row = obj
                .iter()
                .filter(|(k, _)| entity.column(k).map(|c| !c.is_auto_timestamp()).unwrap_or(false))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            cx.tx
                .update(&entity, &id, &values)
                .await?
                .ok_or_else(AppError::resource_not_found)?
        } else {
            cx.tx.insert(&entity, obj).await?
        };
        *obj = stored;
        Ok(())
    }

    async fn post_save_model(
        &self,
        _cx: &mut RestContext<'_>,
        _obj: &mut Row,
        _form: &ModelForm,
        _change: bool,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn pre_delete_model(&self, _cx: &mut RestContext<'_>, _obj: &Row) -> Result<(), AppError> {
        Ok(())
    }

    async fn delete_model(&self, cx: &mut RestContext<'_>, obj: &Row) -> Result<(), AppError> {
        let entity = self.entity().clone();
        let id = obj.get(&entity.pk_column).cloned().unwrap_or(Value::Null);
        if !cx.tx.delete(&entity, &id).await? {
            return Err(AppError::resource_not_found());
        }
        Ok(())
    }

    async fn post_delete_model(&self, _cx: &mut RestContext<'_>, _obj: &Row) -> Result<(), AppError> {
        Ok(())
    }

    fn resource_patterns(&self) -> Vec<LinkPattern> {
        vec![LinkPattern::detail("api-resource"), LinkPattern::collection("api-list")]
    }

    fn get_list_actions(&self, _request: &RestRequest, _obj: &Row) -> Vec<Value> {
        Vec::new()
    }

    fn get_rest_obj_class_names(&self, _request: &RestRequest, _obj: &Row) -> Vec<String> {
        Vec::new()
    }
}

/// Core driven by the entity's configured role rules.
pub struct DefaultCore {
    entity: Arc<ResolvedEntity>,
}

impl DefaultCore {
    pub fn new(entity: Arc<ResolvedEntity>) -> Self {
        DefaultCore { entity }
    }
}

#[async_trait]
impl ResourceCore for DefaultCore {
    fn entity(&self) -> &Arc<ResolvedEntity> {
        &self.entity
    }

    fn init_rest_request(&self, request: &RestRequest) {
        tracing::debug!(
            entity = %self.entity.path_segment,
            method = %request.method,
            path = %request.path,
            "rest request"
        );
    }

    fn has_rest_read_permission(&self, request: &RestRequest, _obj: Option<&Row>) -> bool {
        roles_allow(self.entity.permissions.read.as_deref(), request.user.as_ref())
    }

    fn has_rest_create_permission(&self, request: &RestRequest, _obj: Option<&Row>) -> bool {
        roles_allow(self.entity.permissions.create.as_deref(), request.user.as_ref())
    }

    fn has_rest_update_permission(&self, request: &RestRequest, _obj: Option<&Row>) -> bool {
        roles_allow(self.entity.permissions.update.as_deref(), request.user.as_ref())
    }

    fn has_rest_delete_permission(&self, request: &RestRequest, _obj: Option<&Row>) -> bool {
        roles_allow(self.entity.permissions.delete.as_deref(), request.user.as_ref())
    }

    fn get_list_actions(&self, request: &RestRequest, obj: &Row) -> Vec<Value> {
        let mut actions = Vec::new();
        if self.entity.allows("update") && self.has_rest_update_permission(request, Some(obj)) {
            actions.push(json!({ "name": "edit", "verbose_name": "Edit", "method": "PUT" }));
        }
        if self.entity.allows("delete") && self.has_rest_delete_permission(request, Some(obj)) {
            actions.push(json!({ "name": "delete", "verbose_name": "Delete", "method": "DELETE" }));
        }
        actions
    }
}
