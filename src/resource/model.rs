use super::{Resource, ResourceCore, RestContext};
use crate::config::ResolvedEntity;
use crate::error::AppError;
use crate::extractors::RestRequest;
use crate::filter::{coerce_scalar, model_field_filter, ListQuery, OrderBy};
use crate::form::{FormFactory, FormFields, ModelForm};
use crate::paginator::Paginator;
use crate::processor::{DataPostprocessor, DataPreprocessor};
use crate::response::{HeadersResult, Rc, X_TOTAL};
use crate::serializer::{render, requested_fields};
use crate::store::Row;
use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::sync::Arc;

pub const X_ORDER: &str = "x-order";
pub const X_DIRECTION: &str = "x-direction";

const METHOD_OPERATIONS: [(Method, &str); 4] = [
    (Method::GET, "read"),
    (Method::POST, "create"),
    (Method::PUT, "update"),
    (Method::DELETE, "delete"),
];

/// Resource over one configured entity. Permissions, scope, form options and save hooks come
/// from its core.
pub struct ModelResource {
    entity: Arc<ResolvedEntity>,
    core: Arc<dyn ResourceCore>,
    allowed_methods: Vec<Method>,
}

impl ModelResource {
    pub fn new(entity: Arc<ResolvedEntity>, core: Arc<dyn ResourceCore>) -> Self {
        let allowed_methods = METHOD_OPERATIONS
            .iter()
            .filter(|(_, op)| entity.allows(op))
            .map(|(m, _)| m.clone())
            .collect();
        ModelResource {
            entity,
            core,
            allowed_methods,
        }
    }

    /// Primary key from a path segment, typed like the key column. `None` never matches a row.
    fn parse_id(&self, raw: &str) -> Option<Value> {
        let column = self.entity.column(&self.entity.pk_column)?;
        coerce_scalar(column.kind, raw).ok()
    }

    /// Existing instance addressed by the payload's key, within the core's scope.
    async fn get_instance(&self, cx: &mut RestContext<'_>, data: &Row) -> Result<Option<Row>, AppError> {
        let Some(id) = data.get(&self.entity.pk_column).filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let scope = self.core.get_queryset(cx.request);
        match cx.tx.fetch(&self.entity, &scope, id).await? {
            Some(inst) => Ok(Some(inst)),
            None => Err(AppError::resource_not_found()),
        }
    }

    fn form_fields(
        &self,
        cx: &RestContext<'_>,
        inst: Option<&Row>,
        only: Option<Vec<String>>,
        absent: Vec<String>,
    ) -> FormFields {
        let mut exclude = self.core.get_rest_form_exclude(cx.request, inst);
        exclude.extend(absent);
        let only = only.or_else(|| self.core.get_rest_form_fields(cx.request, inst));
        FormFactory::new(cx.registry.model(), &self.entity).fields(only.as_deref(), &exclude)
    }

    fn order(&self, request: &RestRequest) -> Result<Option<OrderBy>, AppError> {
        let Some(field) = request.header(X_ORDER) else {
            return Ok(None);
        };
        let column = self
            .entity
            .field_names()
            .contains(&field)
            .then(|| self.entity.column_for_field(field))
            .flatten()
            .ok_or_else(|| AppError::Rest(format!("Cannot resolve X-Order value \"{}\" into field", field)))?;
        let descending = request
            .header(X_DIRECTION)
            .map(|d| d.eq_ignore_ascii_case("DESC"))
            .unwrap_or(false);
        Ok(Some(OrderBy {
            column: column.to_string(),
            descending,
        }))
    }

    /// Scope, then filters, then ordering, then the requested page.
    async fn list(&self, cx: &mut RestContext<'_>) -> Result<(Vec<Row>, u64), AppError> {
        let request = cx.request;
        let mut conditions = self.core.get_queryset(request);
        for (term, raw) in &request.query {
            conditions.push(model_field_filter(cx.registry.model(), &self.entity, term, raw)?);
        }
        let order = self.order(request)?;
        let query = ListQuery {
            conditions,
            order,
            ..Default::default()
        };
        Paginator::from_request(request, cx.registry.paging())
            .page(cx.tx.as_mut(), &self.entity, query)
            .await
    }

    async fn render_obj(&self, cx: &mut RestContext<'_>, obj: &Row) -> Result<Value, AppError> {
        let fields = requested_fields(cx.request, &self.entity.rest_options, false);
        render(cx, &self.entity, obj, &fields).await
    }

    /// Create or update inside the request transaction; the response is rendered before commit
    /// so nested fields see the written rows. Any error rolls everything back.
    async fn atomic_create_or_update(
        &self,
        mut cx: RestContext<'_>,
        data: Row,
        status: StatusCode,
    ) -> Result<Response, AppError> {
        let result = async {
            let inst = self.create_or_update(&mut cx, data).await?;
            self.render_obj(&mut cx, &inst).await
        }
        .await;
        match result {
            Ok(body) => {
                cx.commit().await?;
                Ok(HeadersResult::new(body, status).into_response())
            }
            Err(e) => {
                if let Err(rollback) = cx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Non-empty object payload, or `None` for anything a write cannot use.
fn payload(data: Option<Value>) -> Option<Row> {
    match data {
        Some(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}

#[async_trait]
impl Resource for ModelResource {
    fn entity(&self) -> &Arc<ResolvedEntity> {
        &self.entity
    }

    fn core(&self) -> &dyn ResourceCore {
        self.core.as_ref()
    }

    fn allowed_methods(&self) -> &[Method] {
        &self.allowed_methods
    }

    fn has_read_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool {
        self.is_allowed(&Method::GET) && self.core.has_rest_read_permission(request, obj)
    }

    fn has_create_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool {
        self.is_allowed(&Method::POST) && self.core.has_rest_create_permission(request, obj)
    }

    fn has_update_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool {
        self.is_allowed(&Method::PUT) && self.core.has_rest_update_permission(request, obj)
    }

    fn has_delete_permission(&self, request: &RestRequest, obj: Option<&Row>) -> bool {
        self.is_allowed(&Method::DELETE) && self.core.has_rest_delete_permission(request, obj)
    }

    async fn create_or_update(&self, cx: &mut RestContext<'_>, data: Row) -> Result<Row, AppError> {
        let inst = self.get_instance(cx, &data).await?;
        let request = cx.request;

        match &inst {
            Some(existing) if !self.has_update_permission(request, Some(existing)) => {
                return Ok(existing.clone());
            }
            // Without POST a create reads as not-found, which nested payloads collect per field.
            None if !self.is_allowed(&Method::POST) => return Err(AppError::resource_not_found()),
            None if !self.has_create_permission(request, None) => return Err(AppError::not_allowed()),
            _ => {}
        }
        let change = inst.is_some();

        let form_fields = self.form_fields(cx, inst.as_ref(), None, Vec::new());
        let data = DataPreprocessor::new(&self.entity, &form_fields)
            .process_data(cx, data)
            .await?;

        // Updates only touch the submitted fields.
        let absent = if change {
            form_fields
                .names()
                .into_iter()
                .filter(|name| !data.contains_key(name))
                .collect()
        } else {
            Vec::new()
        };
        let fields = self.form_fields(cx, inst.as_ref(), Some(form_fields.names()), absent);
        let mut form = ModelForm::new(self.entity.clone(), fields, inst, data.clone());
        if let Some(errors) = form.is_invalid(cx.tx.as_mut()).await? {
            return Err(AppError::DataInvalid(errors));
        }

        let mut obj = form.save();
        self.core.pre_save_model(cx, &mut obj, &form, change).await?;
        self.core.save_model(cx, &mut obj, &form, change).await?;
        let id = obj.get(&self.entity.pk_column).cloned().unwrap_or(Value::Null);
        form.save_m2m(cx.tx.as_mut(), &id).await?;
        self.core.post_save_model(cx, &mut obj, &form, change).await?;

        DataPostprocessor::new(&self.entity, &form_fields, &obj)
            .process_data(cx, &data)
            .await?;
        Ok(obj)
    }

    async fn delete_instance(&self, cx: &mut RestContext<'_>, obj: &Row) -> Result<(), AppError> {
        self.core.pre_delete_model(cx, obj).await?;
        self.core.delete_model(cx, obj).await?;
        self.core.post_delete_model(cx, obj).await
    }

    async fn read(&self, mut cx: RestContext<'_>, id: Option<&str>) -> Result<Response, AppError> {
        self.core.init_rest_request(cx.request);

        if let Some(raw) = id {
            let scope = self.core.get_queryset(cx.request);
            let found = match self.parse_id(raw) {
                Some(id) => cx.tx.fetch(&self.entity, &scope, &id).await?,
                None => None,
            };
            let Some(obj) = found else {
                return Ok(Rc::NotFound.into_response());
            };
            let body = self.render_obj(&mut cx, &obj).await?;
            return Ok(HeadersResult::new(body, StatusCode::OK).into_response());
        }

        let (rows, total) = match self.list(&mut cx).await {
            Ok(page) => page,
            Err(e) if e.is_read_failure() => {
                tracing::warn!(entity = %self.entity.path_segment, error = %e, "list failed, returning empty page");
                (Vec::new(), 0)
            }
            Err(e) => return Err(e),
        };
        let fields = requested_fields(cx.request, &self.entity.rest_options, true);
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(render(&mut cx, &self.entity, row, &fields).await?);
        }
        Ok(HeadersResult::new(Value::Array(items), StatusCode::OK)
            .with_header(X_TOTAL, total)
            .into_response())
    }

    async fn create(&self, cx: RestContext<'_>, data: Option<Value>) -> Result<Response, AppError> {
        self.core.init_rest_request(cx.request);
        let Some(data) = payload(data) else {
            return Ok(Rc::BadRequest.into_response());
        };
        self.atomic_create_or_update(cx, data, StatusCode::CREATED).await
    }

    async fn update(&self, cx: RestContext<'_>, id: &str, data: Option<Value>) -> Result<Response, AppError> {
        self.core.init_rest_request(cx.request);
        let Some(mut data) = payload(data) else {
            return Ok(Rc::BadRequest.into_response());
        };
        let Some(id) = self.parse_id(id) else {
            return Ok(Rc::NotFound.into_response());
        };
        data.insert(self.entity.pk_column.clone(), id);
        self.atomic_create_or_update(cx, data, StatusCode::OK).await
    }

    async fn delete(&self, mut cx: RestContext<'_>, id: &str) -> Result<Response, AppError> {
        self.core.init_rest_request(cx.request);
        let scope = self.core.get_queryset(cx.request);
        let found = match self.parse_id(id) {
            Some(id) => cx.tx.fetch(&self.entity, &scope, &id).await?,
            None => None,
        };
        let Some(obj) = found else {
            return Ok(Rc::NotFound.into_response());
        };
        if !self.has_delete_permission(cx.request, Some(&obj)) {
            return Err(AppError::Forbidden);
        }
        match self.delete_instance(&mut cx, &obj).await {
            Ok(()) => {
                cx.commit().await?;
                Ok(Rc::Deleted.into_response())
            }
            Err(e) => {
                if let Err(rollback) = cx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}
