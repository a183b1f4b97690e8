//! Renders rows as JSON objects restricted to a field tree, following relations through the
//! request's transaction.

use crate::config::{FieldTree, ResolvedEntity, RestOptions};
use crate::error::AppError;
use crate::extractors::RestRequest;
use crate::filter::{Condition, ListQuery};
use crate::resource::{Resource, RestContext};
use crate::store::Row;
use axum::http::Method;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub const X_FIELDS: &str = "x-fields";
pub const X_FIELDSET: &str = "x-fieldset";

/// Computed fields every resource can render on top of its model fields.
const RESOURCE_FIELDS: [&str; 4] = ["_obj_name", "_rest_links", "_actions", "_class_names"];

type RenderFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, AppError>> + Send + 'a>>;

pub fn allowed_fields(options: &RestOptions) -> FieldTree {
    options.fields.join(&FieldTree::from_names(RESOURCE_FIELDS))
}

/// Field tree for a response: `X-Fieldset: selectbox`, else `X-Fields` limited to the allowed
/// fields, else the default list or object fields.
pub fn requested_fields(request: &RestRequest, options: &RestOptions, list: bool) -> FieldTree {
    if request
        .header(X_FIELDSET)
        .map(|v| v.eq_ignore_ascii_case("selectbox"))
        .unwrap_or(false)
    {
        return options.selectbox_tree();
    }
    if let Some(header) = request.header(X_FIELDS) {
        return FieldTree::parse(header).intersect(&allowed_fields(options));
    }
    let defaults = if list {
        &options.default_list_fields
    } else {
        &options.default_obj_fields
    };
    defaults.join(&FieldTree::from_names(["_rest_links"]))
}

/// Display text of a primary key or other scalar.
pub fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn obj_name(entity: &ResolvedEntity, obj: &Row) -> String {
    if let Some(v) = entity.display_field.as_ref().and_then(|f| obj.get(f)) {
        return value_text(v);
    }
    let pk = obj.get(&entity.pk_column).map(value_text).unwrap_or_default();
    format!("{} object ({})", entity.table_name, pk)
}

/// `{pattern name: {url, methods}}` with methods limited to what the caller may do on `obj`.
pub fn rest_links(resource: &dyn Resource, request: &RestRequest, prefix: &str, obj: &Row) -> Value {
    let mut links = Map::new();
    for pattern in resource.core().resource_patterns() {
        let Some(url) = pattern.url(prefix, resource.entity(), obj) else {
            continue;
        };
        let methods: Vec<Value> = pattern
            .methods()
            .iter()
            .filter(|m| resource.is_allowed(m) && method_permitted(resource, request, m, obj))
            .map(|m| Value::String(m.to_string()))
            .collect();
        links.insert(pattern.name.clone(), serde_json::json!({ "url": url, "methods": methods }));
    }
    Value::Object(links)
}

fn method_permitted(resource: &dyn Resource, request: &RestRequest, method: &Method, obj: &Row) -> bool {
    let obj = Some(obj);
    match *method {
        Method::GET => resource.has_read_permission(request, obj),
        Method::POST => resource.has_create_permission(request, None),
        Method::PUT => resource.has_update_permission(request, obj),
        Method::DELETE => resource.has_delete_permission(request, obj),
        _ => false,
    }
}

/// Render `obj` of `entity` with `fields`. Leaf relations render as keys, subtrees as nested
/// objects rendered the same way.
pub fn render<'a, 'b: 'a>(
    cx: &'a mut RestContext<'b>,
    entity: &'a Arc<ResolvedEntity>,
    obj: &'a Row,
    fields: &'a FieldTree,
) -> RenderFuture<'a> {
    Box::pin(async move {
        let registry = cx.registry;
        let request = cx.request;
        let resource = registry.resource_for_table(&entity.table_id);
        let mut out = Map::new();

        for (name, sub) in fields.iter() {
            let value = match name.as_str() {
                "_obj_name" => Value::String(obj_name(entity, obj)),
                "_rest_links" => match &resource {
                    Some(r) => rest_links(r.as_ref(), request, registry.api_prefix(), obj),
                    None => Value::Object(Map::new()),
                },
                "_actions" => Value::Array(
                    resource
                        .as_ref()
                        .map(|r| r.core().get_list_actions(request, obj))
                        .unwrap_or_default(),
                ),
                "_class_names" => Value::Array(
                    resource
                        .as_ref()
                        .map(|r| r.core().get_rest_obj_class_names(request, obj))
                        .unwrap_or_default()
                        .into_iter()
                        .map(Value::String)
                        .collect(),
                ),
                _ => {
                    if let Some(rel) = entity.forward(name) {
                        let key = obj.get(&rel.column).cloned().unwrap_or(Value::Null);
                        if sub.is_empty() || key.is_null() {
                            key
                        } else {
                            let Some(related) = registry.model().entity_by_table(&rel.related_table_id).cloned()
                            else {
                                continue;
                            };
                            let query = ListQuery {
                                conditions: vec![Condition::eq(rel.related_column.clone(), key)],
                                limit: Some(1),
                                ..Default::default()
                            };
                            match cx.tx.select(&related, &query).await?.into_iter().next() {
                                Some(row) => render(&mut *cx, &related, &row, sub).await?,
                                None => Value::Null,
                            }
                        }
                    } else if entity.column(name).is_some() {
                        obj.get(name).cloned().unwrap_or(Value::Null)
                    } else if let Some(rel) = entity.reverse(name) {
                        let Some(child) = registry.model().entity_by_table(&rel.child_table_id).cloned() else {
                            continue;
                        };
                        let parent_key = obj.get(&rel.our_column).cloned().unwrap_or(Value::Null);
                        let query = ListQuery {
                            conditions: vec![Condition::eq(rel.child_column.clone(), parent_key)],
                            ..Default::default()
                        };
                        let rows = cx.tx.select(&child, &query).await?;
                        render_many(cx, &child, rows, sub).await?
                    } else if let Some(rel) = entity.many_to_many(name) {
                        let Some(related) = registry.model().entity_by_table(&rel.related_table_id).cloned() else {
                            continue;
                        };
                        let id = obj.get(&entity.pk_column).cloned().unwrap_or(Value::Null);
                        let ids = cx.tx.link_ids(entity, rel, &related, &id).await?;
                        if sub.is_empty() {
                            Value::Array(ids)
                        } else {
                            let mut rows = Vec::with_capacity(ids.len());
                            for id in &ids {
                                if let Some(row) = cx.tx.fetch(&related, &[], id).await? {
                                    rows.push(row);
                                }
                            }
                            render_many(cx, &related, rows, sub).await?
                        }
                    } else {
                        continue;
                    }
                }
            };
            out.insert(name.clone(), value);
        }
        Ok(Value::Object(out))
    })
}

/// Leaf: list of primary keys. Subtree: list of rendered objects.
async fn render_many(
    cx: &mut RestContext<'_>,
    entity: &Arc<ResolvedEntity>,
    rows: Vec<Row>,
    fields: &FieldTree,
) -> Result<Value, AppError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        if fields.is_empty() {
            out.push(row.get(&entity.pk_column).cloned().unwrap_or(Value::Null));
        } else {
            out.push(render(&mut *cx, entity, row, fields).await?);
        }
    }
    Ok(Value::Array(out))
}
