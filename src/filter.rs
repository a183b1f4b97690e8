//! Query-string filters: `field[__related...][__lookup]=value` resolved against the model.

use crate::config::{ColumnKind, ResolvedEntity, ResolvedModel};
use crate::error::AppError;
use serde_json::Value;
use std::sync::Arc;

const SEPARATOR: &str = "__";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
}

impl Lookup {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "exact" => Lookup::Exact,
            "iexact" => Lookup::IExact,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "startswith" => Lookup::StartsWith,
            "istartswith" => Lookup::IStartsWith,
            "endswith" => Lookup::EndsWith,
            "iendswith" => Lookup::IEndsWith,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "in" => Lookup::In,
            "isnull" => Lookup::IsNull,
            _ => return None,
        })
    }

    /// Lookups that compare the textual form of the column.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            Lookup::IExact
                | Lookup::Contains
                | Lookup::IContains
                | Lookup::StartsWith
                | Lookup::IStartsWith
                | Lookup::EndsWith
                | Lookup::IEndsWith
        )
    }
}

/// One WHERE term. `Related` restricts `column` to keys of related rows matching `inner`.
#[derive(Clone, Debug)]
pub enum Condition {
    Field {
        column: String,
        lookup: Lookup,
        value: Value,
    },
    Related {
        column: String,
        related: Arc<ResolvedEntity>,
        related_column: String,
        inner: Box<Condition>,
    },
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Condition::Field {
            column: column.into(),
            lookup: Lookup::Exact,
            value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub conditions: Vec<Condition>,
    pub order: Option<OrderBy>,
    pub offset: u64,
    pub limit: Option<u64>,
}

/// Resolve one query-string term into a condition on `entity`.
pub fn model_field_filter(
    model: &ResolvedModel,
    entity: &ResolvedEntity,
    term: &str,
    raw: &str,
) -> Result<Condition, AppError> {
    let parts: Vec<&str> = term.split(SEPARATOR).collect();
    build(model, entity, &parts, raw)
}

fn build(model: &ResolvedModel, entity: &ResolvedEntity, parts: &[&str], raw: &str) -> Result<Condition, AppError> {
    let (name, rest) = parts
        .split_first()
        .ok_or_else(|| AppError::Filter("empty filter term".into()))?;

    if let Some(rel) = entity.forward(name) {
        let related = model
            .entity_by_table(&rel.related_table_id)
            .ok_or_else(|| AppError::Filter(format!("relation '{}' has no model", name)))?;
        let direct_lookup = match rest {
            [] => Some(Lookup::Exact),
            [l] => Lookup::parse(l),
            _ => None,
        };
        if let Some(lookup) = direct_lookup {
            let kind = related
                .column(&rel.related_column)
                .map(|c| c.kind)
                .unwrap_or(ColumnKind::Text);
            return Ok(Condition::Field {
                column: rel.column.clone(),
                lookup,
                value: coerce(kind, lookup, raw)?,
            });
        }
        let inner = build(model, related, rest, raw)?;
        return Ok(Condition::Related {
            column: rel.column.clone(),
            related: related.clone(),
            related_column: rel.related_column.clone(),
            inner: Box::new(inner),
        });
    }

    let column = entity
        .column(name)
        .ok_or_else(|| AppError::Filter(format!("Cannot resolve keyword '{}' into field", name)))?;
    let lookup = match rest {
        [] => Lookup::Exact,
        [l] => Lookup::parse(l).ok_or_else(|| AppError::Filter(format!("unsupported lookup '{}'", l)))?,
        _ => return Err(AppError::Filter(format!("'{}' is not a relation", name))),
    };
    Ok(Condition::Field {
        column: column.name.clone(),
        lookup,
        value: coerce(column.kind, lookup, raw)?,
    })
}

fn coerce(kind: ColumnKind, lookup: Lookup, raw: &str) -> Result<Value, AppError> {
    match lookup {
        Lookup::IsNull => parse_bool(raw).map(Value::Bool),
        Lookup::In => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| coerce_scalar(kind, s))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        l if l.is_textual() => Ok(Value::String(raw.to_string())),
        _ => coerce_scalar(kind, raw),
    }
}

/// Parse a textual value into the JSON shape of a column kind.
pub fn coerce_scalar(kind: ColumnKind, raw: &str) -> Result<Value, AppError> {
    let invalid = || AppError::Filter(format!("invalid value '{}'", raw));
    Ok(match kind {
        ColumnKind::Integer => Value::Number(raw.trim().parse::<i64>().map_err(|_| invalid())?.into()),
        ColumnKind::Float => {
            let f: f64 = raw.trim().parse().map_err(|_| invalid())?;
            serde_json::Number::from_f64(f).map(Value::Number).ok_or_else(invalid)?
        }
        ColumnKind::Boolean => Value::Bool(parse_bool(raw)?),
        ColumnKind::Uuid => Value::String(uuid::Uuid::parse_str(raw.trim()).map_err(|_| invalid())?.to_string()),
        _ => Value::String(raw.to_string()),
    })
}

fn parse_bool(raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(AppError::Filter(format!("invalid boolean '{}'", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use serde_json::json;

    fn model() -> ResolvedModel {
        let cfg = FullConfig {
            schemas: serde_json::from_value(json!([{ "id": "s", "name": "public" }])).unwrap(),
            tables: serde_json::from_value(json!([
                { "id": "author", "name": "author", "primary_key": "id" },
                { "id": "book", "name": "book", "primary_key": "id" }
            ]))
            .unwrap(),
            columns: serde_json::from_value(json!([
                { "id": "a.id", "table_id": "author", "name": "id", "type": "bigserial", "default": "auto" },
                { "id": "a.name", "table_id": "author", "name": "name", "type": "text" },
                { "id": "b.id", "table_id": "book", "name": "id", "type": "bigserial", "default": "auto" },
                { "id": "b.pages", "table_id": "book", "name": "pages", "type": "integer" },
                { "id": "b.author", "table_id": "book", "name": "author_id", "type": "bigint" }
            ]))
            .unwrap(),
            relationships: serde_json::from_value(json!([
                { "id": "r", "from_table_id": "book", "from_column_id": "b.author",
                  "to_table_id": "author", "to_column_id": "a.id" }
            ]))
            .unwrap(),
            many_to_many: vec![],
            api_entities: serde_json::from_value(json!([
                { "entity_id": "book", "path_segment": "books", "operations": ["read"] }
            ]))
            .unwrap(),
        };
        resolve(&cfg).unwrap()
    }

    #[test]
    fn plain_and_lookup_terms() {
        let m = model();
        let book = m.entity_by_path("books").unwrap().clone();
        match model_field_filter(&m, &book, "pages__gte", "100").unwrap() {
            Condition::Field { column, lookup, value } => {
                assert_eq!(column, "pages");
                assert_eq!(lookup, Lookup::Gte);
                assert_eq!(value, json!(100));
            }
            other => panic!("unexpected {:?}", other),
        }
        match model_field_filter(&m, &book, "pages__in", "1, 2,3").unwrap() {
            Condition::Field { value, .. } => assert_eq!(value, json!([1, 2, 3])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn relation_terms() {
        let m = model();
        let book = m.entity_by_path("books").unwrap().clone();
        match model_field_filter(&m, &book, "author", "7").unwrap() {
            Condition::Field { column, value, .. } => {
                assert_eq!(column, "author_id");
                assert_eq!(value, json!(7));
            }
            other => panic!("unexpected {:?}", other),
        }
        match model_field_filter(&m, &book, "author__name__icontains", "ann").unwrap() {
            Condition::Related { column, inner, .. } => {
                assert_eq!(column, "author_id");
                assert!(matches!(*inner, Condition::Field { lookup: Lookup::IContains, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_terms_are_filter_errors() {
        let m = model();
        let book = m.entity_by_path("books").unwrap().clone();
        assert!(matches!(model_field_filter(&m, &book, "nope", "1"), Err(AppError::Filter(_))));
        assert!(matches!(model_field_filter(&m, &book, "pages", "many"), Err(AppError::Filter(_))));
        assert!(matches!(model_field_filter(&m, &book, "pages__near", "1"), Err(AppError::Filter(_))));
    }
}
