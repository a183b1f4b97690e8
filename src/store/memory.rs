//! In-process store. A transaction works on a private copy of all tables while holding the store
//! lock; commit writes the copy back, rollback or drop discards it.

use crate::config::{ColumnKind, ManyToManyRelation, PkType, ResolvedEntity};
use crate::error::AppError;
use crate::filter::{Condition, ListQuery, Lookup};
use crate::store::{Row, Store, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    links: HashMap<String, Vec<(Value, Value)>>,
    sequences: HashMap<String, i64>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Committed rows of an entity, in insertion order.
    pub async fn rows(&self, entity: &ResolvedEntity) -> Vec<Row> {
        let data = self.data.lock().await;
        data.rows.get(&entity.table_id).cloned().unwrap_or_default()
    }

    /// Committed link pairs `(our id, related id)` of a many-to-many relation.
    pub async fn links(&self, relation: &ManyToManyRelation) -> Vec<(Value, Value)> {
        let data = self.data.lock().await;
        data.links.get(&link_key(relation)).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let guard = self.data.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, work }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

fn link_key(relation: &ManyToManyRelation) -> String {
    format!("{}.{}", relation.through_schema, relation.through_table)
}

impl MemoryTransaction {
    fn table(&self, entity: &ResolvedEntity) -> &[Row] {
        self.work.rows.get(&entity.table_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn matches(&self, entity: &ResolvedEntity, row: &Row, cond: &Condition) -> bool {
        match cond {
            Condition::Field { column, lookup, value } => {
                let cell = row.get(column).unwrap_or(&Value::Null);
                field_matches(kind_of(entity, column), cell, *lookup, value)
            }
            Condition::Related {
                column,
                related,
                related_column,
                inner,
            } => {
                let cell = row.get(column).unwrap_or(&Value::Null);
                if cell.is_null() {
                    return false;
                }
                self.table(related).iter().any(|r| {
                    r.get(related_column).map(|v| loose_eq(v, cell)).unwrap_or(false) && self.matches(related, r, inner)
                })
            }
        }
    }

    fn matches_all(&self, entity: &ResolvedEntity, row: &Row, conditions: &[Condition]) -> bool {
        conditions.iter().all(|c| self.matches(entity, row, c))
    }

    fn next_id(&mut self, entity: &ResolvedEntity) -> Result<Value, AppError> {
        match entity.pk_type {
            PkType::Int | PkType::BigInt => {
                let max_existing = self
                    .table(entity)
                    .iter()
                    .filter_map(|r| r.get(&entity.pk_column).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0);
                let seq = self.work.sequences.entry(entity.table_id.clone()).or_insert(0);
                *seq = (*seq).max(max_existing) + 1;
                Ok(Value::Number((*seq).into()))
            }
            PkType::Uuid => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
            PkType::Text => Err(AppError::Storage(format!(
                "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                entity.pk_column, entity.table_name
            ))),
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn fetch(&mut self, entity: &ResolvedEntity, scope: &[Condition], id: &Value) -> Result<Option<Row>, AppError> {
        Ok(self
            .table(entity)
            .iter()
            .find(|r| {
                r.get(&entity.pk_column).map(|v| loose_eq(v, id)).unwrap_or(false) && self.matches_all(entity, r, scope)
            })
            .cloned())
    }

    async fn select(&mut self, entity: &ResolvedEntity, query: &ListQuery) -> Result<Vec<Row>, AppError> {
        let mut rows: Vec<Row> = self
            .table(entity)
            .iter()
            .filter(|r| self.matches_all(entity, r, &query.conditions))
            .cloned()
            .collect();
        let pk = entity.pk_column.as_str();
        rows.sort_by(|a, b| {
            let by_order = query
                .order
                .as_ref()
                .map(|o| {
                    let ord = compare(kind_of(entity, &o.column), a.get(&o.column), b.get(&o.column));
                    if o.descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
                .unwrap_or(Ordering::Equal);
            by_order.then_with(|| compare(kind_of(entity, pk), a.get(pk), b.get(pk)))
        });
        let offset = query.offset as usize;
        let page = rows.into_iter().skip(offset);
        Ok(match query.limit {
            Some(limit) => page.take(limit as usize).collect(),
            None => page.collect(),
        })
    }

    async fn count(&mut self, entity: &ResolvedEntity, conditions: &[Condition]) -> Result<u64, AppError> {
        Ok(self.table(entity).iter().filter(|r| self.matches_all(entity, r, conditions)).count() as u64)
    }

    async fn insert(&mut self, entity: &ResolvedEntity, values: &Row) -> Result<Row, AppError> {
        let id = match values.get(&entity.pk_column) {
            Some(v) if !v.is_null() => v.clone(),
            _ => self.next_id(entity)?,
        };
        if self
            .table(entity)
            .iter()
            .any(|r| r.get(&entity.pk_column).map(|v| loose_eq(v, &id)).unwrap_or(false))
        {
            return Err(AppError::Conflict(format!("{} {} already exists", entity.table_name, id)));
        }
        let now = chrono::Utc::now().to_rfc3339();
        let mut row = Row::new();
        for c in &entity.columns {
            let value = if c.pk_type.is_some() {
                id.clone()
            } else {
                match values.get(&c.name) {
                    Some(v) => v.clone(),
                    None if c.has_default && c.kind == ColumnKind::Timestamp => Value::String(now.clone()),
                    None => Value::Null,
                }
            };
            if value.is_null() && !c.nullable && !c.has_default {
                return Err(AppError::Storage(format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    c.name, entity.table_name
                )));
            }
            row.insert(c.name.clone(), value);
        }
        self.work
            .rows
            .entry(entity.table_id.clone())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&mut self, entity: &ResolvedEntity, id: &Value, values: &Row) -> Result<Option<Row>, AppError> {
        let pk = entity.pk_column.clone();
        let Some(rows) = self.work.rows.get_mut(&entity.table_id) else {
            return Ok(None);
        };
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.get(&pk).map(|v| loose_eq(v, id)).unwrap_or(false))
        else {
            return Ok(None);
        };
        for c in &entity.columns {
            if c.pk_type.is_some() {
                continue;
            }
            if let Some(v) = values.get(&c.name) {
                if v.is_null() && !c.nullable {
                    return Err(AppError::Storage(format!(
                        "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                        c.name, entity.table_name
                    )));
                }
                row.insert(c.name.clone(), v.clone());
            }
        }
        if entity.column("updated_at").is_some() && !values.contains_key("updated_at") {
            row.insert("updated_at".into(), Value::String(chrono::Utc::now().to_rfc3339()));
        }
        Ok(Some(row.clone()))
    }

    async fn delete(&mut self, entity: &ResolvedEntity, id: &Value) -> Result<bool, AppError> {
        let pk = entity.pk_column.clone();
        let Some(rows) = self.work.rows.get_mut(&entity.table_id) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|r| !r.get(&pk).map(|v| loose_eq(v, id)).unwrap_or(false));
        Ok(rows.len() != before)
    }

    async fn link_ids(
        &mut self,
        _entity: &ResolvedEntity,
        relation: &ManyToManyRelation,
        _related: &ResolvedEntity,
        id: &Value,
    ) -> Result<Vec<Value>, AppError> {
        let mut ids: Vec<Value> = self
            .work
            .links
            .get(&link_key(relation))
            .map(|pairs| {
                pairs
                    .iter()
                    .filter(|(ours, _)| loose_eq(ours, id))
                    .map(|(_, theirs)| theirs.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort_by(|a, b| compare(None, Some(a), Some(b)));
        Ok(ids)
    }

    async fn set_link_ids(
        &mut self,
        _entity: &ResolvedEntity,
        relation: &ManyToManyRelation,
        _related: &ResolvedEntity,
        id: &Value,
        related_ids: &[Value],
    ) -> Result<(), AppError> {
        let pairs = self.work.links.entry(link_key(relation)).or_default();
        pairs.retain(|(ours, _)| !loose_eq(ours, id));
        for related_id in related_ids {
            pairs.push((id.clone(), related_id.clone()));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTransaction { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}

fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Equality across JSON shapes the way a typed column compares (`1` equals `"1"`).
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    compare(None, Some(a), Some(b)) == Ordering::Equal
}

fn kind_of(entity: &ResolvedEntity, column: &str) -> Option<ColumnKind> {
    entity.column(column).map(|c| c.kind)
}

/// Total order for sorting, nulls last. Numeric columns compare numerically and every other
/// column by text, as PostgreSQL does. Without a column kind, values that both parse as numbers
/// compare numerically.
fn compare(kind: Option<ColumnKind>, a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let numeric = kind
                .map(|k| matches!(k, ColumnKind::Integer | ColumnKind::Float | ColumnKind::Numeric))
                .unwrap_or(true);
            if numeric {
                if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
                    return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                }
            }
            text_of(a).cmp(&text_of(b))
        }
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn field_matches(kind: Option<ColumnKind>, cell: &Value, lookup: Lookup, value: &Value) -> bool {
    match lookup {
        Lookup::Exact if value.is_null() => cell.is_null(),
        Lookup::Exact => loose_eq(cell, value),
        Lookup::IsNull => cell.is_null() == value.as_bool().unwrap_or(false),
        Lookup::In => value
            .as_array()
            .map(|items| items.iter().any(|v| loose_eq(cell, v)))
            .unwrap_or(false),
        Lookup::Gt | Lookup::Gte | Lookup::Lt | Lookup::Lte => {
            if cell.is_null() || value.is_null() {
                return false;
            }
            let ord = compare(kind, Some(cell), Some(value));
            match lookup {
                Lookup::Gt => ord == Ordering::Greater,
                Lookup::Gte => ord != Ordering::Less,
                Lookup::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            }
        }
        _ => {
            let (Some(cell), Some(needle)) = (text_of(cell), text_of(value)) else {
                return false;
            };
            let insensitive = matches!(
                lookup,
                Lookup::IExact | Lookup::IContains | Lookup::IStartsWith | Lookup::IEndsWith
            );
            let (cell, needle) = if insensitive {
                (cell.to_lowercase(), needle.to_lowercase())
            } else {
                (cell, needle)
            };
            match lookup {
                Lookup::IExact => cell == needle,
                Lookup::Contains | Lookup::IContains => cell.contains(&needle),
                Lookup::StartsWith | Lookup::IStartsWith => cell.starts_with(&needle),
                _ => cell.ends_with(&needle),
            }
        }
    }
}
