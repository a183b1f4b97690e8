//! Builds parameterized INSERT, SELECT, UPDATE, DELETE from resolved entity.

use crate::config::{ManyToManyRelation, ResolvedEntity};
use crate::filter::{Condition, ListQuery, Lookup};
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn entity_table(entity: &ResolvedEntity) -> String {
    qualified_table(&entity.schema_name, &entity.table_name)
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Push a value and return its placeholder cast to `pg_type`.
    fn placeholder(&mut self, v: Value, pg_type: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, pg_type)
    }
}

fn cast_of<'a>(entity: &'a ResolvedEntity, column: &str) -> &'a str {
    entity.column(column).map(|c| c.pg_type.as_str()).unwrap_or("text")
}

/// SELECT list: each column as-is, except custom enum (schema.typename) and numeric as col::text
/// so sqlx returns String.
fn select_column_list(entity: &ResolvedEntity) -> String {
    entity
        .columns
        .iter()
        .map(|c| {
            let q = quoted(&c.name);
            if c.pg_type.contains('.') || c.pg_type == "numeric" {
                format!("{}::text AS {}", q, q)
            } else {
                q
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn condition_sql(entity: &ResolvedEntity, cond: &Condition, q: &mut QueryBuf) -> String {
    match cond {
        Condition::Field { column, lookup, value } => {
            let col = quoted(column);
            let cast = cast_of(entity, column);
            match lookup {
                Lookup::Exact if value.is_null() => format!("{} IS NULL", col),
                Lookup::Exact => format!("{} = {}", col, q.placeholder(value.clone(), cast)),
                Lookup::IExact => {
                    let ph = q.placeholder(value.clone(), "text");
                    format!("LOWER({}::text) = LOWER({})", col, ph)
                }
                Lookup::Contains | Lookup::IContains | Lookup::StartsWith | Lookup::IStartsWith
                | Lookup::EndsWith | Lookup::IEndsWith => {
                    let raw = escape_like(value.as_str().unwrap_or_default());
                    let pattern = match lookup {
                        Lookup::Contains | Lookup::IContains => format!("%{}%", raw),
                        Lookup::StartsWith | Lookup::IStartsWith => format!("{}%", raw),
                        _ => format!("%{}", raw),
                    };
                    let op = match lookup {
                        Lookup::IContains | Lookup::IStartsWith | Lookup::IEndsWith => "ILIKE",
                        _ => "LIKE",
                    };
                    let ph = q.placeholder(Value::String(pattern), "text");
                    format!("{}::text {} {}", col, op, ph)
                }
                Lookup::Gt | Lookup::Gte | Lookup::Lt | Lookup::Lte => {
                    let op = match lookup {
                        Lookup::Gt => ">",
                        Lookup::Gte => ">=",
                        Lookup::Lt => "<",
                        _ => "<=",
                    };
                    format!("{} {} {}", col, op, q.placeholder(value.clone(), cast))
                }
                Lookup::In => {
                    let items = value.as_array().cloned().unwrap_or_default();
                    if items.is_empty() {
                        return "FALSE".into();
                    }
                    let phs: Vec<String> = items.into_iter().map(|v| q.placeholder(v, cast)).collect();
                    format!("{} IN ({})", col, phs.join(", "))
                }
                Lookup::IsNull => {
                    if value.as_bool().unwrap_or(false) {
                        format!("{} IS NULL", col)
                    } else {
                        format!("{} IS NOT NULL", col)
                    }
                }
            }
        }
        Condition::Related {
            column,
            related,
            related_column,
            inner,
        } => {
            let inner_sql = condition_sql(related, inner, q);
            format!(
                "{} IN (SELECT {} FROM {} WHERE {})",
                quoted(column),
                quoted(related_column),
                entity_table(related),
                inner_sql
            )
        }
    }
}

fn where_clause(entity: &ResolvedEntity, conditions: &[Condition], q: &mut QueryBuf) -> String {
    let parts: Vec<String> = conditions.iter().map(|c| condition_sql(entity, c, q)).collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// SELECT by primary key within the given scope.
pub fn select_by_id(entity: &ResolvedEntity, scope: &[Condition], id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut conditions = vec![Condition::eq(entity.pk_column.clone(), id.clone())];
    conditions.extend_from_slice(scope);
    let where_sql = where_clause(entity, &conditions, &mut q);
    q.sql = format!("SELECT {} FROM {}{}", select_column_list(entity), entity_table(entity), where_sql);
    q
}

/// SELECT list with conditions, ordering (primary key as tie-breaker) and LIMIT/OFFSET.
pub fn select_list(entity: &ResolvedEntity, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(entity, &query.conditions, &mut q);
    let pk = quoted(&entity.pk_column);
    let order_clause = match &query.order {
        Some(o) if o.column != entity.pk_column => format!(
            " ORDER BY {} {}, {}",
            quoted(&o.column),
            if o.descending { "DESC" } else { "ASC" },
            pk
        ),
        Some(o) => format!(" ORDER BY {} {}", pk, if o.descending { "DESC" } else { "ASC" }),
        None => format!(" ORDER BY {}", pk),
    };
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = if query.offset > 0 {
        format!(" OFFSET {}", query.offset)
    } else {
        String::new()
    };
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        select_column_list(entity),
        entity_table(entity),
        where_sql,
        order_clause,
        limit_clause,
        offset_clause
    );
    q
}

pub fn count(entity: &ResolvedEntity, conditions: &[Condition]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(entity, conditions, &mut q);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", entity_table(entity), where_sql);
    q
}

/// INSERT the entity columns present in `values`; absent columns take their DB default.
pub fn insert(entity: &ResolvedEntity, values: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &entity.columns {
        let Some(val) = values.get(&c.name) else { continue };
        if c.pk_type.is_some() && val.is_null() {
            continue;
        }
        placeholders.push(q.placeholder(val.clone(), &c.pg_type));
        cols.push(quoted(&c.name));
    }
    let table = entity_table(entity);
    let returning = select_column_list(entity);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by id: SET only entity columns present in `values`; `updated_at` is touched when the
/// table has it.
pub fn update(entity: &ResolvedEntity, id: &Value, values: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = entity_table(entity);
    let mut sets = Vec::new();
    for c in &entity.columns {
        if c.pk_type.is_some() {
            continue;
        }
        let Some(val) = values.get(&c.name) else { continue };
        let rhs = q.placeholder(val.clone(), &c.pg_type);
        sets.push(format!("{} = {}", quoted(&c.name), rhs));
    }
    if entity.column("updated_at").is_some() && !values.contains_key("updated_at") {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    let pk_ph = q.placeholder(id.clone(), cast_of(entity, &entity.pk_column));
    let returning = select_column_list(entity);
    q.sql = if sets.is_empty() {
        format!("SELECT {} FROM {} WHERE {} = {}", returning, table, quoted(&entity.pk_column), pk_ph)
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
            table,
            sets.join(", "),
            quoted(&entity.pk_column),
            pk_ph,
            returning
        )
    };
    q
}

/// DELETE by id.
pub fn delete(entity: &ResolvedEntity, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk_ph = q.placeholder(id.clone(), cast_of(entity, &entity.pk_column));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        entity_table(entity),
        quoted(&entity.pk_column),
        pk_ph,
        quoted(&entity.pk_column)
    );
    q
}

fn through_table(rel: &ManyToManyRelation) -> String {
    qualified_table(&rel.through_schema, &rel.through_table)
}

/// Related ids linked to `id` through the relation's table.
pub fn select_link_ids(rel: &ManyToManyRelation, our_cast: &str, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id.clone(), our_cast);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {} ORDER BY {}",
        quoted(&rel.their_column),
        through_table(rel),
        quoted(&rel.our_column),
        ph,
        quoted(&rel.their_column)
    );
    q
}

pub fn delete_links(rel: &ManyToManyRelation, our_cast: &str, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id.clone(), our_cast);
    q.sql = format!("DELETE FROM {} WHERE {} = {}", through_table(rel), quoted(&rel.our_column), ph);
    q
}

pub fn insert_link(
    rel: &ManyToManyRelation,
    our_cast: &str,
    their_cast: &str,
    id: &Value,
    related_id: &Value,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ours = q.placeholder(id.clone(), our_cast);
    let theirs = q.placeholder(related_id.clone(), their_cast);
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {})",
        through_table(rel),
        quoted(&rel.our_column),
        quoted(&rel.their_column),
        ours,
        theirs
    );
    q
}
