//! PostgreSQL store: the SQL builder executed through one sqlx transaction.

use crate::config::{ManyToManyRelation, ResolvedEntity};
use crate::error::AppError;
use crate::filter::{Condition, ListQuery};
use crate::sql::{self, PgBindValue, QueryBuf};
use crate::store::{Row, Store, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn fetch_optional(&mut self, q: &QueryBuf) -> Result<Option<Row>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let row = query.fetch_optional(&mut *self.tx).await?;
        Ok(row.map(|r| row_to_json(&r)))
    }

    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Row>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let rows = query.fetch_all(&mut *self.tx).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let done = query.execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn fetch(&mut self, entity: &ResolvedEntity, scope: &[Condition], id: &Value) -> Result<Option<Row>, AppError> {
        let q = sql::select_by_id(entity, scope, id);
        self.fetch_optional(&q).await
    }

    async fn select(&mut self, entity: &ResolvedEntity, query: &ListQuery) -> Result<Vec<Row>, AppError> {
        let q = sql::select_list(entity, query);
        self.fetch_all(&q).await
    }

    async fn count(&mut self, entity: &ResolvedEntity, conditions: &[Condition]) -> Result<u64, AppError> {
        let q = sql::count(entity, conditions);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let n = query.fetch_one(&mut *self.tx).await?;
        Ok(n.max(0) as u64)
    }

    async fn insert(&mut self, entity: &ResolvedEntity, values: &Row) -> Result<Row, AppError> {
        let q = sql::insert(entity, values);
        self.fetch_optional(&q)
            .await?
            .ok_or_else(|| AppError::Db(sqlx::Error::RowNotFound))
    }

    async fn update(&mut self, entity: &ResolvedEntity, id: &Value, values: &Row) -> Result<Option<Row>, AppError> {
        let q = sql::update(entity, id, values);
        self.fetch_optional(&q).await
    }

    async fn delete(&mut self, entity: &ResolvedEntity, id: &Value) -> Result<bool, AppError> {
        let q = sql::delete(entity, id);
        Ok(self.fetch_optional(&q).await?.is_some())
    }

    async fn link_ids(
        &mut self,
        entity: &ResolvedEntity,
        relation: &ManyToManyRelation,
        _related: &ResolvedEntity,
        id: &Value,
    ) -> Result<Vec<Value>, AppError> {
        let q = sql::select_link_ids(relation, &pk_cast(entity), id);
        let rows = self.fetch_all(&q).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut r| r.remove(&relation.their_column))
            .collect())
    }

    async fn set_link_ids(
        &mut self,
        entity: &ResolvedEntity,
        relation: &ManyToManyRelation,
        related: &ResolvedEntity,
        id: &Value,
        related_ids: &[Value],
    ) -> Result<(), AppError> {
        let ours = pk_cast(entity);
        let theirs = pk_cast(related);
        self.execute(&sql::delete_links(relation, &ours, id)).await?;
        for related_id in related_ids {
            self.execute(&sql::insert_link(relation, &ours, &theirs, id, related_id))
                .await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let PgTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        let PgTransaction { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

fn pk_cast(entity: &ResolvedEntity) -> String {
    entity
        .column(&entity.pk_column)
        .map(|c| c.pg_type.clone())
        .unwrap_or_else(|| "text".into())
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        let v = cell_to_value(row, name);
        map.insert(name.to_string(), v);
    }
    map
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return j;
    }
    Value::Null
}
