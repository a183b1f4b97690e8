//! Persistence seam: the resource layer only talks to a [`Transaction`] obtained from a [`Store`].

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::{ManyToManyRelation, ResolvedEntity};
use crate::error::AppError;
use crate::filter::{Condition, ListQuery};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One persisted object as column → value.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError>;
}

/// Unit of work. Dropping without commit discards all writes.
#[async_trait]
pub trait Transaction: Send {
    /// Row by primary key, restricted to `scope`.
    async fn fetch(
        &mut self,
        entity: &ResolvedEntity,
        scope: &[Condition],
        id: &Value,
    ) -> Result<Option<Row>, AppError>;

    async fn select(&mut self, entity: &ResolvedEntity, query: &ListQuery) -> Result<Vec<Row>, AppError>;

    async fn count(&mut self, entity: &ResolvedEntity, conditions: &[Condition]) -> Result<u64, AppError>;

    /// Insert and return the stored row (defaults and generated key filled in).
    async fn insert(&mut self, entity: &ResolvedEntity, values: &Row) -> Result<Row, AppError>;

    async fn update(&mut self, entity: &ResolvedEntity, id: &Value, values: &Row) -> Result<Option<Row>, AppError>;

    async fn delete(&mut self, entity: &ResolvedEntity, id: &Value) -> Result<bool, AppError>;

    /// Ids linked to `id` through a many-to-many relation.
    async fn link_ids(
        &mut self,
        entity: &ResolvedEntity,
        relation: &ManyToManyRelation,
        related: &ResolvedEntity,
        id: &Value,
    ) -> Result<Vec<Value>, AppError>;

    /// Replace the link set of `id` with `related_ids`.
    async fn set_link_ids(
        &mut self,
        entity: &ResolvedEntity,
        relation: &ManyToManyRelation,
        related: &ResolvedEntity,
        id: &Value,
        related_ids: &[Value],
    ) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
