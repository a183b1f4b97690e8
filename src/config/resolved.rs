//! Resolved entity model: config validated and flattened for runtime use.

use crate::config::{PermissionConfig, RestOptions, ValidationRule};
use std::collections::HashMap;
use std::sync::Arc;

/// Primary key type for parsing path/body ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

/// Value kind used for form coercion and filter values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Numeric,
    Boolean,
    Uuid,
    Text,
    Json,
    Timestamp,
    Date,
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub pk_type: Option<PkType>,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Whether the column has a DB default (e.g. gen_random_uuid(), NOW()).
    pub has_default: bool,
    pub editable: bool,
    pub max_length: Option<u32>,
    /// PostgreSQL type every bound value is cast to (e.g. "bigint", "timestamptz").
    pub pg_type: String,
}

impl ColumnInfo {
    /// `created_at` / `updated_at` maintained by the store, never submitted through forms.
    pub fn is_auto_timestamp(&self) -> bool {
        self.kind == ColumnKind::Timestamp
            && self.has_default
            && matches!(self.name.as_str(), "created_at" | "updated_at")
    }
}

/// Foreign key owned by this entity. `name` is the form/API field, `column` the stored value.
#[derive(Clone, Debug)]
pub struct ForwardRelation {
    pub name: String,
    pub column: String,
    pub related_table_id: String,
    pub related_column: String,
}

/// Children of another entity pointing back at this one.
#[derive(Clone, Debug)]
pub struct ReverseRelation {
    pub name: String,
    pub child_table_id: String,
    /// Forward field name on the child.
    pub child_field: String,
    pub child_column: String,
    /// Our column the child FK targets.
    pub our_column: String,
}

#[derive(Clone, Debug)]
pub struct ManyToManyRelation {
    pub name: String,
    pub related_table_id: String,
    pub through_schema: String,
    pub through_table: String,
    pub our_column: String,
    pub their_column: String,
    pub required: bool,
}

#[derive(Clone, Debug)]
pub struct ResolvedEntity {
    pub table_id: String,
    pub schema_name: String,
    pub table_name: String,
    pub path_segment: String,
    /// Whether an api entity routes this table.
    pub exposed: bool,
    pub pk_column: String,
    pub pk_type: PkType,
    pub columns: Vec<ColumnInfo>,
    pub forward: Vec<ForwardRelation>,
    pub reverse: Vec<ReverseRelation>,
    pub many_to_many: Vec<ManyToManyRelation>,
    pub operations: Vec<String>,
    pub form_fields: Option<Vec<String>>,
    pub form_exclude: Vec<String>,
    pub display_field: Option<String>,
    pub permissions: PermissionConfig,
    pub validation: HashMap<String, ValidationRule>,
    pub rest_options: RestOptions,
}

impl ResolvedEntity {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn forward(&self, name: &str) -> Option<&ForwardRelation> {
        self.forward.iter().find(|r| r.name == name)
    }

    pub fn forward_by_column(&self, column: &str) -> Option<&ForwardRelation> {
        self.forward.iter().find(|r| r.column == column)
    }

    pub fn reverse(&self, name: &str) -> Option<&ReverseRelation> {
        self.reverse.iter().find(|r| r.name == name)
    }

    pub fn many_to_many(&self, name: &str) -> Option<&ManyToManyRelation> {
        self.many_to_many.iter().find(|r| r.name == name)
    }

    pub fn allows(&self, operation: &str) -> bool {
        self.operations.iter().any(|o| o == operation)
    }

    /// Names accepted as model fields (ordering, filtering): columns and forward relations.
    pub fn field_names(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.forward.iter().map(|r| r.name.as_str()))
            .collect()
    }

    /// Storage column behind a model field name.
    pub fn column_for_field(&self, field: &str) -> Option<&str> {
        if let Some(c) = self.column(field) {
            return Some(c.name.as_str());
        }
        self.forward(field).map(|r| r.column.as_str())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub entities: Vec<Arc<ResolvedEntity>>,
    pub entity_by_table: HashMap<String, Arc<ResolvedEntity>>,
    pub entity_by_path: HashMap<String, Arc<ResolvedEntity>>,
}

impl ResolvedModel {
    pub fn entity_by_path(&self, path: &str) -> Option<&Arc<ResolvedEntity>> {
        self.entity_by_path.get(path)
    }

    pub fn entity_by_table(&self, table_id: &str) -> Option<&Arc<ResolvedEntity>> {
        self.entity_by_table.get(table_id)
    }
}
