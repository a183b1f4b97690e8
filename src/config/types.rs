//! Raw config types matching the JSON files (schemas, tables, columns, relationships, api_entities).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKeyConfig {
    Single(String),
    Composite(Vec<String>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    pub id: String,
    #[serde(default)]
    pub schema_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub primary_key: PrimaryKeyConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    pub fn name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s.as_str(),
            ColumnTypeConfig::Parameterized { name, .. } => name.as_str(),
        }
    }

    /// First type parameter, e.g. the length of `varchar(120)`.
    pub fn length(&self) -> Option<u32> {
        match self {
            ColumnTypeConfig::Parameterized { params: Some(p), .. } => p.first().copied(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub id: String,
    pub table_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Database default expression or literal; presence makes the field optional on create.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Non-editable columns are never form fields.
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Foreign key from `from_column_id` to `to_column_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub id: String,
    pub from_table_id: String,
    pub from_column_id: String,
    pub to_table_id: String,
    pub to_column_id: String,
    /// Forward field name on the owning model. Defaults to the FK column without its `_id` suffix.
    #[serde(default)]
    pub name: Option<String>,
    /// Reverse accessor on the related model. Defaults to `<from table name>_set`.
    #[serde(default)]
    pub related_name: Option<String>,
}

/// Many-to-many link stored in a through table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManyToManyConfig {
    pub id: String,
    pub name: String,
    pub from_table_id: String,
    pub to_table_id: String,
    #[serde(default)]
    pub schema_id: Option<String>,
    pub through_table: String,
    pub from_column: String,
    pub to_column: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

/// Field list entry: a plain name or `[name, [subfields...]]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    Name(String),
    Nested(String, Vec<FieldSpec>),
}

/// Per-model override block for field exposure. Absent entries keep the derived defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RestMetaConfig {
    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,
    #[serde(default)]
    pub default_list_fields: Option<Vec<FieldSpec>>,
    #[serde(default)]
    pub default_obj_fields: Option<Vec<FieldSpec>>,
    #[serde(default)]
    pub selectbox_fields: Option<Vec<FieldSpec>>,
    #[serde(default)]
    pub image_field: Option<String>,
}

/// Roles allowed per operation. `"*"` admits any active user; a missing operation admits any
/// active user as well.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PermissionConfig {
    #[serde(default)]
    pub read: Option<Vec<String>>,
    #[serde(default)]
    pub create: Option<Vec<String>>,
    #[serde(default)]
    pub update: Option<Vec<String>>,
    #[serde(default)]
    pub delete: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiEntityConfig {
    pub entity_id: String,
    pub path_segment: String,
    /// Subset of read, create, update, delete.
    pub operations: Vec<String>,
    /// Restricts form fields to these names.
    #[serde(default)]
    pub form_fields: Option<Vec<String>>,
    #[serde(default)]
    pub form_exclude: Vec<String>,
    /// Column rendered as the object's display name.
    #[serde(default)]
    pub display_field: Option<String>,
    #[serde(default)]
    pub permissions: PermissionConfig,
    #[serde(default)]
    pub rest_meta: Option<RestMetaConfig>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}

/// All config types in one struct for in-memory loading.
#[derive(Clone, Debug, Default)]
pub struct FullConfig {
    pub schemas: Vec<SchemaConfig>,
    pub tables: Vec<TableConfig>,
    pub columns: Vec<ColumnConfig>,
    pub relationships: Vec<RelationshipConfig>,
    pub many_to_many: Vec<ManyToManyConfig>,
    pub api_entities: Vec<ApiEntityConfig>,
}
