//! Load config from in-memory structs or from a directory of JSON files.

use crate::config::resolved::{
    ColumnInfo, ColumnKind, ForwardRelation, ManyToManyRelation, PkType, ResolvedEntity, ResolvedModel,
    ReverseRelation,
};
use crate::config::types::*;
use crate::config::{default_schema_id, validate, RestOptions};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

const FK_SUFFIX: &str = "_id";

/// Build resolved model from full config. Every table resolves to an entity; only tables with an
/// api entity are reachable by path.
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;
    let default_sid = default_schema_id(config)?;

    let schemas_by_id: HashMap<_, _> = config.schemas.iter().map(|s| (s.id.as_str(), s)).collect();
    let tables_by_id: HashMap<_, _> = config.tables.iter().map(|t| (t.id.as_str(), t)).collect();
    let columns_by_table: HashMap<&str, Vec<&ColumnConfig>> =
        config.columns.iter().fold(HashMap::new(), |mut m, c| {
            m.entry(c.table_id.as_str()).or_default().push(c);
            m
        });
    let column_id_to_name: HashMap<&str, &str> =
        config.columns.iter().map(|c| (c.id.as_str(), c.name.as_str())).collect();
    let api_by_table: HashMap<&str, &ApiEntityConfig> =
        config.api_entities.iter().map(|a| (a.entity_id.as_str(), a)).collect();

    let mut model = ResolvedModel::default();

    for table in &config.tables {
        let table_sid = table.schema_id.as_deref().unwrap_or(default_sid);
        let schema = schemas_by_id
            .get(table_sid)
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "schema",
                id: table_sid.to_string(),
            })?;
        let table_columns = columns_by_table.get(table.id.as_str()).map(|v| v.as_slice()).unwrap_or(&[]);
        let pk_name = primary_key_name(table);
        let pk_col = table_columns
            .iter()
            .find(|c| c.name == pk_name)
            .ok_or_else(|| ConfigError::InvalidPrimaryKey {
                table_id: table.id.clone(),
                column: pk_name.to_string(),
            })?;
        let pk_type = infer_pk_type(pk_col);

        let columns: Vec<ColumnInfo> = table_columns
            .iter()
            .map(|c| {
                let is_pk = c.name == pk_name;
                ColumnInfo {
                    name: c.name.clone(),
                    pk_type: if is_pk { Some(pk_type.clone()) } else { None },
                    kind: infer_column_kind(&c.type_),
                    nullable: c.nullable,
                    has_default: c.default.is_some(),
                    editable: c.editable,
                    max_length: c.type_.length(),
                    pg_type: column_pg_type_name(&c.type_),
                }
            })
            .collect();

        let mut forward = Vec::new();
        let mut reverse = Vec::new();
        for rel in &config.relationships {
            let (Some(from_col), Some(to_col)) = (
                column_id_to_name.get(rel.from_column_id.as_str()),
                column_id_to_name.get(rel.to_column_id.as_str()),
            ) else {
                continue;
            };
            if rel.from_table_id == table.id {
                forward.push(ForwardRelation {
                    name: forward_field_name(rel, from_col),
                    column: from_col.to_string(),
                    related_table_id: rel.to_table_id.clone(),
                    related_column: to_col.to_string(),
                });
            }
            if rel.to_table_id == table.id {
                let child_table_name = tables_by_id
                    .get(rel.from_table_id.as_str())
                    .map(|t| t.name.as_str())
                    .unwrap_or(rel.from_table_id.as_str());
                reverse.push(ReverseRelation {
                    name: rel
                        .related_name
                        .clone()
                        .unwrap_or_else(|| format!("{}_set", child_table_name)),
                    child_table_id: rel.from_table_id.clone(),
                    child_field: forward_field_name(rel, from_col),
                    child_column: from_col.to_string(),
                    our_column: to_col.to_string(),
                });
            }
        }

        let many_to_many: Vec<ManyToManyRelation> = config
            .many_to_many
            .iter()
            .filter(|m| m.from_table_id == table.id)
            .map(|m| {
                let sid = m.schema_id.as_deref().unwrap_or(default_sid);
                let through_schema = schemas_by_id.get(sid).map(|s| s.name.clone()).unwrap_or_else(|| schema.name.clone());
                ManyToManyRelation {
                    name: m.name.clone(),
                    related_table_id: m.to_table_id.clone(),
                    through_schema,
                    through_table: m.through_table.clone(),
                    our_column: m.from_column.clone(),
                    their_column: m.to_column.clone(),
                    required: m.required,
                }
            })
            .collect();

        check_unique_fields(&table.id, &columns, &forward, &reverse, &many_to_many)?;

        let model_fields: Vec<FieldSpec> = columns
            .iter()
            .map(|c| match forward.iter().find(|r| r.column == c.name) {
                Some(rel) => {
                    let related_pk = tables_by_id
                        .get(rel.related_table_id.as_str())
                        .map(|t| primary_key_name(t).to_string())
                        .unwrap_or_else(|| rel.related_column.clone());
                    FieldSpec::Nested(
                        rel.name.clone(),
                        vec![
                            FieldSpec::Name(related_pk),
                            FieldSpec::Name("_obj_name".into()),
                            FieldSpec::Name("_rest_links".into()),
                        ],
                    )
                }
                None => FieldSpec::Name(c.name.clone()),
            })
            .collect();

        let api = api_by_table.get(table.id.as_str()).copied();
        let rest_options = RestOptions::new(model_fields, pk_name, api.and_then(|a| a.rest_meta.as_ref()));

        let entity = ResolvedEntity {
            table_id: table.id.clone(),
            schema_name: schema.name.clone(),
            table_name: table.name.clone(),
            path_segment: api.map(|a| a.path_segment.clone()).unwrap_or_else(|| table.name.clone()),
            exposed: api.is_some(),
            pk_column: pk_name.to_string(),
            pk_type,
            columns,
            forward,
            reverse,
            many_to_many,
            operations: api.map(|a| a.operations.clone()).unwrap_or_default(),
            form_fields: api.and_then(|a| a.form_fields.clone()),
            form_exclude: api.map(|a| a.form_exclude.clone()).unwrap_or_default(),
            display_field: api.and_then(|a| a.display_field.clone()),
            permissions: api.map(|a| a.permissions.clone()).unwrap_or_default(),
            validation: api.map(|a| a.validation.clone()).unwrap_or_default(),
            rest_options,
        };
        let entity = Arc::new(entity);
        if entity.exposed {
            model.entity_by_path.insert(entity.path_segment.clone(), entity.clone());
        }
        model.entity_by_table.insert(entity.table_id.clone(), entity.clone());
        model.entities.push(entity);
    }

    Ok(model)
}

fn primary_key_name(table: &TableConfig) -> &str {
    match &table.primary_key {
        PrimaryKeyConfig::Single(s) => s.as_str(),
        PrimaryKeyConfig::Composite(v) => v.first().map(String::as_str).unwrap_or("id"),
    }
}

/// Forward field name: explicit name, else the FK column without its `_id` suffix.
fn forward_field_name(rel: &RelationshipConfig, from_column: &str) -> String {
    if let Some(name) = &rel.name {
        return name.clone();
    }
    match from_column.strip_suffix(FK_SUFFIX) {
        Some(bare) if !bare.is_empty() => bare.to_string(),
        _ => from_column.to_string(),
    }
}

fn check_unique_fields(
    table_id: &str,
    columns: &[ColumnInfo],
    forward: &[ForwardRelation],
    reverse: &[ReverseRelation],
    many_to_many: &[ManyToManyRelation],
) -> Result<(), ConfigError> {
    let mut seen: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let relation_names = forward
        .iter()
        .filter(|r| r.name != r.column)
        .map(|r| r.name.as_str())
        .chain(reverse.iter().map(|r| r.name.as_str()))
        .chain(many_to_many.iter().map(|r| r.name.as_str()));
    for name in relation_names {
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateField {
                table_id: table_id.to_string(),
                field: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Castable PostgreSQL type for a configured column type.
fn column_pg_type_name(ty: &ColumnTypeConfig) -> String {
    let name = ty.name();
    let lower = name.to_lowercase();
    match lower.as_str() {
        "serial" | "serial4" => "integer".into(),
        "bigserial" | "serial8" => "bigint".into(),
        "smallserial" | "serial2" => "smallint".into(),
        "timestamp with time zone" => "timestamptz".into(),
        "timestamp without time zone" => "timestamp".into(),
        // Schema-qualified custom type (e.g. sample.order_status) keeps its spelling
        _ if name.contains('.') => name.to_string(),
        _ => lower,
    }
}

fn infer_column_kind(ty: &ColumnTypeConfig) -> ColumnKind {
    let lower = ty.name().to_lowercase();
    if lower.contains("uuid") {
        ColumnKind::Uuid
    } else if lower.contains("serial") || lower.contains("int") {
        ColumnKind::Integer
    } else if lower.starts_with("bool") {
        ColumnKind::Boolean
    } else if lower == "real" || lower.starts_with("double") || lower.starts_with("float") {
        ColumnKind::Float
    } else if lower == "numeric" || lower == "decimal" {
        ColumnKind::Numeric
    } else if lower.starts_with("json") {
        ColumnKind::Json
    } else if lower.starts_with("timestamp") || lower == "time" {
        ColumnKind::Timestamp
    } else if lower == "date" {
        ColumnKind::Date
    } else {
        ColumnKind::Text
    }
}

fn infer_pk_type(col: &ColumnConfig) -> PkType {
    let type_lower = col.type_.name().to_lowercase();
    if type_lower.contains("uuid") {
        PkType::Uuid
    } else if type_lower.contains("bigserial") || type_lower.contains("bigint") {
        PkType::BigInt
    } else if type_lower.contains("serial") || type_lower.contains("integer") || type_lower.contains("int") {
        PkType::Int
    } else {
        PkType::Text
    }
}

/// Load full config from `<dir>/{schemas,tables,columns,relationships,many_to_many,api_entities}.json`.
/// Only `tables.json` and `columns.json` are mandatory.
pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let mut schemas: Vec<SchemaConfig> = read_optional(dir, "schemas.json").await?;
    if schemas.is_empty() {
        schemas = vec![SchemaConfig {
            id: "default".into(),
            name: "public".into(),
            comment: None,
        }];
    }
    Ok(FullConfig {
        schemas,
        tables: read_required(dir, "tables.json").await?,
        columns: read_required(dir, "columns.json").await?,
        relationships: read_optional(dir, "relationships.json").await?,
        many_to_many: read_optional(dir, "many_to_many.json").await?,
        api_entities: read_optional(dir, "api_entities.json").await?,
    })
}

async fn read_required<T>(dir: &Path, file: &str) -> Result<Vec<T>, ConfigError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let path = dir.join(file);
    tracing::debug!(path = %path.display(), "loading config");
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

async fn read_optional<T>(dir: &Path, file: &str) -> Result<Vec<T>, ConfigError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    if !tokio::fs::try_exists(dir.join(file)).await.unwrap_or(false) {
        return Ok(Vec::new());
    }
    read_required(dir, file).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> FullConfig {
        let tables: Vec<TableConfig> = serde_json::from_value(json!([
            { "id": "t_author", "name": "author", "primary_key": "id" },
            { "id": "t_book", "name": "book", "primary_key": "id" }
        ]))
        .unwrap();
        let columns: Vec<ColumnConfig> = serde_json::from_value(json!([
            { "id": "a_id", "table_id": "t_author", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
            { "id": "a_name", "table_id": "t_author", "name": "name", "type": { "name": "varchar", "params": [80] }, "nullable": false },
            { "id": "b_id", "table_id": "t_book", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
            { "id": "b_title", "table_id": "t_book", "name": "title", "type": "text", "nullable": false },
            { "id": "b_author", "table_id": "t_book", "name": "author_id", "type": "bigint", "nullable": true }
        ]))
        .unwrap();
        let relationships: Vec<RelationshipConfig> = serde_json::from_value(json!([
            { "id": "r1", "from_table_id": "t_book", "from_column_id": "b_author",
              "to_table_id": "t_author", "to_column_id": "a_id", "related_name": "books" }
        ]))
        .unwrap();
        let api_entities: Vec<ApiEntityConfig> = serde_json::from_value(json!([
            { "entity_id": "t_book", "path_segment": "books", "operations": ["read", "create"] }
        ]))
        .unwrap();
        FullConfig {
            schemas: vec![SchemaConfig { id: "s".into(), name: "public".into(), comment: None }],
            tables,
            columns,
            relationships,
            many_to_many: vec![],
            api_entities,
        }
    }

    #[test]
    fn resolves_relations_both_ways() {
        let model = resolve(&config()).unwrap();
        let book = model.entity_by_path("books").unwrap();
        let rel = book.forward("author").unwrap();
        assert_eq!(rel.column, "author_id");
        assert_eq!(book.column_for_field("author"), Some("author_id"));

        let author = model.entity_by_table("t_author").unwrap();
        assert!(!author.exposed);
        let rev = author.reverse("books").unwrap();
        assert_eq!(rev.child_field, "author");
        assert_eq!(author.column("name").unwrap().max_length, Some(80));
    }

    #[test]
    fn default_rest_fields_nest_relations() {
        let model = resolve(&config()).unwrap();
        let book = model.entity_by_path("books").unwrap();
        let author = book.rest_options.fields.get("author").unwrap();
        assert!(author.contains("id") && author.contains("_obj_name") && author.contains("_rest_links"));
        assert!(book.rest_options.fields.contains("title"));
        assert!(!book.rest_options.fields.contains("author_id"));
    }

    #[test]
    fn duplicate_path_segment_rejected() {
        let mut cfg = config();
        let dup = cfg.api_entities[0].clone();
        cfg.api_entities.push(dup);
        assert!(matches!(resolve(&cfg), Err(ConfigError::DuplicatePathSegment(_))));
    }
}
