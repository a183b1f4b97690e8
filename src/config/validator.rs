//! Config validation: referential integrity and API consistency.

use crate::config::{FullConfig, PrimaryKeyConfig};
use crate::error::ConfigError;
use std::collections::HashSet;

const OPERATIONS: &[&str] = &["read", "create", "update", "delete"];

/// Default schema id when configs omit schema_id.
pub fn default_schema_id(config: &FullConfig) -> Result<&str, ConfigError> {
    config
        .schemas
        .first()
        .map(|s| s.id.as_str())
        .ok_or_else(|| ConfigError::Validation("at least one schema required".into()))
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let default_sid = default_schema_id(config)?;
    let schema_ids: HashSet<&str> = config.schemas.iter().map(|s| s.id.as_str()).collect();
    let table_ids: HashSet<&str> = config.tables.iter().map(|t| t.id.as_str()).collect();
    let column_ids: HashSet<&str> = config.columns.iter().map(|c| c.id.as_str()).collect();

    for t in &config.tables {
        let sid = t.schema_id.as_deref().unwrap_or(default_sid);
        if !schema_ids.contains(sid) {
            return Err(ConfigError::MissingReference {
                kind: "schema",
                id: sid.to_string(),
            });
        }
        let pk = match &t.primary_key {
            PrimaryKeyConfig::Single(s) => s.as_str(),
            PrimaryKeyConfig::Composite(v) if v.len() == 1 => v[0].as_str(),
            PrimaryKeyConfig::Composite(_) => {
                return Err(ConfigError::Validation(format!(
                    "table {}: composite primary keys are not supported",
                    t.id
                )))
            }
        };
        let has_pk = config.columns.iter().any(|c| c.table_id == t.id && c.name == pk);
        if !has_pk {
            return Err(ConfigError::InvalidPrimaryKey {
                table_id: t.id.clone(),
                column: pk.to_string(),
            });
        }
    }

    for c in &config.columns {
        if !table_ids.contains(c.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: c.table_id.clone(),
            });
        }
    }

    for r in &config.relationships {
        if !table_ids.contains(r.from_table_id.as_str())
            || !table_ids.contains(r.to_table_id.as_str())
            || !column_ids.contains(r.from_column_id.as_str())
            || !column_ids.contains(r.to_column_id.as_str())
        {
            return Err(ConfigError::MissingReference {
                kind: "relationship",
                id: r.id.clone(),
            });
        }
    }

    for m in &config.many_to_many {
        let sid = m.schema_id.as_deref().unwrap_or(default_sid);
        if !schema_ids.contains(sid)
            || !table_ids.contains(m.from_table_id.as_str())
            || !table_ids.contains(m.to_table_id.as_str())
        {
            return Err(ConfigError::MissingReference {
                kind: "many_to_many",
                id: m.id.clone(),
            });
        }
    }

    let mut path_segments = HashSet::new();
    for api in &config.api_entities {
        if !table_ids.contains(api.entity_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: api.entity_id.clone(),
            });
        }
        if !path_segments.insert(api.path_segment.as_str()) {
            return Err(ConfigError::DuplicatePathSegment(api.path_segment.clone()));
        }
        if let Some(op) = api.operations.iter().find(|o| !OPERATIONS.contains(&o.as_str())) {
            return Err(ConfigError::Validation(format!(
                "api entity {}: unknown operation '{}'",
                api.path_segment, op
            )));
        }
        for (field, rule) in &api.validation {
            if let Some(pattern) = &rule.pattern {
                if let Err(e) = regex::Regex::new(pattern) {
                    return Err(ConfigError::Validation(format!(
                        "api entity {}: invalid pattern for {}: {}",
                        api.path_segment, field, e
                    )));
                }
            }
        }
    }

    Ok(())
}
