use super::indexed_error;
use crate::config::ResolvedEntity;
use crate::error::{AppError, ErrorMap};
use crate::filter::{Condition, ListQuery};
use crate::form::validation::LIST_REQUIRED_MESSAGE;
use crate::form::FormFields;
use crate::resource::RestContext;
use crate::store::Row;
use serde_json::Value;

/// Writes reverse relation lists submitted with a saved instance and reconciles the stored
/// children to exactly the submitted set.
pub struct DataPostprocessor<'f> {
    entity: &'f ResolvedEntity,
    fields: &'f FormFields,
    inst: &'f Row,
}

impl<'f> DataPostprocessor<'f> {
    pub fn new(entity: &'f ResolvedEntity, fields: &'f FormFields, inst: &'f Row) -> Self {
        DataPostprocessor { entity, fields, inst }
    }

    pub async fn process_data(&self, cx: &mut RestContext<'_>, data: &Row) -> Result<(), AppError> {
        let mut errors = ErrorMap::new();

        for (key, value) in data {
            if self.fields.contains(key) {
                continue;
            }
            let Some(rel) = self.entity.reverse(key) else {
                continue;
            };
            let Some(resource) = cx.registry.resource_for_table(&rel.child_table_id) else {
                continue;
            };
            let Value::Array(items) = value else {
                errors.insert(key.clone(), Value::String(LIST_REQUIRED_MESSAGE.into()));
                continue;
            };
            let child = resource.entity().clone();
            let parent_key = self.inst.get(&rel.our_column).cloned().unwrap_or(Value::Null);

            let mut kept = Vec::with_capacity(items.len());
            let mut item_errors = Vec::new();
            for (i, item) in items.iter().enumerate() {
                let mut obj = match item {
                    Value::Object(obj) => obj.clone(),
                    scalar => {
                        let mut obj = Row::new();
                        obj.insert(child.pk_column.clone(), scalar.clone());
                        obj
                    }
                };
                obj.insert(rel.child_field.clone(), parent_key.clone());
                match resource.create_or_update(cx, obj).await {
                    Ok(saved) => kept.push(saved.get(&child.pk_column).cloned().unwrap_or(Value::Null)),
                    Err(e) if e.is_collectable() => item_errors.push(indexed_error(&e, i + 1)),
                    Err(e) => return Err(e),
                }
            }

            let query = ListQuery {
                conditions: vec![Condition::eq(rel.child_column.clone(), parent_key)],
                ..Default::default()
            };
            let existing = cx.tx.select(&child, &query).await?;
            for row in existing {
                let pk = row.get(&child.pk_column).cloned().unwrap_or(Value::Null);
                if kept.contains(&pk) {
                    continue;
                }
                if resource.has_delete_permission(cx.request, Some(&row)) {
                    resource.delete_instance(cx, &row).await?;
                }
            }

            if !item_errors.is_empty() {
                errors.insert(key.clone(), Value::Array(item_errors));
            }
        }

        if !errors.is_empty() {
            return Err(AppError::DataInvalid(errors));
        }
        Ok(())
    }
}
