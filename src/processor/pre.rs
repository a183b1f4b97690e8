use super::indexed_error;
use crate::config::ResolvedEntity;
use crate::error::{AppError, ErrorMap};
use crate::form::FormFields;
use crate::resource::RestContext;
use crate::store::Row;
use serde_json::Value;

const FK_SUFFIX: &str = "_id";

/// Resolves nested objects submitted for foreign key and many-to-many fields into primary keys
/// by creating or updating them through the related resource.
pub struct DataPreprocessor<'f> {
    entity: &'f ResolvedEntity,
    fields: &'f FormFields,
}

impl<'f> DataPreprocessor<'f> {
    pub fn new(entity: &'f ResolvedEntity, fields: &'f FormFields) -> Self {
        DataPreprocessor { entity, fields }
    }

    /// `<relation>_id` keys become the bare relation name when that names a forward relation.
    /// When both spellings are submitted the bare key wins.
    pub fn clear_data(&self, data: Row) -> Row {
        let mut cleared = Row::new();
        let mut suffixed = Vec::new();
        for (key, value) in data {
            match key.strip_suffix(FK_SUFFIX) {
                Some(bare) if self.entity.forward(bare).is_some() => suffixed.push((bare.to_string(), value)),
                _ => {
                    cleared.insert(key, value);
                }
            }
        }
        for (bare, value) in suffixed {
            cleared.entry(bare).or_insert(value);
        }
        cleared
    }

    pub async fn process_data(&self, cx: &mut RestContext<'_>, data: Row) -> Result<Row, AppError> {
        let mut data = self.clear_data(data);
        let mut errors = ErrorMap::new();
        let keys: Vec<String> = data.keys().cloned().collect();

        for key in keys {
            let Some(field) = self.fields.get(&key) else {
                continue;
            };
            let (Some(related), Some(related_key)) = (field.queryset(), field.related_key()) else {
                continue;
            };
            let Some(resource) = cx.registry.resource_for_table(&related.table_id) else {
                continue;
            };
            match data.remove(&key) {
                Some(Value::Array(items)) => {
                    let mut keys = Vec::with_capacity(items.len());
                    let mut item_errors = Vec::new();
                    for (i, item) in items.into_iter().enumerate() {
                        match item {
                            Value::Object(obj) => match resource.create_or_update(cx, obj).await {
                                Ok(inst) => keys.push(inst.get(related_key).cloned().unwrap_or(Value::Null)),
                                Err(e) if e.is_collectable() => item_errors.push(indexed_error(&e, i + 1)),
                                Err(e) => return Err(e),
                            },
                            scalar => keys.push(scalar),
                        }
                    }
                    data.insert(key.clone(), Value::Array(keys));
                    if !item_errors.is_empty() {
                        errors.insert(key, Value::Array(item_errors));
                    }
                }
                Some(Value::Object(obj)) => match resource.create_or_update(cx, obj).await {
                    Ok(inst) => {
                        data.insert(key, inst.get(related_key).cloned().unwrap_or(Value::Null));
                    }
                    Err(e) if e.is_collectable() => {
                        errors.insert(key, Value::Object(e.errors().unwrap_or_default()));
                    }
                    Err(e) => return Err(e),
                },
                Some(other) => {
                    data.insert(key, other);
                }
                None => {}
            }
        }

        if !errors.is_empty() {
            return Err(AppError::DataInvalid(errors));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use serde_json::json;

    fn book() -> ResolvedEntity {
        let cfg = FullConfig {
            schemas: serde_json::from_value(json!([{ "id": "s", "name": "public" }])).unwrap(),
            tables: serde_json::from_value(json!([
                { "id": "author", "name": "author", "primary_key": "id" },
                { "id": "book", "name": "book", "primary_key": "id" }
            ]))
            .unwrap(),
            columns: serde_json::from_value(json!([
                { "id": "a.id", "table_id": "author", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
                { "id": "b.id", "table_id": "book", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
                { "id": "b.author", "table_id": "book", "name": "author_id", "type": "bigint" },
                { "id": "b.isbn", "table_id": "book", "name": "isbn_id", "type": "text" }
            ]))
            .unwrap(),
            relationships: serde_json::from_value(json!([
                { "id": "r", "from_table_id": "book", "from_column_id": "b.author",
                  "to_table_id": "author", "to_column_id": "a.id" }
            ]))
            .unwrap(),
            many_to_many: Vec::new(),
            api_entities: serde_json::from_value(json!([
                { "entity_id": "book", "path_segment": "books", "operations": ["read"] }
            ]))
            .unwrap(),
        };
        let model = resolve(&cfg).unwrap();
        model.entity_by_table("book").unwrap().as_ref().clone()
    }

    fn data(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn fk_suffix_only_stripped_for_relations() {
        let book = book();
        let fields = FormFields::default();
        let cleared = DataPreprocessor::new(&book, &fields).clear_data(data(json!({ "author_id": 3, "isbn_id": "x" })));
        assert_eq!(cleared, data(json!({ "author": 3, "isbn_id": "x" })));
    }

    #[test]
    fn bare_relation_key_wins() {
        let book = book();
        let fields = FormFields::default();
        let cleared = DataPreprocessor::new(&book, &fields).clear_data(data(json!({ "author": 1, "author_id": 2 })));
        assert_eq!(cleared, data(json!({ "author": 1 })));
    }
}
