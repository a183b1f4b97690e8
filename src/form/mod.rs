//! Model forms: the field set a resource accepts, validation of submitted data and the unsaved
//! instance built from it.

pub mod validation;

use crate::config::{ColumnInfo, ForwardRelation, ManyToManyRelation, ResolvedEntity, ResolvedModel, ValidationRule};
use crate::error::{AppError, ErrorMap, RESOURCE_NOT_FOUND_MESSAGE};
use crate::filter::{Condition, ListQuery};
use crate::store::{Row, Transaction};
use serde_json::Value;
use std::sync::Arc;
use validation::{is_empty, LIST_REQUIRED_MESSAGE, REQUIRED_MESSAGE};

#[derive(Clone, Debug)]
pub enum FieldKind {
    Column(ColumnInfo),
    /// Takes a related primary key; stored in the relation's column.
    ForeignKey {
        column: ColumnInfo,
        relation: ForwardRelation,
        related: Arc<ResolvedEntity>,
    },
    /// Takes a list of related primary keys; stored through the link table.
    ManyToMany {
        relation: ManyToManyRelation,
        related: Arc<ResolvedEntity>,
    },
}

#[derive(Clone, Debug)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub rule: Option<ValidationRule>,
}

impl FormField {
    /// Related entity of a queryset-backed field (foreign key or many-to-many).
    pub fn queryset(&self) -> Option<&Arc<ResolvedEntity>> {
        match &self.kind {
            FieldKind::Column(_) => None,
            FieldKind::ForeignKey { related, .. } | FieldKind::ManyToMany { related, .. } => Some(related),
        }
    }

    /// Column of the related entity whose value this field stores.
    pub fn related_key(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Column(_) => None,
            FieldKind::ForeignKey { relation, .. } => Some(relation.related_column.as_str()),
            FieldKind::ManyToMany { related, .. } => Some(related.pk_column.as_str()),
        }
    }
}

/// Ordered form fields.
#[derive(Clone, Debug, Default)]
pub struct FormFields(Vec<FormField>);

impl FormFields {
    pub fn get(&self, name: &str) -> Option<&FormField> {
        self.0.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|f| f.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormField> {
        self.0.iter()
    }
}

/// Builds form field sets for one entity.
pub struct FormFactory<'a> {
    model: &'a ResolvedModel,
    entity: &'a Arc<ResolvedEntity>,
}

impl<'a> FormFactory<'a> {
    pub fn new(model: &'a ResolvedModel, entity: &'a Arc<ResolvedEntity>) -> Self {
        FormFactory { model, entity }
    }

    /// Editable columns, foreign keys and many-to-many relations, restricted to `only` when
    /// given, minus `exclude`. Primary key and auto-managed timestamps never take part.
    pub fn fields(&self, only: Option<&[String]>, exclude: &[String]) -> FormFields {
        let entity = self.entity;
        let rule = |name: &str, column: &str| {
            entity
                .validation
                .get(name)
                .or_else(|| entity.validation.get(column))
                .cloned()
        };
        let mut fields = Vec::new();
        for c in &entity.columns {
            if c.pk_type.is_some() || !c.editable || c.is_auto_timestamp() {
                continue;
            }
            let column_required = !c.nullable && !c.has_default;
            let related = entity
                .forward_by_column(&c.name)
                .and_then(|rel| self.model.entity_by_table(&rel.related_table_id).map(|r| (rel, r)));
            let field = match related {
                Some((relation, related)) => {
                    let rule = rule(&relation.name, &c.name);
                    FormField {
                        name: relation.name.clone(),
                        required: column_required || rule_requires(rule.as_ref()),
                        rule,
                        kind: FieldKind::ForeignKey {
                            column: c.clone(),
                            relation: relation.clone(),
                            related: related.clone(),
                        },
                    }
                }
                None => {
                    let rule = rule(&c.name, &c.name);
                    FormField {
                        name: c.name.clone(),
                        required: column_required || rule_requires(rule.as_ref()),
                        rule,
                        kind: FieldKind::Column(c.clone()),
                    }
                }
            };
            fields.push(field);
        }
        for m in &entity.many_to_many {
            let Some(related) = self.model.entity_by_table(&m.related_table_id) else {
                continue;
            };
            fields.push(FormField {
                name: m.name.clone(),
                required: m.required,
                rule: None,
                kind: FieldKind::ManyToMany {
                    relation: m.clone(),
                    related: related.clone(),
                },
            });
        }
        fields.retain(|f| {
            only.map(|names| names.iter().any(|n| *n == f.name)).unwrap_or(true)
                && !exclude.iter().any(|n| *n == f.name)
        });
        FormFields(fields)
    }
}

fn rule_requires(rule: Option<&ValidationRule>) -> bool {
    rule.and_then(|r| r.required).unwrap_or(false)
}

/// Submitted data bound to a field set and an optional existing instance.
pub struct ModelForm {
    entity: Arc<ResolvedEntity>,
    fields: FormFields,
    instance: Option<Row>,
    data: Row,
    cleaned: Row,
    links: Vec<(ManyToManyRelation, Arc<ResolvedEntity>, Vec<Value>)>,
}

impl ModelForm {
    pub fn new(entity: Arc<ResolvedEntity>, fields: FormFields, instance: Option<Row>, data: Row) -> Self {
        ModelForm {
            entity,
            fields,
            instance,
            data,
            cleaned: Row::new(),
            links: Vec::new(),
        }
    }

    pub fn fields(&self) -> &FormFields {
        &self.fields
    }

    pub fn instance(&self) -> Option<&Row> {
        self.instance.as_ref()
    }

    /// Cleaned values by storage column. Filled by [`ModelForm::is_invalid`].
    pub fn cleaned_data(&self) -> &Row {
        &self.cleaned
    }

    /// Validate and clean the data. Returns the field errors, or `None` when valid.
    pub async fn is_invalid(&mut self, tx: &mut dyn Transaction) -> Result<Option<ErrorMap>, AppError> {
        let mut errors = ErrorMap::new();
        let mut cleaned = Row::new();
        let mut links = Vec::new();
        let creating = self.instance.is_none();

        for field in self.fields.iter() {
            let value = match self.data.get(&field.name) {
                Some(v) => v,
                None => {
                    if creating && field.required {
                        errors.insert(field.name.clone(), Value::String(REQUIRED_MESSAGE.into()));
                    }
                    continue;
                }
            };
            let outcome = match &field.kind {
                FieldKind::Column(column) => clean_column(field, column, value).map(|v| {
                    cleaned.insert(column.name.clone(), v);
                }),
                FieldKind::ForeignKey {
                    column,
                    relation,
                    related,
                } => clean_foreign_key(tx, field, relation, related, value).await?.map(|v| {
                    cleaned.insert(column.name.clone(), v);
                }),
                FieldKind::ManyToMany { relation, related } => {
                    clean_many_to_many(tx, field, related, value).await?.map(|ids| {
                        links.push((relation.clone(), related.clone(), ids));
                    })
                }
            };
            if let Err(message) = outcome {
                errors.insert(field.name.clone(), Value::String(message));
            }
        }

        self.cleaned = cleaned;
        self.links = links;
        Ok(if errors.is_empty() { None } else { Some(errors) })
    }

    /// Unsaved instance: the existing row (if any) with the cleaned values applied. Nothing is
    /// written until the core saves it.
    pub fn save(&self) -> Row {
        let mut obj = self.instance.clone().unwrap_or_default();
        for (k, v) in &self.cleaned {
            obj.insert(k.clone(), v.clone());
        }
        obj
    }

    /// Replace the link sets of the submitted many-to-many fields of the saved object `id`.
    pub async fn save_m2m(&self, tx: &mut dyn Transaction, id: &Value) -> Result<(), AppError> {
        for (relation, related, ids) in &self.links {
            tx.set_link_ids(&self.entity, relation, related, id, ids).await?;
        }
        Ok(())
    }
}

fn clean_column(field: &FormField, column: &ColumnInfo, value: &Value) -> Result<Value, String> {
    if is_empty(value) {
        if field.required {
            return Err(REQUIRED_MESSAGE.into());
        }
        return Ok(match value {
            Value::String(_) if column.kind == crate::config::ColumnKind::Text => value.clone(),
            _ => Value::Null,
        });
    }
    let v = validation::coerce(column.kind, value)?;
    validation::check(column, field.rule.as_ref(), &v)?;
    Ok(v)
}

/// Outer error is a store failure; inner is the field message.
async fn clean_foreign_key(
    tx: &mut dyn Transaction,
    field: &FormField,
    relation: &ForwardRelation,
    related: &ResolvedEntity,
    value: &Value,
) -> Result<Result<Value, String>, AppError> {
    if is_empty(value) {
        return Ok(if field.required {
            Err(REQUIRED_MESSAGE.into())
        } else {
            Ok(Value::Null)
        });
    }
    let kind = related
        .column(&relation.related_column)
        .map(|c| c.kind)
        .unwrap_or(crate::config::ColumnKind::Text);
    let Ok(key) = validation::coerce(kind, value) else {
        return Ok(Err(RESOURCE_NOT_FOUND_MESSAGE.into()));
    };
    let query = ListQuery {
        conditions: vec![Condition::eq(relation.related_column.clone(), key.clone())],
        limit: Some(1),
        ..Default::default()
    };
    if tx.select(related, &query).await?.is_empty() {
        return Ok(Err(RESOURCE_NOT_FOUND_MESSAGE.into()));
    }
    Ok(Ok(key))
}

async fn clean_many_to_many(
    tx: &mut dyn Transaction,
    field: &FormField,
    related: &ResolvedEntity,
    value: &Value,
) -> Result<Result<Vec<Value>, String>, AppError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Null => {
            return Ok(if field.required {
                Err(REQUIRED_MESSAGE.into())
            } else {
                Ok(Vec::new())
            })
        }
        _ => return Ok(Err(LIST_REQUIRED_MESSAGE.into())),
    };
    if items.is_empty() && field.required {
        return Ok(Err(REQUIRED_MESSAGE.into()));
    }
    let kind = related
        .column(&related.pk_column)
        .map(|c| c.kind)
        .unwrap_or(crate::config::ColumnKind::Text);
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let invalid = || {
            let shown = item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string());
            format!("Select a valid choice. {} is not one of the available choices.", shown)
        };
        let Ok(key) = validation::coerce(kind, item) else {
            return Ok(Err(invalid()));
        };
        if tx.fetch(related, &[], &key).await?.is_none() {
            return Ok(Err(invalid()));
        }
        if !ids.contains(&key) {
            ids.push(key);
        }
    }
    Ok(Ok(ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, FullConfig};
    use crate::store::{MemoryStore, Store};
    use serde_json::json;

    fn model() -> ResolvedModel {
        let cfg = FullConfig {
            schemas: serde_json::from_value(json!([{ "id": "s", "name": "public" }])).unwrap(),
            tables: serde_json::from_value(json!([
                { "id": "author", "name": "author", "primary_key": "id" },
                { "id": "book", "name": "book", "primary_key": "id" },
                { "id": "tag", "name": "tag", "primary_key": "id" }
            ]))
            .unwrap(),
            columns: serde_json::from_value(json!([
                { "id": "a.id", "table_id": "author", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
                { "id": "a.name", "table_id": "author", "name": "name", "type": "text", "nullable": false },
                { "id": "b.id", "table_id": "book", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
                { "id": "b.title", "table_id": "book", "name": "title", "type": { "name": "varchar", "params": [20] }, "nullable": false },
                { "id": "b.pages", "table_id": "book", "name": "pages", "type": "integer" },
                { "id": "b.author", "table_id": "book", "name": "author_id", "type": "bigint", "nullable": false },
                { "id": "b.created", "table_id": "book", "name": "created_at", "type": "timestamptz", "nullable": false, "default": "now()" },
                { "id": "t.id", "table_id": "tag", "name": "id", "type": "bigserial", "nullable": false, "default": "auto" },
                { "id": "t.label", "table_id": "tag", "name": "label", "type": "text", "nullable": false }
            ]))
            .unwrap(),
            relationships: serde_json::from_value(json!([
                { "id": "r", "from_table_id": "book", "from_column_id": "b.author",
                  "to_table_id": "author", "to_column_id": "a.id", "related_name": "books" }
            ]))
            .unwrap(),
            many_to_many: serde_json::from_value(json!([
                { "id": "m", "name": "tags", "from_table_id": "book", "to_table_id": "tag",
                  "through_table": "book_tags", "from_column": "book_id", "to_column": "tag_id" }
            ]))
            .unwrap(),
            api_entities: serde_json::from_value(json!([
                { "entity_id": "book", "path_segment": "books", "operations": ["read", "create", "update"],
                  "validation": { "pages": { "minimum": 1 } } }
            ]))
            .unwrap(),
        };
        resolve(&cfg).unwrap()
    }

    #[test]
    fn field_set_skips_key_and_timestamps() {
        let m = model();
        let book = m.entity_by_path("books").unwrap();
        let fields = FormFactory::new(&m, book).fields(None, &[]);
        assert_eq!(fields.names(), vec!["title", "pages", "author", "tags"]);
        assert!(fields.get("author").unwrap().queryset().is_some());
        assert!(fields.get("title").unwrap().required);

        let only = vec!["title".to_string(), "pages".to_string()];
        let fields = FormFactory::new(&m, book).fields(Some(&only), &["pages".to_string()]);
        assert_eq!(fields.names(), vec!["title"]);
    }

    #[tokio::test]
    async fn validates_and_cleans() {
        let m = model();
        let book = m.entity_by_path("books").unwrap();
        let author = m.entity_by_table("author").unwrap();
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(author, &json!({ "name": "Le Guin" }).as_object().unwrap().clone())
            .await
            .unwrap();

        let fields = FormFactory::new(&m, book).fields(None, &[]);
        let data = json!({ "title": "The Dispossessed", "pages": "387", "author": 1 });
        let mut form = ModelForm::new(book.clone(), fields.clone(), None, data.as_object().unwrap().clone());
        assert!(form.is_invalid(tx.as_mut()).await.unwrap().is_none());
        let obj = form.save();
        assert_eq!(obj.get("pages"), Some(&json!(387)));
        assert_eq!(obj.get("author_id"), Some(&json!(1)));

        let data = json!({ "title": "", "pages": 0, "author": 99, "tags": "x" });
        let mut form = ModelForm::new(book.clone(), fields, None, data.as_object().unwrap().clone());
        let errors = form.is_invalid(tx.as_mut()).await.unwrap().unwrap();
        assert_eq!(errors["title"], json!(REQUIRED_MESSAGE));
        assert_eq!(errors["pages"], json!("Ensure this value is greater than or equal to 1."));
        assert_eq!(errors["author"], json!(RESOURCE_NOT_FOUND_MESSAGE));
        assert_eq!(errors["tags"], json!(LIST_REQUIRED_MESSAGE));
    }
}
