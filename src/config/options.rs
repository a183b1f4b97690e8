//! Per-model field exposure (`RestOptions`) and the field tree helpers behind it.

use crate::config::{FieldSpec, RestMetaConfig};
use std::collections::BTreeMap;

/// Nested set of field names. A leaf (empty subtree) means "the field itself".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldTree(BTreeMap<String, FieldTree>);

impl FieldTree {
    pub fn new() -> Self {
        FieldTree(BTreeMap::new())
    }

    /// `list_to_dict`: `["a", ["b", ["c"]]]` → `{a: {}, b: {c: {}}}`.
    pub fn from_specs(specs: &[FieldSpec]) -> Self {
        let mut tree = FieldTree::new();
        for spec in specs {
            match spec {
                FieldSpec::Name(name) => {
                    tree.0.insert(name.clone(), FieldTree::new());
                }
                FieldSpec::Nested(name, sub) => {
                    tree.0.insert(name.clone(), FieldTree::from_specs(sub));
                }
            }
        }
        tree
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tree = FieldTree::new();
        for name in names {
            tree.0.insert(name.to_string(), FieldTree::new());
        }
        tree
    }

    /// `dict_to_list`: inverse of [`FieldTree::from_specs`].
    pub fn to_specs(&self) -> Vec<FieldSpec> {
        self.0
            .iter()
            .map(|(name, sub)| {
                if sub.is_empty() {
                    FieldSpec::Name(name.clone())
                } else {
                    FieldSpec::Nested(name.clone(), sub.to_specs())
                }
            })
            .collect()
    }

    /// `join_dicts`: union; a leaf on one side takes the other side's subtree.
    pub fn join(&self, other: &FieldTree) -> FieldTree {
        let mut joined = self.clone();
        for (key, val2) in &other.0 {
            match joined.0.get(key) {
                Some(val1) if !val1.is_empty() => {
                    if !val2.is_empty() {
                        let merged = val1.join(val2);
                        joined.0.insert(key.clone(), merged);
                    }
                }
                _ => {
                    joined.0.insert(key.clone(), val2.clone());
                }
            }
        }
        joined
    }

    /// Parse an `X-Fields` header value: comma separated names, `__` descends into relations.
    pub fn parse(header: &str) -> Self {
        let mut tree = FieldTree::new();
        for term in header.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let mut node = &mut tree;
            for part in term.split("__") {
                node = node.0.entry(part.to_string()).or_default();
            }
        }
        tree
    }

    /// Keep only requested fields that `allowed` contains. Subtrees intersect recursively; an
    /// allowed leaf admits whatever subtree was requested.
    pub fn intersect(&self, allowed: &FieldTree) -> FieldTree {
        let mut out = FieldTree::new();
        for (name, requested) in &self.0 {
            if let Some(allowed_sub) = allowed.0.get(name) {
                let sub = if allowed_sub.is_empty() {
                    requested.clone()
                } else if requested.is_empty() {
                    allowed_sub.clone()
                } else {
                    requested.intersect(allowed_sub)
                };
                out.0.insert(name.clone(), sub);
            }
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<&FieldTree> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldTree)> {
        self.0.iter()
    }

    /// `flat_list`: top-level names only.
    pub fn flat(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

/// `flat_list` over a spec list, keeping order.
pub fn flat_list(specs: &[FieldSpec]) -> Vec<String> {
    specs
        .iter()
        .map(|s| match s {
            FieldSpec::Name(n) => n.clone(),
            FieldSpec::Nested(n, _) => n.clone(),
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct RestOptions {
    pub fields: FieldTree,
    pub default_list_fields: FieldTree,
    pub default_obj_fields: FieldTree,
    pub selectbox_fields: Vec<FieldSpec>,
    pub image_field: Option<String>,
}

impl RestOptions {
    /// Defaults from model introspection, then per-entry override from the `rest_meta` block.
    pub fn new(model_fields: Vec<FieldSpec>, pk_column: &str, meta: Option<&RestMetaConfig>) -> Self {
        let mut fields = model_fields;
        let mut default_list_fields = fields.clone();
        let mut default_obj_fields = fields.clone();
        let mut selectbox_fields = vec![
            FieldSpec::Name(pk_column.to_string()),
            FieldSpec::Name("_obj_name".into()),
        ];
        let mut image_field = None;

        if let Some(meta) = meta {
            if let Some(f) = &meta.fields {
                fields = f.clone();
            }
            if let Some(f) = &meta.default_list_fields {
                default_list_fields = f.clone();
            }
            if let Some(f) = &meta.default_obj_fields {
                default_obj_fields = f.clone();
            }
            if let Some(f) = &meta.selectbox_fields {
                selectbox_fields = f.clone();
            }
            image_field = meta.image_field.clone();
        }
        if let Some(image) = &image_field {
            selectbox_fields.push(FieldSpec::Name(image.clone()));
        }

        RestOptions {
            fields: FieldTree::from_specs(&fields),
            default_list_fields: FieldTree::from_specs(&default_list_fields),
            default_obj_fields: FieldTree::from_specs(&default_obj_fields),
            selectbox_fields,
            image_field,
        }
    }

    pub fn selectbox_tree(&self) -> FieldTree {
        FieldTree::from_specs(&self.selectbox_fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> FieldSpec {
        FieldSpec::Name(s.into())
    }

    #[test]
    fn list_dict_conversion() {
        let specs = vec![name("a"), FieldSpec::Nested("b".into(), vec![name("c")])];
        let tree = FieldTree::from_specs(&specs);
        assert!(tree.get("a").unwrap().is_empty());
        assert!(tree.get("b").unwrap().contains("c"));
        assert_eq!(tree.to_specs(), specs);
        assert_eq!(flat_list(&specs), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn join_prefers_non_empty_subtree() {
        let left = FieldTree::from_specs(&[name("a"), FieldSpec::Nested("b".into(), vec![name("c")])]);
        let right = FieldTree::from_specs(&[
            FieldSpec::Nested("a".into(), vec![name("x")]),
            FieldSpec::Nested("b".into(), vec![name("d")]),
            name("e"),
        ]);
        let joined = left.join(&right);
        assert!(joined.get("a").unwrap().contains("x"));
        let b = joined.get("b").unwrap();
        assert!(b.contains("c") && b.contains("d"));
        assert!(joined.contains("e"));
    }

    #[test]
    fn parse_and_intersect() {
        let allowed = FieldTree::from_specs(&[
            name("id"),
            FieldSpec::Nested("author".into(), vec![name("id"), name("_obj_name")]),
        ]);
        let requested = FieldTree::parse("id, author__name, author__id, secret");
        let out = requested.intersect(&allowed);
        assert!(out.contains("id"));
        assert!(!out.contains("secret"));
        let author = out.get("author").unwrap();
        assert!(author.contains("id"));
        assert!(!author.contains("name"));
    }

    #[test]
    fn image_field_extends_selectbox() {
        let meta = RestMetaConfig {
            image_field: Some("avatar".into()),
            ..Default::default()
        };
        let opts = RestOptions::new(vec![name("id"), name("title")], "id", Some(&meta));
        assert_eq!(
            flat_list(&opts.selectbox_fields),
            vec!["id".to_string(), "_obj_name".to_string(), "avatar".to_string()]
        );
        assert!(opts.default_obj_fields.contains("title"));
    }
}
