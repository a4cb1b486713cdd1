//! Field/schema model.
//!
//! Maps a logical property name to the physical index fields that hold
//! its values, and answers structural questions about types and aspects
//! (can a node of this type have children?). The model is read-only at
//! runtime; changes go through [`ModelHandle::reload`] or
//! [`ModelHandle::put_model`].

use crate::CoreError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Prefix of the per-property content locale field.
pub const CONTENT_LOCALE_PREFIX: &str = "content@locale@";

/// Data type of a property definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    MlText,
    Content,
    Int,
    Long,
    Double,
    Boolean,
    Date,
    Datetime,
    Any,
}

impl DataType {
    fn field_prefix(self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::MlText => "mltext",
            DataType::Content => "content",
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Double => "double",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Datetime => "datetime",
            DataType::Any => "any",
        }
    }
}

fn default_true() -> bool {
    true
}

/// Definition of a single property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub multi_valued: bool,
    #[serde(default = "default_true")]
    pub tokenised: bool,
    #[serde(default)]
    pub sortable: bool,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            multi_valued: false,
            tokenised: true,
            sortable: false,
        }
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn untokenised(mut self) -> Self {
        self.tokenised = false;
        self
    }
}

/// A type or aspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub name: String,
    #[serde(default)]
    pub child_associations: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

/// A named model: a bundle of types and aspects loaded together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    #[serde(default)]
    pub types: Vec<ClassDefinition>,
    #[serde(default)]
    pub aspects: Vec<ClassDefinition>,
}

/// One physical index field backing a property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldInstance {
    pub field: String,
    /// Values are stored as `\u{0}<locale>\u{0}<text>`
    pub localised: bool,
    /// A single concatenated value used for sorting
    pub sort: bool,
}

impl FieldInstance {
    fn new(field: String, localised: bool, sort: bool) -> Self {
        Self {
            field,
            localised,
            sort,
        }
    }
}

/// The set of fields that hold a property's values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedField {
    pub fields: Vec<FieldInstance>,
}

impl IndexedField {
    /// Name of the first field, used for single-valued metadata.
    pub fn first(&self) -> Option<&str> {
        self.fields.first().map(|f| f.field.as_str())
    }
}

/// Per-property metadata recorded alongside extracted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFieldType {
    DocId,
    Size,
    Locale,
    Mimetype,
    Encoding,
    TransformationStatus,
    TransformationException,
    TransformationTime,
}

impl ContentFieldType {
    fn prefix(self) -> &'static str {
        match self {
            ContentFieldType::DocId => "content@docid@",
            ContentFieldType::Size => "content@size@",
            ContentFieldType::Locale => CONTENT_LOCALE_PREFIX,
            ContentFieldType::Mimetype => "content@mimetype@",
            ContentFieldType::Encoding => "content@encoding@",
            ContentFieldType::TransformationStatus => "content@tr_status@",
            ContentFieldType::TransformationException => "content@tr_ex@",
            ContentFieldType::TransformationTime => "content@tr_time@",
        }
    }
}

/// Resolved view over a set of loaded models.
#[derive(Debug, Clone, Default)]
pub struct DataModel {
    models: BTreeMap<String, ModelDefinition>,
    properties: HashMap<String, PropertyDefinition>,
    types: HashMap<String, ClassDefinition>,
    aspects: HashMap<String, ClassDefinition>,
}

impl DataModel {
    /// Build a model from definitions; later definitions replace earlier ones.
    pub fn from_models(models: impl IntoIterator<Item = ModelDefinition>) -> Self {
        let mut data_model = DataModel::default();
        for model in models {
            data_model.models.insert(model.name.clone(), model);
        }
        data_model.rebuild();
        data_model
    }

    /// The built-in content model every repository shares.
    pub fn builtin() -> Self {
        Self::from_models([builtin_content_model()])
    }

    /// Load additional models from a YAML file (a list of models) on top of
    /// the built-in one.
    pub fn load_yaml(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let models: Vec<ModelDefinition> = serde_yaml::from_str(&content)?;
        let mut all = vec![builtin_content_model()];
        all.extend(models);
        let model = Self::from_models(all);
        tracing::info!(path = ?path, models = model.models.len(), "Loaded data model");
        Ok(model)
    }

    /// Add or replace one model. Returns false if an identical model was already present.
    pub fn put_model(&mut self, model: ModelDefinition) -> bool {
        if self.models.get(&model.name) == Some(&model) {
            return false;
        }
        self.models.insert(model.name.clone(), model);
        self.rebuild();
        true
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.get(name)
    }

    /// Physical fields for a property. Unknown properties are indexed as
    /// plain tokenised text.
    pub fn indexed_fields_for_property(&self, name: &str) -> IndexedField {
        let definition = self
            .properties
            .get(name)
            .cloned()
            .unwrap_or_else(|| PropertyDefinition::new(name, DataType::Text));

        let cardinality = if definition.multi_valued { "m" } else { "s" };
        let prefix = definition.data_type.field_prefix();
        let mut fields = Vec::new();

        match definition.data_type {
            DataType::Text => {
                fields.push(FieldInstance::new(
                    format!("{prefix}@{cardinality}@{name}"),
                    false,
                    false,
                ));
                if definition.tokenised {
                    fields.push(FieldInstance::new(format!("{prefix}@l@{name}"), true, false));
                }
                if definition.sortable && !definition.multi_valued {
                    fields.push(FieldInstance::new(format!("{prefix}@sort@{name}"), true, true));
                }
            }
            DataType::MlText => {
                fields.push(FieldInstance::new(format!("{prefix}@l@{name}"), true, false));
                if definition.sortable && !definition.multi_valued {
                    fields.push(FieldInstance::new(format!("{prefix}@sort@{name}"), true, true));
                }
            }
            DataType::Content => {
                fields.push(FieldInstance::new(format!("{prefix}@l@{name}"), true, false));
            }
            _ => {
                fields.push(FieldInstance::new(
                    format!("{prefix}@{cardinality}@{name}"),
                    false,
                    false,
                ));
            }
        }

        IndexedField { fields }
    }

    /// The field recording one piece of content metadata for a property.
    pub fn content_metadata_field(&self, property: &str, kind: ContentFieldType) -> IndexedField {
        IndexedField {
            fields: vec![FieldInstance::new(
                format!("{}{}", kind.prefix(), property),
                false,
                false,
            )],
        }
    }

    /// Content property name encoded in a content locale field, if any.
    pub fn content_property_of_locale_field(field: &str) -> Option<&str> {
        field.strip_prefix(CONTENT_LOCALE_PREFIX)
    }

    /// Whether a node of this type, with these aspects, can have children.
    pub fn may_have_children(&self, node_type: &str, aspects: &BTreeSet<String>) -> bool {
        let type_has_children = self
            .types
            .get(node_type)
            .is_some_and(|t| !t.child_associations.is_empty());
        if type_has_children {
            return true;
        }
        aspects.iter().any(|aspect| {
            self.aspects
                .get(aspect)
                .is_some_and(|a| !a.child_associations.is_empty())
        })
    }

    fn rebuild(&mut self) {
        self.properties.clear();
        self.types.clear();
        self.aspects.clear();
        for model in self.models.values() {
            for class in &model.types {
                self.types.insert(class.name.clone(), class.clone());
            }
            for class in &model.aspects {
                self.aspects.insert(class.name.clone(), class.clone());
            }
            for class in model.types.iter().chain(model.aspects.iter()) {
                for property in &class.properties {
                    self.properties
                        .insert(property.name.clone(), property.clone());
                }
            }
        }
    }
}

fn builtin_content_model() -> ModelDefinition {
    let class = |name: &str, children: &[&str], properties: Vec<PropertyDefinition>| {
        ClassDefinition {
            name: name.to_string(),
            child_associations: children.iter().map(|c| c.to_string()).collect(),
            properties,
        }
    };

    ModelDefinition {
        name: "cm:contentmodel".to_string(),
        types: vec![
            class("sys:base", &[], vec![]),
            class(
                "cm:cmobject",
                &[],
                vec![
                    PropertyDefinition::new("cm:name", DataType::Text).sortable(),
                    PropertyDefinition::new("cm:locale", DataType::Text).untokenised(),
                ],
            ),
            class("cm:folder", &["cm:contains"], vec![]),
            class(
                "cm:content",
                &[],
                vec![PropertyDefinition::new("cm:content", DataType::Content)],
            ),
            class("sys:deleted", &[], vec![]),
        ],
        aspects: vec![
            class(
                "cm:titled",
                &[],
                vec![
                    PropertyDefinition::new("cm:title", DataType::MlText).sortable(),
                    PropertyDefinition::new("cm:description", DataType::MlText),
                ],
            ),
            class(
                "cm:indexControl",
                &[],
                vec![
                    PropertyDefinition::new("cm:isIndexed", DataType::Boolean),
                    PropertyDefinition::new("cm:isContentIndexed", DataType::Boolean),
                ],
            ),
            class("cm:attachable", &["cm:attachments"], vec![]),
        ],
    }
}

/// Shared handle to the current data model.
///
/// Components keep a handle and take a [`snapshot`](ModelHandle::snapshot)
/// per operation, so a reload never changes the model under a running
/// document build.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    inner: Arc<RwLock<Arc<DataModel>>>,
}

impl ModelHandle {
    pub fn new(model: DataModel) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(model))),
        }
    }

    pub fn snapshot(&self) -> Arc<DataModel> {
        self.inner.read().clone()
    }

    /// Replace the whole model.
    pub fn reload(&self, model: DataModel) {
        *self.inner.write() = Arc::new(model);
        tracing::info!("Data model reloaded");
    }

    /// Add or replace a single model definition.
    pub fn put_model(&self, model: ModelDefinition) -> bool {
        let mut guard = self.inner.write();
        let mut next = (**guard).clone();
        let changed = next.put_model(model);
        if changed {
            *guard = Arc::new(next);
        }
        changed
    }
}

impl Default for ModelHandle {
    fn default() -> Self {
        Self::new(DataModel::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_property_fields() {
        let model = DataModel::builtin();
        let fields = model.indexed_fields_for_property("cm:name");
        let names: Vec<_> = fields.fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(
            names,
            vec!["text@s@cm:name", "text@l@cm:name", "text@sort@cm:name"]
        );
        assert!(fields.fields[2].sort);
        assert!(fields.fields[1].localised);
    }

    #[test]
    fn test_untokenised_text_has_single_field() {
        let model = DataModel::builtin();
        let fields = model.indexed_fields_for_property("cm:locale");
        assert_eq!(fields.fields.len(), 1);
        assert!(!fields.fields[0].localised);
    }

    #[test]
    fn test_content_fields() {
        let model = DataModel::builtin();
        assert_eq!(
            model.indexed_fields_for_property("cm:content").first(),
            Some("content@l@cm:content")
        );
        let locale = model.content_metadata_field("cm:content", ContentFieldType::Locale);
        assert_eq!(locale.first(), Some("content@locale@cm:content"));
        assert_eq!(
            DataModel::content_property_of_locale_field("content@locale@cm:content"),
            Some("cm:content")
        );
    }

    #[test]
    fn test_may_have_children() {
        let model = DataModel::builtin();
        let none = BTreeSet::new();
        assert!(model.may_have_children("cm:folder", &none));
        assert!(!model.may_have_children("cm:content", &none));

        let attachable: BTreeSet<String> = ["cm:attachable".to_string()].into_iter().collect();
        assert!(model.may_have_children("cm:content", &attachable));
    }

    #[test]
    fn test_handle_put_model() {
        let handle = ModelHandle::default();
        let before = handle.snapshot();

        let model = ModelDefinition {
            name: "acme:model".to_string(),
            types: vec![ClassDefinition {
                name: "acme:project".to_string(),
                child_associations: vec!["acme:members".to_string()],
                properties: vec![PropertyDefinition::new("acme:code", DataType::Long)],
            }],
            aspects: vec![],
        };

        assert!(handle.put_model(model.clone()));
        assert!(!handle.put_model(model));

        let after = handle.snapshot();
        assert!(after.may_have_children("acme:project", &BTreeSet::new()));
        assert!(!before.may_have_children("acme:project", &BTreeSet::new()));
        assert_eq!(
            after.indexed_fields_for_property("acme:code").first(),
            Some("long@s@acme:code")
        );
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        std::fs::write(
            &path,
            r#"
- name: acme:model
  types:
    - name: acme:box
      child_associations: [acme:items]
"#,
        )
        .unwrap();

        let model = DataModel::load_yaml(&path).unwrap();
        assert!(model.may_have_children("acme:box", &BTreeSet::new()));
        assert!(model.may_have_children("cm:folder", &BTreeSet::new()));
    }
}
