//! Record type registration.
//!
//! Every record type that participates in sync is declared once at startup
//! with a [`RecordSchema`]. The registry is the authoritative type list for
//! extraction and the validator for inbound field maps.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordType;
use deltasync_codec::{FieldKind, Fields};
use std::collections::HashMap;

/// Declaration of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Expected value kind.
    pub kind: FieldKind,
    /// Whether the field must be present and non-null.
    pub required: bool,
}

/// Schema for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    record_type: RecordType,
    fields: Vec<FieldDef>,
    allow_unknown_fields: bool,
}

impl RecordSchema {
    /// Starts a schema with no fields.
    pub fn new(record_type: impl Into<RecordType>) -> Self {
        Self {
            record_type: record_type.into(),
            fields: Vec::new(),
            allow_unknown_fields: false,
        }
    }

    /// Declares a required field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Declares an optional (nullable) field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Accepts fields that are not declared.
    #[must_use]
    pub fn allow_unknown_fields(mut self) -> Self {
        self.allow_unknown_fields = true;
        self
    }

    /// Returns the record type.
    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    /// Returns the declared fields.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Looks up a field declaration.
    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks a field map against this schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaViolation`] naming the first offending field.
    pub fn validate(&self, fields: &Fields) -> CoreResult<()> {
        let type_name = self.record_type.as_str();

        for def in &self.fields {
            match fields.get(&def.name) {
                None if def.required => {
                    return Err(CoreError::schema_violation(type_name, &def.name, "missing"));
                }
                Some(value) if value.is_null() && def.required => {
                    return Err(CoreError::schema_violation(type_name, &def.name, "null"));
                }
                Some(value) if !value.is_compatible_with(def.kind) => {
                    return Err(CoreError::schema_violation(
                        type_name,
                        &def.name,
                        format!("expected {}, found {}", def.kind, value.kind_name()),
                    ));
                }
                _ => {}
            }
        }

        if !self.allow_unknown_fields {
            if let Some(name) = fields.keys().find(|name| self.field_def(name).is_none()) {
                return Err(CoreError::schema_violation(type_name, name, "undeclared field"));
            }
        }

        Ok(())
    }
}

/// Registry of record types participating in sync.
///
/// Registration order is preserved and defines extraction order.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: Vec<RecordSchema>,
    index: HashMap<RecordType, usize>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a record type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateRecordType`] if the type is already known.
    pub fn register(&mut self, schema: RecordSchema) -> CoreResult<()> {
        if self.index.contains_key(schema.record_type()) {
            return Err(CoreError::DuplicateRecordType(
                schema.record_type().to_string(),
            ));
        }
        self.index
            .insert(schema.record_type().clone(), self.schemas.len());
        self.schemas.push(schema);
        Ok(())
    }

    /// Builder-style registration.
    ///
    /// # Errors
    ///
    /// Same as [`SchemaRegistry::register`].
    pub fn with(mut self, schema: RecordSchema) -> CoreResult<Self> {
        self.register(schema)?;
        Ok(self)
    }

    /// Returns the schema for a type.
    pub fn get(&self, record_type: &RecordType) -> Option<&RecordSchema> {
        self.index.get(record_type).map(|&i| &self.schemas[i])
    }

    /// Returns true if the type is registered.
    pub fn contains(&self, record_type: &RecordType) -> bool {
        self.index.contains_key(record_type)
    }

    /// Registered types in registration order.
    pub fn record_types(&self) -> impl Iterator<Item = &RecordType> {
        self.schemas.iter().map(RecordSchema::record_type)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Validates `fields` against the schema of `record_type`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownRecordType`] for unregistered types and
    /// [`CoreError::SchemaViolation`] for invalid fields.
    pub fn validate(&self, record_type: &RecordType, fields: &Fields) -> CoreResult<()> {
        self.get(record_type)
            .ok_or_else(|| CoreError::UnknownRecordType(record_type.to_string()))?
            .validate(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltasync_codec::Value;

    fn book_schema() -> RecordSchema {
        RecordSchema::new("Book")
            .field("title", FieldKind::Text)
            .optional("pages", FieldKind::Integer)
    }

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn valid_fields_pass() {
        let schema = book_schema();
        assert!(schema.validate(&fields(&[("title", "Dune".into())])).is_ok());
        assert!(schema
            .validate(&fields(&[("title", "Dune".into()), ("pages", Value::Null)]))
            .is_ok());
    }

    #[test]
    fn missing_required_field() {
        let err = book_schema().validate(&Fields::new()).unwrap_err();
        assert!(err.to_string().contains("Book.title"));
    }

    #[test]
    fn wrong_kind() {
        let err = book_schema()
            .validate(&fields(&[("title", Value::Integer(1))]))
            .unwrap_err();
        assert!(err.to_string().contains("expected text, found integer"));
    }

    #[test]
    fn undeclared_field() {
        let extra = fields(&[("title", "Dune".into()), ("isbn", "x".into())]);
        assert!(book_schema().validate(&extra).is_err());
        assert!(book_schema().allow_unknown_fields().validate(&extra).is_ok());
    }

    #[test]
    fn registry_preserves_order_and_rejects_duplicates() {
        let mut registry = SchemaRegistry::new()
            .with(RecordSchema::new("Author"))
            .unwrap()
            .with(book_schema())
            .unwrap();

        let names: Vec<_> = registry.record_types().map(RecordType::as_str).collect();
        assert_eq!(names, vec!["Author", "Book"]);

        assert!(matches!(
            registry.register(RecordSchema::new("Book")),
            Err(CoreError::DuplicateRecordType(_))
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registry_unknown_type() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.validate(&RecordType::from("Ghost"), &Fields::new()),
            Err(CoreError::UnknownRecordType(_))
        ));
    }
}
