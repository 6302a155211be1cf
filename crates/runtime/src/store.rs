//! Model store
//!
//! Owns every field and its schema. All attribute access goes through a
//! name lookup that returns an explicit error when the attribute is absent,
//! so `extend` can grow a field without invalidating existing references.

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::error::{RuntimeError, StoreError};
use crate::types::{AttrRef, FieldId, Value};

/// A named record of model attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: FieldId,
    attributes: IndexMap<String, Value>,
    schema_version: u32,
}

impl Field {
    pub fn new(name: FieldId, attributes: IndexMap<String, Value>) -> Self {
        Self {
            name,
            attributes,
            schema_version: 0,
        }
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.attributes.contains_key(attribute)
    }

    /// Incremented once per attribute added by `extend`
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Attributes in declaration order, extensions last
    pub fn attributes(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.attributes.iter()
    }
}

/// Result of an `extend` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    Added { schema_version: u32 },
    AlreadyExists,
}

/// Read access to model values, either committed or hypothetical
pub trait ModelView {
    fn get(&self, attr: &AttrRef) -> Result<&Value, StoreError>;
}

/// Storage for all fields of one runtime
#[derive(Debug, Clone, Default)]
pub struct ModelStore {
    fields: IndexMap<FieldId, Field>,
}

impl ModelStore {
    /// Insert a field at load time. Field names are the store's primary key.
    pub fn insert_field(
        &mut self,
        name: FieldId,
        attributes: IndexMap<String, Value>,
    ) -> Result<(), RuntimeError> {
        if self.fields.contains_key(&name) {
            return Err(RuntimeError::DuplicateField(name));
        }
        debug!(field = %name, attributes = attributes.len(), "field inserted");
        self.fields.insert(name.clone(), Field::new(name, attributes));
        Ok(())
    }

    pub fn field(&self, name: &FieldId) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn contains(&self, attr: &AttrRef) -> bool {
        self.fields
            .get(&attr.field)
            .is_some_and(|f| f.contains(&attr.attribute))
    }

    /// Overwrite an existing attribute, returning the previous value.
    ///
    /// The attribute must exist and the new value must keep its shape.
    pub fn set(&mut self, attr: &AttrRef, value: Value) -> Result<Value, StoreError> {
        let field = self
            .fields
            .get_mut(&attr.field)
            .ok_or_else(|| StoreError::FieldNotFound(attr.field.clone()))?;
        let slot = field.attributes.get_mut(&attr.attribute).ok_or_else(|| {
            StoreError::SchemaViolation {
                attr: attr.clone(),
                message: "attribute does not exist and was not added by extend".to_string(),
            }
        })?;
        if !slot.same_shape(&value) {
            return Err(StoreError::SchemaViolation {
                attr: attr.clone(),
                message: format!("shape mismatch: stored {slot}, got {value}"),
            });
        }
        trace!(attr = %attr, %value, "attribute set");
        Ok(std::mem::replace(slot, value))
    }

    /// Add an attribute to an existing field. Idempotent: an attribute that
    /// already exists keeps its value.
    pub fn extend(
        &mut self,
        field: &FieldId,
        attribute: &str,
        initial: Value,
    ) -> Result<ExtendOutcome, StoreError> {
        let f = self
            .fields
            .get_mut(field)
            .ok_or_else(|| StoreError::FieldNotFound(field.clone()))?;
        if f.attributes.contains_key(attribute) {
            return Ok(ExtendOutcome::AlreadyExists);
        }
        f.attributes.insert(attribute.to_string(), initial);
        f.schema_version += 1;
        debug!(field = %field, attribute, schema_version = f.schema_version, "field extended");
        Ok(ExtendOutcome::Added {
            schema_version: f.schema_version,
        })
    }
}

impl ModelView for ModelStore {
    fn get(&self, attr: &AttrRef) -> Result<&Value, StoreError> {
        let field = self
            .fields
            .get(&attr.field)
            .ok_or_else(|| StoreError::FieldNotFound(attr.field.clone()))?;
        field
            .get(&attr.attribute)
            .ok_or_else(|| StoreError::NotFound(attr.clone()))
    }
}

/// Candidate values layered over a store without mutating it
#[derive(Debug)]
pub struct Overlay<'a> {
    base: &'a ModelStore,
    overrides: IndexMap<AttrRef, Value>,
}

impl<'a> Overlay<'a> {
    pub fn new(base: &'a ModelStore) -> Self {
        Self {
            base,
            overrides: IndexMap::new(),
        }
    }

    pub fn with(mut self, attr: AttrRef, value: Value) -> Self {
        self.overrides.insert(attr, value);
        self
    }

    pub fn insert(&mut self, attr: AttrRef, value: Value) {
        self.overrides.insert(attr, value);
    }
}

impl ModelView for Overlay<'_> {
    fn get(&self, attr: &AttrRef) -> Result<&Value, StoreError> {
        match self.overrides.get(attr) {
            Some(value) => Ok(value),
            None => self.base.get(attr),
        }
    }
}
