/*!
 Generic carriers for archived classes that have no registered native type.

 When unarchiving with [`UnknownClasses::Opaque`](crate::archive::models::UnknownClasses::Opaque),
 each unknown class name gets an [`OpaqueClass`] the first time it is seen. Instances are decoded
 into [`OpaqueObject`]s that keep every archived field, so they can be archived again without
 losing data.
*/

use std::{any::Any, sync::Arc};

use indexmap::IndexMap;

use crate::{
    archive::{
        archiver::ArchivingObject,
        models::{ArchiveObject, ClassChain, Value},
        registry::IncrementalClass,
        unarchiver::ArchivedObject,
    },
    error::archive::ArchiveError,
};

/// A class synthesized for an unknown class name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueClass {
    classes: ClassChain,
}

impl OpaqueClass {
    pub fn new(classes: impl Into<ClassChain>) -> Self {
        Self {
            classes: classes.into(),
        }
    }

    /// The most-derived class name
    pub fn name(&self) -> &str {
        self.classes.name()
    }

    /// The class chain as it was first seen in an archive
    pub fn classes(&self) -> &ClassChain {
        &self.classes
    }
}

/// An instance of an [`OpaqueClass`], holding every archived field by name
#[derive(Debug, Clone)]
pub struct OpaqueObject {
    class: Arc<OpaqueClass>,
    fields: IndexMap<String, Value>,
}

impl OpaqueObject {
    pub fn new(class: Arc<OpaqueClass>) -> Self {
        Self {
            class,
            fields: IndexMap::new(),
        }
    }

    /// Create a carrier with some fields already set
    pub fn with_fields(class: Arc<OpaqueClass>, fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            class,
            fields: fields.into_iter().collect(),
        }
    }

    pub fn class(&self) -> &Arc<OpaqueClass> {
        &self.class
    }

    /// The most-derived class name
    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    /// Get the value of a field, if it was archived
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl ArchiveObject for OpaqueObject {
    fn classes(&self) -> ClassChain {
        self.class.classes().clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Decodes and encodes every instance of one [`OpaqueClass`]
pub(crate) struct OpaqueDelegate {
    class: Arc<OpaqueClass>,
}

impl OpaqueDelegate {
    pub(crate) fn new(class: Arc<OpaqueClass>) -> Self {
        Self { class }
    }
}

impl IncrementalClass for OpaqueDelegate {
    fn allocate(&self, _classes: &ClassChain) -> Value {
        Value::object(OpaqueObject::new(Arc::clone(&self.class)))
    }

    fn fill(&self, shell: &Value, object: &mut ArchivedObject<'_, '_>) -> Result<(), ArchiveError> {
        // Decode everything before borrowing the shell, since fields may point back at it
        let mut fields = IndexMap::new();
        for key in object.keys() {
            fields.insert(key.to_string(), object.decode(key)?);
        }

        let mut carrier = shell
            .downcast_mut::<OpaqueObject>()
            .ok_or(ArchiveError::ObjectUnavailable("filling an opaque object"))?;
        carrier.fields = fields;
        Ok(())
    }

    fn encode(
        &self,
        value: &Value,
        object: &mut ArchivingObject<'_, '_>,
    ) -> Result<(), ArchiveError> {
        encode_fields(value, object)
    }
}

/// Write every field of an opaque carrier
pub(crate) fn encode_fields(
    value: &Value,
    object: &mut ArchivingObject<'_, '_>,
) -> Result<(), ArchiveError> {
    let carrier = value
        .downcast_ref::<OpaqueObject>()
        .ok_or(ArchiveError::ObjectUnavailable("encoding an opaque object"))?;
    for (key, field) in carrier.iter() {
        object.encode(key, field)?;
    }
    Ok(())
}
