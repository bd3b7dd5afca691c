/*!
 Logic to flatten a native object graph into an `NSKeyedArchiver` document.

 Every node is written once: a node reachable from several places, or from itself, is replaced
 by the UID it was first assigned.
*/

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::{
    archive::{
        foundation,
        models::{ClassChain, UnknownClasses, Value},
        opaque::{self, OpaqueObject},
        registry::ClassRegistry,
        unarchiver::{ARCHIVER, ARCHIVE_VERSION, CLASS_KEY, NULL_SENTINEL},
    },
    bplist::{
        models::{Dictionary, PlistValue},
        writer::serialize,
    },
    error::archive::ArchiveError,
};

/// Builds the `$objects` table of one keyed archive
#[derive(Debug)]
pub struct Archiver<'r> {
    registry: &'r ClassRegistry,
    unknown: UnknownClasses,
    /// The `$objects` table, starting with the `$null` sentinel
    objects: Vec<PlistValue>,
    /// Node identity to the UID it was written at.
    /// Each node is held until archiving ends, so its address cannot be reused by another node.
    identities: HashMap<usize, (u64, Value)>,
    /// Class metadata entries that were already written
    class_uids: HashMap<ClassChain, u64>,
}

impl<'r> Archiver<'r> {
    pub fn new(registry: &'r ClassRegistry, unknown: UnknownClasses) -> Self {
        Self {
            registry,
            unknown,
            objects: vec![PlistValue::String(NULL_SENTINEL.to_string())],
            identities: HashMap::new(),
            class_uids: HashMap::new(),
        }
    }

    /// Write `value` to the table, returning the UID that refers to it.
    ///
    /// [`Value::Null`] is always UID `0`.
    pub fn encode_uid(&mut self, value: &Value) -> Result<u64, ArchiveError> {
        if value.is_null() {
            return Ok(0);
        }
        let identity = value.id();
        if let Some((uid, _)) = identity.and_then(|id| self.identities.get(&id)) {
            return Ok(*uid);
        }

        // Reserve the slot and record the identity first, so references back to this node resolve to it
        let uid = self.objects.len() as u64;
        self.objects.push(PlistValue::Null);
        if let Some(id) = identity {
            self.identities.insert(id, (uid, value.clone()));
        }

        trace!(uid, "encoding object");
        let entry = self.encode_entry(value)?;
        self.objects[uid as usize] = entry;
        Ok(uid)
    }

    /// How a value is stored in an object's fields: booleans and numbers inline, everything else by UID
    fn encode_field(&mut self, value: &Value) -> Result<PlistValue, ArchiveError> {
        Ok(match value {
            Value::Bool(b) => PlistValue::Bool(*b),
            Value::Integer(int) => PlistValue::Integer(*int),
            Value::Real(real) => PlistValue::Real(*real),
            other => PlistValue::Uid(self.encode_uid(other)?),
        })
    }

    fn encode_entry(&mut self, value: &Value) -> Result<PlistValue, ArchiveError> {
        match value {
            Value::Null => Ok(PlistValue::String(NULL_SENTINEL.to_string())),
            Value::Bool(b) => Ok(PlistValue::Bool(*b)),
            Value::Integer(int) => Ok(PlistValue::Integer(*int)),
            Value::Real(real) => Ok(PlistValue::Real(*real)),
            Value::String(string) => Ok(PlistValue::String(string.clone())),
            Value::Data(node) if !node.is_mutable() => {
                let bytes = node
                    .try_borrow()
                    .ok_or(ArchiveError::ObjectUnavailable("encoding data"))?;
                Ok(PlistValue::Data(bytes.clone()))
            }
            Value::Object(node) => {
                let classes = node
                    .try_borrow()
                    .ok_or(ArchiveError::ObjectUnavailable("reading an object's classes"))?
                    .classes();
                self.encode_object(value, classes)
            }
            builtin => match foundation::classes_for(builtin) {
                Some(classes) => self.encode_with(&classes, |object| {
                    foundation::encode_contents(builtin, object)
                }),
                None => Err(ArchiveError::ObjectUnavailable("encoding an unknown value")),
            },
        }
    }

    /// Dispatch a class instance to its registered delegate, or write an opaque carrier's fields back out
    fn encode_object(&mut self, value: &Value, classes: ClassChain) -> Result<PlistValue, ArchiveError> {
        if let Some(delegate) = self.registry.resolve(&classes).cloned() {
            return self.encode_with(&classes, |object| delegate.encode(value, object));
        }

        let is_opaque = value.downcast_ref::<OpaqueObject>().is_some();
        match self.unknown {
            UnknownClasses::Opaque if is_opaque => {
                self.encode_with(&classes, |object| opaque::encode_fields(value, object))
            }
            _ => Err(ArchiveError::MissingClassMapping(classes.into())),
        }
    }

    /// Write an object entry: `$class` first, then whatever fields `write` adds
    fn encode_with<F>(&mut self, classes: &ClassChain, write: F) -> Result<PlistValue, ArchiveError>
    where
        F: FnOnce(&mut ArchivingObject<'_, 'r>) -> Result<(), ArchiveError>,
    {
        let class_uid = self.class_uid(classes);
        let mut fields = Dictionary::new();
        fields.insert(CLASS_KEY.to_string(), PlistValue::Uid(class_uid));

        write(&mut ArchivingObject {
            fields: &mut fields,
            archiver: self,
        })?;
        Ok(PlistValue::Dictionary(fields))
    }

    /// Get the UID of the metadata entry for `classes`, writing it on first use
    fn class_uid(&mut self, classes: &ClassChain) -> u64 {
        if let Some(uid) = self.class_uids.get(classes) {
            return *uid;
        }

        let uid = self.objects.len() as u64;
        let mut metadata = Dictionary::new();
        metadata.insert(
            "$classes".to_string(),
            PlistValue::Array(
                classes
                    .names()
                    .iter()
                    .map(|name| PlistValue::String(name.clone()))
                    .collect(),
            ),
        );
        metadata.insert(
            "$classname".to_string(),
            PlistValue::String(classes.name().to_string()),
        );
        self.objects.push(PlistValue::Dictionary(metadata));
        self.class_uids.insert(classes.clone(), uid);
        uid
    }

    /// Encode `root` and wrap the object table in the archive header
    pub fn into_document(mut self, root: &Value) -> Result<PlistValue, ArchiveError> {
        let root = self.encode_uid(root)?;
        debug!(
            root,
            objects = self.objects.len(),
            classes = self.class_uids.len(),
            "archived object graph"
        );

        let mut top = Dictionary::new();
        top.insert("root".to_string(), PlistValue::Uid(root));

        let mut document = Dictionary::new();
        document.insert(
            "$version".to_string(),
            PlistValue::Integer(ARCHIVE_VERSION),
        );
        document.insert(
            "$archiver".to_string(),
            PlistValue::String(ARCHIVER.to_string()),
        );
        document.insert("$top".to_string(), PlistValue::Dictionary(top));
        document.insert("$objects".to_string(), PlistValue::Array(self.objects));
        Ok(PlistValue::Dictionary(document))
    }
}

/// The fields of one object being archived, handed to a class delegate while it is encoded
#[derive(Debug)]
pub struct ArchivingObject<'w, 'r> {
    fields: &'w mut Dictionary,
    archiver: &'w mut Archiver<'r>,
}

impl<'w, 'r> ArchivingObject<'w, 'r> {
    /// Write a field. Booleans and numbers are stored inline, everything else by UID.
    pub fn encode(&mut self, key: &str, value: &Value) -> Result<(), ArchiveError> {
        let field = self.archiver.encode_field(value)?;
        self.fields.insert(key.to_string(), field);
        Ok(())
    }

    /// Write a field by UID, even if it is a boolean or a number
    pub fn encode_object(&mut self, key: &str, value: &Value) -> Result<(), ArchiveError> {
        let uid = self.archiver.encode_uid(value)?;
        self.fields.insert(key.to_string(), PlistValue::Uid(uid));
        Ok(())
    }

    /// Write a field holding an array of UIDs, such as `NS.objects`
    pub fn encode_all<'v>(
        &mut self,
        key: &str,
        values: impl IntoIterator<Item = &'v Value>,
    ) -> Result<(), ArchiveError> {
        let uids = values
            .into_iter()
            .map(|value| self.archiver.encode_uid(value).map(PlistValue::Uid))
            .collect::<Result<Vec<_>, _>>()?;
        self.fields.insert(key.to_string(), PlistValue::Array(uids));
        Ok(())
    }

    /// Write a field exactly as given
    pub fn encode_raw(&mut self, key: &str, value: PlistValue) {
        self.fields.insert(key.to_string(), value);
    }
}

/// Archive a native object graph as `bplist00` bytes
pub fn archive(
    value: &Value,
    registry: &ClassRegistry,
    unknown: UnknownClasses,
) -> Result<Vec<u8>, ArchiveError> {
    let document = Archiver::new(registry, unknown).into_document(value)?;
    Ok(serialize(&document)?)
}
