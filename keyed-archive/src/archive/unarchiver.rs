/*!
 Logic to rebuild a native object graph from an `NSKeyedArchiver` document.

 Objects are decoded on demand, starting at the UID stored in `$top.root`. Every decoded UID is
 cached, so an object referenced from many places is decoded once and shared.
*/

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::{
    archive::{
        models::{ClassChain, Key, Map, Mutability, UnknownClasses, Value},
        registry::{ClassRegistry, Delegate},
    },
    bplist::{
        models::{Dictionary, PlistValue},
        parser::parse,
    },
    error::archive::ArchiveError,
    util::dates::Timestamp,
};

/// The only `$archiver` value this crate reads and writes
pub const ARCHIVER: &str = "NSKeyedArchiver";
/// The only `$version` value this crate reads and writes
pub const ARCHIVE_VERSION: i64 = 100_000;
/// The string stored at `$objects[0]`, standing in for `nil`
pub const NULL_SENTINEL: &str = "$null";
/// The field of an archived object that points at its class metadata
pub const CLASS_KEY: &str = "$class";
/// Objects nested deeper than this are rejected
pub const MAX_DEPTH: usize = 256;

/// Decode state of one UID
#[derive(Debug)]
enum Slot {
    /// Decoding has started; incremental classes leave their shell here while they are filled
    InProgress(Option<Value>),
    Done(Value),
}

/// Decodes the objects of one keyed archive
#[derive(Debug)]
pub struct Unarchiver<'a> {
    /// The `$objects` table
    objects: &'a [PlistValue],
    /// The UID stored in `$top.root`
    root: u64,
    registry: &'a ClassRegistry,
    unknown: UnknownClasses,
    cache: HashMap<u64, Slot>,
    /// Objects currently being decoded, outermost first
    depth: usize,
}

impl<'a> Unarchiver<'a> {
    /// Validate the archive header of a parsed property list
    pub fn from_document(
        document: &'a PlistValue,
        registry: &'a ClassRegistry,
        unknown: UnknownClasses,
    ) -> Result<Self, ArchiveError> {
        let header = document.as_dictionary();
        let field = |key: &str| header.and_then(|header| header.get(key));

        match field("$archiver") {
            Some(PlistValue::String(archiver)) if archiver == ARCHIVER => {}
            other => return Err(ArchiveError::UnsupportedArchiver(describe(other))),
        }

        match field("$version") {
            Some(PlistValue::Integer(ARCHIVE_VERSION)) => {}
            other => return Err(ArchiveError::UnsupportedArchiveVersion(describe(other))),
        }

        let top = field("$top")
            .and_then(PlistValue::as_dictionary)
            .filter(|top| !top.is_empty())
            .ok_or(ArchiveError::MissingTopObject)?;
        let root = top
            .get("root")
            .and_then(PlistValue::as_uid)
            .ok_or(ArchiveError::MissingTopObjectUID)?;

        let objects = field("$objects")
            .and_then(PlistValue::as_array)
            .filter(|objects| !objects.is_empty())
            .ok_or(ArchiveError::MissingObjectsArray)?;

        Ok(Self {
            objects,
            root,
            registry,
            unknown,
            cache: HashMap::new(),
            depth: 0,
        })
    }

    /// The UID of the root object
    pub fn root(&self) -> u64 {
        self.root
    }

    /// Decode the root object, and from it everything it references
    pub fn top_object(&mut self) -> Result<Value, ArchiveError> {
        debug!(
            root = self.root,
            objects = self.objects.len(),
            "unarchiving object graph"
        );
        self.decode_uid(self.root)
    }

    /// Decode the object stored at `uid`, or return it from the cache if it was already decoded
    pub fn decode_uid(&mut self, uid: u64) -> Result<Value, ArchiveError> {
        if uid == 0 {
            return Ok(Value::Null);
        }

        let objects = self.objects;
        let entry = objects
            .get(uid as usize)
            .ok_or(ArchiveError::UidOutOfRange(uid, objects.len()))?;
        if is_null(entry) {
            return Ok(Value::Null);
        }

        match self.cache.get(&uid) {
            Some(Slot::Done(value)) => return Ok(value.clone()),
            Some(Slot::InProgress(Some(shell))) => {
                debug!(uid, "resolved reference to an object that is still being decoded");
                return Ok(shell.clone());
            }
            Some(Slot::InProgress(None)) => return Err(ArchiveError::CircularReference(uid)),
            None => {}
        }

        if self.depth >= MAX_DEPTH {
            return Err(ArchiveError::TooDeep(uid));
        }

        trace!(uid, kind = entry.kind(), "decoding object");
        self.depth += 1;
        let value = match entry {
            PlistValue::Dictionary(fields) if fields.contains_key(CLASS_KEY) => {
                self.decode_instance(uid, fields)
            }
            other => {
                self.cache.insert(uid, Slot::InProgress(None));
                self.decode_plist(other)
            }
        };
        self.depth -= 1;
        let value = value?;

        self.cache.insert(uid, Slot::Done(value.clone()));
        Ok(value)
    }

    /// Decode an entry that names its class
    fn decode_instance(&mut self, uid: u64, fields: &'a Dictionary) -> Result<Value, ArchiveError> {
        let classes = self.class_chain(uid, fields)?;
        let delegate = self.registry.resolve_or_opaque(&classes, self.unknown)?;

        match delegate {
            Delegate::Incremental(class) => {
                let shell = class.allocate(&classes);
                self.cache
                    .insert(uid, Slot::InProgress(Some(shell.clone())));
                class.fill(
                    &shell,
                    &mut ArchivedObject {
                        uid,
                        fields,
                        unarchiver: self,
                    },
                )?;
                Ok(shell)
            }
            Delegate::Atomic(class) => {
                self.cache.insert(uid, Slot::InProgress(None));
                class.decode(
                    &classes,
                    &mut ArchivedObject {
                        uid,
                        fields,
                        unarchiver: self,
                    },
                )
            }
        }
    }

    /// Resolve the `$class` metadata of the object at `uid`
    pub fn class_chain(&self, uid: u64, fields: &Dictionary) -> Result<ClassChain, ArchiveError> {
        let class_uid = fields
            .get(CLASS_KEY)
            .and_then(PlistValue::as_uid)
            .ok_or(ArchiveError::MissingClassUID(uid))?;
        let metadata = self
            .objects
            .get(class_uid as usize)
            .and_then(PlistValue::as_dictionary)
            .ok_or(ArchiveError::MissingClassMetaData(class_uid))?;
        let name = metadata
            .get("$classname")
            .and_then(PlistValue::as_string)
            .ok_or(ArchiveError::MissingClassName(class_uid))?;

        let mut names: Vec<String> = metadata
            .get("$classes")
            .and_then(PlistValue::as_array)
            .unwrap_or_default()
            .iter()
            .filter_map(PlistValue::as_string)
            .map(String::from)
            .collect();
        if names.first().map(String::as_str) != Some(name) {
            names.insert(0, name.to_string());
        }

        Ok(ClassChain::new(names))
    }

    /// Convert a stored value, following UIDs through [`Unarchiver::decode_uid`].
    ///
    /// Containers without a `$class` are immutable; dictionaries keep their string keys.
    pub fn decode_plist(&mut self, value: &'a PlistValue) -> Result<Value, ArchiveError> {
        Ok(match value {
            PlistValue::Null => Value::Null,
            PlistValue::Bool(b) => Value::Bool(*b),
            PlistValue::Integer(int) => Value::Integer(*int),
            PlistValue::Real(real) => Value::Real(*real),
            PlistValue::Date(offset) => Value::Date(Timestamp::from_apple_offset(*offset)),
            PlistValue::Data(data) => Value::data(data.clone(), Mutability::Immutable),
            PlistValue::String(string) => Value::String(string.clone()),
            PlistValue::Uid(uid) => self.decode_uid(*uid)?,
            PlistValue::Array(items) => Value::array(self.decode_items(items)?, Mutability::Immutable),
            PlistValue::Set(items) => Value::set(self.decode_items(items)?, Mutability::Immutable),
            PlistValue::Dictionary(dict) => {
                let mut map = Map::with_capacity(dict.len());
                for (key, value) in dict {
                    map.insert(Key::String(key.clone()), self.decode_plist(value)?);
                }
                Value::dictionary(map, Mutability::Immutable)
            }
        })
    }

    fn decode_items(&mut self, items: &'a [PlistValue]) -> Result<Vec<Value>, ArchiveError> {
        items.iter().map(|item| self.decode_plist(item)).collect()
    }
}

fn is_null(entry: &PlistValue) -> bool {
    match entry {
        PlistValue::Null => true,
        PlistValue::String(string) => string == NULL_SENTINEL,
        _ => false,
    }
}

/// Render a header value for an error message
fn describe(value: Option<&PlistValue>) -> String {
    match value {
        Some(PlistValue::String(string)) => string.clone(),
        Some(PlistValue::Integer(int)) => int.to_string(),
        Some(other) => format!("<{}>", other.kind()),
        None => String::from("<missing>"),
    }
}

/// The stored fields of one archived object, handed to a class delegate while it is decoded
#[derive(Debug)]
pub struct ArchivedObject<'u, 'a> {
    uid: u64,
    fields: &'a Dictionary,
    unarchiver: &'u mut Unarchiver<'a>,
}

impl<'u, 'a> ArchivedObject<'u, 'a> {
    /// The UID this object is stored at
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Every stored key except `$class`
    pub fn keys(&self) -> Vec<&'a str> {
        let fields: &'a Dictionary = self.fields;
        fields
            .keys()
            .map(String::as_str)
            .filter(|key| *key != CLASS_KEY)
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// The stored value of a field, without following UIDs
    pub fn raw(&self, key: &str) -> Option<&'a PlistValue> {
        let fields: &'a Dictionary = self.fields;
        fields.get(key)
    }

    /// Decode a field. Absent fields decode to [`Value::Null`].
    pub fn decode(&mut self, key: &str) -> Result<Value, ArchiveError> {
        match self.raw(key) {
            Some(value) => self.unarchiver.decode_plist(value),
            None => Ok(Value::Null),
        }
    }

    /// Decode a field holding an array of values, such as `NS.objects`. Absent fields decode to an empty list.
    pub fn decode_all(&mut self, key: &str) -> Result<Vec<Value>, ArchiveError> {
        match self.raw(key) {
            Some(PlistValue::Array(items)) => self.unarchiver.decode_items(items),
            Some(_) => Err(ArchiveError::InvalidField(key.to_string(), "array")),
            None => Ok(vec![]),
        }
    }

    pub fn decode_string(&mut self, key: &str) -> Result<String, ArchiveError> {
        match self.decode(key)? {
            Value::String(string) => Ok(string),
            _ => Err(ArchiveError::InvalidField(key.to_string(), "string")),
        }
    }

    pub fn decode_integer(&mut self, key: &str) -> Result<i64, ArchiveError> {
        self.decode(key)?
            .as_integer()
            .ok_or_else(|| ArchiveError::InvalidField(key.to_string(), "integer"))
    }

    pub fn decode_real(&mut self, key: &str) -> Result<f64, ArchiveError> {
        self.decode(key)?
            .as_real()
            .ok_or_else(|| ArchiveError::InvalidField(key.to_string(), "real"))
    }

    pub fn decode_bool(&mut self, key: &str) -> Result<bool, ArchiveError> {
        self.decode(key)?
            .as_bool()
            .ok_or_else(|| ArchiveError::InvalidField(key.to_string(), "bool"))
    }

    /// Decode a date, stored either as a date or as seconds since `2001-01-01T00:00:00Z`
    pub fn decode_timestamp(&mut self, key: &str) -> Result<Timestamp, ArchiveError> {
        match self.decode(key)? {
            Value::Date(stamp) => Ok(stamp),
            other => other
                .as_real()
                .map(Timestamp::from_apple_offset)
                .ok_or_else(|| ArchiveError::InvalidField(key.to_string(), "date")),
        }
    }

    pub fn decode_data(&mut self, key: &str) -> Result<Vec<u8>, ArchiveError> {
        match self.decode(key)? {
            Value::Data(node) => node
                .try_borrow()
                .map(|bytes| bytes.clone())
                .ok_or(ArchiveError::ObjectUnavailable("reading data")),
            _ => Err(ArchiveError::InvalidField(key.to_string(), "data")),
        }
    }
}

/// Parse `bplist00` bytes as a keyed archive and decode its root object
pub fn unarchive(
    bytes: &[u8],
    registry: &ClassRegistry,
    unknown: UnknownClasses,
) -> Result<Value, ArchiveError> {
    let document = parse(bytes)?;
    Unarchiver::from_document(&document, registry, unknown)?.top_object()
}
