/*!
 Delegates for the Foundation classes every keyed archive uses: collections, data, strings, dates, and `NSNull`.

 Immutable classes are decoded in one step. Their mutable counterparts are allocated empty and
 filled afterwards, so a mutable collection may contain itself.
*/

use crate::{
    archive::{
        archiver::ArchivingObject,
        models::{ClassChain, Key, Map, Mutability, Shared, Value},
        registry::{AtomicClass, ClassRegistry, Delegate, IncrementalClass},
        unarchiver::ArchivedObject,
    },
    bplist::models::PlistValue,
    error::archive::ArchiveError,
};

const OBJECTS_KEY: &str = "NS.objects";
const KEYS_KEY: &str = "NS.keys";
const DATA_KEY: &str = "NS.data";
const BYTES_KEY: &str = "NS.bytes";
const STRING_KEY: &str = "NS.string";
const TIME_KEY: &str = "NS.time";

/// The kinds of collection that come in a mutable and an immutable class
#[derive(Debug, Clone, Copy)]
enum Contents {
    Array,
    Set,
    Dictionary,
    Data,
}

/// `NSArray`, `NSSet`, `NSDictionary`, `NSData`
struct Immutable(Contents);

/// `NSMutableArray`, `NSMutableSet`, `NSMutableDictionary`, `NSMutableData`
struct Mutable(Contents);

/// `NSString` and `NSMutableString`, both decoded into a plain string
struct StringClass;

struct DateClass;

struct NullClass;

/// Register every Foundation class by its most-derived name
pub(crate) fn register(registry: &mut ClassRegistry) {
    registry.register(["NSArray"], Delegate::atomic(Immutable(Contents::Array)));
    registry.register(["NSSet"], Delegate::atomic(Immutable(Contents::Set)));
    registry.register(
        ["NSDictionary"],
        Delegate::atomic(Immutable(Contents::Dictionary)),
    );
    registry.register(["NSData"], Delegate::atomic(Immutable(Contents::Data)));

    registry.register(
        ["NSMutableArray"],
        Delegate::incremental(Mutable(Contents::Array)),
    );
    registry.register(["NSMutableSet"], Delegate::incremental(Mutable(Contents::Set)));
    registry.register(
        ["NSMutableDictionary"],
        Delegate::incremental(Mutable(Contents::Dictionary)),
    );
    registry.register(
        ["NSMutableData"],
        Delegate::incremental(Mutable(Contents::Data)),
    );

    registry.register(["NSString"], Delegate::atomic(StringClass));
    registry.register(["NSMutableString"], Delegate::atomic(StringClass));
    registry.register(["NSDate"], Delegate::atomic(DateClass));
    registry.register(["NSNull"], Delegate::atomic(NullClass));
}

/// The class chain the archiver writes for a built-in value, or `None` if it is not stored as an object
pub(crate) fn classes_for(value: &Value) -> Option<ClassChain> {
    let mutable = value.mutability() == Some(Mutability::Mutable);
    let classes = match value {
        Value::Array(_) if mutable => ClassChain::from(["NSMutableArray", "NSArray", "NSObject"]),
        Value::Array(_) => ClassChain::from(["NSArray", "NSObject"]),
        Value::Set(_) if mutable => ClassChain::from(["NSMutableSet", "NSSet", "NSObject"]),
        Value::Set(_) => ClassChain::from(["NSSet", "NSObject"]),
        Value::Dictionary(_) if mutable => {
            ClassChain::from(["NSMutableDictionary", "NSDictionary", "NSObject"])
        }
        Value::Dictionary(_) => ClassChain::from(["NSDictionary", "NSObject"]),
        Value::Data(_) if mutable => ClassChain::from(["NSMutableData", "NSData", "NSObject"]),
        Value::Date(_) => ClassChain::from(["NSDate", "NSObject"]),
        _ => return None,
    };
    Some(classes)
}

/// Write the fields of a built-in value
pub(crate) fn encode_contents(
    value: &Value,
    object: &mut ArchivingObject<'_, '_>,
) -> Result<(), ArchiveError> {
    match value {
        Value::Array(node) | Value::Set(node) => {
            let items = node
                .try_borrow()
                .ok_or(ArchiveError::ObjectUnavailable("encoding a collection"))?;
            object.encode_all(OBJECTS_KEY, items.iter())
        }
        Value::Dictionary(node) => {
            let map = node
                .try_borrow()
                .ok_or(ArchiveError::ObjectUnavailable("encoding a dictionary"))?;
            let keys: Vec<Value> = map.keys().map(Value::from).collect();
            object.encode_all(KEYS_KEY, keys.iter())?;
            object.encode_all(OBJECTS_KEY, map.values())
        }
        Value::Data(node) => {
            let bytes = node
                .try_borrow()
                .ok_or(ArchiveError::ObjectUnavailable("encoding data"))?;
            object.encode_raw(DATA_KEY, PlistValue::Data(bytes.clone()));
            Ok(())
        }
        Value::String(_) => object.encode_object(STRING_KEY, value),
        Value::Date(stamp) => {
            object.encode_raw(TIME_KEY, PlistValue::Real(stamp.apple_offset()));
            Ok(())
        }
        Value::Null => Ok(()),
        _ => Err(ArchiveError::ObjectUnavailable(
            "encoding a native object as a Foundation class",
        )),
    }
}

fn decode_map(object: &mut ArchivedObject<'_, '_>) -> Result<Map, ArchiveError> {
    let keys = object.decode_all(KEYS_KEY)?;
    let values = object.decode_all(OBJECTS_KEY)?;
    if keys.len() != values.len() {
        return Err(ArchiveError::InvalidField(
            KEYS_KEY.to_string(),
            "key list as long as NS.objects",
        ));
    }

    keys.into_iter()
        .zip(values)
        .map(|(key, value)| {
            let key = match key {
                Value::String(string) => Key::String(string),
                Value::Integer(int) => Key::Integer(int),
                Value::Bool(b) => Key::Bool(b),
                _ => return Err(ArchiveError::UnsupportedKey(object.uid())),
            };
            Ok((key, value))
        })
        .collect()
}

/// Keyed archives written by Apple use `NS.data`; some older writers use `NS.bytes`
fn decode_bytes(object: &mut ArchivedObject<'_, '_>) -> Result<Vec<u8>, ArchiveError> {
    if object.contains(DATA_KEY) {
        object.decode_data(DATA_KEY)
    } else if object.contains(BYTES_KEY) {
        object.decode_data(BYTES_KEY)
    } else {
        Ok(vec![])
    }
}

fn replace<T>(node: &Shared<T>, contents: T) -> Result<(), ArchiveError> {
    *node
        .try_borrow_mut()
        .ok_or(ArchiveError::ObjectUnavailable("filling a Foundation collection"))? = contents;
    Ok(())
}

impl AtomicClass for Immutable {
    fn decode(
        &self,
        _classes: &ClassChain,
        object: &mut ArchivedObject<'_, '_>,
    ) -> Result<Value, ArchiveError> {
        Ok(match self.0 {
            Contents::Array => Value::array(object.decode_all(OBJECTS_KEY)?, Mutability::Immutable),
            Contents::Set => Value::set(object.decode_all(OBJECTS_KEY)?, Mutability::Immutable),
            Contents::Dictionary => Value::dictionary(decode_map(object)?, Mutability::Immutable),
            Contents::Data => Value::data(decode_bytes(object)?, Mutability::Immutable),
        })
    }

    fn encode(
        &self,
        value: &Value,
        object: &mut ArchivingObject<'_, '_>,
    ) -> Result<(), ArchiveError> {
        encode_contents(value, object)
    }
}

impl IncrementalClass for Mutable {
    fn allocate(&self, _classes: &ClassChain) -> Value {
        match self.0 {
            Contents::Array => Value::array(vec![], Mutability::Mutable),
            Contents::Set => Value::set(vec![], Mutability::Mutable),
            Contents::Dictionary => Value::dictionary(Map::new(), Mutability::Mutable),
            Contents::Data => Value::data(vec![], Mutability::Mutable),
        }
    }

    fn fill(&self, shell: &Value, object: &mut ArchivedObject<'_, '_>) -> Result<(), ArchiveError> {
        // Contents are fully decoded before the shell is borrowed, since they may contain the shell
        match shell {
            Value::Array(node) | Value::Set(node) => replace(node, object.decode_all(OBJECTS_KEY)?),
            Value::Dictionary(node) => replace(node, decode_map(object)?),
            Value::Data(node) => replace(node, decode_bytes(object)?),
            _ => Err(ArchiveError::ObjectUnavailable("filling a Foundation collection")),
        }
    }

    fn encode(
        &self,
        value: &Value,
        object: &mut ArchivingObject<'_, '_>,
    ) -> Result<(), ArchiveError> {
        encode_contents(value, object)
    }
}

impl AtomicClass for StringClass {
    fn decode(
        &self,
        _classes: &ClassChain,
        object: &mut ArchivedObject<'_, '_>,
    ) -> Result<Value, ArchiveError> {
        Ok(Value::String(object.decode_string(STRING_KEY)?))
    }

    fn encode(
        &self,
        value: &Value,
        object: &mut ArchivingObject<'_, '_>,
    ) -> Result<(), ArchiveError> {
        encode_contents(value, object)
    }
}

impl AtomicClass for DateClass {
    fn decode(
        &self,
        _classes: &ClassChain,
        object: &mut ArchivedObject<'_, '_>,
    ) -> Result<Value, ArchiveError> {
        Ok(Value::Date(object.decode_timestamp(TIME_KEY)?))
    }

    fn encode(
        &self,
        value: &Value,
        object: &mut ArchivingObject<'_, '_>,
    ) -> Result<(), ArchiveError> {
        encode_contents(value, object)
    }
}

impl AtomicClass for NullClass {
    fn decode(
        &self,
        _classes: &ClassChain,
        _object: &mut ArchivedObject<'_, '_>,
    ) -> Result<Value, ArchiveError> {
        Ok(Value::Null)
    }

    fn encode(
        &self,
        _value: &Value,
        _object: &mut ArchivingObject<'_, '_>,
    ) -> Result<(), ArchiveError> {
        Ok(())
    }
}
