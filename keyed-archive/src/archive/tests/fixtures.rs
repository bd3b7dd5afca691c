#![cfg(test)]

use std::any::Any;

use tracing_subscriber::EnvFilter;

use crate::{
    archive::{
        archiver::ArchivingObject,
        models::{ArchiveObject, ClassChain, Mutability, Value},
        registry::{Archive, ClassRegistry},
        unarchiver::ArchivedObject,
    },
    bplist::{
        models::{Dictionary, PlistValue},
        parser::parse,
        writer::serialize,
    },
    error::archive::ArchiveError,
};

/// A native class with one field of every kind
#[derive(Debug, Default)]
pub(super) struct Foo {
    pub(super) title: Value,
    pub(super) stamp: Value,
    pub(super) count: Value,
    pub(super) categories: Value,
    pub(super) metadata: Value,
    pub(super) empty: Value,
    pub(super) recursive: Value,
}

impl ArchiveObject for Foo {
    fn classes(&self) -> ClassChain {
        ClassChain::from(["crap.Foo"])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Archive for Foo {
    fn decode_archive(&mut self, object: &mut ArchivedObject<'_, '_>) -> Result<(), ArchiveError> {
        self.title = object.decode("title")?;
        self.stamp = object.decode("stamp")?;
        self.count = object.decode("count")?;
        self.categories = object.decode("categories")?;
        self.metadata = object.decode("metadata")?;
        self.empty = object.decode("empty")?;
        self.recursive = object.decode("recurse")?;
        Ok(())
    }

    fn encode_archive(&self, object: &mut ArchivingObject<'_, '_>) -> Result<(), ArchiveError> {
        object.encode("title", &self.title)?;
        object.encode("stamp", &self.stamp)?;
        object.encode("count", &self.count)?;
        object.encode("categories", &self.categories)?;
        object.encode("metadata", &self.metadata)?;
        object.encode("empty", &self.empty)?;
        object.encode("recurse", &self.recursive)
    }
}

/// A native class holding plain strings, which only become arrays while archiving
#[derive(Debug, Default)]
pub(super) struct Tags {
    pub(super) first: Vec<String>,
    pub(super) second: Vec<String>,
}

impl ArchiveObject for Tags {
    fn classes(&self) -> ClassChain {
        ClassChain::from(["crap.Tags"])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn to_array(strings: &[String]) -> Value {
    Value::array(
        strings.iter().map(|tag| Value::from(tag.as_str())).collect(),
        Mutability::Immutable,
    )
}

fn from_array(value: &Value) -> Vec<String> {
    match value {
        Value::Array(node) => node
            .borrow()
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => vec![],
    }
}

impl Archive for Tags {
    fn decode_archive(&mut self, object: &mut ArchivedObject<'_, '_>) -> Result<(), ArchiveError> {
        self.first = from_array(&object.decode("first")?);
        self.second = from_array(&object.decode("second")?);
        Ok(())
    }

    fn encode_archive(&self, object: &mut ArchivingObject<'_, '_>) -> Result<(), ArchiveError> {
        // Each array is dropped as soon as it is written
        object.encode("first", &to_array(&self.first))?;
        object.encode("second", &to_array(&self.second))
    }
}

/// The Foundation classes plus `crap.Foo` and `crap.Tags`
pub(super) fn registry() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry.register_native::<Foo>(["crap.Foo"]);
    registry.register_native::<Tags>(["crap.Tags"]);
    registry
}

pub(super) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(super) fn uid(uid: u64) -> PlistValue {
    PlistValue::Uid(uid)
}

pub(super) fn dict(pairs: Vec<(&str, PlistValue)>) -> PlistValue {
    PlistValue::Dictionary(
        pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

/// A class metadata entry
pub(super) fn class(names: &[&str]) -> PlistValue {
    dict(vec![
        (
            "$classes",
            PlistValue::Array(names.iter().map(|name| PlistValue::from(*name)).collect()),
        ),
        ("$classname", PlistValue::from(names[0])),
    ])
}

/// A well formed archive header around `objects`, with the root at UID 1
pub(super) fn document(objects: Vec<PlistValue>) -> PlistValue {
    dict(vec![
        ("$version", PlistValue::Integer(100_000)),
        ("$archiver", PlistValue::from("NSKeyedArchiver")),
        ("$top", dict(vec![("root", uid(1))])),
        ("$objects", PlistValue::Array(objects)),
    ])
}

pub(super) fn to_bytes(document: &PlistValue) -> Vec<u8> {
    serialize(document).unwrap()
}

/// Look up a key in a header or object dictionary
pub(super) fn field<'a>(value: &'a PlistValue, key: &str) -> &'a PlistValue {
    value
        .as_dictionary()
        .and_then(|dict: &Dictionary| dict.get(key))
        .unwrap()
}

/// The `$objects` table of an archive
pub(super) fn objects(bytes: &[u8]) -> Vec<PlistValue> {
    let document = parse(bytes).unwrap();
    field(&document, "$objects").as_array().unwrap().to_vec()
}
