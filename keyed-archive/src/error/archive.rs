/*!
 Errors that can happen when unarchiving or archiving `NSKeyedArchiver` object graphs.
*/

use thiserror::Error;

use crate::error::bplist::{ParseError, SerializeError};

/// Errors that can happen when converting between a keyed archive and native values
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to parse bplist: {0}")]
    Parse(#[from] ParseError),
    #[error("Failed to write bplist: {0}")]
    Serialize(#[from] SerializeError),
    #[error("Unsupported encoder: `{0}`")]
    UnsupportedArchiver(String),
    #[error("Unsupported archive version: expected 100000, got `{0}`")]
    UnsupportedArchiveVersion(String),
    #[error("Archive has no top object!")]
    MissingTopObject,
    #[error("Top object has no `root` UID!")]
    MissingTopObjectUID,
    #[error("Archive has no objects array!")]
    MissingObjectsArray,
    #[error("$class {0} has no metadata!")]
    MissingClassMetaData(u64),
    #[error("$class {0} has no $classname!")]
    MissingClassName(u64),
    #[error("Object {0} has a $class that is not a UID!")]
    MissingClassUID(u64),
    #[error("No mapping for class chain {0:?}")]
    MissingClassMapping(Vec<String>),
    #[error("Archive has a cycle through immutable object {0}!")]
    CircularReference(u64),
    #[error("Object {0} is nested too deeply!")]
    TooDeep(u64),
    #[error("UID {0} is outside of the {1} object table!")]
    UidOutOfRange(u64, usize),
    #[error("Object {0} cannot be used as a dictionary key!")]
    UnsupportedKey(u64),
    #[error("Field `{0}` is not a valid {1}!")]
    InvalidField(String, &'static str),
    #[error("Cannot access object while {0}: it has a different type or is already borrowed!")]
    ObjectUnavailable(&'static str),
}
