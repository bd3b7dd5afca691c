/*!
 Errors that can happen when parsing or generating `bplist00` data.
*/

use thiserror::Error;

/// Errors that can happen when parsing `bplist00` data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid header: expected `bplist00`!")]
    InvalidMagic,
    #[error("Data is {0:x} bytes long, too short to hold a trailer!")]
    TruncatedTrailer(usize),
    #[error("Offset table is invalid: {0}")]
    BadOffsetTable(String),
    #[error("Object reference {0} is outside of the {1} object table!")]
    RefOutOfRange(u64, u64),
    #[error("Size selector {0:#04x} is not supported!")]
    UnsupportedSizeSelector(u8),
    #[error("Object {0} runs past the end of the object data!")]
    TruncatedObject(u64),
    #[error("Object {0} has unknown type marker {1:#04x}!")]
    UnknownObjectType(u64, u8),
    #[error("Object {0} is not a valid string!")]
    InvalidString(u64),
    #[error("Dictionary key object {0} is not a string!")]
    NonStringKey(u64),
    #[error("Container object {0} contains itself!")]
    RecursiveContainer(u64),
    #[error("Container object {0} is nested too deeply!")]
    TooDeep(u64),
    #[error("Object {0} expands to more values than the table can hold!")]
    ExpansionLimit(u64),
}

/// Errors that can happen when generating `bplist00` data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializeError {
    #[error("Object {0} references missing object {1}!")]
    DanglingReference(usize, u64),
    #[error("Top object {0} is outside of the {1} object table!")]
    TopOutOfRange(u64, usize),
    #[error("Cannot write an empty object table!")]
    EmptyTable,
}
