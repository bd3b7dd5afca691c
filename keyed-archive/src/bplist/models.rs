/*!
 Data structures used to represent `bplist00` data, both as a flat table of objects and as a tree of values.
*/

use indexmap::IndexMap;

/// The magic bytes every `bplist00` file starts with
pub const MAGIC: &[u8; 8] = b"bplist00";
/// Length in bytes of the trailer at the end of every `bplist00` file
pub const TRAILER_LENGTH: usize = 32;

/// A dictionary as stored in a property list; keys are always strings
pub type Dictionary = IndexMap<String, PlistValue>;

/// Any value that can be stored in a binary property list
#[derive(Debug, Clone, PartialEq)]
pub enum PlistValue {
    /// The `null` object, rarely emitted by Apple's own writers
    Null,
    Bool(bool),
    /// Integers of every stored width are coerced into this container
    Integer(i64),
    /// Single and double precision floats are coerced into this container
    Real(f64),
    /// Seconds since `2001-01-01T00:00:00Z`
    Date(f64),
    /// Arbitrary bytes
    Data(Vec<u8>),
    /// Text, decoded from either the ASCII or the UTF-16 representation
    String(String),
    Array(Vec<PlistValue>),
    Set(Vec<PlistValue>),
    Dictionary(Dictionary),
    /// An index into the `$objects` table of a keyed archive
    Uid(u64),
}

impl PlistValue {
    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            PlistValue::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PlistValue]> {
        match self {
            PlistValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            PlistValue::String(string) => Some(string),
            _ => None,
        }
    }

    pub fn as_uid(&self) -> Option<u64> {
        match self {
            PlistValue::Uid(uid) => Some(*uid),
            _ => None,
        }
    }

    pub fn as_signed_integer(&self) -> Option<i64> {
        match self {
            PlistValue::Integer(int) => Some(*int),
            _ => None,
        }
    }

    /// Reals are returned as-is; integers are widened so callers do not need to care how a number was stored
    pub fn as_real(&self) -> Option<f64> {
        match self {
            PlistValue::Real(real) => Some(*real),
            PlistValue::Integer(int) => Some(*int as f64),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            PlistValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            PlistValue::Data(data) => Some(data),
            _ => None,
        }
    }

    /// A short name for the kind of value, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            PlistValue::Null => "null",
            PlistValue::Bool(_) => "bool",
            PlistValue::Integer(_) => "integer",
            PlistValue::Real(_) => "real",
            PlistValue::Date(_) => "date",
            PlistValue::Data(_) => "data",
            PlistValue::String(_) => "string",
            PlistValue::Array(_) => "array",
            PlistValue::Set(_) => "set",
            PlistValue::Dictionary(_) => "dictionary",
            PlistValue::Uid(_) => "uid",
        }
    }
}

impl From<&str> for PlistValue {
    fn from(value: &str) -> Self {
        PlistValue::String(value.to_string())
    }
}

impl From<String> for PlistValue {
    fn from(value: String) -> Self {
        PlistValue::String(value)
    }
}

impl From<i64> for PlistValue {
    fn from(value: i64) -> Self {
        PlistValue::Integer(value)
    }
}

impl From<bool> for PlistValue {
    fn from(value: bool) -> Self {
        PlistValue::Bool(value)
    }
}

impl From<f64> for PlistValue {
    fn from(value: f64) -> Self {
        PlistValue::Real(value)
    }
}

impl From<Dictionary> for PlistValue {
    fn from(value: Dictionary) -> Self {
        PlistValue::Dictionary(value)
    }
}

/// A single object as it sits in the object table: scalars are stored literally,
/// containers only hold references to other entries in the table
#[derive(Debug, Clone, PartialEq)]
pub enum TableEntry {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Date(f64),
    Data(Vec<u8>),
    String(String),
    Uid(u64),
    Array(Vec<u64>),
    Set(Vec<u64>),
    /// Key and value references, paired positionally
    Dictionary(Vec<(u64, u64)>),
}

impl TableEntry {
    /// References this entry holds to other entries in the table
    pub(crate) fn references(&self) -> Vec<u64> {
        match self {
            TableEntry::Array(refs) | TableEntry::Set(refs) => refs.clone(),
            TableEntry::Dictionary(pairs) => pairs.iter().flat_map(|(k, v)| [*k, *v]).collect(),
            _ => vec![],
        }
    }
}

/// The flat representation of a `bplist00` file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectTable {
    /// Every object in the file, in offset table order
    pub objects: Vec<TableEntry>,
    /// Index of the root object
    pub top: u64,
}

/// The 32 bytes at the end of every `bplist00` file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub sort_version: u8,
    /// Width in bytes of each entry in the offset table
    pub offset_int_size: u8,
    /// Width in bytes of each object reference inside a container
    pub object_ref_size: u8,
    pub num_objects: u64,
    pub top_object: u64,
    pub offset_table_offset: u64,
}

impl Trailer {
    pub(crate) fn from_bytes(bytes: &[u8; TRAILER_LENGTH]) -> Self {
        let mut num_objects = [0; 8];
        let mut top_object = [0; 8];
        let mut offset_table_offset = [0; 8];
        num_objects.copy_from_slice(&bytes[8..16]);
        top_object.copy_from_slice(&bytes[16..24]);
        offset_table_offset.copy_from_slice(&bytes[24..32]);

        Self {
            sort_version: bytes[5],
            offset_int_size: bytes[6],
            object_ref_size: bytes[7],
            num_objects: u64::from_be_bytes(num_objects),
            top_object: u64::from_be_bytes(top_object),
            offset_table_offset: u64::from_be_bytes(offset_table_offset),
        }
    }

    pub(crate) fn to_bytes(self) -> [u8; TRAILER_LENGTH] {
        let mut bytes = [0; TRAILER_LENGTH];
        bytes[5] = self.sort_version;
        bytes[6] = self.offset_int_size;
        bytes[7] = self.object_ref_size;
        bytes[8..16].copy_from_slice(&self.num_objects.to_be_bytes());
        bytes[16..24].copy_from_slice(&self.top_object.to_be_bytes());
        bytes[24..32].copy_from_slice(&self.offset_table_offset.to_be_bytes());
        bytes
    }
}

/// Type markers stored in the high nibble of each object's tag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Marker {
    /// `null`, booleans, and fill bytes
    Simple,
    Integer,
    Real,
    Date,
    Data,
    AsciiString,
    Utf16String,
    Uid,
    Array,
    Set,
    Dictionary,
    Unknown(u8),
}

impl Marker {
    pub(crate) fn from_byte(byte: u8) -> Self {
        match byte >> 4 {
            0x0 => Self::Simple,
            0x1 => Self::Integer,
            0x2 => Self::Real,
            0x3 => Self::Date,
            0x4 => Self::Data,
            0x5 => Self::AsciiString,
            0x6 => Self::Utf16String,
            0x8 => Self::Uid,
            0xA => Self::Array,
            0xC => Self::Set,
            0xD => Self::Dictionary,
            _ => Self::Unknown(byte),
        }
    }

    pub(crate) fn to_nibble(self) -> u8 {
        match self {
            Self::Simple => 0x00,
            Self::Integer => 0x10,
            Self::Real => 0x20,
            Self::Date => 0x30,
            Self::Data => 0x40,
            Self::AsciiString => 0x50,
            Self::Utf16String => 0x60,
            Self::Uid => 0x80,
            Self::Array => 0xA0,
            Self::Set => 0xC0,
            Self::Dictionary => 0xD0,
            Self::Unknown(byte) => byte & 0xF0,
        }
    }
}

/// Smallest of 1, 2, 4, or 8 bytes that can hold `value`
pub(crate) fn int_width(value: u64) -> u8 {
    if value <= u8::MAX as u64 {
        1
    } else if value <= u16::MAX as u64 {
        2
    } else if value <= u32::MAX as u64 {
        4
    } else {
        8
    }
}
