/*!
 Contains logic to parse `bplist00` data into an [`ObjectTable`] and from there into a tree of [`PlistValue`]s.

 Layout referenced from Apple's [`CFBinaryPList.c`](https://opensource.apple.com/source/CF/CF-1153.18/CFBinaryPList.c.auto.html).
*/

use tracing::trace;

use crate::{
    bplist::models::{
        Dictionary, Marker, ObjectTable, PlistValue, TableEntry, Trailer, MAGIC, TRAILER_LENGTH,
    },
    error::bplist::ParseError,
};

/// Contains logic and data used to parse data from a `bplist00` file
#[derive(Debug)]
pub struct BplistReader<'a> {
    /// The raw file we want to parse
    stream: &'a [u8],
    /// The current index we are at in the stream
    idx: usize,
    /// The object currently being read, used when reporting errors
    current: u64,
    /// Object data ends where the offset table begins
    data_end: usize,
    trailer: Trailer,
}

impl<'a> BplistReader<'a> {
    /// Validate the header and trailer of `stream` and prepare to read its objects
    pub fn new(stream: &'a [u8]) -> Result<Self, ParseError> {
        if stream.get(..MAGIC.len()) != Some(MAGIC.as_slice()) {
            return Err(ParseError::InvalidMagic);
        }
        if stream.len() < MAGIC.len() + TRAILER_LENGTH {
            return Err(ParseError::TruncatedTrailer(stream.len()));
        }

        let trailer_start = stream.len() - TRAILER_LENGTH;
        let trailer_bytes: &[u8; TRAILER_LENGTH] = stream[trailer_start..]
            .try_into()
            .map_err(|_| ParseError::TruncatedTrailer(stream.len()))?;
        let trailer = Trailer::from_bytes(trailer_bytes);

        for size in [trailer.offset_int_size, trailer.object_ref_size] {
            if !(1..=8).contains(&size) {
                return Err(ParseError::UnsupportedSizeSelector(size));
            }
        }

        if trailer.num_objects == 0 {
            return Err(ParseError::BadOffsetTable("table has no objects".to_string()));
        }
        if trailer.top_object >= trailer.num_objects {
            return Err(ParseError::RefOutOfRange(
                trailer.top_object,
                trailer.num_objects,
            ));
        }

        let table_start = usize::try_from(trailer.offset_table_offset).ok();
        let table_end = table_start.and_then(|start| {
            usize::try_from(trailer.num_objects)
                .ok()?
                .checked_mul(trailer.offset_int_size as usize)?
                .checked_add(start)
        });
        let data_end = match (table_start, table_end) {
            (Some(start), Some(end)) if start >= MAGIC.len() && end <= trailer_start => start,
            _ => {
                return Err(ParseError::BadOffsetTable(format!(
                    "{} entries at {:x} do not fit before the trailer at {trailer_start:x}",
                    trailer.num_objects, trailer.offset_table_offset
                )))
            }
        };

        Ok(Self {
            stream,
            idx: MAGIC.len(),
            current: trailer.top_object,
            data_end,
            trailer,
        })
    }

    /// The trailer of the file being read
    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    /// Read every object in the file into a flat table
    pub fn parse_table(&mut self) -> Result<ObjectTable, ParseError> {
        let objects = (0..self.trailer.num_objects)
            .map(|index| self.read_object(index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ObjectTable {
            objects,
            top: self.trailer.top_object,
        })
    }

    /// Read exactly `n` bytes from the object data
    fn read_exact_bytes(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .idx
            .checked_add(n)
            .filter(|end| *end <= self.data_end)
            .ok_or(ParseError::TruncatedObject(self.current))?;
        let stream: &'a [u8] = self.stream;
        let range = &stream[self.idx..end];
        self.idx = end;
        Ok(range)
    }

    /// Read the current byte and advance past it
    fn read_byte(&mut self) -> Result<u8, ParseError> {
        Ok(self.read_exact_bytes(1)?[0])
    }

    /// Read a big-endian unsigned integer `width` bytes wide, where `width` is at most 8
    fn read_sized_uint(&mut self, width: usize) -> Result<u64, ParseError> {
        Ok(self
            .read_exact_bytes(width)?
            .iter()
            .fold(0, |acc, byte| (acc << 8) | *byte as u64))
    }

    /// Look up where object `index` starts in the stream
    fn get_offset(&self, index: u64) -> Result<usize, ParseError> {
        let width = self.trailer.offset_int_size as usize;
        // The offset table was bounds checked in `new()`
        let start = self.data_end + index as usize * width;
        let offset = self.stream[start..start + width]
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | *byte as u64);

        match usize::try_from(offset) {
            Ok(offset) if offset >= MAGIC.len() && offset < self.data_end => Ok(offset),
            _ => Err(ParseError::BadOffsetTable(format!(
                "object {index} starts at {offset:x}, outside of the object data"
            ))),
        }
    }

    /// Read the number of items in a container, string, or data object.
    /// Counts of 15 or more are stored in a trailing integer object.
    fn read_count(&mut self, low: u8) -> Result<usize, ParseError> {
        if low != 0x0F {
            return Ok(low as usize);
        }

        let tag = self.read_byte()?;
        if Marker::from_byte(tag) != Marker::Integer || tag & 0x0F > 3 {
            return Err(ParseError::UnsupportedSizeSelector(tag));
        }
        let count = self.read_sized_uint(1 << (tag & 0x0F))?;
        usize::try_from(count).map_err(|_| ParseError::TruncatedObject(self.current))
    }

    /// Read `count` object references, checking each one points inside the table
    fn read_refs(&mut self, count: usize) -> Result<Vec<u64>, ParseError> {
        let width = self.trailer.object_ref_size as usize;
        // Fail before allocating if the refs cannot possibly fit
        if count.saturating_mul(width) > self.data_end.saturating_sub(self.idx) {
            return Err(ParseError::TruncatedObject(self.current));
        }

        (0..count)
            .map(|_| {
                let reference = self.read_sized_uint(width)?;
                if reference >= self.trailer.num_objects {
                    return Err(ParseError::RefOutOfRange(
                        reference,
                        self.trailer.num_objects,
                    ));
                }
                Ok(reference)
            })
            .collect()
    }

    /// Read the object at `index` in the offset table
    pub fn read_object(&mut self, index: u64) -> Result<TableEntry, ParseError> {
        self.current = index;
        self.idx = self.get_offset(index)?;

        let tag = self.read_byte()?;
        let low = tag & 0x0F;
        trace!(index, tag, "reading bplist object");

        match Marker::from_byte(tag) {
            Marker::Simple => match low {
                // Fill bytes carry no value
                0x0 | 0xF => Ok(TableEntry::Null),
                0x8 => Ok(TableEntry::Bool(false)),
                0x9 => Ok(TableEntry::Bool(true)),
                _ => Err(ParseError::UnknownObjectType(index, tag)),
            },
            Marker::Integer => {
                let value = match low {
                    0..=2 => self.read_sized_uint(1 << low)? as i64,
                    // Only the 8 byte form is signed
                    3 => self.read_sized_uint(8)? as i64,
                    _ => return Err(ParseError::UnsupportedSizeSelector(tag)),
                };
                Ok(TableEntry::Integer(value))
            }
            Marker::Real => match low {
                2 => Ok(TableEntry::Real(
                    f32::from_bits(self.read_sized_uint(4)? as u32) as f64,
                )),
                3 => Ok(TableEntry::Real(f64::from_bits(self.read_sized_uint(8)?))),
                _ => Err(ParseError::UnsupportedSizeSelector(tag)),
            },
            Marker::Date => match low {
                3 => Ok(TableEntry::Date(f64::from_bits(self.read_sized_uint(8)?))),
                _ => Err(ParseError::UnsupportedSizeSelector(tag)),
            },
            Marker::Data => {
                let length = self.read_count(low)?;
                Ok(TableEntry::Data(self.read_exact_bytes(length)?.to_vec()))
            }
            Marker::AsciiString => {
                let length = self.read_count(low)?;
                // Bytes above 0x7F are interpreted as Latin-1, which maps directly onto `char`
                let string = self
                    .read_exact_bytes(length)?
                    .iter()
                    .map(|byte| *byte as char)
                    .collect();
                Ok(TableEntry::String(string))
            }
            Marker::Utf16String => {
                let length = self.read_count(low)?;
                let bytes = self.read_exact_bytes(
                    length
                        .checked_mul(2)
                        .ok_or(ParseError::TruncatedObject(index))?,
                )?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units)
                    .map(TableEntry::String)
                    .map_err(|_| ParseError::InvalidString(index))
            }
            Marker::Uid => {
                let width = low as usize + 1;
                if width > 8 {
                    return Err(ParseError::UnsupportedSizeSelector(tag));
                }
                Ok(TableEntry::Uid(self.read_sized_uint(width)?))
            }
            Marker::Array => {
                let count = self.read_count(low)?;
                Ok(TableEntry::Array(self.read_refs(count)?))
            }
            Marker::Set => {
                let count = self.read_count(low)?;
                Ok(TableEntry::Set(self.read_refs(count)?))
            }
            Marker::Dictionary => {
                let count = self.read_count(low)?;
                let keys = self.read_refs(count)?;
                let values = self.read_refs(count)?;
                Ok(TableEntry::Dictionary(keys.into_iter().zip(values).collect()))
            }
            Marker::Unknown(_) => Err(ParseError::UnknownObjectType(index, tag)),
        }
    }
}

/// Containers nested deeper than this are rejected
pub const MAX_DEPTH: usize = 512;

/// How many nodes a tree may hold per reference in the table it is built from
const EXPANSION_FACTOR: usize = 8;

impl ObjectTable {
    /// Build the tree of values rooted at the top object.
    ///
    /// Containers shared by several parents are copied into each of them, so the tree is limited to
    /// a fixed multiple of the references in the table.
    pub fn to_value(&self) -> Result<PlistValue, ParseError> {
        let references: usize = self
            .objects
            .iter()
            .map(|entry| match entry {
                TableEntry::Array(refs) | TableEntry::Set(refs) => refs.len(),
                TableEntry::Dictionary(pairs) => pairs.len() * 2,
                _ => 0,
            })
            .sum();

        TreeBuilder {
            table: self,
            visiting: vec![false; self.objects.len()],
            remaining: references
                .saturating_add(1)
                .saturating_mul(EXPANSION_FACTOR),
            depth: 0,
        }
        .build_value(self.top)
    }

    fn get_entry(&self, index: u64) -> Result<&TableEntry, ParseError> {
        usize::try_from(index)
            .ok()
            .and_then(|idx| self.objects.get(idx))
            .ok_or(ParseError::RefOutOfRange(index, self.objects.len() as u64))
    }
}

/// State of one expansion of an [`ObjectTable`] into a tree
struct TreeBuilder<'t> {
    table: &'t ObjectTable,
    /// Containers on the path from the top object to the current one
    visiting: Vec<bool>,
    /// Nodes that may still be built
    remaining: usize,
    depth: usize,
}

impl<'t> TreeBuilder<'t> {
    fn build_value(&mut self, index: u64) -> Result<PlistValue, ParseError> {
        let table = self.table;
        let entry = table.get_entry(index)?;
        self.remaining = self
            .remaining
            .checked_sub(1)
            .ok_or(ParseError::ExpansionLimit(index))?;

        Ok(match entry {
            TableEntry::Null => PlistValue::Null,
            TableEntry::Bool(b) => PlistValue::Bool(*b),
            TableEntry::Integer(int) => PlistValue::Integer(*int),
            TableEntry::Real(real) => PlistValue::Real(*real),
            TableEntry::Date(offset) => PlistValue::Date(*offset),
            TableEntry::Data(data) => PlistValue::Data(data.clone()),
            TableEntry::String(string) => PlistValue::String(string.clone()),
            TableEntry::Uid(uid) => PlistValue::Uid(*uid),
            TableEntry::Array(refs) => {
                PlistValue::Array(self.nested(index, |builder| builder.build_items(refs))?)
            }
            TableEntry::Set(refs) => {
                PlistValue::Set(self.nested(index, |builder| builder.build_items(refs))?)
            }
            TableEntry::Dictionary(pairs) => PlistValue::Dictionary(
                self.nested(index, |builder| builder.build_dictionary(pairs))?,
            ),
        })
    }

    /// Build the members of the container at `index`, guarding against recursion and deep nesting
    fn nested<T>(
        &mut self,
        index: u64,
        build: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        // Only containers can recurse, so only they need to be tracked
        if self.visiting[index as usize] {
            return Err(ParseError::RecursiveContainer(index));
        }
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::TooDeep(index));
        }

        self.visiting[index as usize] = true;
        self.depth += 1;
        let members = build(self);
        self.depth -= 1;
        self.visiting[index as usize] = false;
        members
    }

    fn build_items(&mut self, refs: &[u64]) -> Result<Vec<PlistValue>, ParseError> {
        refs.iter().map(|item| self.build_value(*item)).collect()
    }

    fn build_dictionary(&mut self, pairs: &[(u64, u64)]) -> Result<Dictionary, ParseError> {
        let mut dict = Dictionary::with_capacity(pairs.len());
        for (key, value) in pairs {
            let key_string = match self.table.get_entry(*key)? {
                TableEntry::String(string) => string.clone(),
                _ => return Err(ParseError::NonStringKey(*key)),
            };
            dict.insert(key_string, self.build_value(*value)?);
        }
        Ok(dict)
    }
}

/// Parse `bplist00` bytes into a flat table of objects
pub fn parse_table(bytes: &[u8]) -> Result<ObjectTable, ParseError> {
    BplistReader::new(bytes)?.parse_table()
}

/// Parse `bplist00` bytes into a tree of values rooted at the top object
pub fn parse(bytes: &[u8]) -> Result<PlistValue, ParseError> {
    parse_table(bytes)?.to_value()
}
