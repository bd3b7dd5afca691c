/*!
 Contains logic to generate `bplist00` data from an [`ObjectTable`] or a tree of [`PlistValue`]s.
*/

use tracing::debug;

use crate::{
    bplist::models::{
        int_width, Marker, ObjectTable, PlistValue, TableEntry, Trailer, MAGIC, TRAILER_LENGTH,
    },
    error::bplist::SerializeError,
};

/// Counts at or above this value do not fit in the low nibble of a tag byte
const INLINE_COUNT_LIMIT: usize = 0x0F;

/// Contains logic and data used to write a `bplist00` file
#[derive(Debug)]
pub struct BplistWriter {
    /// The file being generated
    buffer: Vec<u8>,
    /// Where each object starts in `buffer`, in table order
    offsets: Vec<u64>,
    /// Width in bytes of each object reference
    ref_size: u8,
}

impl BplistWriter {
    fn new(num_objects: usize) -> Self {
        let mut buffer = Vec::with_capacity(MAGIC.len() + num_objects * 8 + TRAILER_LENGTH);
        buffer.extend_from_slice(MAGIC);
        Self {
            buffer,
            offsets: Vec::with_capacity(num_objects),
            ref_size: int_width(num_objects.saturating_sub(1) as u64),
        }
    }

    fn write_sized_uint(&mut self, value: u64, width: u8) {
        let bytes = value.to_be_bytes();
        self.buffer.extend_from_slice(&bytes[8 - width as usize..]);
    }

    /// Non-negative values use the narrowest unsigned form; negative values always take 8 bytes
    fn write_int(&mut self, value: i64) {
        let width = if value < 0 {
            8
        } else {
            int_width(value as u64)
        };
        self.buffer
            .push(Marker::Integer.to_nibble() | width.trailing_zeros() as u8);
        self.write_sized_uint(value as u64, width);
    }

    /// Write a tag byte, spilling the count into a trailing integer when it is too large for the low nibble
    fn write_header(&mut self, marker: Marker, count: usize) {
        if count < INLINE_COUNT_LIMIT {
            self.buffer.push(marker.to_nibble() | count as u8);
        } else {
            self.buffer.push(marker.to_nibble() | 0x0F);
            self.write_int(count as i64);
        }
    }

    fn write_refs(&mut self, refs: impl Iterator<Item = u64>) {
        let width = self.ref_size;
        refs.for_each(|reference| self.write_sized_uint(reference, width));
    }

    fn write_entry(&mut self, entry: &TableEntry) {
        self.offsets.push(self.buffer.len() as u64);

        match entry {
            TableEntry::Null => self.buffer.push(0x00),
            TableEntry::Bool(false) => self.buffer.push(0x08),
            TableEntry::Bool(true) => self.buffer.push(0x09),
            TableEntry::Integer(int) => self.write_int(*int),
            TableEntry::Real(real) => {
                self.buffer.push(Marker::Real.to_nibble() | 3);
                self.write_sized_uint(real.to_bits(), 8);
            }
            TableEntry::Date(offset) => {
                self.buffer.push(Marker::Date.to_nibble() | 3);
                self.write_sized_uint(offset.to_bits(), 8);
            }
            TableEntry::Data(data) => {
                self.write_header(Marker::Data, data.len());
                self.buffer.extend_from_slice(data);
            }
            TableEntry::String(string) if string.is_ascii() => {
                self.write_header(Marker::AsciiString, string.len());
                self.buffer.extend_from_slice(string.as_bytes());
            }
            TableEntry::String(string) => {
                let units: Vec<u16> = string.encode_utf16().collect();
                self.write_header(Marker::Utf16String, units.len());
                units
                    .iter()
                    .for_each(|unit| self.buffer.extend_from_slice(&unit.to_be_bytes()));
            }
            TableEntry::Uid(uid) => {
                let width = int_width(*uid);
                self.buffer.push(Marker::Uid.to_nibble() | (width - 1));
                self.write_sized_uint(*uid, width);
            }
            TableEntry::Array(refs) => {
                self.write_header(Marker::Array, refs.len());
                self.write_refs(refs.iter().copied());
            }
            TableEntry::Set(refs) => {
                self.write_header(Marker::Set, refs.len());
                self.write_refs(refs.iter().copied());
            }
            TableEntry::Dictionary(pairs) => {
                self.write_header(Marker::Dictionary, pairs.len());
                self.write_refs(pairs.iter().map(|(key, _)| *key));
                self.write_refs(pairs.iter().map(|(_, value)| *value));
            }
        }
    }

    /// Append the offset table and trailer, consuming the writer
    fn finish(mut self, top: u64) -> Vec<u8> {
        let offset_table_offset = self.buffer.len() as u64;
        let offset_int_size = int_width(self.offsets.iter().copied().max().unwrap_or(0));

        let offsets = std::mem::take(&mut self.offsets);
        offsets
            .iter()
            .for_each(|offset| self.write_sized_uint(*offset, offset_int_size));

        let trailer = Trailer {
            sort_version: 0,
            offset_int_size,
            object_ref_size: self.ref_size,
            num_objects: offsets.len() as u64,
            top_object: top,
            offset_table_offset,
        };
        self.buffer.extend_from_slice(&trailer.to_bytes());
        self.buffer
    }
}

/// Write a flat table of objects as `bplist00` bytes.
///
/// The table is written exactly as given: objects are neither reordered nor deduplicated.
pub fn serialize_table(table: &ObjectTable) -> Result<Vec<u8>, SerializeError> {
    let count = table.objects.len();
    if count == 0 {
        return Err(SerializeError::EmptyTable);
    }
    if table.top >= count as u64 {
        return Err(SerializeError::TopOutOfRange(table.top, count));
    }
    for (index, entry) in table.objects.iter().enumerate() {
        if let Some(dangling) = entry
            .references()
            .into_iter()
            .find(|reference| *reference >= count as u64)
        {
            return Err(SerializeError::DanglingReference(index, dangling));
        }
    }

    let mut writer = BplistWriter::new(count);
    table
        .objects
        .iter()
        .for_each(|entry| writer.write_entry(entry));

    debug!(
        objects = count,
        ref_size = writer.ref_size,
        "serialized bplist object table"
    );
    Ok(writer.finish(table.top))
}

/// Flatten a tree of values into a table with one entry per node, root first
pub fn flatten(value: &PlistValue) -> ObjectTable {
    let mut objects = vec![];
    flatten_into(value, &mut objects);
    ObjectTable { objects, top: 0 }
}

fn flatten_into(value: &PlistValue, objects: &mut Vec<TableEntry>) -> u64 {
    let index = objects.len();
    // Reserve the slot so the parent precedes its children
    objects.push(TableEntry::Null);

    let entry = match value {
        PlistValue::Null => TableEntry::Null,
        PlistValue::Bool(b) => TableEntry::Bool(*b),
        PlistValue::Integer(int) => TableEntry::Integer(*int),
        PlistValue::Real(real) => TableEntry::Real(*real),
        PlistValue::Date(offset) => TableEntry::Date(*offset),
        PlistValue::Data(data) => TableEntry::Data(data.clone()),
        PlistValue::String(string) => TableEntry::String(string.clone()),
        PlistValue::Uid(uid) => TableEntry::Uid(*uid),
        PlistValue::Array(items) => TableEntry::Array(
            items
                .iter()
                .map(|item| flatten_into(item, objects))
                .collect(),
        ),
        PlistValue::Set(items) => TableEntry::Set(
            items
                .iter()
                .map(|item| flatten_into(item, objects))
                .collect(),
        ),
        PlistValue::Dictionary(dict) => {
            let keys: Vec<u64> = dict
                .keys()
                .map(|key| flatten_into(&PlistValue::String(key.clone()), objects))
                .collect();
            let values: Vec<u64> = dict
                .values()
                .map(|value| flatten_into(value, objects))
                .collect();
            TableEntry::Dictionary(keys.into_iter().zip(values).collect())
        }
    };

    objects[index] = entry;
    index as u64
}

/// Write a tree of values as `bplist00` bytes
pub fn serialize(value: &PlistValue) -> Result<Vec<u8>, SerializeError> {
    serialize_table(&flatten(value))
}
