/*!
 Contains logic and data structures used to read and write Apple's binary property list format.

 ## Overview

 A `bplist00` file is a flat table of objects: a magic header, the objects themselves,
 an offset table locating each object, and a fixed 32 byte trailer. Containers never
 embed their members; they store references into the offset table instead.

 This module can work at either level:

 - [`parser::parse_table`] and [`writer::serialize_table`] operate on the flat [`ObjectTable`](models::ObjectTable)
 - [`parser::parse`] and [`writer::serialize`] operate on a tree of [`PlistValue`](models::PlistValue)s
*/

pub mod models;
pub mod parser;
pub mod writer;
mod tests;

pub use models::{Dictionary, ObjectTable, PlistValue, TableEntry};
pub use parser::{parse, parse_table};
pub use writer::{serialize, serialize_table};
